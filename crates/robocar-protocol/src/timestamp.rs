//! 秒 + 微秒时间戳
//!
//! 时间戳在消息构造时记录，而不是发送时。

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// 采集时间（墙钟，UNIX 纪元起）
///
/// 线上编码为两个 8 字节整数：秒、微秒。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Timestamp {
    pub sec: i64,
    pub usec: i64,
}

impl Timestamp {
    pub const fn new(sec: i64, usec: i64) -> Self {
        Self { sec, usec }
    }

    /// 当前墙钟时间
    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    /// 从 `SystemTime` 转换（早于纪元的时间取负值）
    pub fn from_system_time(time: SystemTime) -> Self {
        match time.duration_since(UNIX_EPOCH) {
            Ok(d) => Self {
                sec: d.as_secs() as i64,
                usec: d.subsec_micros() as i64,
            },
            Err(e) => {
                let d = e.duration();
                let mut sec = -(d.as_secs() as i64);
                let mut usec = -(d.subsec_micros() as i64);
                if usec < 0 {
                    sec -= 1;
                    usec += 1_000_000;
                }
                Self { sec, usec }
            },
        }
    }

    /// 转换为 `SystemTime`；超出平台可表示范围时返回 `None`
    pub fn to_system_time(self) -> Option<SystemTime> {
        let micros = self.total_micros();
        let magnitude = Duration::from_micros(u64::try_from(micros.unsigned_abs()).ok()?);
        if micros >= 0 {
            UNIX_EPOCH.checked_add(magnitude)
        } else {
            UNIX_EPOCH.checked_sub(magnitude)
        }
    }

    /// 总微秒数
    pub fn as_micros(self) -> i64 {
        self.sec.saturating_mul(1_000_000).saturating_add(self.usec)
    }

    /// 以秒为单位的浮点值
    pub fn as_secs_f64(self) -> f64 {
        self.sec as f64 + self.usec as f64 * 1e-6
    }

    /// `self - earlier`，单位秒（可能为负）
    ///
    /// 差值超出 i64 微秒范围时返回 `None`。
    pub fn seconds_since(self, earlier: Timestamp) -> Option<f64> {
        let micros = i64::try_from(self.total_micros() - earlier.total_micros()).ok()?;
        Some(micros as f64 * 1e-6)
    }

    // i128 容纳任意 (sec, usec) 组合，不会溢出
    fn total_micros(self) -> i128 {
        i128::from(self.sec) * 1_000_000 + i128::from(self.usec)
    }

    /// 向后偏移一段时长（测试和模拟设备使用）
    pub fn offset(self, d: Duration) -> Self {
        let micros = self.as_micros().saturating_add(d.as_micros() as i64);
        Self {
            sec: micros.div_euclid(1_000_000),
            usec: micros.rem_euclid(1_000_000),
        }
    }

    pub(crate) fn to_le_bytes(self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[..8].copy_from_slice(&self.sec.to_le_bytes());
        out[8..].copy_from_slice(&self.usec.to_le_bytes());
        out
    }

    pub(crate) fn from_le_bytes(bytes: &[u8; 16]) -> Self {
        let mut sec = [0u8; 8];
        let mut usec = [0u8; 8];
        sec.copy_from_slice(&bytes[..8]);
        usec.copy_from_slice(&bytes[8..]);
        Self {
            sec: i64::from_le_bytes(sec),
            usec: i64::from_le_bytes(usec),
        }
    }
}

impl From<SystemTime> for Timestamp {
    fn from(time: SystemTime) -> Self {
        Self::from_system_time(time)
    }
}
