//! 激光扫描负载
//!
//! ```text
//! 6 × f32   min_angle, max_angle, angular_increment, scan_time, min_range, max_range
//! u32       num_ranges (n)
//! n × f32   ranges
//! n × f32   intensities
//! ```
//!
//! 全部小端，连续无填充，总长度恰为 `28 + 8n`。

use crate::{Cursor, MessageType, ProtocolError, Timestamp, WireMessage, expect_type};
use bytes::{BufMut, BytesMut};

/// 激光扫描负载的固定头长度
pub const LASER_HEADER_LEN: usize = 6 * 4 + 4;

/// 扫描仪配置（每帧随负载发送）
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LaserConfig {
    /// 起始角度（rad）
    pub min_angle: f32,
    /// 结束角度（rad）
    pub max_angle: f32,
    /// 角度分辨率（rad）
    pub angular_increment: f32,
    /// 单次扫描耗时（s）
    pub scan_time: f32,
    /// 最小量程（m）
    pub min_range: f32,
    /// 最大量程（m）
    pub max_range: f32,
}

impl LaserConfig {
    /// 覆盖角度范围所需的点数
    pub fn expected_points(&self) -> usize {
        if self.angular_increment <= 0.0 {
            return 0;
        }
        (((self.max_angle - self.min_angle) / self.angular_increment).round() as i64 + 1).max(0)
            as usize
    }

    /// 相邻两点的采样时间间隔
    pub fn time_increment(&self, points: usize) -> f32 {
        if points == 0 {
            0.0
        } else {
            self.scan_time / points as f32
        }
    }
}

/// 一帧激光扫描
///
/// 不变量：`ranges.len() == intensities.len()`。
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LaserScan {
    pub config: LaserConfig,
    ranges: Vec<f32>,
    intensities: Vec<f32>,
}

impl LaserScan {
    /// 构造扫描帧，两条序列长度不一致时返回 `DecodeMismatch`
    pub fn new(
        config: LaserConfig,
        ranges: Vec<f32>,
        intensities: Vec<f32>,
    ) -> Result<Self, ProtocolError> {
        if ranges.len() != intensities.len() {
            return Err(ProtocolError::DecodeMismatch {
                what: "laser scan intensities",
                expected: ranges.len(),
                actual: intensities.len(),
            });
        }
        Ok(Self {
            config,
            ranges,
            intensities,
        })
    }

    pub fn ranges(&self) -> &[f32] {
        &self.ranges
    }

    pub fn intensities(&self) -> &[f32] {
        &self.intensities
    }

    /// 点数
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// 编码后的负载长度
    pub fn payload_len(&self) -> usize {
        LASER_HEADER_LEN + 8 * self.len()
    }

    /// 编码负载
    pub fn encode_payload(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.payload_len());
        let c = &self.config;
        for v in [
            c.min_angle,
            c.max_angle,
            c.angular_increment,
            c.scan_time,
            c.min_range,
            c.max_range,
        ] {
            buf.put_f32_le(v);
        }
        buf.put_u32_le(self.len() as u32);
        for v in &self.ranges {
            buf.put_f32_le(*v);
        }
        for v in &self.intensities {
            buf.put_f32_le(*v);
        }
        buf
    }

    /// 解码负载
    ///
    /// 用负载中声明的点数切分两个数组；负载长度必须恰为 `28 + 8n`。
    pub fn decode_payload(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut cursor = Cursor::new("laser scan", payload);
        let config = LaserConfig {
            min_angle: cursor.f32_le()?,
            max_angle: cursor.f32_le()?,
            angular_increment: cursor.f32_le()?,
            scan_time: cursor.f32_le()?,
            min_range: cursor.f32_le()?,
            max_range: cursor.f32_le()?,
        };
        let n = cursor.u32_le()? as usize;

        // 在分配前校验总长度，避免损坏的 n 触发大内存分配
        let expected = (n as u64) * 8 + LASER_HEADER_LEN as u64;
        if expected != payload.len() as u64 {
            return Err(ProtocolError::DecodeMismatch {
                what: "laser scan",
                expected: usize::try_from(expected).unwrap_or(usize::MAX),
                actual: payload.len(),
            });
        }

        let ranges = cursor.f32_vec(n)?;
        let intensities = cursor.f32_vec(n)?;
        cursor.finish()?;

        Ok(Self {
            config,
            ranges,
            intensities,
        })
    }

    /// 转换为 Wire Message（时间戳为扫描本身的采集时间）
    pub fn to_message(&self, timestamp: Timestamp) -> WireMessage {
        WireMessage::with_timestamp(MessageType::LaserScan, timestamp, self.encode_payload().freeze())
    }
}

impl TryFrom<&WireMessage> for LaserScan {
    type Error = ProtocolError;

    fn try_from(msg: &WireMessage) -> Result<Self, Self::Error> {
        expect_type(msg, MessageType::LaserScan)?;
        Self::decode_payload(msg.payload())
    }
}
