//! 驾驶指令通道
//!
//! 独立于传感器总线的定长通道：请求与回显均为 5 个 i32（小端）：
//!
//! ```text
//! [steering_raw, acceleration_raw, brake, gear, mode]
//! ```
//!
//! `brake` 与 `mode` 不参与控制，原样回显。

use crate::ProtocolError;

/// 一条驾驶指令的字节数
pub const DRIVE_COMMAND_LEN: usize = 5 * 4;

/// 档位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, num_enum::IntoPrimitive, num_enum::TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(i32)]
pub enum Gear {
    Brake = 0,
    Reverse = 1,
    Neutral = 2,
    Drive = 3,
}

impl Gear {
    /// 未知档位值返回 None
    pub fn from_raw(raw: i32) -> Option<Self> {
        Self::try_from(raw).ok()
    }
}

/// 原始驾驶指令帧
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DriveCommand {
    pub steering_raw: i32,
    pub acceleration_raw: i32,
    pub brake: i32,
    pub gear: i32,
    pub mode: i32,
}

impl DriveCommand {
    pub fn new(steering_raw: i32, acceleration_raw: i32, gear: Gear) -> Self {
        Self {
            steering_raw,
            acceleration_raw,
            brake: 0,
            gear: gear.into(),
            mode: 0,
        }
    }

    pub fn gear(&self) -> Option<Gear> {
        Gear::from_raw(self.gear)
    }

    pub fn to_bytes(&self) -> [u8; DRIVE_COMMAND_LEN] {
        let mut out = [0u8; DRIVE_COMMAND_LEN];
        let fields = [
            self.steering_raw,
            self.acceleration_raw,
            self.brake,
            self.gear,
            self.mode,
        ];
        for (chunk, v) in out.chunks_exact_mut(4).zip(fields) {
            chunk.copy_from_slice(&v.to_le_bytes());
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() != DRIVE_COMMAND_LEN {
            return Err(ProtocolError::DecodeMismatch {
                what: "drive command",
                expected: DRIVE_COMMAND_LEN,
                actual: bytes.len(),
            });
        }
        let field = |i: usize| {
            i32::from_le_bytes([bytes[i * 4], bytes[i * 4 + 1], bytes[i * 4 + 2], bytes[i * 4 + 3]])
        };
        Ok(Self {
            steering_raw: field(0),
            acceleration_raw: field(1),
            brake: field(2),
            gear: field(3),
            mode: field(4),
        })
    }
}

/// 钳位后的执行状态
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DriveState {
    /// 转向角（度），位于 ±`max_steering_deg`
    pub steering_deg: f32,
    /// 速度幅值（设备单位），位于 0..=`max_speed`
    pub speed: i32,
    /// 原始档位值
    pub gear: i32,
}

impl DriveState {
    /// 带符号的驱动速度：倒档为负，前进档为正，其余为 0
    pub fn signed_speed(&self) -> i32 {
        match Gear::from_raw(self.gear) {
            Some(Gear::Reverse) => -self.speed,
            Some(Gear::Drive) => self.speed,
            _ => 0,
        }
    }
}

/// 原始值与物理量之间的线性映射
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DriveMapping {
    /// `steering_raw` 满量程
    pub steering_raw_span: f32,
    /// 最大转向角（度）
    pub max_steering_deg: f32,
    /// `acceleration_raw` 满量程
    pub acceleration_raw_span: f32,
    /// 最大速度（设备单位）
    pub max_speed: i32,
}

impl Default for DriveMapping {
    fn default() -> Self {
        Self {
            steering_raw_span: 120.0,
            max_steering_deg: 30.0,
            acceleration_raw_span: 100.0,
            max_speed: 2800,
        }
    }
}

impl DriveMapping {
    /// 原始指令 → 钳位后的执行状态
    pub fn to_state(&self, cmd: &DriveCommand) -> DriveState {
        let steering = self.max_steering_deg * cmd.steering_raw as f32 / self.steering_raw_span;
        let speed = self.max_speed as f32 * cmd.acceleration_raw as f32 / self.acceleration_raw_span;
        DriveState {
            steering_deg: steering.clamp(-self.max_steering_deg, self.max_steering_deg),
            speed: speed.clamp(0.0, self.max_speed as f32) as i32,
            gear: cmd.gear,
        }
    }

    /// 由钳位后的状态重新计算回显帧（brake/mode 原样保留）
    pub fn echo(&self, request: &DriveCommand, state: &DriveState) -> DriveCommand {
        DriveCommand {
            steering_raw: (self.steering_raw_span * state.steering_deg / self.max_steering_deg) as i32,
            acceleration_raw: (self.acceleration_raw_span * state.speed as f32
                / self.max_speed as f32) as i32,
            brake: request.brake,
            gear: state.gear,
            mode: request.mode,
        }
    }
}
