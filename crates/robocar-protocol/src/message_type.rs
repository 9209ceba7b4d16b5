//! 消息类型标签

use std::fmt;

/// Wire Message 的 1 字节类型标签
///
/// 未知标签不会在帧解码时报错：帧保留原始标签，
/// 由分发方决定如何处理（通常记录日志后丢弃）。
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    num_enum::IntoPrimitive,
    num_enum::TryFromPrimitive,
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum MessageType {
    /// 文本诊断信息
    Text = 1,
    /// 2D 激光扫描
    LaserScan = 2,
    /// USB 摄像头原始帧
    UsbCamera = 3,
    /// 双目板载摄像头（左右图拼接）
    BoardCamera = 4,
    /// IMU / 编码器 / 电源采样
    Imu = 5,
}

impl MessageType {
    /// 所有已知类型，按标签排序
    pub const ALL: [MessageType; 5] = [
        MessageType::Text,
        MessageType::LaserScan,
        MessageType::UsbCamera,
        MessageType::BoardCamera,
        MessageType::Imu,
    ];

    /// 人类可读名称（用于日志）
    pub fn name(self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::LaserScan => "laser-scan",
            MessageType::UsbCamera => "usb-camera",
            MessageType::BoardCamera => "board-camera",
            MessageType::Imu => "imu",
        }
    }

    /// 从原始标签解析，未知标签返回 None
    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::try_from(tag).ok()
    }

    /// 是否为相机类消息（`--no-vision` 时跳过）
    pub fn is_vision(self) -> bool {
        matches!(self, MessageType::UsbCamera | MessageType::BoardCamera)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
