//! 驱动层错误类型定义

use robocar_protocol::ProtocolError;
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 设备无法打开（非致命：该驱动在本次运行中缺席）
    #[error("Hardware unavailable: {device}: {reason}")]
    HardwareUnavailable { device: String, reason: String },

    /// 运行期设备错误（采样失败、设备断开等）
    #[error("Device error: {0}")]
    Device(String),

    /// 协议编码错误
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 参数不合法（采样频率等）
    #[error("Invalid {field}: {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    /// 工作线程创建失败
    #[error("Failed to spawn driver thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),

    /// IO 错误（驾驶指令通道等）
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DriverError {
    pub fn unavailable(device: impl Into<String>, reason: impl Into<String>) -> Self {
        DriverError::HardwareUnavailable {
            device: device.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_config(field: &'static str, reason: impl Into<String>) -> Self {
        DriverError::InvalidConfig {
            field,
            reason: reason.into(),
        }
    }

    /// 是否为设备缺席
    pub fn is_unavailable(&self) -> bool {
        matches!(self, DriverError::HardwareUnavailable { .. })
    }
}
