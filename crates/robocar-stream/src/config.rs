//! 服务端配置
//!
//! 所有字段都有默认值，配置文件只需写出要覆盖的部分：
//!
//! ```toml
//! backend = "simulated"
//!
//! [network]
//! port = 1607
//!
//! [queue]
//! capacity = 256
//! overflow = "drop-oldest"
//!
//! [text]
//! message = "Hello World"
//! interval_ms = 2000
//! ```

use crate::StreamError;
use robocar_driver::{
    BoardCameraDriver, DriverError, ImuDriver, LaserDriver, OverflowPolicy, QueueBound,
    TextDriver, UsbCameraDriver, period_from_hz,
};
use robocar_protocol::{DriveMapping, ImageFormat, MAX_PAYLOAD_SIZE};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

/// 默认传感器流端口
pub const DEFAULT_STREAM_PORT: u16 = 1607;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// 设备后端
    pub backend: BackendKind,
    pub network: NetworkConfig,
    pub queue: QueueConfig,
    pub text: TextConfig,
    pub laser: LaserConfig,
    pub usb_camera: UsbCameraConfig,
    pub board_camera: BoardCameraConfig,
    pub imu: ImuConfig,
    pub drive: DriveConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Simulated,
            network: NetworkConfig::default(),
            queue: QueueConfig::default(),
            text: TextConfig::default(),
            laser: LaserConfig::default(),
            usb_camera: UsbCameraConfig::default(),
            board_camera: BoardCameraConfig::default(),
            imu: ImuConfig::default(),
            drive: DriveConfig::default(),
        }
    }
}

impl ServerConfig {
    /// 从 TOML 文件加载
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StreamError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| StreamError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, StreamError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 只启用文本驱动的配置（测试与诊断使用）
    pub fn text_only() -> Self {
        let mut config = Self::default();
        config.laser.enabled = false;
        config.usb_camera.enabled = false;
        config.board_camera.enabled = false;
        config.imu.enabled = false;
        config.drive.enabled = false;
        config
    }

    pub fn validate(&self) -> Result<(), StreamError> {
        if self.network.max_payload_size == 0 {
            return Err(StreamError::InvalidConfig {
                field: "network.max_payload_size",
                reason: "must be positive".to_string(),
            });
        }
        if self.text.interval_ms == 0 {
            return Err(StreamError::InvalidConfig {
                field: "text.interval_ms",
                reason: "must be positive".to_string(),
            });
        }
        for (field, rate) in [
            ("usb_camera.fps", self.usb_camera.fps),
            ("board_camera.fps", self.board_camera.fps),
            ("imu.rate_hz", self.imu.rate_hz),
        ] {
            // 与驱动构造使用同一套检查
            if let Err(DriverError::InvalidConfig { reason, .. }) = period_from_hz(field, rate) {
                return Err(StreamError::InvalidConfig { field, reason });
            }
        }
        let usb = self.usb_camera.format();
        if self.usb_camera.enabled && usb.frame_len() > self.network.max_payload_size as usize {
            return Err(StreamError::InvalidConfig {
                field: "usb_camera",
                reason: format!(
                    "frame of {} bytes exceeds max payload size {}",
                    usb.frame_len(),
                    self.network.max_payload_size
                ),
            });
        }
        let stereo = 4 + 2 * self.board_camera.width as usize * self.board_camera.height as usize;
        if self.board_camera.enabled && stereo > self.network.max_payload_size as usize {
            return Err(StreamError::InvalidConfig {
                field: "board_camera",
                reason: format!(
                    "frame of {} bytes exceeds max payload size {}",
                    stereo, self.network.max_payload_size
                ),
            });
        }
        if self.drive.max_steering_deg <= 0.0
            || self.drive.steering_raw_span == 0.0
            || self.drive.acceleration_raw_span == 0.0
            || self.drive.max_speed <= 0
        {
            return Err(StreamError::InvalidConfig {
                field: "drive",
                reason: "mapping spans must be non-zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn stream_addr(&self) -> SocketAddr {
        SocketAddr::new(self.network.bind_address, self.network.port)
    }

    pub fn drive_addr(&self) -> SocketAddr {
        SocketAddr::new(self.network.bind_address, self.drive.port)
    }

    pub fn queue_bound(&self) -> QueueBound {
        match self.queue.capacity {
            None => QueueBound::Unbounded,
            Some(capacity) => QueueBound::Bounded {
                capacity,
                policy: self.queue.overflow.into(),
            },
        }
    }

    pub fn drive_mapping(&self) -> DriveMapping {
        DriveMapping {
            steering_raw_span: self.drive.steering_raw_span,
            max_steering_deg: self.drive.max_steering_deg,
            acceleration_raw_span: self.drive.acceleration_raw_span,
            max_speed: self.drive.max_speed,
        }
    }
}

/// 设备后端选择
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// 合成数据
    Simulated,
    /// 无设备：只有不依赖硬件的驱动可用
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    pub bind_address: IpAddr,
    pub port: u16,
    /// 单帧负载上限（字节）
    pub max_payload_size: u32,
    /// 单帧写超时（毫秒），0 表示不设超时
    pub write_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_STREAM_PORT,
            max_payload_size: MAX_PAYLOAD_SIZE,
            write_timeout_ms: 5000,
        }
    }
}

impl NetworkConfig {
    pub fn write_timeout(&self) -> Option<Duration> {
        (self.write_timeout_ms > 0).then(|| Duration::from_millis(self.write_timeout_ms))
    }
}

/// 溢出策略（配置文件中的写法）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowSetting {
    #[default]
    DropOldest,
    RejectNewest,
}

impl From<OverflowSetting> for OverflowPolicy {
    fn from(setting: OverflowSetting) -> Self {
        match setting {
            OverflowSetting::DropOldest => OverflowPolicy::DropOldest,
            OverflowSetting::RejectNewest => OverflowPolicy::RejectNewest,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    /// 队列容量，不设置表示无界
    pub capacity: Option<usize>,
    pub overflow: OverflowSetting,
    /// 新客户端连接时丢弃上一会话遗留的消息
    pub discard_stale_on_connect: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: None,
            overflow: OverflowSetting::DropOldest,
            discard_stale_on_connect: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TextConfig {
    pub enabled: bool,
    pub message: String,
    pub interval_ms: u64,
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            message: TextDriver::DEFAULT_TEXT.to_string(),
            interval_ms: TextDriver::DEFAULT_INTERVAL.as_millis() as u64,
        }
    }
}

impl TextConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LaserConfig {
    pub enabled: bool,
    pub device: String,
}

impl Default for LaserConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            device: LaserDriver::DEFAULT_DEVICE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UsbCameraConfig {
    pub enabled: bool,
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub bytes_per_pixel: u32,
    pub fps: f64,
}

impl Default for UsbCameraConfig {
    fn default() -> Self {
        let format = ImageFormat::USB_DEFAULT;
        Self {
            enabled: true,
            device: UsbCameraDriver::DEFAULT_DEVICE.to_string(),
            width: format.width,
            height: format.height,
            bytes_per_pixel: format.bytes_per_pixel,
            fps: UsbCameraDriver::DEFAULT_FPS,
        }
    }
}

impl UsbCameraConfig {
    pub fn format(&self) -> ImageFormat {
        ImageFormat::new(self.width, self.height, self.bytes_per_pixel)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BoardCameraConfig {
    pub enabled: bool,
    pub width: u16,
    pub height: u16,
    pub fps: f64,
}

impl Default for BoardCameraConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            width: BoardCameraDriver::DEFAULT_WIDTH,
            height: BoardCameraDriver::DEFAULT_HEIGHT,
            fps: BoardCameraDriver::DEFAULT_FPS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImuConfig {
    pub enabled: bool,
    pub rate_hz: f64,
}

impl Default for ImuConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rate_hz: ImuDriver::DEFAULT_RATE_HZ,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DriveConfig {
    pub enabled: bool,
    pub port: u16,
    pub steering_raw_span: f32,
    pub max_steering_deg: f32,
    pub acceleration_raw_span: f32,
    pub max_speed: i32,
}

impl Default for DriveConfig {
    fn default() -> Self {
        let mapping = DriveMapping::default();
        Self {
            enabled: true,
            port: robocar_driver::DEFAULT_DRIVE_PORT,
            steering_raw_span: mapping.steering_raw_span,
            max_steering_deg: mapping.max_steering_deg,
            acceleration_raw_span: mapping.acceleration_raw_span,
            max_speed: mapping.max_speed,
        }
    }
}
