//! 具体传感器驱动
//!
//! 每个驱动在构造时打开硬件（失败即 `HardwareUnavailable`），
//! 采样节奏与消息格式由各自模块决定。

mod board_camera;
mod imu;
mod laser;
mod text;
mod usb_camera;

pub use board_camera::BoardCameraDriver;
pub use imu::ImuDriver;
pub use laser::LaserDriver;
pub use text::TextDriver;
pub use usb_camera::UsbCameraDriver;
