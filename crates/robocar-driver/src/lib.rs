//! # Robocar Driver
//!
//! 传感器驱动层：Delivery Queue、驱动生命周期、硬件接口与驾驶控制。
//!
//! ## 线程模型
//!
//! 每个传感器驱动一个 OS 线程，驱动之间只通过 [`DeliveryQueue`] 与流循环通信；
//! 驱动从不接触套接字，流循环从不接触硬件。
//!
//! ```text
//! TextDriver ─┐
//! LaserDriver ─┤
//! UsbCamera  ─┼──push──▶ DeliveryQueue ──pop──▶ Server Stream Loop
//! BoardCamera ─┤
//! ImuDriver ──┘ (经由 DriveControl 读取)
//! ```

pub mod device;
pub mod drive;
pub mod error;
pub mod queue;
pub mod sensors;
pub mod sim;
pub mod state;
pub mod worker;

pub use device::{
    AbsentBackend, DeviceBackend, DriveActuator, FrameGrabber, LaserScanner, PowerReading,
    SensorReading, StereoImageSource,
};
pub use drive::{DEFAULT_DRIVE_PORT, DriveCommandServer, DriveControl};
pub use error::DriverError;
pub use queue::{DeliveryQueue, OverflowPolicy, PushOutcome, QueueBound, QueueStats};
pub use sensors::{BoardCameraDriver, ImuDriver, LaserDriver, TextDriver, UsbCameraDriver};
pub use sim::SimulatedBackend;
pub use state::{AtomicDriverState, DriverState};
pub use worker::{Cadence, DriverHandle, DriverStatus, SensorDriver, period_from_hz};
