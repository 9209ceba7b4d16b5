//! # Robocar Client
//!
//! 传感器总线客户端：读取服务端推送的帧，按类型解码后交给 [`MessageSink`]，
//! IMU 样本同时送入航位推算里程计。
//!
//! ```no_run
//! use robocar_client::{ChannelSink, Client, ClientEvent};
//!
//! let mut client = Client::connect("192.168.1.20:1607".parse().unwrap())?;
//! let (mut sink, rx) = ChannelSink::new();
//! std::thread::spawn(move || {
//!     for event in rx {
//!         if let ClientEvent::Odometry(report) = event {
//!             println!("{:?}", report.position);
//!         }
//!     }
//! });
//! client.run(&mut sink)?;
//! # Ok::<(), robocar_client::ClientError>(())
//! ```

pub mod dispatch;
pub mod error;
pub mod odometry;
pub mod sink;

pub use dispatch::{
    Client, ClientConfig, ClientShutdown, DEFAULT_SERVER_PORT, DispatchEnd, DispatchStats,
    resolve_server_addr,
};
pub use error::{ClientError, OdometryError};
pub use odometry::{ODOMETRY_FRAME_ID, Odometer, OdometerConfig, OdometryReport, wrap_angle};
pub use sink::{ChannelSink, ClientEvent, MessageSink};
