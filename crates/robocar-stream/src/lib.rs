//! # Robocar Stream
//!
//! 单客户端传感器流服务：接受一个 TCP 连接，启动所有驱动，
//! 把 Delivery Queue 中的消息逐帧写出，直到客户端断开。
//!
//! ```no_run
//! use robocar_stream::ServerBuilder;
//!
//! let mut server = ServerBuilder::new().dry_run(true).build()?;
//! let shutdown = server.shutdown_handle();
//! ctrlc_like_handler(move || shutdown.shutdown());
//! server.run()?;
//! # fn ctrlc_like_handler(_f: impl FnOnce()) {}
//! # Ok::<(), robocar_stream::StreamError>(())
//! ```

pub mod builder;
pub mod config;
pub mod error;
pub mod metrics;
pub mod server;

pub use builder::ServerBuilder;
pub use config::{BackendKind, DEFAULT_STREAM_PORT, ServerConfig};
pub use error::StreamError;
pub use metrics::{MetricsSnapshot, StreamMetrics};
pub use server::{Server, ServerState, SessionEnd, SessionSummary, ShutdownHandle};
