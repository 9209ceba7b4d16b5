//! 客户端错误类型定义

use robocar_protocol::{ProtocolError, Timestamp};
use std::net::SocketAddr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    /// 连接服务端失败
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// 服务端地址无法解析
    #[error("Invalid server address: {0}")]
    InvalidAddress(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Odometry error: {0}")]
    Odometry(#[from] OdometryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// 里程计积分错误
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum OdometryError {
    /// 样本时间早于上一次更新（乱序到达）
    #[error("Out-of-order IMU sample: dt = {:.6}s since last update at {}.{:06}", .dt, .last.sec, .last.usec)]
    OutOfOrder { last: Timestamp, dt: f64 },

    /// 两个时间戳之差无法表示
    #[error("Invalid IMU sample interval: {}.{:06} since last update at {}.{:06}", .received.sec, .received.usec, .last.sec, .last.usec)]
    InvalidInterval { last: Timestamp, received: Timestamp },

    /// 陀螺仪或加速度通道含 NaN / 无穷值
    #[error("Non-finite IMU sample at {}.{:06}", .stamp.sec, .stamp.usec)]
    NonFiniteSample { stamp: Timestamp },
}
