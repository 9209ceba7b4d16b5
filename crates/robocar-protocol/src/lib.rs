//! # Robocar Protocol
//!
//! 传感器总线的线上协议定义（无线程、无套接字依赖）
//!
//! ## 模块
//!
//! - `frame`: Wire Message 帧头 + 负载的编解码
//! - `message_type`: 消息类型标签
//! - `timestamp`: 秒 + 微秒时间戳
//! - `text` / `laser` / `image` / `imu`: 各传感器负载编解码
//! - `drive`: 驾驶指令通道（固定 20 字节）
//!
//! ## 字节序
//!
//! 只有帧头中的 `payload_size` 使用网络字节序（大端），
//! 其余多字节字段（时间戳、浮点数组、尺寸、驾驶指令）统一使用小端。

pub mod drive;
pub mod frame;
pub mod image;
pub mod imu;
pub mod laser;
pub mod message_type;
pub mod text;
pub mod timestamp;

pub use drive::*;
pub use frame::*;
pub use image::*;
pub use imu::*;
pub use laser::*;
pub use message_type::*;
pub use text::*;
pub use timestamp::*;

use thiserror::Error;

/// 协议解析错误类型
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// 帧头声明的负载长度超过上限（未分配内存即拒绝）
    #[error("Oversized payload: declared {declared} bytes, max {max}")]
    OversizedPayload { declared: u32, max: u32 },

    /// 读取过程中连接关闭
    #[error("Truncated stream: expected {expected} bytes, received {received}")]
    TruncatedStream { expected: usize, received: usize },

    /// 负载长度与声明结构不一致
    #[error("Decode mismatch in {what}: expected {expected} bytes, got {actual}")]
    DecodeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Unknown message type: {0}")]
    UnknownMessageType(u8),

    #[error("Unexpected message type: expected {expected}, got {actual}")]
    UnexpectedMessageType { expected: MessageType, actual: u8 },

    #[error("Invalid value for field {field}: {value}")]
    InvalidValue { field: &'static str, value: i64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// 是否对当前连接致命
    ///
    /// 帧边界已经丢失（超长、截断、IO 错误）时必须断开连接；
    /// 负载层面的错误只需丢弃当前帧。
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProtocolError::OversizedPayload { .. }
                | ProtocolError::TruncatedStream { .. }
                | ProtocolError::Io(_)
        )
    }
}

/// 小端字节读取游标
///
/// 所有定长读取均先检查剩余长度，越界时返回 `DecodeMismatch`。
pub(crate) struct Cursor<'a> {
    what: &'static str,
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(what: &'static str, buf: &'a [u8]) -> Self {
        Self { what, buf, pos: 0 }
    }

    pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        let end = self.pos.checked_add(n).filter(|end| *end <= self.buf.len()).ok_or(
            ProtocolError::DecodeMismatch {
                what: self.what,
                expected: self.pos.saturating_add(n),
                actual: self.buf.len(),
            },
        )?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub(crate) fn array<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub(crate) fn f32_le(&mut self) -> Result<f32, ProtocolError> {
        Ok(f32::from_le_bytes(self.array()?))
    }

    pub(crate) fn u32_le(&mut self) -> Result<u32, ProtocolError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub(crate) fn u16_le(&mut self) -> Result<u16, ProtocolError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub(crate) fn f32_vec(&mut self, count: usize) -> Result<Vec<f32>, ProtocolError> {
        let bytes = self.take(count.saturating_mul(4))?;
        Ok(bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    /// 要求负载恰好被消费完
    pub(crate) fn finish(self) -> Result<(), ProtocolError> {
        if self.pos != self.buf.len() {
            return Err(ProtocolError::DecodeMismatch {
                what: self.what,
                expected: self.pos,
                actual: self.buf.len(),
            });
        }
        Ok(())
    }
}

/// 检查消息类型标签
pub(crate) fn expect_type(msg: &WireMessage, expected: MessageType) -> Result<(), ProtocolError> {
    if msg.type_tag() != u8::from(expected) {
        return Err(ProtocolError::UnexpectedMessageType {
            expected,
            actual: msg.type_tag(),
        });
    }
    Ok(())
}
