//! Wire Message 帧编解码
//!
//! 帧布局（共 21 字节帧头 + N 字节负载）：
//!
//! ```text
//! offset  size  field
//! 0       1     type            消息类型标签
//! 1       8     timestamp_sec   小端
//! 9       8     timestamp_usec  小端
//! 17      4     payload_size    网络字节序（大端）
//! 21      N     payload
//! ```
//!
//! 本模块只负责帧边界，不解释负载；类型化解码见各负载模块。

use crate::{MessageType, ProtocolError, Timestamp};
use bytes::{BufMut, Bytes, BytesMut};
use std::io::{ErrorKind, Read, Write};

/// 帧头长度（字节）
pub const HEADER_LEN: usize = 21;

/// 默认的负载长度上限（2 MiB）
pub const MAX_PAYLOAD_SIZE: u32 = 2 * 1024 * 1024;

/// 传感器总线上唯一的传输单元
///
/// 构造后不可变；负载以 `Bytes` 持有，克隆只增加引用计数。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    type_tag: u8,
    timestamp: Timestamp,
    payload: Bytes,
}

impl WireMessage {
    /// 以当前时间构造消息
    pub fn new(ty: MessageType, payload: impl Into<Bytes>) -> Self {
        Self::with_timestamp(ty, Timestamp::now(), payload)
    }

    /// 以指定采集时间构造消息
    pub fn with_timestamp(ty: MessageType, timestamp: Timestamp, payload: impl Into<Bytes>) -> Self {
        Self::from_raw(ty.into(), timestamp, payload)
    }

    /// 以原始标签构造（允许未知类型，供解码路径和测试使用）
    pub fn from_raw(type_tag: u8, timestamp: Timestamp, payload: impl Into<Bytes>) -> Self {
        Self {
            type_tag,
            timestamp,
            payload: payload.into(),
        }
    }

    pub fn type_tag(&self) -> u8 {
        self.type_tag
    }

    /// 已知类型；未知标签返回 None
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_tag(self.type_tag)
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// 负载长度（即线上的 `payload_size`）
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    /// 编码后的总长度
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// 构建帧头
    ///
    /// 负载超过 `u32::MAX` 时返回 `OversizedPayload`。
    pub fn header(&self) -> Result<[u8; HEADER_LEN], ProtocolError> {
        let size = u32::try_from(self.payload.len()).map_err(|_| ProtocolError::OversizedPayload {
            declared: u32::MAX,
            max: u32::MAX,
        })?;

        let mut header = [0u8; HEADER_LEN];
        header[0] = self.type_tag;
        header[1..17].copy_from_slice(&self.timestamp.to_le_bytes());
        header[17..21].copy_from_slice(&size.to_be_bytes());
        Ok(header)
    }

    /// 编码为连续字节
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let header = self.header()?;
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_slice(&header);
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }

    /// 完整写入一帧（帧头与负载分两次写出，避免复制大图像）
    pub fn write_to<W: Write + ?Sized>(&self, writer: &mut W) -> Result<(), ProtocolError> {
        let header = self.header()?;
        writer.write_all(&header)?;
        writer.write_all(&self.payload)?;
        Ok(())
    }

    /// 从流中读取一帧
    ///
    /// 先读取固定帧头并校验 `payload_size`，超过 `max_payload` 时
    /// 在分配任何内存前返回 `OversizedPayload`；之后恰好读取
    /// `payload_size` 字节。任何短读都返回 `TruncatedStream`。
    pub fn read_from<R: Read + ?Sized>(
        reader: &mut R,
        max_payload: u32,
    ) -> Result<Self, ProtocolError> {
        let mut header = [0u8; HEADER_LEN];
        read_full(reader, &mut header)?;
        let (type_tag, timestamp, size) = parse_header(&header);

        if size > max_payload {
            return Err(ProtocolError::OversizedPayload {
                declared: size,
                max: max_payload,
            });
        }

        let mut payload = vec![0u8; size as usize];
        read_full(reader, &mut payload)?;

        Ok(Self::from_raw(type_tag, timestamp, payload))
    }

    /// 从一段完整的字节解码（多余字节视为错误）
    pub fn decode(bytes: &[u8], max_payload: u32) -> Result<Self, ProtocolError> {
        if bytes.len() < HEADER_LEN {
            return Err(ProtocolError::TruncatedStream {
                expected: HEADER_LEN,
                received: bytes.len(),
            });
        }
        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&bytes[..HEADER_LEN]);
        let (type_tag, timestamp, size) = parse_header(&header);

        if size > max_payload {
            return Err(ProtocolError::OversizedPayload {
                declared: size,
                max: max_payload,
            });
        }

        let expected = HEADER_LEN + size as usize;
        if bytes.len() < expected {
            return Err(ProtocolError::TruncatedStream {
                expected,
                received: bytes.len(),
            });
        }
        if bytes.len() > expected {
            return Err(ProtocolError::DecodeMismatch {
                what: "frame",
                expected,
                actual: bytes.len(),
            });
        }

        Ok(Self::from_raw(
            type_tag,
            timestamp,
            Bytes::copy_from_slice(&bytes[HEADER_LEN..]),
        ))
    }
}

fn parse_header(header: &[u8; HEADER_LEN]) -> (u8, Timestamp, u32) {
    let mut ts = [0u8; 16];
    ts.copy_from_slice(&header[1..17]);
    let size = u32::from_be_bytes([header[17], header[18], header[19], header[20]]);
    (header[0], Timestamp::from_le_bytes(&ts), size)
}

/// 读满缓冲区，记录实际读取的字节数
fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> Result<(), ProtocolError> {
    let mut received = 0;
    while received < buf.len() {
        match reader.read(&mut buf[received..]) {
            Ok(0) => {
                return Err(ProtocolError::TruncatedStream {
                    expected: buf.len(),
                    received,
                });
            },
            Ok(n) => received += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(ProtocolError::Io(e)),
        }
    }
    Ok(())
}

/// 连续读取帧的读取器
///
/// 与 [`WireMessage::read_from`] 的区别：在帧边界处的正常关闭
/// 返回 `Ok(None)`，而不是 `TruncatedStream`。
///
/// 作为迭代器使用时，流结束或产出第一个错误后不再读取（已熔断）。
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    max_payload: u32,
    done: bool,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_max_payload(inner, MAX_PAYLOAD_SIZE)
    }

    pub fn with_max_payload(inner: R, max_payload: u32) -> Self {
        Self {
            inner,
            max_payload,
            done: false,
        }
    }

    pub fn max_payload(&self) -> u32 {
        self.max_payload
    }

    /// 读取下一帧
    pub fn next_frame(&mut self) -> Result<Option<WireMessage>, ProtocolError> {
        match WireMessage::read_from(&mut self.inner, self.max_payload) {
            Ok(msg) => Ok(Some(msg)),
            Err(ProtocolError::TruncatedStream {
                expected: HEADER_LEN,
                received: 0,
            }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Iterator for FrameReader<R> {
    type Item = Result<WireMessage, ProtocolError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = self.next_frame().transpose();
        // 出错后流位置未知，不能继续按帧边界读取
        if !matches!(item, Some(Ok(_))) {
            self.done = true;
        }
        item
    }
}

impl<R: Read> std::iter::FusedIterator for FrameReader<R> {}
