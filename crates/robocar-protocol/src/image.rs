//! 图像帧负载
//!
//! - USB 摄像头：负载为原始像素，分辨率与像素格式在带外约定（[`ImageFormat`]）
//! - 双目板载摄像头：`u16 width, u16 height`（小端）后接左图、右图各 `width*height` 字节

use crate::{Cursor, MessageType, ProtocolError, Timestamp, WireMessage, expect_type};
use bytes::{BufMut, Bytes, BytesMut};

/// 带外约定的图像格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ImageFormat {
    pub width: u32,
    pub height: u32,
    pub bytes_per_pixel: u32,
}

impl ImageFormat {
    /// USB 摄像头默认格式：640×480 rgb8
    pub const USB_DEFAULT: ImageFormat = ImageFormat::new(640, 480, 3);

    pub const fn new(width: u32, height: u32, bytes_per_pixel: u32) -> Self {
        Self {
            width,
            height,
            bytes_per_pixel,
        }
    }

    /// 一帧像素数据的字节数
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * self.bytes_per_pixel as usize
    }

    /// 每行字节数
    pub fn row_stride(&self) -> usize {
        self.width as usize * self.bytes_per_pixel as usize
    }
}

impl Default for ImageFormat {
    fn default() -> Self {
        Self::USB_DEFAULT
    }
}

/// USB 摄像头帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbFrame {
    format: ImageFormat,
    pixels: Bytes,
}

impl UsbFrame {
    /// 构造，像素长度必须与格式一致
    pub fn new(format: ImageFormat, pixels: impl Into<Bytes>) -> Result<Self, ProtocolError> {
        let pixels = pixels.into();
        if pixels.len() != format.frame_len() {
            return Err(ProtocolError::DecodeMismatch {
                what: "usb image",
                expected: format.frame_len(),
                actual: pixels.len(),
            });
        }
        Ok(Self { format, pixels })
    }

    /// 从消息解码，格式由调用方提供
    pub fn from_message(msg: &WireMessage, format: ImageFormat) -> Result<Self, ProtocolError> {
        expect_type(msg, MessageType::UsbCamera)?;
        Self::new(format, msg.payload().clone())
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn pixels(&self) -> &Bytes {
        &self.pixels
    }

    /// 第 `row` 行像素
    pub fn row(&self, row: u32) -> Option<&[u8]> {
        if row >= self.format.height {
            return None;
        }
        let stride = self.format.row_stride();
        let start = row as usize * stride;
        self.pixels.get(start..start + stride)
    }

    pub fn to_message(&self, timestamp: Timestamp) -> WireMessage {
        WireMessage::with_timestamp(MessageType::UsbCamera, timestamp, self.pixels.clone())
    }
}

/// 双目摄像头帧（单通道灰度）
///
/// 不变量：`left.len() == right.len() == width * height`。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StereoFrame {
    width: u16,
    height: u16,
    left: Bytes,
    right: Bytes,
}

impl StereoFrame {
    pub fn new(
        width: u16,
        height: u16,
        left: impl Into<Bytes>,
        right: impl Into<Bytes>,
    ) -> Result<Self, ProtocolError> {
        let (left, right) = (left.into(), right.into());
        let plane = width as usize * height as usize;
        for (what, image) in [("stereo left image", &left), ("stereo right image", &right)] {
            if image.len() != plane {
                return Err(ProtocolError::DecodeMismatch {
                    what,
                    expected: plane,
                    actual: image.len(),
                });
            }
        }
        Ok(Self {
            width,
            height,
            left,
            right,
        })
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    pub fn left(&self) -> &Bytes {
        &self.left
    }

    pub fn right(&self) -> &Bytes {
        &self.right
    }

    /// 单幅图像的字节数
    pub fn plane_len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// 左右图逐行拼接为一幅 `2*width × height` 的图像
    pub fn side_by_side(&self) -> Vec<u8> {
        let w = self.width as usize;
        let mut out = Vec::with_capacity(self.plane_len() * 2);
        if w == 0 {
            return out;
        }
        for (l, r) in self.left.chunks_exact(w).zip(self.right.chunks_exact(w)) {
            out.extend_from_slice(l);
            out.extend_from_slice(r);
        }
        out
    }

    pub fn encode_payload(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(4 + self.plane_len() * 2);
        buf.put_u16_le(self.width);
        buf.put_u16_le(self.height);
        buf.put_slice(&self.left);
        buf.put_slice(&self.right);
        buf
    }

    /// 解码负载：在 `width*height` 处切分左右图
    pub fn decode_payload(payload: &Bytes) -> Result<Self, ProtocolError> {
        let mut cursor = Cursor::new("stereo image", payload);
        let width = cursor.u16_le()?;
        let height = cursor.u16_le()?;
        let plane = width as usize * height as usize;

        let expected = 4 + plane * 2;
        if payload.len() != expected {
            return Err(ProtocolError::DecodeMismatch {
                what: "stereo image",
                expected,
                actual: payload.len(),
            });
        }

        Ok(Self {
            width,
            height,
            left: payload.slice(4..4 + plane),
            right: payload.slice(4 + plane..expected),
        })
    }

    pub fn to_message(&self, timestamp: Timestamp) -> WireMessage {
        WireMessage::with_timestamp(MessageType::BoardCamera, timestamp, self.encode_payload().freeze())
    }
}

impl TryFrom<&WireMessage> for StereoFrame {
    type Error = ProtocolError;

    fn try_from(msg: &WireMessage) -> Result<Self, Self::Error> {
        expect_type(msg, MessageType::BoardCamera)?;
        Self::decode_payload(msg.payload())
    }
}
