//! 文本诊断负载
//!
//! 负载即字符串的原始字节，无额外结构。发送端不保证 UTF-8，
//! 解码时非法序列替换为 U+FFFD，帧本身不会因此被丢弃。

use crate::{MessageType, ProtocolError, Timestamp, WireMessage, expect_type};

/// 文本诊断消息
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TextMessage {
    pub text: String,
}

impl TextMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// 转换为 Wire Message
    pub fn to_message(&self, timestamp: Timestamp) -> WireMessage {
        WireMessage::with_timestamp(MessageType::Text, timestamp, self.text.clone().into_bytes())
    }
}

impl TryFrom<&WireMessage> for TextMessage {
    type Error = ProtocolError;

    fn try_from(msg: &WireMessage) -> Result<Self, Self::Error> {
        expect_type(msg, MessageType::Text)?;
        let text = String::from_utf8_lossy(msg.payload()).into_owned();
        Ok(Self { text })
    }
}
