use crate::{Cadence, DriverError, SensorDriver};
use robocar_protocol::{MessageType, TextMessage, Timestamp, WireMessage};
use std::time::Duration;

/// 文本诊断驱动：按固定间隔发送同一条文本
pub struct TextDriver {
    message: TextMessage,
    interval: Duration,
}

impl TextDriver {
    /// 默认文本
    pub const DEFAULT_TEXT: &'static str = "Hello World";
    /// 默认发送间隔
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);

    pub fn new(text: impl Into<String>, interval: Duration) -> Self {
        Self {
            message: TextMessage::new(text),
            interval,
        }
    }

    pub fn text(&self) -> &str {
        &self.message.text
    }
}

impl Default for TextDriver {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TEXT, Self::DEFAULT_INTERVAL)
    }
}

impl SensorDriver for TextDriver {
    fn name(&self) -> &str {
        "text"
    }

    fn message_type(&self) -> MessageType {
        MessageType::Text
    }

    fn cadence(&self) -> Cadence {
        Cadence::FixedRate(self.interval)
    }

    fn sample(&mut self) -> Result<Option<WireMessage>, DriverError> {
        Ok(Some(self.message.to_message(Timestamp::now())))
    }
}
