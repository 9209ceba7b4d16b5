//! IMU 采样负载
//!
//! 负载为 11 个小端 f32，通道顺序固定（见 [`ImuChannel`]），
//! 长度与顺序都是线上契约的一部分。

use crate::{Cursor, MessageType, ProtocolError, Timestamp, WireMessage, expect_type};
use bytes::{BufMut, BytesMut};

/// IMU 通道数
pub const IMU_CHANNELS: usize = 11;

/// IMU 负载长度（字节）
pub const IMU_PAYLOAD_LEN: usize = IMU_CHANNELS * 4;

/// IMU 通道（值即在向量中的下标）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(usize)]
pub enum ImuChannel {
    /// 偏航角速度（rad/s）
    Gyro = 0,
    /// 加速度（g）
    AccX = 1,
    AccY = 2,
    AccZ = 3,
    /// 电机编码器转速
    EncMotor = 4,
    EncWheel1 = 5,
    EncWheel2 = 6,
    EncWheel3 = 7,
    EncWheel4 = 8,
    /// 电机电流
    PowerCurrent = 9,
    /// 电池电量
    PowerBatteryLevel = 10,
}

impl ImuChannel {
    pub const ALL: [ImuChannel; IMU_CHANNELS] = [
        ImuChannel::Gyro,
        ImuChannel::AccX,
        ImuChannel::AccY,
        ImuChannel::AccZ,
        ImuChannel::EncMotor,
        ImuChannel::EncWheel1,
        ImuChannel::EncWheel2,
        ImuChannel::EncWheel3,
        ImuChannel::EncWheel4,
        ImuChannel::PowerCurrent,
        ImuChannel::PowerBatteryLevel,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            ImuChannel::Gyro => "gyro",
            ImuChannel::AccX => "acc_x",
            ImuChannel::AccY => "acc_y",
            ImuChannel::AccZ => "acc_z",
            ImuChannel::EncMotor => "enc_motor",
            ImuChannel::EncWheel1 => "enc_wheel_1",
            ImuChannel::EncWheel2 => "enc_wheel_2",
            ImuChannel::EncWheel3 => "enc_wheel_3",
            ImuChannel::EncWheel4 => "enc_wheel_4",
            ImuChannel::PowerCurrent => "power_current",
            ImuChannel::PowerBatteryLevel => "power_battery_level",
        }
    }
}

/// 一次 IMU / 编码器 / 电源采样
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ImuSample {
    pub values: [f32; IMU_CHANNELS],
}

impl ImuSample {
    pub fn new(values: [f32; IMU_CHANNELS]) -> Self {
        Self { values }
    }

    pub fn get(&self, channel: ImuChannel) -> f32 {
        self.values[channel.index()]
    }

    pub fn set(&mut self, channel: ImuChannel, value: f32) {
        self.values[channel.index()] = value;
    }

    /// 链式设置
    pub fn with(mut self, channel: ImuChannel, value: f32) -> Self {
        self.set(channel, value);
        self
    }

    pub fn gyro(&self) -> f32 {
        self.get(ImuChannel::Gyro)
    }

    /// 三轴加速度（g）
    pub fn acceleration(&self) -> [f32; 3] {
        [
            self.get(ImuChannel::AccX),
            self.get(ImuChannel::AccY),
            self.get(ImuChannel::AccZ),
        ]
    }

    pub fn encode_payload(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(IMU_PAYLOAD_LEN);
        for v in self.values {
            buf.put_f32_le(v);
        }
        buf
    }

    pub fn decode_payload(payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() != IMU_PAYLOAD_LEN {
            return Err(ProtocolError::DecodeMismatch {
                what: "imu sample",
                expected: IMU_PAYLOAD_LEN,
                actual: payload.len(),
            });
        }
        let mut cursor = Cursor::new("imu sample", payload);
        let mut values = [0f32; IMU_CHANNELS];
        for v in values.iter_mut() {
            *v = cursor.f32_le()?;
        }
        cursor.finish()?;
        Ok(Self { values })
    }

    pub fn to_message(&self, timestamp: Timestamp) -> WireMessage {
        WireMessage::with_timestamp(MessageType::Imu, timestamp, self.encode_payload().freeze())
    }
}

impl TryFrom<&WireMessage> for ImuSample {
    type Error = ProtocolError;

    fn try_from(msg: &WireMessage) -> Result<Self, Self::Error> {
        expect_type(msg, MessageType::Imu)?;
        Self::decode_payload(msg.payload())
    }
}
