use crate::drive::DriveControl;
use crate::worker::period_from_hz;
use crate::{Cadence, DriverError, SensorDriver};
use robocar_protocol::{MessageType, Timestamp, WireMessage};
use std::sync::Arc;
use std::time::Duration;

/// IMU 驱动：经由驾驶控制上下文读取车载传感器与电源信息
pub struct ImuDriver {
    control: Arc<DriveControl>,
    period: Duration,
}

impl ImuDriver {
    /// 默认采样频率（Hz）
    pub const DEFAULT_RATE_HZ: f64 = 5.0;

    pub fn new(control: Arc<DriveControl>, rate_hz: f64) -> Result<Self, DriverError> {
        Ok(Self {
            control,
            period: period_from_hz("imu.rate_hz", rate_hz)?,
        })
    }
}

impl SensorDriver for ImuDriver {
    fn name(&self) -> &str {
        "imu"
    }

    fn message_type(&self) -> MessageType {
        MessageType::Imu
    }

    fn cadence(&self) -> Cadence {
        Cadence::FixedRate(self.period)
    }

    fn sample(&mut self) -> Result<Option<WireMessage>, DriverError> {
        let stamp = Timestamp::now();
        let sample = self.control.read_imu()?;
        Ok(Some(sample.to_message(stamp)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedBackend;
    use robocar_protocol::{DriveMapping, IMU_PAYLOAD_LEN, ImuChannel, ImuSample};

    #[test]
    fn test_imu_sample() {
        let control =
            DriveControl::open(&SimulatedBackend::default(), DriveMapping::default()).unwrap();
        let mut driver = ImuDriver::new(control, ImuDriver::DEFAULT_RATE_HZ).unwrap();
        let msg = driver.sample().unwrap().unwrap();
        assert_eq!(msg.size(), IMU_PAYLOAD_LEN);
        let sample = ImuSample::try_from(&msg).unwrap();
        assert_eq!(sample.get(ImuChannel::AccZ), 1.0);
    }

    #[test]
    fn test_invalid_rate_rejected() {
        let control =
            DriveControl::open(&SimulatedBackend::default(), DriveMapping::default()).unwrap();
        for rate in [0.0, -1.0, f64::NAN] {
            let err = ImuDriver::new(control.clone(), rate).err().unwrap();
            assert!(!err.is_unavailable());
            assert!(
                matches!(err, DriverError::InvalidConfig { field: "imu.rate_hz", .. }),
                "{:?}",
                err
            );
        }
    }
}
