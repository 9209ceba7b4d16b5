use crate::device::{DeviceBackend, LaserScanner};
use crate::{Cadence, DriverError, SensorDriver};
use robocar_protocol::{LaserConfig, MessageType, WireMessage};
use tracing::{debug, info};

/// 激光扫描驱动
///
/// 运行阶段由阻塞的扫描读取驱动节奏；消息时间戳取扫描本身的采集时间。
/// 读取失败时结束本次运行阶段。
pub struct LaserDriver {
    device: String,
    scanner: Box<dyn LaserScanner>,
}

impl LaserDriver {
    pub const DEFAULT_DEVICE: &'static str = "/dev/ttyACM0";

    pub fn open(backend: &dyn DeviceBackend, device: &str) -> Result<Self, DriverError> {
        let scanner = backend.open_laser(device)?;
        let config = scanner.config();
        info!(
            "Laser scanner {} opened: {:.3}..{:.3} rad, {} points",
            device,
            config.min_angle,
            config.max_angle,
            config.expected_points()
        );
        Ok(Self::with_scanner(device, scanner))
    }

    pub fn with_scanner(device: impl Into<String>, scanner: Box<dyn LaserScanner>) -> Self {
        Self {
            device: device.into(),
            scanner,
        }
    }

    pub fn config(&self) -> LaserConfig {
        self.scanner.config()
    }
}

impl SensorDriver for LaserDriver {
    fn name(&self) -> &str {
        "laser"
    }

    fn message_type(&self) -> MessageType {
        MessageType::LaserScan
    }

    fn cadence(&self) -> Cadence {
        Cadence::Blocking
    }

    fn on_start(&mut self) -> Result<(), DriverError> {
        self.scanner.set_emitter(true)?;
        self.scanner.request_continuous()?;
        debug!(device = %self.device, "laser scanning started");
        Ok(())
    }

    fn sample(&mut self) -> Result<Option<WireMessage>, DriverError> {
        let (stamp, scan) = self.scanner.read_scan()?;
        Ok(Some(scan.to_message(stamp)))
    }

    fn on_stop(&mut self) {
        if let Err(e) = self.scanner.set_emitter(false) {
            debug!(device = %self.device, "failed to switch laser off: {}", e);
        }
    }
}
