use crate::device::{DeviceBackend, StereoImageSource};
use crate::worker::period_from_hz;
use crate::{Cadence, DriverError, SensorDriver};
use robocar_protocol::{MessageType, Timestamp, WireMessage};
use std::time::Duration;
use tracing::{info, warn};

/// 双目板载摄像头驱动
///
/// 单次采集失败只记录日志并跳过该帧。
pub struct BoardCameraDriver {
    source: Box<dyn StereoImageSource>,
    frame_interval: Duration,
}

impl BoardCameraDriver {
    pub const DEFAULT_WIDTH: u16 = 320;
    pub const DEFAULT_HEIGHT: u16 = 240;
    pub const DEFAULT_FPS: f64 = 7.0;

    pub fn open(
        backend: &dyn DeviceBackend,
        width: u16,
        height: u16,
        fps: f64,
    ) -> Result<Self, DriverError> {
        let frame_interval = period_from_hz("board_camera.fps", fps)?;
        let source = backend.open_stereo_camera(width, height)?;
        info!("Stereo board camera opened: {}x{} @ {} fps", width, height, fps);
        Ok(Self {
            source,
            frame_interval,
        })
    }

    pub fn with_source(source: Box<dyn StereoImageSource>, fps: f64) -> Result<Self, DriverError> {
        Ok(Self {
            source,
            frame_interval: period_from_hz("board_camera.fps", fps)?,
        })
    }
}

impl SensorDriver for BoardCameraDriver {
    fn name(&self) -> &str {
        "board-camera"
    }

    fn message_type(&self) -> MessageType {
        MessageType::BoardCamera
    }

    fn cadence(&self) -> Cadence {
        Cadence::FixedRate(self.frame_interval)
    }

    fn sample(&mut self) -> Result<Option<WireMessage>, DriverError> {
        let stamp = Timestamp::now();
        match self.source.collect_pair() {
            Ok(frame) => Ok(Some(frame.to_message(stamp))),
            Err(e) => {
                warn!("Failed to collect stereo image pair: {}", e);
                Ok(None)
            },
        }
    }
}
