use crate::device::{DeviceBackend, FrameGrabber};
use crate::worker::period_from_hz;
use crate::{Cadence, DriverError, SensorDriver};
use robocar_protocol::{ImageFormat, MessageType, Timestamp, UsbFrame, WireMessage};
use std::time::Duration;
use tracing::info;

/// USB 摄像头驱动：按帧率抓取原始像素
pub struct UsbCameraDriver {
    grabber: Box<dyn FrameGrabber>,
    frame_interval: Duration,
}

impl UsbCameraDriver {
    pub const DEFAULT_DEVICE: &'static str = "/dev/video0";
    pub const DEFAULT_FPS: f64 = 15.0;

    pub fn open(
        backend: &dyn DeviceBackend,
        device: &str,
        format: ImageFormat,
        fps: f64,
    ) -> Result<Self, DriverError> {
        // 先校验帧率，参数错误时不打开设备
        let frame_interval = period_from_hz("usb_camera.fps", fps)?;
        let grabber = backend.open_usb_camera(device, format)?;
        info!(
            "USB camera {} opened: {}x{} @ {} fps",
            device, format.width, format.height, fps
        );
        Ok(Self {
            grabber,
            frame_interval,
        })
    }

    pub fn with_grabber(grabber: Box<dyn FrameGrabber>, fps: f64) -> Result<Self, DriverError> {
        Ok(Self {
            grabber,
            frame_interval: period_from_hz("usb_camera.fps", fps)?,
        })
    }

    pub fn format(&self) -> ImageFormat {
        self.grabber.format()
    }
}

impl SensorDriver for UsbCameraDriver {
    fn name(&self) -> &str {
        "usb-camera"
    }

    fn message_type(&self) -> MessageType {
        MessageType::UsbCamera
    }

    fn cadence(&self) -> Cadence {
        Cadence::FixedRate(self.frame_interval)
    }

    fn sample(&mut self) -> Result<Option<WireMessage>, DriverError> {
        let stamp = Timestamp::now();
        let pixels = self.grabber.grab()?;
        // 长度与格式不一致的帧在这里被拒绝，不会上线
        let frame = UsbFrame::new(self.grabber.format(), pixels)?;
        Ok(Some(frame.to_message(stamp)))
    }
}
