//! 硬件接口
//!
//! 真实硬件（V4L2、激光雷达串口 SDK、图像处理板、舵机/电机控制器）不在本 crate 内，
//! 这里只定义驱动依赖的最小接口。`DeviceBackend` 负责按名称打开设备，
//! 打不开时返回 `HardwareUnavailable`。

use crate::DriverError;
use bytes::Bytes;
use robocar_protocol::{ImageFormat, LaserConfig, LaserScan, StereoFrame, Timestamp};

/// 激光扫描仪
pub trait LaserScanner: Send {
    /// 扫描仪参数（打开设备时读取）
    fn config(&self) -> LaserConfig;

    /// 开关激光发射
    fn set_emitter(&mut self, on: bool) -> Result<(), DriverError>;

    /// 请求连续扫描
    fn request_continuous(&mut self) -> Result<(), DriverError>;

    /// 阻塞读取一帧扫描，返回扫描本身的采集时间
    fn read_scan(&mut self) -> Result<(Timestamp, LaserScan), DriverError>;
}

/// 单目摄像头
pub trait FrameGrabber: Send {
    fn format(&self) -> ImageFormat;

    /// 抓取一帧原始像素，长度必须等于 `format().frame_len()`
    fn grab(&mut self) -> Result<Bytes, DriverError>;
}

/// 双目图像板
pub trait StereoImageSource: Send {
    fn dimensions(&self) -> (u16, u16);

    /// 采集一对左右图像
    fn collect_pair(&mut self) -> Result<StereoFrame, DriverError>;
}

/// 车载传感器读数
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SensorReading {
    pub gyro: f32,
    pub acc: [f32; 3],
    /// 电机编码器 + 四个轮速编码器
    pub encoders: [f32; 5],
}

/// 电源读数
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PowerReading {
    pub motor_current: f32,
    pub battery_level: f32,
}

/// 转向/驱动执行器，同时提供车载传感器读数
pub trait DriveActuator: Send {
    fn set_steer_angle(&mut self, degrees: f32) -> Result<(), DriverError>;

    /// 带符号的驱动速度（负值为倒车）
    fn set_drive_speed(&mut self, speed: i32) -> Result<(), DriverError>;

    fn present_speed(&mut self) -> Result<i32, DriverError>;

    fn sensor_info(&mut self) -> Result<SensorReading, DriverError>;

    fn power_info(&mut self) -> Result<PowerReading, DriverError>;

    /// 关闭执行器（释放前调用）
    fn shutdown(&mut self) {}
}

/// 设备工厂
pub trait DeviceBackend: Send + Sync {
    fn name(&self) -> &str;

    fn open_laser(&self, path: &str) -> Result<Box<dyn LaserScanner>, DriverError>;

    fn open_usb_camera(
        &self,
        path: &str,
        format: ImageFormat,
    ) -> Result<Box<dyn FrameGrabber>, DriverError>;

    fn open_stereo_camera(
        &self,
        width: u16,
        height: u16,
    ) -> Result<Box<dyn StereoImageSource>, DriverError>;

    fn open_drive(&self) -> Result<Box<dyn DriveActuator>, DriverError>;
}

/// 没有任何设备的后端
#[derive(Debug, Clone, Copy, Default)]
pub struct AbsentBackend;

impl DeviceBackend for AbsentBackend {
    fn name(&self) -> &str {
        "none"
    }

    fn open_laser(&self, path: &str) -> Result<Box<dyn LaserScanner>, DriverError> {
        Err(DriverError::unavailable(path, "no hardware backend"))
    }

    fn open_usb_camera(
        &self,
        path: &str,
        _format: ImageFormat,
    ) -> Result<Box<dyn FrameGrabber>, DriverError> {
        Err(DriverError::unavailable(path, "no hardware backend"))
    }

    fn open_stereo_camera(
        &self,
        _width: u16,
        _height: u16,
    ) -> Result<Box<dyn StereoImageSource>, DriverError> {
        Err(DriverError::unavailable("stereo board", "no hardware backend"))
    }

    fn open_drive(&self) -> Result<Box<dyn DriveActuator>, DriverError> {
        Err(DriverError::unavailable("drive controller", "no hardware backend"))
    }
}
