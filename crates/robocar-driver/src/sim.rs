//! 模拟设备后端
//!
//! 在无硬件环境（dry run、测试）下提供确定性的合成数据。
//! 阻塞读取用 `spin_sleep` 模拟设备节奏。

use crate::device::{
    DeviceBackend, DriveActuator, FrameGrabber, LaserScanner, PowerReading, SensorReading,
    StereoImageSource,
};
use crate::DriverError;
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use robocar_protocol::{ImageFormat, LaserConfig, LaserScan, StereoFrame, Timestamp};
use std::time::Duration;

/// 模拟后端配置：每类设备是否“存在”
#[derive(Debug, Clone)]
pub struct SimulatedBackend {
    pub laser: bool,
    pub usb_camera: bool,
    pub stereo_camera: bool,
    pub drive: bool,
    /// 一次扫描的阻塞时长
    pub scan_period: Duration,
    /// 噪声随机种子
    pub seed: u64,
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self {
            laser: true,
            usb_camera: true,
            stereo_camera: true,
            drive: true,
            scan_period: Duration::from_millis(100),
            seed: 0x5EED,
        }
    }
}

impl SimulatedBackend {
    /// 所有设备都缺席
    pub fn empty() -> Self {
        Self {
            laser: false,
            usb_camera: false,
            stereo_camera: false,
            drive: false,
            ..Default::default()
        }
    }
}

impl DeviceBackend for SimulatedBackend {
    fn name(&self) -> &str {
        "simulated"
    }

    fn open_laser(&self, path: &str) -> Result<Box<dyn LaserScanner>, DriverError> {
        if !self.laser {
            return Err(DriverError::unavailable(path, "simulated device absent"));
        }
        Ok(Box::new(SimLaser::new(self.scan_period, self.seed)))
    }

    fn open_usb_camera(
        &self,
        path: &str,
        format: ImageFormat,
    ) -> Result<Box<dyn FrameGrabber>, DriverError> {
        if !self.usb_camera {
            return Err(DriverError::unavailable(path, "simulated device absent"));
        }
        Ok(Box::new(SimCamera { format, frame: 0 }))
    }

    fn open_stereo_camera(
        &self,
        width: u16,
        height: u16,
    ) -> Result<Box<dyn StereoImageSource>, DriverError> {
        if !self.stereo_camera {
            return Err(DriverError::unavailable("stereo board", "simulated device absent"));
        }
        Ok(Box::new(SimStereo {
            width,
            height,
            frame: 0,
        }))
    }

    fn open_drive(&self) -> Result<Box<dyn DriveActuator>, DriverError> {
        if !self.drive {
            return Err(DriverError::unavailable("drive controller", "simulated device absent"));
        }
        Ok(Box::new(SimDrive::new(self.seed)))
    }
}

/// 模拟 240° 扫描仪
pub struct SimLaser {
    config: LaserConfig,
    emitter: bool,
    continuous: bool,
    period: Duration,
    rng: StdRng,
}

impl SimLaser {
    pub fn new(period: Duration, seed: u64) -> Self {
        Self {
            config: LaserConfig {
                min_angle: -120f32.to_radians(),
                max_angle: 120f32.to_radians(),
                angular_increment: 0.36f32.to_radians(),
                scan_time: period.as_secs_f32(),
                min_range: 0.02,
                max_range: 5.6,
            },
            emitter: false,
            continuous: false,
            period,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl LaserScanner for SimLaser {
    fn config(&self) -> LaserConfig {
        self.config
    }

    fn set_emitter(&mut self, on: bool) -> Result<(), DriverError> {
        self.emitter = on;
        if !on {
            self.continuous = false;
        }
        Ok(())
    }

    fn request_continuous(&mut self) -> Result<(), DriverError> {
        if !self.emitter {
            return Err(DriverError::Device("laser emitter is off".to_string()));
        }
        self.continuous = true;
        Ok(())
    }

    fn read_scan(&mut self) -> Result<(Timestamp, LaserScan), DriverError> {
        if !self.continuous {
            return Err(DriverError::Device("laser is not scanning".to_string()));
        }
        spin_sleep::sleep(self.period);
        let stamp = Timestamp::now();

        let n = self.config.expected_points();
        let mut ranges = Vec::with_capacity(n);
        let mut intensities = Vec::with_capacity(n);
        for i in 0..n {
            let angle = self.config.min_angle + i as f32 * self.config.angular_increment;
            // 2m 半径的圆形房间，中间有噪声
            let r = 2.0 + 0.5 * (3.0 * angle).cos() + self.rng.gen_range(-0.01..0.01);
            ranges.push(r.clamp(self.config.min_range, self.config.max_range));
            intensities.push(1000.0 - 100.0 * r);
        }
        let scan = LaserScan::new(self.config, ranges, intensities)?;
        Ok((stamp, scan))
    }
}

/// 模拟单目摄像头：逐帧平移的渐变图
pub struct SimCamera {
    format: ImageFormat,
    frame: u32,
}

impl FrameGrabber for SimCamera {
    fn format(&self) -> ImageFormat {
        self.format
    }

    fn grab(&mut self) -> Result<Bytes, DriverError> {
        let len = self.format.frame_len();
        let shift = self.frame;
        self.frame = self.frame.wrapping_add(1);
        let pixels: Vec<u8> = (0..len).map(|i| (i as u32).wrapping_add(shift) as u8).collect();
        Ok(Bytes::from(pixels))
    }
}

/// 模拟双目图像板
pub struct SimStereo {
    width: u16,
    height: u16,
    frame: u8,
}

impl StereoImageSource for SimStereo {
    fn dimensions(&self) -> (u16, u16) {
        (self.width, self.height)
    }

    fn collect_pair(&mut self) -> Result<StereoFrame, DriverError> {
        let plane = self.width as usize * self.height as usize;
        let base = self.frame;
        self.frame = self.frame.wrapping_add(1);
        let left: Vec<u8> = (0..plane).map(|i| (i as u8).wrapping_add(base)).collect();
        // 右图相对左图水平偏移 4 像素（视差）
        let right: Vec<u8> = (0..plane)
            .map(|i| (i as u8).wrapping_add(base).wrapping_add(4))
            .collect();
        Ok(StereoFrame::new(self.width, self.height, left, right)?)
    }
}

/// 模拟车辆：按转向和速度产生偏航角速度与编码器读数
pub struct SimDrive {
    steer_deg: f32,
    speed: i32,
    battery: f32,
    rng: StdRng,
}

/// 轴距（m）
const WHEELBASE: f32 = 0.26;
/// 设备速度单位到 m/s 的换算
const SPEED_TO_MPS: f32 = 1.0 / 1000.0;

impl SimDrive {
    pub fn new(seed: u64) -> Self {
        Self {
            steer_deg: 0.0,
            speed: 0,
            battery: 100.0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn steer_angle(&self) -> f32 {
        self.steer_deg
    }

    pub fn drive_speed(&self) -> i32 {
        self.speed
    }
}

impl DriveActuator for SimDrive {
    fn set_steer_angle(&mut self, degrees: f32) -> Result<(), DriverError> {
        self.steer_deg = degrees;
        Ok(())
    }

    fn set_drive_speed(&mut self, speed: i32) -> Result<(), DriverError> {
        self.speed = speed;
        Ok(())
    }

    fn present_speed(&mut self) -> Result<i32, DriverError> {
        Ok(self.speed)
    }

    fn sensor_info(&mut self) -> Result<SensorReading, DriverError> {
        let v = self.speed as f32 * SPEED_TO_MPS;
        let yaw_rate = v * self.steer_deg.to_radians().tan() / WHEELBASE;
        let noise = self.rng.gen_range(-0.002..0.002);
        let wheel = v * 1000.0;
        Ok(SensorReading {
            gyro: yaw_rate + noise,
            acc: [noise, -noise, 1.0],
            encoders: [self.speed as f32 / 60.0, wheel, wheel, wheel, wheel],
        })
    }

    fn power_info(&mut self) -> Result<PowerReading, DriverError> {
        self.battery = (self.battery - 0.001 * self.speed.unsigned_abs() as f32 / 1000.0).max(0.0);
        Ok(PowerReading {
            motor_current: self.speed.unsigned_abs() as f32 / 1000.0,
            battery_level: self.battery,
        })
    }

    fn shutdown(&mut self) {
        self.speed = 0;
        self.steer_deg = 0.0;
    }
}
