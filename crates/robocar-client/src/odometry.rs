//! 航位推算里程计
//!
//! 对 IMU 样本做前向欧拉积分：
//!
//! ```text
//! a = g * (acc - bias_z)
//! v += dt * a
//! p += dt * v
//! yaw += dt * gyro，折回 [-π, π]
//! ```
//!
//! 无滤波、无零偏估计、无漂移修正。加速度按车体坐标系直接积分。

use crate::error::OdometryError;
use nalgebra::{UnitQuaternion, Vector3};
use robocar_protocol::{ImuSample, Timestamp};
use std::f64::consts::{PI, TAU};

/// 里程计发布时使用的坐标系名称
pub const ODOMETRY_FRAME_ID: &str = "robocar_odometer";

/// 里程计参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OdometerConfig {
    /// 竖直轴上扣除的重力偏置（单位 g）
    pub gravity_bias_g: f64,
    /// 1 g 对应的加速度（m/s²）
    pub standard_gravity: f64,
}

impl Default for OdometerConfig {
    fn default() -> Self {
        Self {
            gravity_bias_g: 1.0,
            standard_gravity: 9.8065,
        }
    }
}

/// 里程计状态
///
/// 只由持有调度循环的线程修改，因此不需要内部锁。
#[derive(Debug, Clone)]
pub struct Odometer {
    config: OdometerConfig,
    position: Vector3<f64>,
    velocity: Vector3<f64>,
    heading: f64,
    last_update: Option<Timestamp>,
}

impl Odometer {
    pub fn new(config: OdometerConfig) -> Self {
        Self {
            config,
            position: Vector3::zeros(),
            velocity: Vector3::zeros(),
            heading: 0.0,
            last_update: None,
        }
    }

    /// 用一个 IMU 样本推进状态
    ///
    /// 第一个样本只建立时间基准。`dt < 0`、间隔无法表示或数值非有限的样本
    /// 被拒绝，状态保持不变。
    pub fn update(&mut self, sample: &ImuSample, timestamp: Timestamp) -> Result<(), OdometryError> {
        if !is_finite_sample(sample) {
            return Err(OdometryError::NonFiniteSample { stamp: timestamp });
        }

        let Some(last) = self.last_update else {
            self.last_update = Some(timestamp);
            return Ok(());
        };

        let dt = timestamp
            .seconds_since(last)
            .ok_or(OdometryError::InvalidInterval {
                last,
                received: timestamp,
            })?;
        if dt < 0.0 {
            return Err(OdometryError::OutOfOrder { last, dt });
        }

        let acceleration = self.acceleration(sample);
        self.velocity += acceleration * dt;
        self.position += self.velocity * dt;
        self.heading = wrap_angle(self.heading + dt * f64::from(sample.gyro()));
        self.last_update = Some(timestamp);
        Ok(())
    }

    /// g 单位 → m/s²，竖直轴扣除重力偏置
    fn acceleration(&self, sample: &ImuSample) -> Vector3<f64> {
        let [x, y, z] = sample.acceleration();
        Vector3::new(
            f64::from(x),
            f64::from(y),
            f64::from(z) - self.config.gravity_bias_g,
        ) * self.config.standard_gravity
    }

    pub fn position(&self) -> &Vector3<f64> {
        &self.position
    }

    pub fn velocity(&self) -> &Vector3<f64> {
        &self.velocity
    }

    /// 航向角（弧度，[-π, π]）
    pub fn heading(&self) -> f64 {
        self.heading
    }

    pub fn last_update(&self) -> Option<Timestamp> {
        self.last_update
    }

    /// 仅绕竖直轴的姿态（横滚、俯仰视为 0）
    pub fn orientation(&self) -> UnitQuaternion<f64> {
        UnitQuaternion::from_axis_angle(&Vector3::z_axis(), self.heading)
    }

    /// 当前状态快照；尚未收到任何样本时返回 `None`
    pub fn report(&self) -> Option<OdometryReport> {
        self.last_update.map(|stamp| OdometryReport {
            stamp,
            position: self.position,
            orientation: self.orientation(),
            velocity: self.velocity,
        })
    }

    /// 清零并丢弃时间基准
    pub fn reset(&mut self) {
        *self = Self::new(self.config);
    }
}

impl Default for Odometer {
    fn default() -> Self {
        Self::new(OdometerConfig::default())
    }
}

// 只检查参与积分的通道
fn is_finite_sample(sample: &ImuSample) -> bool {
    sample.gyro().is_finite() && sample.acceleration().iter().all(|v| v.is_finite())
}

/// 每个被接受的 IMU 样本之后生成的里程计报告
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OdometryReport {
    pub stamp: Timestamp,
    pub position: Vector3<f64>,
    pub orientation: UnitQuaternion<f64>,
    pub velocity: Vector3<f64>,
}

impl OdometryReport {
    pub fn frame_id(&self) -> &'static str {
        ODOMETRY_FRAME_ID
    }

    /// 从姿态四元数还原航向角
    pub fn heading(&self) -> f64 {
        self.orientation.euler_angles().2
    }
}

/// 减去最近的 2π 整数倍，结果落在 [-π, π]
pub fn wrap_angle(angle: f64) -> f64 {
    let wrapped = angle - TAU * (angle / TAU).round();
    wrapped.clamp(-PI, PI)
}

#[cfg(test)]
mod tests {
    use super::*;
    use robocar_protocol::ImuChannel;
    use std::time::Duration;

    const T0: Timestamp = Timestamp::new(1_700_000_000, 0);

    fn feed(odometer: &mut Odometer, sample: &ImuSample, steps: u32, step: Duration) {
        let mut stamp = T0;
        odometer.update(sample, stamp).unwrap();
        for _ in 0..steps {
            stamp = stamp.offset(step);
            odometer.update(sample, stamp).unwrap();
        }
    }

    #[test]
    fn test_first_sample_only_sets_time_base() {
        let mut odometer = Odometer::default();
        let sample = ImuSample::default()
            .with(ImuChannel::AccX, 2.0)
            .with(ImuChannel::Gyro, 1.0);
        odometer.update(&sample, T0).unwrap();

        assert_eq!(odometer.last_update(), Some(T0));
        assert_eq!(*odometer.velocity(), Vector3::zeros());
        assert_eq!(odometer.heading(), 0.0);
    }

    #[test]
    fn test_gravity_bias_cancels() {
        let mut odometer = Odometer::default();
        let sample = ImuSample::default().with(ImuChannel::AccZ, 1.0);
        feed(&mut odometer, &sample, 10, Duration::from_millis(100));

        assert!(odometer.velocity().norm() < 1e-9, "{:?}", odometer.velocity());
        assert!(odometer.position().norm() < 1e-9);
    }

    #[test]
    fn test_constant_acceleration_integrates() {
        let mut odometer = Odometer::default();
        let sample = ImuSample::default()
            .with(ImuChannel::AccX, 1.0)
            .with(ImuChannel::AccZ, 1.0);
        feed(&mut odometer, &sample, 100, Duration::from_millis(10));

        // v = g * 1s；前向欧拉位置为 g * Σ(k*dt)*dt
        assert!((odometer.velocity().x - 9.8065).abs() < 1e-6);
        let expected_x = 9.8065 * 0.01 * 0.01 * (100.0 * 101.0 / 2.0);
        assert!((odometer.position().x - expected_x).abs() < 1e-6);
        assert!(odometer.velocity().z.abs() < 1e-9);
    }

    #[test]
    fn test_gyro_half_turn_wraps_to_pi() {
        let mut odometer = Odometer::default();
        let sample = ImuSample::default()
            .with(ImuChannel::Gyro, PI as f32)
            .with(ImuChannel::AccZ, 1.0);
        feed(&mut odometer, &sample, 10, Duration::from_millis(100));

        let heading = odometer.heading();
        assert!((heading.abs() - PI).abs() < 1e-5, "heading = {}", heading);
    }

    #[test]
    fn test_heading_stays_wrapped() {
        let mut odometer = Odometer::default();
        let sample = ImuSample::default().with(ImuChannel::Gyro, 5.0);
        feed(&mut odometer, &sample, 50, Duration::from_millis(100));

        let heading = odometer.heading();
        assert!((-PI..=PI).contains(&heading));
        // 25 rad 折回后的值
        assert!((heading - wrap_angle(25.0)).abs() < 1e-4, "heading = {}", heading);
    }

    #[test]
    fn test_out_of_order_sample_rejected() {
        let mut odometer = Odometer::default();
        let sample = ImuSample::default().with(ImuChannel::AccX, 1.0);
        let later = T0.offset(Duration::from_secs(1));
        odometer.update(&sample, T0).unwrap();
        odometer.update(&sample, later).unwrap();
        let velocity = *odometer.velocity();

        let err = odometer.update(&sample, T0).unwrap_err();
        assert!(matches!(err, OdometryError::OutOfOrder { last, dt } if last == later && dt < 0.0));
        assert_eq!(*odometer.velocity(), velocity);
        assert_eq!(odometer.last_update(), Some(later));
    }

    #[test]
    fn test_unrepresentable_interval_rejected() {
        let mut odometer = Odometer::default();
        let sample = ImuSample::default().with(ImuChannel::AccX, 1.0);
        let early = Timestamp::new(i64::MIN / 2, 0);
        odometer.update(&sample, early).unwrap();

        let late = Timestamp::new(i64::MAX / 2, 0);
        let err = odometer.update(&sample, late).unwrap_err();
        assert_eq!(
            err,
            OdometryError::InvalidInterval {
                last: early,
                received: late
            }
        );
        assert_eq!(*odometer.velocity(), Vector3::zeros());
        assert_eq!(odometer.last_update(), Some(early));

        // 乱序方向同样不能 panic
        let mut odometer = Odometer::default();
        odometer.update(&sample, late).unwrap();
        assert!(matches!(
            odometer.update(&sample, early),
            Err(OdometryError::InvalidInterval { .. })
        ));
        assert_eq!(odometer.last_update(), Some(late));
    }

    #[test]
    fn test_non_finite_sample_rejected() {
        let mut odometer = Odometer::default();
        let turning = ImuSample::default().with(ImuChannel::Gyro, 0.5);
        feed(&mut odometer, &turning, 1, Duration::from_secs(1));
        let heading = odometer.heading();

        let stamp = T0.offset(Duration::from_secs(2));
        for bad in [
            ImuSample::default().with(ImuChannel::Gyro, f32::NAN),
            ImuSample::default().with(ImuChannel::AccY, f32::INFINITY),
            ImuSample::default().with(ImuChannel::AccZ, f32::NEG_INFINITY),
        ] {
            let err = odometer.update(&bad, stamp).unwrap_err();
            assert_eq!(err, OdometryError::NonFiniteSample { stamp });
        }
        assert_eq!(odometer.heading(), heading);
        assert!(odometer.velocity().iter().all(|v| v.is_finite()));

        // 之后的正常样本继续积分
        odometer.update(&turning, stamp).unwrap();
        assert!((odometer.heading() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_zero_dt_is_accepted() {
        let mut odometer = Odometer::default();
        let sample = ImuSample::default().with(ImuChannel::AccX, 1.0);
        odometer.update(&sample, T0).unwrap();
        odometer.update(&sample, T0).unwrap();
        assert_eq!(*odometer.velocity(), Vector3::zeros());
    }

    #[test]
    fn test_orientation_is_yaw_only() {
        let mut odometer = Odometer::default();
        let sample = ImuSample::default().with(ImuChannel::Gyro, 0.5);
        feed(&mut odometer, &sample, 1, Duration::from_secs(1));

        let report = odometer.report().unwrap();
        let (roll, pitch, yaw) = report.orientation.euler_angles();
        assert!(roll.abs() < 1e-9 && pitch.abs() < 1e-9);
        assert!((yaw - 0.5).abs() < 1e-6);
        assert!((report.heading() - 0.5).abs() < 1e-6);
        assert_eq!(report.frame_id(), "robocar_odometer");
    }

    #[test]
    fn test_report_before_first_sample() {
        let mut odometer = Odometer::default();
        assert!(odometer.report().is_none());
        odometer.update(&ImuSample::default(), T0).unwrap();
        assert_eq!(odometer.report().unwrap().stamp, T0);
        odometer.reset();
        assert!(odometer.report().is_none());
    }

    #[test]
    fn test_wrap_angle() {
        assert!((wrap_angle(3.0 * PI / 2.0) + PI / 2.0).abs() < 1e-12);
        assert!((wrap_angle(-3.0 * PI / 2.0) - PI / 2.0).abs() < 1e-12);
        assert_eq!(wrap_angle(0.25), 0.25);
        assert!((wrap_angle(PI).abs() - PI).abs() < 1e-12);
    }
}
