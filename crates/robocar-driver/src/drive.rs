//! 驾驶控制上下文与驾驶指令通道
//!
//! `DriveControl` 由服务端装配方构造一次，并以 `Arc` 显式传给 IMU 驱动和
//! 驾驶指令服务线程；执行器的所有访问都经过同一把锁。

use crate::device::{DeviceBackend, DriveActuator};
use crate::worker::JoinTimeout;
use crate::DriverError;
use parking_lot::Mutex;
use robocar_protocol::{
    DRIVE_COMMAND_LEN, DriveCommand, DriveMapping, DriveState, ImuChannel, ImuSample,
};
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// 默认驾驶指令端口
pub const DEFAULT_DRIVE_PORT: u16 = 12345;

/// 轮询间隔（accept / 读超时）
const POLL_INTERVAL: Duration = Duration::from_millis(10);
const CLIENT_READ_TIMEOUT: Duration = Duration::from_millis(100);

struct Inner {
    actuator: Box<dyn DriveActuator>,
    state: DriveState,
}

/// 驾驶控制上下文
pub struct DriveControl {
    inner: Mutex<Inner>,
    mapping: DriveMapping,
}

impl DriveControl {
    /// 初始化执行器：速度、转向归零
    pub fn new(mut actuator: Box<dyn DriveActuator>, mapping: DriveMapping) -> Result<Self, DriverError> {
        actuator.set_drive_speed(0)?;
        actuator.set_steer_angle(0.0)?;
        Ok(Self {
            inner: Mutex::new(Inner {
                actuator,
                state: DriveState::default(),
            }),
            mapping,
        })
    }

    /// 从后端打开执行器
    pub fn open(backend: &dyn DeviceBackend, mapping: DriveMapping) -> Result<Arc<Self>, DriverError> {
        let actuator = backend.open_drive()?;
        Ok(Arc::new(Self::new(actuator, mapping)?))
    }

    pub fn mapping(&self) -> DriveMapping {
        self.mapping
    }

    /// 应用钳位后的状态：设置转向角与带符号的驱动速度
    pub fn change_state(&self, state: DriveState) -> Result<(), DriverError> {
        let mut inner = self.inner.lock();
        inner.actuator.set_steer_angle(state.steering_deg)?;
        inner.actuator.set_drive_speed(state.signed_speed())?;
        inner.state = state;
        Ok(())
    }

    /// 处理一条原始指令，返回回显帧
    pub fn apply_command(&self, cmd: &DriveCommand) -> Result<DriveCommand, DriverError> {
        let state = self.mapping.to_state(cmd);
        self.change_state(state)?;
        Ok(self.mapping.echo(cmd, &state))
    }

    /// 最近一次应用的状态，速度取执行器当前速度的绝对值
    pub fn state(&self) -> Result<DriveState, DriverError> {
        let mut inner = self.inner.lock();
        let speed = inner.actuator.present_speed()?;
        Ok(DriveState {
            speed: speed.abs(),
            ..inner.state
        })
    }

    /// 读取车载传感器与电源信息，组装 IMU 采样
    pub fn read_imu(&self) -> Result<ImuSample, DriverError> {
        let (sensors, power) = {
            let mut inner = self.inner.lock();
            (inner.actuator.sensor_info()?, inner.actuator.power_info()?)
        };

        let mut sample = ImuSample::default()
            .with(ImuChannel::Gyro, sensors.gyro)
            .with(ImuChannel::AccX, sensors.acc[0])
            .with(ImuChannel::AccY, sensors.acc[1])
            .with(ImuChannel::AccZ, sensors.acc[2])
            .with(ImuChannel::PowerCurrent, power.motor_current)
            .with(ImuChannel::PowerBatteryLevel, power.battery_level);
        let encoders = [
            ImuChannel::EncMotor,
            ImuChannel::EncWheel1,
            ImuChannel::EncWheel2,
            ImuChannel::EncWheel3,
            ImuChannel::EncWheel4,
        ];
        for (channel, value) in encoders.into_iter().zip(sensors.encoders) {
            sample.set(channel, value);
        }
        Ok(sample)
    }
}

impl Drop for DriveControl {
    fn drop(&mut self) {
        self.inner.get_mut().actuator.shutdown();
    }
}

impl std::fmt::Debug for DriveControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriveControl")
            .field("mapping", &self.mapping)
            .finish_non_exhaustive()
    }
}

/// 驾驶指令服务：一次服务一个客户端，每收到 20 字节指令回显 20 字节
pub struct DriveCommandServer {
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl DriveCommandServer {
    pub fn bind(addr: SocketAddr, control: Arc<DriveControl>) -> Result<Self, DriverError> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        let shutdown = Arc::new(AtomicBool::new(false));

        let thread = std::thread::Builder::new()
            .name("drive-command".to_string())
            .spawn({
                let shutdown = shutdown.clone();
                move || serve(listener, control, shutdown)
            })
            .map_err(DriverError::ThreadSpawn)?;

        info!("Drive command channel listening on {}", local_addr);

        Ok(Self {
            local_addr,
            shutdown,
            thread: Some(thread),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.thread.take()
            && let Err(_e) = handle.join_timeout(Duration::from_secs(2))
        {
            error!("Drive command thread failed to shut down in time");
        }
    }
}

impl Drop for DriveCommandServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn serve(listener: TcpListener, control: Arc<DriveControl>, shutdown: Arc<AtomicBool>) {
    while !shutdown.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, addr)) => {
                info!("Drive client connected: {}", addr);
                match serve_client(stream, &control, &shutdown) {
                    Ok(()) => info!("Drive client disconnected: {}", addr),
                    Err(e) => warn!("Drive client {} dropped: {}", addr, e),
                }
            },
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                std::thread::sleep(POLL_INTERVAL);
            },
            Err(e) => {
                error!("Error accepting drive client: {}", e);
                std::thread::sleep(POLL_INTERVAL);
            },
        }
    }
    debug!("drive command thread exited");
}

fn serve_client(
    mut stream: TcpStream,
    control: &DriveControl,
    shutdown: &AtomicBool,
) -> Result<(), DriverError> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(CLIENT_READ_TIMEOUT))?;
    stream.set_nodelay(true)?;

    let mut buf = [0u8; DRIVE_COMMAND_LEN];
    let mut filled = 0;

    while !shutdown.load(Ordering::Acquire) {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => return Ok(()),
            Ok(n) => filled += n,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => continue,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }

        if filled < DRIVE_COMMAND_LEN {
            continue;
        }
        filled = 0;

        let request = DriveCommand::from_bytes(&buf)?;
        let echo = control.apply_command(&request)?;
        debug!(?request, ?echo, "drive command applied");
        stream.write_all(&echo.to_bytes())?;
    }
    Ok(())
}
