//! Builder 模式实现
//!
//! 提供链式构造 [`Server`] 的便捷方式。装配过程中任何一个驱动打不开硬件，
//! 都只记录警告并把它从本次运行中省略，不影响其它驱动。

use crate::config::{BackendKind, ServerConfig};
use crate::server::Server;
use crate::StreamError;
use robocar_driver::{
    AbsentBackend, BoardCameraDriver, DeliveryQueue, DeviceBackend, DriveCommandServer,
    DriveControl, DriverError, DriverHandle, ImuDriver, LaserDriver, SensorDriver,
    SimulatedBackend, TextDriver, UsbCameraDriver,
};
use std::net::TcpListener;
use std::sync::Arc;
use tracing::{info, warn};

/// Server Builder（链式构造）
///
/// # Example
///
/// ```no_run
/// use robocar_stream::{ServerBuilder, ServerConfig};
///
/// let mut server = ServerBuilder::new()
///     .config(ServerConfig::text_only())
///     .port(0)
///     .build()
///     .unwrap();
/// let shutdown = server.shutdown_handle();
/// std::thread::spawn(move || server.run());
/// shutdown.shutdown();
/// ```
pub struct ServerBuilder {
    config: ServerConfig,
    /// 跳过依赖车辆硬件的部分（驾驶控制、板载摄像头、IMU）
    dry_run: bool,
    /// 跳过所有摄像头
    no_vision: bool,
    /// 显式指定的设备后端（覆盖配置中的 `backend`）
    backend: Option<Arc<dyn DeviceBackend>>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            dry_run: false,
            no_vision: false,
            backend: None,
        }
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// 覆盖传感器流端口（0 表示由系统分配）
    pub fn port(mut self, port: u16) -> Self {
        self.config.network.port = port;
        self
    }

    /// 覆盖驾驶指令端口（0 表示由系统分配）
    pub fn drive_port(mut self, port: u16) -> Self {
        self.config.drive.port = port;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn no_vision(mut self, no_vision: bool) -> Self {
        self.no_vision = no_vision;
        self
    }

    pub fn backend(mut self, backend: Arc<dyn DeviceBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// 绑定监听端口并装配所有驱动
    ///
    /// 只有监听端口绑定失败或配置非法是致命错误。
    pub fn build(self) -> Result<Server, StreamError> {
        let config = self.config;
        config.validate()?;

        let backend: Arc<dyn DeviceBackend> = match self.backend {
            Some(backend) => backend,
            None => match config.backend {
                BackendKind::Simulated => Arc::new(SimulatedBackend::default()),
                BackendKind::None => Arc::new(AbsentBackend),
            },
        };

        let addr = config.stream_addr();
        let listener =
            TcpListener::bind(addr).map_err(|source| StreamError::Bind { addr, source })?;
        listener.set_nonblocking(true)?;

        let queue = Arc::new(DeliveryQueue::with_bound(config.queue_bound()));
        let mut drivers = Vec::new();

        info!(
            "Assembling drivers (backend: {}, dry run: {}, no vision: {})",
            backend.name(),
            self.dry_run,
            self.no_vision
        );

        if config.text.enabled {
            let driver = TextDriver::new(config.text.message.clone(), config.text.interval());
            attach(&mut drivers, &queue, Ok(driver));
        }

        if config.laser.enabled {
            let driver = LaserDriver::open(backend.as_ref(), &config.laser.device);
            attach(&mut drivers, &queue, driver);
        }

        if config.usb_camera.enabled && !self.no_vision {
            let driver = UsbCameraDriver::open(
                backend.as_ref(),
                &config.usb_camera.device,
                config.usb_camera.format(),
                config.usb_camera.fps,
            );
            attach(&mut drivers, &queue, driver);
        }

        if config.board_camera.enabled && !self.no_vision && !self.dry_run {
            let driver = BoardCameraDriver::open(
                backend.as_ref(),
                config.board_camera.width,
                config.board_camera.height,
                config.board_camera.fps,
            );
            attach(&mut drivers, &queue, driver);
        }

        // 驾驶控制上下文只构造一次，由 IMU 驱动与驾驶指令通道共享
        let mut drive_control = None;
        let mut drive_server = None;
        if (config.drive.enabled || config.imu.enabled) && !self.dry_run {
            match DriveControl::open(backend.as_ref(), config.drive_mapping()) {
                Ok(control) => drive_control = Some(control),
                Err(e) => warn!("Drive control unavailable, IMU and drive channel omitted: {}", e),
            }
        }

        if let Some(control) = &drive_control {
            if config.imu.enabled {
                let driver = ImuDriver::new(control.clone(), config.imu.rate_hz);
                attach(&mut drivers, &queue, driver);
            }
            if config.drive.enabled {
                match DriveCommandServer::bind(config.drive_addr(), control.clone()) {
                    Ok(server) => drive_server = Some(server),
                    Err(e) => warn!("Drive command channel not started: {}", e),
                }
            }
        }

        if drivers.is_empty() {
            warn!("No sensor drivers available; clients will receive no frames");
        }

        Server::new(listener, config, queue, drivers, drive_control, drive_server)
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// 启动驱动线程；硬件缺席或线程创建失败时只记录日志
fn attach<D: SensorDriver>(
    drivers: &mut Vec<DriverHandle>,
    queue: &Arc<DeliveryQueue>,
    driver: Result<D, DriverError>,
) {
    let driver = match driver {
        Ok(driver) => driver,
        Err(e) => {
            warn!("Sensor driver omitted: {}", e);
            return;
        },
    };
    let name = driver.name().to_string();
    match DriverHandle::spawn(driver, queue.clone()) {
        Ok(handle) => {
            info!("Sensor driver ready: {}", name);
            drivers.push(handle);
        },
        Err(e) => warn!("Sensor driver {} omitted: {}", name, e),
    }
}
