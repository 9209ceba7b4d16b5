//! Robocar 传感器总线客户端
//!
//! 连接服务端并记录收到的每一帧，IMU 样本同时积分为里程计。
//! 连接错误或协议错误时以退出码 1 结束，不自动重连。

use anyhow::{Context, Result};
use clap::Parser;
use robocar_client::{
    Client, ClientConfig, DEFAULT_SERVER_PORT, DispatchEnd, MessageSink, ODOMETRY_FRAME_ID,
    OdometerConfig, OdometryReport, resolve_server_addr,
};
use robocar_protocol::{ImageFormat, ImuSample, LaserScan, StereoFrame, Timestamp, UsbFrame};
use std::process;
use tracing::{debug, error, info};

/// Robocar 传感器总线客户端
#[derive(Parser, Debug)]
#[command(name = "robocar-client")]
#[command(about = "Robocar sensor bus client - decodes and logs sensor frames", long_about = None)]
struct Args {
    /// 服务端地址（IP、IP:PORT 或主机名）
    server: String,

    /// 地址中未给出端口时使用
    #[arg(long, default_value_t = DEFAULT_SERVER_PORT)]
    port: u16,

    /// USB 相机帧宽度（必须与服务端一致）
    #[arg(long, default_value_t = ImageFormat::USB_DEFAULT.width)]
    usb_width: u32,

    /// USB 相机帧高度
    #[arg(long, default_value_t = ImageFormat::USB_DEFAULT.height)]
    usb_height: u32,

    /// USB 相机每像素字节数
    #[arg(long, default_value_t = ImageFormat::USB_DEFAULT.bytes_per_pixel)]
    usb_bpp: u32,

    /// 竖直轴重力偏置（g）
    #[arg(long, default_value_t = 1.0)]
    gravity_bias: f64,
}

/// 把每种消息写进日志
#[derive(Debug, Default)]
struct LoggingSink;

impl MessageSink for LoggingSink {
    fn on_text(&mut self, stamp: Timestamp, text: String) {
        info!("[{}.{:06}] text: {}", stamp.sec, stamp.usec, text);
    }

    fn on_laser_scan(&mut self, seq: u32, stamp: Timestamp, scan: LaserScan) {
        let nearest = scan
            .ranges()
            .iter()
            .copied()
            .filter(|r| *r > 0.0)
            .fold(f32::INFINITY, f32::min);
        info!(
            "[{}.{:06}] laser #{}: {} points, nearest {:.3} m",
            stamp.sec,
            stamp.usec,
            seq,
            scan.len(),
            nearest
        );
    }

    fn on_usb_frame(&mut self, frame_id: u32, stamp: Timestamp, frame: UsbFrame) {
        let format = frame.format();
        info!(
            "[{}.{:06}] usb camera frame {}: {}x{}",
            stamp.sec, stamp.usec, frame_id, format.width, format.height
        );
    }

    fn on_stereo_frame(&mut self, frame_id: u32, stamp: Timestamp, frame: StereoFrame) {
        info!(
            "[{}.{:06}] stereo frame {}: {}x{} per eye",
            stamp.sec,
            stamp.usec,
            frame_id,
            frame.width(),
            frame.height()
        );
    }

    fn on_imu(&mut self, stamp: Timestamp, sample: ImuSample) {
        debug!("[{}.{:06}] imu: {:?}", stamp.sec, stamp.usec, sample.values);
    }

    fn on_odometry(&mut self, report: OdometryReport) {
        info!(
            "[{}.{:06}] {}: position ({:.3}, {:.3}, {:.3}) heading {:.3} rad velocity ({:.3}, {:.3}, {:.3})",
            report.stamp.sec,
            report.stamp.usec,
            ODOMETRY_FRAME_ID,
            report.position.x,
            report.position.y,
            report.position.z,
            report.heading(),
            report.velocity.x,
            report.velocity.y,
            report.velocity.z
        );
    }

    fn on_unknown(&mut self, tag: u8, _stamp: Timestamp, size: usize) {
        debug!("skipped unknown frame type {} ({} bytes)", tag, size);
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("robocar_client=info")
            }),
        )
        .init();

    let args = Args::parse();
    if let Err(e) = run(args) {
        error!("{:#}", e);
        process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let addr = resolve_server_addr(&args.server, args.port)?;
    let config = ClientConfig {
        port: args.port,
        usb_format: ImageFormat::new(args.usb_width, args.usb_height, args.usb_bpp),
        odometer: OdometerConfig {
            gravity_bias_g: args.gravity_bias,
            ..OdometerConfig::default()
        },
        ..ClientConfig::default()
    };

    let mut client = Client::connect_with(addr, config)?;

    let shutdown = client.shutdown_handle()?;
    ctrlc::set_handler(move || {
        info!("Received interrupt signal, stopping");
        shutdown.shutdown();
    })
    .context("Failed to set signal handler")?;

    let mut sink = LoggingSink;
    let end = client.run(&mut sink)?;

    let stats = client.stats();
    info!(
        "Stopped ({}): {} frames, {} malformed, {} unknown, {} odometry reports",
        match end {
            DispatchEnd::ServerClosed => "server closed",
            DispatchEnd::Shutdown => "interrupted",
        },
        stats.frames,
        stats.malformed,
        stats.unknown,
        stats.odometry_reports
    );
    Ok(())
}
