//! Robocar 传感器总线服务端
//!
//! 装配所有可用的传感器驱动，逐个服务客户端连接，直到收到 Ctrl+C。
//!
//! 退出码：0 表示正常关闭，1 表示启动失败或致命错误。

use anyhow::{Context, Result};
use clap::Parser;
use robocar_stream::{ServerBuilder, ServerConfig};
use std::path::PathBuf;
use std::process;
use tracing::{error, info};

/// Robocar 传感器总线服务端
#[derive(Parser, Debug)]
#[command(name = "robocar-server")]
#[command(about = "Robocar sensor bus server - streams sensor frames to one client at a time", long_about = None)]
struct Args {
    /// 跳过依赖实际硬件的驱动（板载相机、驾驶控制、IMU）
    #[arg(long)]
    dry_run: bool,

    /// 跳过所有相机驱动
    #[arg(long)]
    no_vision: bool,

    /// 配置文件路径（TOML）
    ///
    /// 不指定时使用内置默认配置
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 传感器流端口（覆盖配置文件）
    #[arg(long)]
    port: Option<u16>,

    /// 驾驶指令端口（覆盖配置文件）
    #[arg(long)]
    drive_port: Option<u16>,

    /// 打印生效的配置后退出
    #[arg(long)]
    print_config: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(
                    "robocar_server=info,robocar_stream=info,robocar_driver=info",
                )
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
    let config = match &args.config {
        Some(path) => ServerConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ServerConfig::default(),
    };

    if args.print_config {
        print!("{}", toml::to_string_pretty(&config).context("Failed to render config")?);
        return Ok(());
    }

    let mut builder = ServerBuilder::new()
        .config(config)
        .dry_run(args.dry_run)
        .no_vision(args.no_vision);
    if let Some(port) = args.port {
        builder = builder.port(port);
    }
    if let Some(port) = args.drive_port {
        builder = builder.drive_port(port);
    }

    let mut server = builder.build().context("Failed to start server")?;

    let shutdown = server.shutdown_handle();
    ctrlc::set_handler(move || {
        info!("Received interrupt signal, shutting down");
        shutdown.shutdown();
    })
    .context("Failed to set signal handler")?;

    info!("Listening for clients on {}", server.local_addr());
    if let Some(addr) = server.drive_addr() {
        info!("Drive commands on {}", addr);
    }
    for status in server.driver_status() {
        info!("  driver {} ({})", status.name, status.message_type);
    }

    server.run().context("Server stopped with error")?;

    let metrics = server.metrics().snapshot();
    info!(
        "Server stopped: {} sessions, {} frames, {} bytes, {} dropped by queue, {} oversized",
        metrics.sessions,
        metrics.total_frames(),
        metrics.total_bytes(),
        metrics.queue_dropped + metrics.queue_rejected,
        metrics.oversized
    );
    Ok(())
}
