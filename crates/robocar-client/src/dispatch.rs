//! 客户端调度循环
//!
//! 连接一次服务端，然后循环：读一帧 → 按类型解码 → 交给 [`MessageSink`]。
//!
//! - 帧边界丢失（超长、截断、IO 错误）：循环以错误结束，不自动重连
//! - 负载解码失败：丢弃该帧，继续
//! - 未知类型标签：记录日志并丢弃，继续
//! - 服务端在帧边界处正常关闭：循环返回 `Ok`

use crate::error::ClientError;
use crate::odometry::{Odometer, OdometerConfig};
use crate::sink::MessageSink;
use robocar_protocol::{
    FrameReader, ImageFormat, ImuSample, LaserScan, MAX_PAYLOAD_SIZE, MessageType, ProtocolError,
    StereoFrame, TextMessage, UsbFrame, WireMessage,
};
use std::net::{IpAddr, Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// 服务端默认传感器端口
pub const DEFAULT_SERVER_PORT: u16 = 1607;

/// 客户端配置
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// 地址中未指定端口时使用
    pub port: u16,
    pub max_payload_size: u32,
    /// USB 相机帧不带尺寸，必须与服务端配置一致
    pub usb_format: ImageFormat,
    pub odometer: OdometerConfig,
    /// `None` 表示使用系统默认的连接超时
    pub connect_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_SERVER_PORT,
            max_payload_size: MAX_PAYLOAD_SIZE,
            usb_format: ImageFormat::USB_DEFAULT,
            odometer: OdometerConfig::default(),
            connect_timeout: Some(Duration::from_secs(5)),
        }
    }
}

/// 解析服务端地址
///
/// 接受 `ip`、`ip:port`、`host`、`host:port`；缺省端口取 `default_port`。
pub fn resolve_server_addr(addr: &str, default_port: u16) -> Result<SocketAddr, ClientError> {
    let addr = addr.trim();
    if let Ok(socket_addr) = addr.parse::<SocketAddr>() {
        return Ok(socket_addr);
    }
    if let Ok(ip) = addr.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, default_port));
    }

    let resolved = if addr.contains(':') {
        addr.to_socket_addrs()
    } else {
        (addr, default_port).to_socket_addrs()
    };
    resolved
        .map_err(|e| ClientError::InvalidAddress(format!("{}: {}", addr, e)))?
        .next()
        .ok_or_else(|| ClientError::InvalidAddress(addr.to_string()))
}

/// 调度统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// 完整读取的帧数（含被丢弃的）
    pub frames: u64,
    /// 线上字节数（帧头 + 负载）
    pub bytes: u64,
    pub text: u64,
    pub laser_scans: u64,
    pub usb_frames: u64,
    pub stereo_frames: u64,
    pub imu_samples: u64,
    pub odometry_reports: u64,
    pub unknown: u64,
    /// 负载解码失败而丢弃的帧
    pub malformed: u64,
    /// 被里程计拒绝的乱序样本
    pub rejected_samples: u64,
}

/// 调度循环结束原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchEnd {
    /// 服务端在帧边界处关闭连接
    ServerClosed,
    /// 本地请求停止
    Shutdown,
}

/// 从其他线程停止调度循环
///
/// 关闭套接字使阻塞中的读取立即返回。
#[derive(Debug)]
pub struct ClientShutdown {
    stream: TcpStream,
    requested: Arc<AtomicBool>,
}

impl ClientShutdown {
    pub fn shutdown(&self) {
        self.requested.store(true, Ordering::Release);
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            debug!("Socket shutdown: {}", e);
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}

/// 传感器总线客户端
pub struct Client {
    reader: FrameReader<TcpStream>,
    peer: SocketAddr,
    config: ClientConfig,
    odometer: Odometer,
    laser_seq: u32,
    image_frame_id: u32,
    stats: DispatchStats,
    shutdown_requested: Arc<AtomicBool>,
}

impl Client {
    pub fn connect(addr: SocketAddr) -> Result<Self, ClientError> {
        Self::connect_with(addr, ClientConfig::default())
    }

    pub fn connect_with(addr: SocketAddr, config: ClientConfig) -> Result<Self, ClientError> {
        let stream = match config.connect_timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        }
        .map_err(|source| ClientError::Connect { addr, source })?;
        stream.set_nodelay(true)?;
        info!("Connected to {}", addr);
        Ok(Self::from_stream(stream, addr, config))
    }

    /// 使用已建立的连接
    pub fn from_stream(stream: TcpStream, peer: SocketAddr, config: ClientConfig) -> Self {
        Self {
            reader: FrameReader::with_max_payload(stream, config.max_payload_size),
            peer,
            odometer: Odometer::new(config.odometer),
            config,
            laser_seq: 0,
            image_frame_id: 0,
            stats: DispatchStats::default(),
            shutdown_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    pub fn odometer(&self) -> &Odometer {
        &self.odometer
    }

    pub fn shutdown_handle(&self) -> Result<ClientShutdown, ClientError> {
        Ok(ClientShutdown {
            stream: self.reader.get_ref().try_clone()?,
            requested: self.shutdown_requested.clone(),
        })
    }

    /// 运行调度循环直到连接关闭、本地停止或发生致命错误
    pub fn run<S: MessageSink + ?Sized>(&mut self, sink: &mut S) -> Result<DispatchEnd, ClientError> {
        let end = loop {
            if self.shutdown_requested.load(Ordering::Acquire) {
                break DispatchEnd::Shutdown;
            }
            match self.reader.next_frame() {
                Ok(Some(msg)) => self.dispatch(msg, sink),
                Ok(None) => {
                    if self.shutdown_requested.load(Ordering::Acquire) {
                        break DispatchEnd::Shutdown;
                    }
                    info!("Server {} closed the connection", self.peer);
                    break DispatchEnd::ServerClosed;
                },
                Err(_) if self.shutdown_requested.load(Ordering::Acquire) => {
                    break DispatchEnd::Shutdown;
                },
                Err(e) => {
                    warn!("Connection to {} failed: {}", self.peer, e);
                    return Err(e.into());
                },
            }
        };
        info!(
            "Dispatch loop ended ({:?}): {} frames, {} bytes",
            end, self.stats.frames, self.stats.bytes
        );
        Ok(end)
    }

    /// 处理一帧（解码失败只丢弃该帧）
    pub fn dispatch<S: MessageSink + ?Sized>(&mut self, msg: WireMessage, sink: &mut S) {
        self.stats.frames += 1;
        self.stats.bytes += msg.encoded_len() as u64;
        trace!("Frame type={} size={}", msg.type_tag(), msg.size());

        if let Err(e) = self.decode_into(&msg, sink) {
            self.stats.malformed += 1;
            warn!("Dropping malformed frame (type={}): {}", msg.type_tag(), e);
        }
    }

    fn decode_into<S: MessageSink + ?Sized>(
        &mut self,
        msg: &WireMessage,
        sink: &mut S,
    ) -> Result<(), ProtocolError> {
        let stamp = msg.timestamp();
        let Some(ty) = msg.message_type() else {
            self.stats.unknown += 1;
            warn!(
                "Unknown message type {} ({} bytes), frame dropped",
                msg.type_tag(),
                msg.size()
            );
            sink.on_unknown(msg.type_tag(), stamp, msg.size());
            return Ok(());
        };

        match ty {
            MessageType::Text => {
                let text = TextMessage::try_from(msg)?;
                self.stats.text += 1;
                sink.on_text(stamp, text.text);
            },
            MessageType::LaserScan => {
                let scan = LaserScan::try_from(msg)?;
                let seq = self.laser_seq;
                self.laser_seq = self.laser_seq.wrapping_add(1);
                self.stats.laser_scans += 1;
                sink.on_laser_scan(seq, stamp, scan);
            },
            MessageType::UsbCamera => {
                let frame = UsbFrame::from_message(msg, self.config.usb_format)?;
                let frame_id = self.next_image_frame_id();
                self.stats.usb_frames += 1;
                sink.on_usb_frame(frame_id, stamp, frame);
            },
            MessageType::BoardCamera => {
                let frame = StereoFrame::try_from(msg)?;
                let frame_id = self.next_image_frame_id();
                self.stats.stereo_frames += 1;
                sink.on_stereo_frame(frame_id, stamp, frame);
            },
            MessageType::Imu => {
                let sample = ImuSample::try_from(msg)?;
                self.stats.imu_samples += 1;
                sink.on_imu(stamp, sample);
                match self.odometer.update(&sample, stamp) {
                    Ok(()) => {
                        if let Some(report) = self.odometer.report() {
                            self.stats.odometry_reports += 1;
                            sink.on_odometry(report);
                        }
                    },
                    Err(e) => {
                        self.stats.rejected_samples += 1;
                        warn!("{}", e);
                    },
                }
            },
        }
        Ok(())
    }

    fn next_image_frame_id(&mut self) -> u32 {
        let id = self.image_frame_id;
        self.image_frame_id = self.image_frame_id.wrapping_add(1);
        id
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("peer", &self.peer)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_server_addr() {
        assert_eq!(
            resolve_server_addr("192.168.1.20", DEFAULT_SERVER_PORT).unwrap(),
            "192.168.1.20:1607".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            resolve_server_addr(" 10.0.0.1:9000 ", DEFAULT_SERVER_PORT).unwrap(),
            "10.0.0.1:9000".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            resolve_server_addr("localhost", 4000).unwrap().port(),
            4000
        );
        assert!(matches!(
            resolve_server_addr("not a host name", DEFAULT_SERVER_PORT),
            Err(ClientError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.port, 1607);
        assert_eq!(config.max_payload_size, MAX_PAYLOAD_SIZE);
        assert_eq!(config.usb_format.frame_len(), 640 * 480 * 3);
        assert_eq!(config.odometer.standard_gravity, 9.8065);
    }
}
