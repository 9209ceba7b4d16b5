//! Server Stream Loop
//!
//! 状态机：`Idle → Accepting → Streaming → Accepting → … → Idle`。
//! 一次只服务一个客户端：第二个连接在第一个断开前停留在 accept 队列中。
//! 进入 Streaming 时启动所有驱动，离开时停止（但不销毁）所有驱动。

use crate::config::ServerConfig;
use crate::metrics::{MetricsSnapshot, StreamMetrics};
use crate::StreamError;
use robocar_driver::{DeliveryQueue, DriveCommandServer, DriveControl, DriverHandle, DriverStatus};
use robocar_protocol::WireMessage;
use std::io::{BufWriter, ErrorKind, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// accept 轮询间隔
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);
/// 队列为空时检查关闭标志的间隔
const QUEUE_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// 写缓冲大小
const WRITE_BUFFER_SIZE: usize = 64 * 1024;

/// 服务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerState {
    Idle = 0,
    Accepting = 1,
    Streaming = 2,
}

impl ServerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Accepting,
            2 => Self::Streaming,
            _ => Self::Idle,
        }
    }
}

/// 关闭句柄（可跨线程克隆，例如交给 Ctrl-C 处理器）
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// 请求停止流循环
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// 会话结束原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// 写失败（对端关闭、重置或写超时）
    PeerGone(String),
    /// 收到关闭请求
    Shutdown,
}

/// 单次会话摘要
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub peer: SocketAddr,
    pub duration: Duration,
    pub end: SessionEnd,
    pub metrics: MetricsSnapshot,
}

/// 传感器流服务
///
/// Drop 时依次关闭驾驶指令通道、join 所有驱动线程、关闭监听端口。
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: ServerConfig,
    queue: Arc<DeliveryQueue>,
    drivers: Vec<DriverHandle>,
    drive_control: Option<Arc<DriveControl>>,
    drive_server: Option<DriveCommandServer>,
    state: AtomicU8,
    shutdown: ShutdownHandle,
    metrics: Arc<StreamMetrics>,
}

impl Server {
    pub(crate) fn new(
        listener: TcpListener,
        config: ServerConfig,
        queue: Arc<DeliveryQueue>,
        drivers: Vec<DriverHandle>,
        drive_control: Option<Arc<DriveControl>>,
        drive_server: Option<DriveCommandServer>,
    ) -> Result<Self, StreamError> {
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            config,
            queue,
            drivers,
            drive_control,
            drive_server,
            state: AtomicU8::new(ServerState::Idle as u8),
            shutdown: ShutdownHandle::new(),
            metrics: Arc::new(StreamMetrics::new()),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 驾驶指令通道地址（未启用时为 None）
    pub fn drive_addr(&self) -> Option<SocketAddr> {
        self.drive_server.as_ref().map(DriveCommandServer::local_addr)
    }

    pub fn drive_control(&self) -> Option<&Arc<DriveControl>> {
        self.drive_control.as_ref()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn state(&self) -> ServerState {
        ServerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn metrics(&self) -> Arc<StreamMetrics> {
        self.metrics.clone()
    }

    pub fn queue(&self) -> &Arc<DeliveryQueue> {
        &self.queue
    }

    pub fn driver_status(&self) -> Vec<DriverStatus> {
        self.drivers.iter().map(DriverHandle::status).collect()
    }

    fn set_state(&self, state: ServerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// 服务客户端直到收到关闭请求
    pub fn run(&mut self) -> Result<(), StreamError> {
        info!("Sensor stream listening on {}", self.local_addr);

        while let Some((stream, peer)) = self.accept()? {
            let summary = self.stream_session(stream, peer);
            let m = &summary.metrics;
            info!(
                "Client {} session ended after {:.1}s ({:?}): {} frames, {} bytes",
                summary.peer,
                summary.duration.as_secs_f64(),
                summary.end,
                m.total_frames(),
                m.total_bytes()
            );
            if m.queue_dropped > 0 || m.queue_rejected > 0 || m.oversized > 0 {
                warn!(
                    dropped = m.queue_dropped,
                    rejected = m.queue_rejected,
                    oversized = m.oversized,
                    "Frames lost during session with {}",
                    summary.peer
                );
            }
        }

        self.set_state(ServerState::Idle);
        info!("Sensor stream stopped");
        Ok(())
    }

    /// 等待一个客户端连接；收到关闭请求时返回 None
    pub fn accept(&mut self) -> Result<Option<(TcpStream, SocketAddr)>, StreamError> {
        self.set_state(ServerState::Accepting);
        loop {
            if self.shutdown.is_shutdown() {
                return Ok(None);
            }
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    stream.set_nonblocking(false)?;
                    return Ok(Some((stream, peer)));
                },
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                    std::thread::sleep(ACCEPT_POLL_INTERVAL);
                },
                Err(ref e) if e.kind() == ErrorKind::Interrupted => {},
                Err(e) => {
                    // 单次 accept 失败（如对端在握手后立即重置）不终止服务
                    error!("Error accepting client connection: {}", e);
                    std::thread::sleep(ACCEPT_POLL_INTERVAL);
                },
            }
        }
    }

    /// 服务一个已连接的客户端，直到写失败或收到关闭请求
    pub fn stream_session(&mut self, stream: TcpStream, peer: SocketAddr) -> SessionSummary {
        info!("Client connected: {}", peer);
        self.set_state(ServerState::Streaming);
        self.metrics.record_session();
        let before = self.metrics.snapshot();
        let queue_before = self.queue.stats();
        let started = Instant::now();

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
        }
        if let Err(e) = stream.set_write_timeout(self.config.network.write_timeout()) {
            debug!("Failed to set write timeout for {}: {}", peer, e);
        }

        if self.config.queue.discard_stale_on_connect {
            let stale = self.queue.clear();
            if stale > 0 {
                debug!("Discarded {} stale messages", stale);
                self.metrics.record_discarded(stale);
            }
        }

        for driver in &self.drivers {
            driver.start();
        }

        let end = self.pump(&stream);

        for driver in &self.drivers {
            driver.stop();
        }
        let queue_after = self.queue.stats();
        self.metrics.record_queue_losses(
            queue_after
                .dropped_oldest
                .saturating_sub(queue_before.dropped_oldest),
            queue_after.rejected.saturating_sub(queue_before.rejected),
        );
        if let Err(e) = stream.shutdown(Shutdown::Both) {
            trace!("Socket shutdown for {}: {}", peer, e);
        }
        drop(stream);

        self.set_state(ServerState::Accepting);
        SessionSummary {
            peer,
            duration: started.elapsed(),
            end,
            metrics: self.metrics.snapshot().since(&before),
        }
    }

    /// 从 Delivery Queue 取消息并写入套接字
    fn pump(&self, stream: &TcpStream) -> SessionEnd {
        let mut writer = BufWriter::with_capacity(WRITE_BUFFER_SIZE, stream);
        loop {
            if self.shutdown.is_shutdown() {
                return SessionEnd::Shutdown;
            }
            let Some(msg) = self.queue.pop_timeout(QUEUE_POLL_INTERVAL) else {
                continue;
            };
            // 客户端会把超限帧当作致命错误断开，在这里丢弃
            if msg.size() > self.config.network.max_payload_size as usize {
                self.metrics.record_oversized();
                warn!(
                    type_tag = msg.type_tag(),
                    size = msg.size(),
                    max = self.config.network.max_payload_size,
                    "Dropping frame larger than max payload size"
                );
                continue;
            }
            if let Err(e) = write_frame(&mut writer, &msg) {
                self.metrics.record_write_failure();
                warn!("Write to client failed: {}", e);
                return SessionEnd::PeerGone(e.to_string());
            }
            self.metrics.record_frame(msg.type_tag(), msg.encoded_len());
            trace!(
                type_tag = msg.type_tag(),
                size = msg.size(),
                "frame written"
            );
        }
    }
}

fn write_frame<W: Write>(writer: &mut W, msg: &WireMessage) -> Result<(), StreamError> {
    msg.write_to(writer)?;
    writer.flush()?;
    Ok(())
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown.shutdown();
        if let Some(mut server) = self.drive_server.take() {
            server.shutdown();
        }
        for driver in &mut self.drivers {
            driver.shutdown();
        }
        self.drivers.clear();
        let pending = self.queue.clear();
        if pending > 0 {
            debug!("Released {} undelivered messages", pending);
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr)
            .field("state", &self.state())
            .field("drivers", &self.drivers)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ServerBuilder;
    use robocar_protocol::{FrameReader, MessageType, TextMessage};
    use std::thread;

    fn text_server(interval_ms: u64) -> Server {
        let mut config = ServerConfig::text_only();
        config.network.bind_address = "127.0.0.1".parse().unwrap();
        config.network.port = 0;
        config.text.message = "unit".to_string();
        config.text.interval_ms = interval_ms;
        ServerBuilder::new().config(config).build().unwrap()
    }

    #[test]
    fn test_state_transitions() {
        let mut server = text_server(5);
        assert_eq!(server.state(), ServerState::Idle);
        let addr = server.local_addr();
        let shutdown = server.shutdown_handle();

        let client = thread::spawn(move || {
            let stream = TcpStream::connect(addr).unwrap();
            let mut reader = FrameReader::new(stream);
            let msg = reader.next_frame().unwrap().unwrap();
            assert_eq!(TextMessage::try_from(&msg).unwrap().text, "unit");
            shutdown.shutdown();
        });

        let (stream, peer) = server.accept().unwrap().unwrap();
        assert_eq!(server.state(), ServerState::Accepting);
        let summary = server.stream_session(stream, peer);
        client.join().unwrap();

        assert_eq!(summary.end, SessionEnd::Shutdown);
        assert!(summary.metrics.frames(MessageType::Text) >= 1);
        assert_eq!(server.state(), ServerState::Accepting);
        assert!(server.accept().unwrap().is_none());
    }

    #[test]
    fn test_drivers_stop_when_client_leaves() {
        let mut server = text_server(5);
        let addr = server.local_addr();

        let client = thread::spawn(move || {
            let stream = TcpStream::connect(addr).unwrap();
            let mut reader = FrameReader::new(stream);
            reader.next_frame().unwrap().unwrap();
            // 读到一帧后断开
        });

        let (stream, peer) = server.accept().unwrap().unwrap();
        let summary = server.stream_session(stream, peer);
        client.join().unwrap();

        assert!(matches!(summary.end, SessionEnd::PeerGone(_)));
        for status in server.driver_status() {
            assert_ne!(status.state, robocar_driver::DriverState::Running);
        }
    }

    #[test]
    fn test_oversized_frame_not_sent() {
        let mut config = ServerConfig::text_only();
        config.network.bind_address = "127.0.0.1".parse().unwrap();
        config.network.port = 0;
        config.network.max_payload_size = 8;
        config.text.message = "longer than eight bytes".to_string();
        config.text.interval_ms = 5;
        let mut server = ServerBuilder::new().config(config).build().unwrap();
        let addr = server.local_addr();
        let shutdown = server.shutdown_handle();

        let client = thread::spawn(move || {
            let stream = TcpStream::connect(addr).unwrap();
            stream
                .set_read_timeout(Some(Duration::from_millis(200)))
                .unwrap();
            let mut reader = FrameReader::new(stream);
            // 没有任何帧到达
            assert!(reader.next_frame().is_err());
            shutdown.shutdown();
        });

        let (stream, peer) = server.accept().unwrap().unwrap();
        let summary = server.stream_session(stream, peer);
        client.join().unwrap();

        assert_eq!(summary.end, SessionEnd::Shutdown);
        assert_eq!(summary.metrics.total_frames(), 0);
        assert!(summary.metrics.oversized >= 1);
        assert_eq!(summary.metrics.write_failures, 0);
    }

    #[test]
    fn test_shutdown_while_accepting() {
        let mut server = text_server(5);
        let shutdown = server.shutdown_handle();
        let runner = thread::spawn(move || server.run());
        thread::sleep(Duration::from_millis(30));
        shutdown.shutdown();
        runner.join().unwrap().unwrap();
    }
}
