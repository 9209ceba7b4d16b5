//! 按消息类型分发的接收端
//!
//! 调度循环解码每一帧后调用 [`MessageSink`] 对应的方法。所有方法都有
//! 空实现，只需覆盖关心的类型。
//!
//! 需要跨线程处理时使用 [`ChannelSink`]：解码结果被转成 [`ClientEvent`]
//! 放入有界 channel，channel 满时丢弃并计数，调度循环不会被消费者阻塞。

use crate::odometry::OdometryReport;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use robocar_protocol::{ImuSample, LaserScan, StereoFrame, Timestamp, UsbFrame};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// 每种消息类型的回调
///
/// 所有回调都在调度线程上执行，耗时回调会推迟后续帧的读取。
pub trait MessageSink {
    fn on_text(&mut self, stamp: Timestamp, text: String) {
        let _ = (stamp, text);
    }

    /// `seq` 为本连接内的激光帧序号（从 0 开始）
    fn on_laser_scan(&mut self, seq: u32, stamp: Timestamp, scan: LaserScan) {
        let _ = (seq, stamp, scan);
    }

    /// `frame_id` 在 USB 相机和板载相机之间共享递增
    fn on_usb_frame(&mut self, frame_id: u32, stamp: Timestamp, frame: UsbFrame) {
        let _ = (frame_id, stamp, frame);
    }

    fn on_stereo_frame(&mut self, frame_id: u32, stamp: Timestamp, frame: StereoFrame) {
        let _ = (frame_id, stamp, frame);
    }

    /// 原始 IMU 样本（在送入里程计之前）
    fn on_imu(&mut self, stamp: Timestamp, sample: ImuSample) {
        let _ = (stamp, sample);
    }

    /// 每个被里程计接受的 IMU 样本之后调用
    fn on_odometry(&mut self, report: OdometryReport) {
        let _ = report;
    }

    /// 未知类型标签（帧已被丢弃）
    fn on_unknown(&mut self, tag: u8, stamp: Timestamp, size: usize) {
        let _ = (tag, stamp, size);
    }
}

/// 解码后的事件（用于 [`ChannelSink`]）
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Text {
        stamp: Timestamp,
        text: String,
    },
    LaserScan {
        seq: u32,
        stamp: Timestamp,
        scan: LaserScan,
    },
    UsbFrame {
        frame_id: u32,
        stamp: Timestamp,
        frame: UsbFrame,
    },
    StereoFrame {
        frame_id: u32,
        stamp: Timestamp,
        frame: StereoFrame,
    },
    Imu {
        stamp: Timestamp,
        sample: ImuSample,
    },
    Odometry(OdometryReport),
    Unknown {
        tag: u8,
        stamp: Timestamp,
        size: usize,
    },
}

/// 把事件转发到有界 channel 的接收端
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: Sender<ClientEvent>,
    dropped: Arc<AtomicU64>,
}

impl ChannelSink {
    /// 默认容量：约 10 秒的全传感器流量
    pub const DEFAULT_CAPACITY: usize = 1024;

    #[must_use]
    pub fn new() -> (Self, Receiver<ClientEvent>) {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> (Self, Receiver<ClientEvent>) {
        let (tx, rx) = bounded(capacity);
        let sink = Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (sink, rx)
    }

    /// channel 满或接收端已关闭而丢弃的事件数
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn forward(&self, event: ClientEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {},
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            },
        }
    }
}

impl MessageSink for ChannelSink {
    fn on_text(&mut self, stamp: Timestamp, text: String) {
        self.forward(ClientEvent::Text { stamp, text });
    }

    fn on_laser_scan(&mut self, seq: u32, stamp: Timestamp, scan: LaserScan) {
        self.forward(ClientEvent::LaserScan { seq, stamp, scan });
    }

    fn on_usb_frame(&mut self, frame_id: u32, stamp: Timestamp, frame: UsbFrame) {
        self.forward(ClientEvent::UsbFrame {
            frame_id,
            stamp,
            frame,
        });
    }

    fn on_stereo_frame(&mut self, frame_id: u32, stamp: Timestamp, frame: StereoFrame) {
        self.forward(ClientEvent::StereoFrame {
            frame_id,
            stamp,
            frame,
        });
    }

    fn on_imu(&mut self, stamp: Timestamp, sample: ImuSample) {
        self.forward(ClientEvent::Imu { stamp, sample });
    }

    fn on_odometry(&mut self, report: OdometryReport) {
        self.forward(ClientEvent::Odometry(report));
    }

    fn on_unknown(&mut self, tag: u8, stamp: Timestamp, size: usize) {
        self.forward(ClientEvent::Unknown { tag, stamp, size });
    }
}
