//! 流统计
//!
//! 计数器均为原子量，流循环线程写入，其它线程随时读取快照。

use robocar_protocol::MessageType;
use std::sync::atomic::{AtomicU64, Ordering};

/// 按消息类型索引的计数器槽位（0 用于未知类型）
const SLOTS: usize = 6;

fn slot(type_tag: u8) -> usize {
    match MessageType::from_tag(type_tag) {
        Some(ty) => u8::from(ty) as usize,
        None => 0,
    }
}

#[derive(Debug, Default)]
pub struct StreamMetrics {
    frames: [AtomicU64; SLOTS],
    bytes: [AtomicU64; SLOTS],
    sessions: AtomicU64,
    write_failures: AtomicU64,
    discarded_stale: AtomicU64,
    queue_dropped: AtomicU64,
    queue_rejected: AtomicU64,
    oversized: AtomicU64,
}

impl StreamMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一帧已写出
    pub fn record_frame(&self, type_tag: u8, encoded_len: usize) {
        let i = slot(type_tag);
        self.frames[i].fetch_add(1, Ordering::Relaxed);
        self.bytes[i].fetch_add(encoded_len as u64, Ordering::Relaxed);
    }

    pub fn record_session(&self) {
        self.sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write_failure(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discarded(&self, n: usize) {
        self.discarded_stale.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// 记录队列溢出丢失的消息（会话结束时由队列统计差值得到）
    pub fn record_queue_losses(&self, dropped: u64, rejected: u64) {
        self.queue_dropped.fetch_add(dropped, Ordering::Relaxed);
        self.queue_rejected.fetch_add(rejected, Ordering::Relaxed);
    }

    /// 记录一帧因超过负载上限而未发送
    pub fn record_oversized(&self) {
        self.oversized.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |a: &[AtomicU64; SLOTS]| {
            let mut out = [0u64; SLOTS];
            for (o, v) in out.iter_mut().zip(a.iter()) {
                *o = v.load(Ordering::Relaxed);
            }
            out
        };
        MetricsSnapshot {
            frames: load(&self.frames),
            bytes: load(&self.bytes),
            sessions: self.sessions.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            discarded_stale: self.discarded_stale.load(Ordering::Relaxed),
            queue_dropped: self.queue_dropped.load(Ordering::Relaxed),
            queue_rejected: self.queue_rejected.load(Ordering::Relaxed),
            oversized: self.oversized.load(Ordering::Relaxed),
        }
    }
}

/// 统计快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    frames: [u64; SLOTS],
    bytes: [u64; SLOTS],
    pub sessions: u64,
    pub write_failures: u64,
    /// 连接时丢弃的上一会话遗留消息
    pub discarded_stale: u64,
    /// 有界队列满时被挤出的最旧消息
    pub queue_dropped: u64,
    /// 有界队列满时被拒绝的新消息
    pub queue_rejected: u64,
    /// 超过 `max_payload_size` 而未发送的帧
    pub oversized: u64,
}

impl MetricsSnapshot {
    pub fn frames(&self, ty: MessageType) -> u64 {
        self.frames[u8::from(ty) as usize]
    }

    pub fn bytes(&self, ty: MessageType) -> u64 {
        self.bytes[u8::from(ty) as usize]
    }

    pub fn total_frames(&self) -> u64 {
        self.frames.iter().sum()
    }

    pub fn total_bytes(&self) -> u64 {
        self.bytes.iter().sum()
    }

    /// 两次快照之差（用于单次会话统计）
    pub fn since(&self, earlier: &MetricsSnapshot) -> MetricsSnapshot {
        let mut out = *self;
        for i in 0..SLOTS {
            out.frames[i] = self.frames[i].saturating_sub(earlier.frames[i]);
            out.bytes[i] = self.bytes[i].saturating_sub(earlier.bytes[i]);
        }
        out.sessions = self.sessions.saturating_sub(earlier.sessions);
        out.write_failures = self.write_failures.saturating_sub(earlier.write_failures);
        out.discarded_stale = self.discarded_stale.saturating_sub(earlier.discarded_stale);
        out.queue_dropped = self.queue_dropped.saturating_sub(earlier.queue_dropped);
        out.queue_rejected = self.queue_rejected.saturating_sub(earlier.queue_rejected);
        out.oversized = self.oversized.saturating_sub(earlier.oversized);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_snapshot() {
        let metrics = StreamMetrics::new();
        metrics.record_frame(1, 32);
        metrics.record_frame(1, 32);
        metrics.record_frame(5, 65);
        metrics.record_frame(99, 21);

        let snap = metrics.snapshot();
        assert_eq!(snap.frames(MessageType::Text), 2);
        assert_eq!(snap.bytes(MessageType::Text), 64);
        assert_eq!(snap.frames(MessageType::Imu), 1);
        assert_eq!(snap.total_frames(), 4);
        assert_eq!(snap.total_bytes(), 150);
    }

    #[test]
    fn test_since() {
        let metrics = StreamMetrics::new();
        metrics.record_frame(2, 100);
        let before = metrics.snapshot();
        metrics.record_frame(2, 50);
        metrics.record_write_failure();
        let delta = metrics.snapshot().since(&before);
        assert_eq!(delta.frames(MessageType::LaserScan), 1);
        assert_eq!(delta.bytes(MessageType::LaserScan), 50);
        assert_eq!(delta.write_failures, 1);
    }

    #[test]
    fn test_queue_losses_and_oversized() {
        let metrics = StreamMetrics::new();
        metrics.record_queue_losses(3, 0);
        let before = metrics.snapshot();
        metrics.record_queue_losses(2, 5);
        metrics.record_oversized();

        let snap = metrics.snapshot();
        assert_eq!((snap.queue_dropped, snap.queue_rejected, snap.oversized), (5, 5, 1));
        let delta = snap.since(&before);
        assert_eq!((delta.queue_dropped, delta.queue_rejected, delta.oversized), (2, 5, 1));
        assert_eq!(delta.total_frames(), 0);
    }
}
