//! Delivery Queue：多生产者、单消费者的阻塞 FIFO
//!
//! 所有 push/pop 由同一把锁串行化，因此队列顺序是各生产者调用的
//! 一个合法交错；同一生产者的消息保持 FIFO。锁只覆盖入队/出队本身，
//! 从不跨越 IO。

use parking_lot::{Condvar, Mutex};
use robocar_protocol::WireMessage;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// 有界队列的溢出策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// 丢弃队首最旧的消息，接收新消息
    #[default]
    DropOldest,
    /// 拒绝新消息
    RejectNewest,
}

/// 队列容量配置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueBound {
    /// 无界（默认）：消费者断开或过慢时队列持续增长
    #[default]
    Unbounded,
    Bounded {
        capacity: usize,
        policy: OverflowPolicy,
    },
}

/// `push` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Accepted,
    /// 已入队，但丢弃了一条最旧的消息
    DroppedOldest,
    /// 队列已满，新消息被丢弃
    Rejected,
}

/// 队列统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStats {
    pub pushed: u64,
    pub popped: u64,
    pub dropped_oldest: u64,
    pub rejected: u64,
    /// 历史最大长度
    pub high_watermark: usize,
}

struct Inner {
    items: VecDeque<WireMessage>,
    stats: QueueStats,
}

/// 线程安全的 Wire Message FIFO
pub struct DeliveryQueue {
    inner: Mutex<Inner>,
    not_empty: Condvar,
    bound: QueueBound,
}

impl DeliveryQueue {
    /// 无界队列
    pub fn new() -> Self {
        Self::with_bound(QueueBound::Unbounded)
    }

    pub fn with_bound(bound: QueueBound) -> Self {
        let capacity = match bound {
            QueueBound::Bounded { capacity, .. } => capacity,
            QueueBound::Unbounded => 0,
        };
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                stats: QueueStats::default(),
            }),
            not_empty: Condvar::new(),
            bound,
        }
    }

    pub fn bound(&self) -> QueueBound {
        self.bound
    }

    /// 入队并唤醒一个等待的消费者
    ///
    /// 除锁竞争外从不阻塞调用方。
    pub fn push(&self, msg: WireMessage) -> PushOutcome {
        let outcome = {
            let mut inner = self.inner.lock();
            let outcome = match self.bound {
                QueueBound::Bounded { capacity, policy } if inner.items.len() >= capacity => {
                    match policy {
                        _ if capacity == 0 => {
                            inner.stats.rejected += 1;
                            return PushOutcome::Rejected;
                        },
                        OverflowPolicy::RejectNewest => {
                            inner.stats.rejected += 1;
                            return PushOutcome::Rejected;
                        },
                        OverflowPolicy::DropOldest => {
                            inner.items.pop_front();
                            inner.stats.dropped_oldest += 1;
                            PushOutcome::DroppedOldest
                        },
                    }
                },
                _ => PushOutcome::Accepted,
            };
            inner.items.push_back(msg);
            inner.stats.pushed += 1;
            inner.stats.high_watermark = inner.stats.high_watermark.max(inner.items.len());
            outcome
        };
        self.not_empty.notify_one();
        outcome
    }

    /// 阻塞直到有消息可取
    pub fn pop(&self) -> WireMessage {
        let mut inner = self.inner.lock();
        loop {
            if let Some(msg) = inner.items.pop_front() {
                inner.stats.popped += 1;
                return msg;
            }
            self.not_empty.wait(&mut inner);
        }
    }

    /// 最多等待 `timeout`，超时返回 None
    pub fn pop_timeout(&self, timeout: Duration) -> Option<WireMessage> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if let Some(msg) = inner.items.pop_front() {
                inner.stats.popped += 1;
                return Some(msg);
            }
            if self.not_empty.wait_until(&mut inner, deadline).timed_out() {
                let msg = inner.items.pop_front();
                if msg.is_some() {
                    inner.stats.popped += 1;
                }
                return msg;
            }
        }
    }

    /// 非阻塞取出
    pub fn try_pop(&self) -> Option<WireMessage> {
        let mut inner = self.inner.lock();
        let msg = inner.items.pop_front();
        if msg.is_some() {
            inner.stats.popped += 1;
        }
        msg
    }

    /// 当前长度（仅为提示，不能用于先检查后操作）
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    /// 是否为空（仅为提示）
    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    /// 丢弃所有待发送消息，返回丢弃数量
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let n = inner.items.len();
        inner.items.clear();
        n
    }

    pub fn stats(&self) -> QueueStats {
        self.inner.lock().stats
    }
}

impl Default for DeliveryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DeliveryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryQueue")
            .field("len", &self.len())
            .field("bound", &self.bound)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use robocar_protocol::{MessageType, Timestamp};
    use std::sync::Arc;
    use std::thread;

    fn msg(n: u8) -> WireMessage {
        WireMessage::with_timestamp(MessageType::Text, Timestamp::new(n as i64, 0), vec![n])
    }

    #[test]
    fn test_fifo_single_thread() {
        let q = DeliveryQueue::new();
        for n in [b'A', b'B', b'C'] {
            assert_eq!(q.push(msg(n)), PushOutcome::Accepted);
        }
        assert_eq!(q.len(), 3);
        assert_eq!(q.pop().payload().as_ref(), b"A");
        assert_eq!(q.pop().payload().as_ref(), b"B");
        assert_eq!(q.pop().payload().as_ref(), b"C");
        assert!(q.is_empty());
    }

    #[test]
    fn test_pop_blocks_until_push() {
        let q = Arc::new(DeliveryQueue::new());
        let consumer = {
            let q = q.clone();
            thread::spawn(move || q.pop())
        };
        thread::sleep(Duration::from_millis(30));
        q.push(msg(7));
        let got = consumer.join().unwrap();
        assert_eq!(got.payload().as_ref(), &[7]);
    }

    #[test]
    fn test_pop_timeout_empty() {
        let q = DeliveryQueue::new();
        let start = Instant::now();
        assert!(q.pop_timeout(Duration::from_millis(20)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(20));
        q.push(msg(1));
        assert!(q.pop_timeout(Duration::from_millis(20)).is_some());
    }

    #[test]
    fn test_drop_oldest() {
        let q = DeliveryQueue::with_bound(QueueBound::Bounded {
            capacity: 2,
            policy: OverflowPolicy::DropOldest,
        });
        assert_eq!(q.push(msg(1)), PushOutcome::Accepted);
        assert_eq!(q.push(msg(2)), PushOutcome::Accepted);
        assert_eq!(q.push(msg(3)), PushOutcome::DroppedOldest);
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop().payload().as_ref(), &[2]);
        assert_eq!(q.pop().payload().as_ref(), &[3]);
        assert_eq!(q.stats().dropped_oldest, 1);
    }

    #[test]
    fn test_reject_newest() {
        let q = DeliveryQueue::with_bound(QueueBound::Bounded {
            capacity: 1,
            policy: OverflowPolicy::RejectNewest,
        });
        assert_eq!(q.push(msg(1)), PushOutcome::Accepted);
        assert_eq!(q.push(msg(2)), PushOutcome::Rejected);
        assert_eq!(q.pop().payload().as_ref(), &[1]);
        assert!(q.try_pop().is_none());
        let stats = q.stats();
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.pushed, 1);
        assert_eq!(stats.popped, 1);
    }

    #[test]
    fn test_zero_capacity_drops_everything() {
        let q = DeliveryQueue::with_bound(QueueBound::Bounded {
            capacity: 0,
            policy: OverflowPolicy::DropOldest,
        });
        assert_eq!(q.push(msg(1)), PushOutcome::Rejected);
        assert!(q.is_empty());
    }

    #[test]
    fn test_clear() {
        let q = DeliveryQueue::new();
        q.push(msg(1));
        q.push(msg(2));
        assert_eq!(q.clear(), 2);
        assert!(q.is_empty());
        assert_eq!(q.stats().high_watermark, 2);
    }
}
