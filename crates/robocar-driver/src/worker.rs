//! 驱动工作线程与启动闸门
//!
//! 每个传感器驱动拥有一个长期存活的工作线程。线程创建后阻塞在启动闸门上，
//! `start()` 打开闸门进入采样循环，`stop()` 让循环在两次采样之间退出并
//! 重新阻塞在闸门上（线程不退出）。只有 `DriverHandle` 被 drop 时线程才退出。

use crate::{AtomicDriverState, DeliveryQueue, DriverError, DriverState, PushOutcome};
use parking_lot::{Condvar, Mutex};
use robocar_protocol::{MessageType, WireMessage};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{JoinHandle, spawn};
use std::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};

/// 关闭时等待工作线程退出的上限
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// 带超时的线程 join
pub(crate) trait JoinTimeout {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()>;
}

impl<T: Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()> {
        use std::sync::mpsc;

        let (tx, rx) = mpsc::channel();

        // 由看门狗线程执行真正的 join
        spawn(move || {
            let result = self.join();
            let _ = tx.send(result);
        });

        match rx.recv_timeout(timeout) {
            Ok(join_result) => join_result.map(|_| ()),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Thread join timeout",
            ))),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "Thread panicked during join",
            ))),
        }
    }
}

/// 采样节奏
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// 固定周期：两次采样之间可被 `stop()` 打断的睡眠
    FixedRate(Duration),
    /// 由阻塞的硬件读取决定节奏（`sample` 自身阻塞）
    Blocking,
}

impl Cadence {
    /// 由频率（Hz）构造固定周期
    pub fn from_hz(hz: f64) -> Result<Self, DriverError> {
        period_from_hz("rate_hz", hz).map(Cadence::FixedRate)
    }
}

/// 频率 → 采样周期
///
/// 频率必须是有限正数，且周期能用 `Duration` 表示（次正规数会得到无穷大的周期）。
pub fn period_from_hz(field: &'static str, hz: f64) -> Result<Duration, DriverError> {
    if !hz.is_finite() || hz <= 0.0 {
        return Err(DriverError::invalid_config(
            field,
            format!("expected a positive rate in Hz, got {}", hz),
        ));
    }
    Duration::try_from_secs_f64(1.0 / hz)
        .map_err(|e| DriverError::invalid_config(field, format!("{} Hz: {}", hz, e)))
}

/// 传感器驱动
///
/// 构造即初始化（打开硬件），失败时返回 `HardwareUnavailable`，
/// 由装配方决定跳过该驱动。
pub trait SensorDriver: Send + 'static {
    /// 驱动名称（用于日志和线程名）
    fn name(&self) -> &str;

    fn message_type(&self) -> MessageType;

    fn cadence(&self) -> Cadence;

    /// 每次进入运行阶段前调用；失败时本次运行阶段被放弃
    fn on_start(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    /// 采样一次
    ///
    /// - `Ok(Some(msg))`：推入 Delivery Queue
    /// - `Ok(None)`：本次跳过
    /// - `Err(_)`：结束本次运行阶段，驱动回到闸门等待下一次 `start()`
    fn sample(&mut self) -> Result<Option<WireMessage>, DriverError>;

    /// 每次离开运行阶段后调用
    fn on_stop(&mut self) {}
}

#[derive(Debug, Default)]
struct Control {
    /// 二值信号量：`start()` 置位，工作线程进入运行阶段时消费
    gate_open: bool,
    stop: bool,
    quit: bool,
}

#[derive(Debug, Default)]
struct Shared {
    state: AtomicDriverState,
    control: Mutex<Control>,
    signal: Condvar,
    samples: AtomicU64,
    failures: AtomicU64,
    sessions: AtomicU64,
}

impl Shared {
    fn should_stop(&self) -> bool {
        let c = self.control.lock();
        c.stop || c.quit
    }

    /// 睡眠到 `deadline`，期间收到 stop/quit 则提前返回 true
    fn wait_until_stopped(&self, deadline: Instant) -> bool {
        let mut c = self.control.lock();
        while !(c.stop || c.quit) {
            if self.signal.wait_until(&mut c, deadline).timed_out() {
                return c.stop || c.quit;
            }
        }
        true
    }
}

/// 驱动运行统计快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverStatus {
    pub name: String,
    pub message_type: MessageType,
    pub state: DriverState,
    /// 累计推入队列的消息数
    pub samples: u64,
    /// 累计采样失败次数
    pub failures: u64,
    /// 累计进入运行阶段的次数
    pub sessions: u64,
}

/// 驱动句柄：持有工作线程
///
/// Drop 时置 quit、打开闸门并 join 工作线程（带超时）。
pub struct DriverHandle {
    name: String,
    message_type: MessageType,
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl DriverHandle {
    /// 启动工作线程，线程立即阻塞在闸门上
    pub fn spawn<D: SensorDriver>(driver: D, queue: Arc<DeliveryQueue>) -> Result<Self, DriverError> {
        let name = driver.name().to_string();
        let message_type = driver.message_type();
        let shared = Arc::new(Shared::default());

        let thread = std::thread::Builder::new()
            .name(format!("driver-{}", name))
            .spawn({
                let shared = shared.clone();
                move || worker_loop(driver, queue, shared)
            })
            .map_err(DriverError::ThreadSpawn)?;

        debug!(driver = %name, "driver thread spawned");

        Ok(Self {
            name,
            message_type,
            shared,
            thread: Some(thread),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn state(&self) -> DriverState {
        self.shared.state.get(Ordering::Acquire)
    }

    /// 打开闸门（幂等）
    ///
    /// 驱动正在运行且没有挂起的 `stop()` 时不做任何事；否则置位闸门，
    /// 当前运行阶段结束后工作线程立即进入下一次运行。
    pub fn start(&self) {
        {
            let mut c = self.shared.control.lock();
            if c.quit {
                return;
            }
            // 状态只在持锁时切换到 Running，这里读到的值与 stop 标志一致
            if self.state() == DriverState::Running && !c.stop {
                return;
            }
            c.gate_open = true;
        }
        self.shared.signal.notify_all();
    }

    /// 请求停止（幂等）
    ///
    /// 循环在两次采样之间观察到该标志；阻塞中的硬件读取返回后才生效。
    pub fn stop(&self) {
        {
            let mut c = self.shared.control.lock();
            if c.quit {
                return;
            }
            c.stop = true;
            c.gate_open = false;
        }
        self.shared.state.compare_exchange(
            DriverState::Running,
            DriverState::Stopping,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.shared.signal.notify_all();
    }

    /// 等待驱动到达指定状态（测试和关闭流程使用）
    pub fn wait_for_state(&self, state: DriverState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.state() == state {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        self.state() == state
    }

    pub fn status(&self) -> DriverStatus {
        DriverStatus {
            name: self.name.clone(),
            message_type: self.message_type,
            state: self.state(),
            samples: self.shared.samples.load(Ordering::Relaxed),
            failures: self.shared.failures.load(Ordering::Relaxed),
            sessions: self.shared.sessions.load(Ordering::Relaxed),
        }
    }

    /// 置 quit 并 join 工作线程
    pub fn shutdown(&mut self) {
        {
            let mut c = self.shared.control.lock();
            c.quit = true;
            c.stop = true;
            c.gate_open = true;
        }
        self.shared.signal.notify_all();

        if let Some(handle) = self.thread.take()
            && let Err(_e) = handle.join_timeout(JOIN_TIMEOUT)
        {
            error!(
                driver = %self.name,
                "driver thread panicked or failed to shut down within {:?}",
                JOIN_TIMEOUT
            );
        }
    }
}

impl Drop for DriverHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for DriverHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverHandle")
            .field("name", &self.name)
            .field("message_type", &self.message_type)
            .field("state", &self.state())
            .finish()
    }
}

fn worker_loop<D: SensorDriver>(mut driver: D, queue: Arc<DeliveryQueue>, shared: Arc<Shared>) {
    loop {
        {
            let mut c = shared.control.lock();
            while !c.gate_open && !c.quit {
                shared.state.set(DriverState::Gated, Ordering::Release);
                shared.signal.wait(&mut c);
            }
            if c.quit {
                break;
            }
            c.gate_open = false;
            c.stop = false;
            shared.state.set(DriverState::Running, Ordering::Release);
        }

        shared.sessions.fetch_add(1, Ordering::Relaxed);
        debug!(driver = driver.name(), "driver running");

        if let Err(e) = driver.on_start() {
            shared.failures.fetch_add(1, Ordering::Relaxed);
            warn!(driver = driver.name(), "failed to start sampling: {}", e);
            continue;
        }

        run_session(&mut driver, &queue, &shared);
        driver.on_stop();
        debug!(driver = driver.name(), "driver stopped");
    }

    shared.state.set(DriverState::Quit, Ordering::Release);
    debug!(driver = driver.name(), "driver thread exited");
}

fn run_session<D: SensorDriver>(driver: &mut D, queue: &DeliveryQueue, shared: &Shared) {
    let cadence = driver.cadence();
    let mut next = Instant::now();

    loop {
        if shared.should_stop() {
            return;
        }

        match driver.sample() {
            Ok(Some(msg)) => {
                shared.samples.fetch_add(1, Ordering::Relaxed);
                trace!(driver = driver.name(), size = msg.size(), "sample pushed");
                match queue.push(msg) {
                    PushOutcome::Accepted => {},
                    outcome => trace!(driver = driver.name(), ?outcome, "delivery queue full"),
                }
            },
            Ok(None) => {},
            Err(e) => {
                shared.failures.fetch_add(1, Ordering::Relaxed);
                warn!(driver = driver.name(), "sampling failed, leaving running phase: {}", e);
                return;
            },
        }

        if let Cadence::FixedRate(period) = cadence {
            next += period;
            let now = Instant::now();
            // 落后时不追赶，从当前时刻重新计时
            if next < now {
                next = now;
            }
            if shared.wait_until_stopped(next) {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use robocar_protocol::Timestamp;
    use std::sync::atomic::AtomicBool;

    /// 可编程的测试驱动
    struct CountingDriver {
        counter: u32,
        period: Duration,
        fail_at: Option<u32>,
        stopped: Arc<AtomicU64>,
    }

    impl SensorDriver for CountingDriver {
        fn name(&self) -> &str {
            "counting"
        }

        fn message_type(&self) -> MessageType {
            MessageType::Text
        }

        fn cadence(&self) -> Cadence {
            Cadence::FixedRate(self.period)
        }

        fn sample(&mut self) -> Result<Option<WireMessage>, DriverError> {
            self.counter += 1;
            if Some(self.counter) == self.fail_at {
                return Err(DriverError::Device("boom".to_string()));
            }
            Ok(Some(WireMessage::with_timestamp(
                MessageType::Text,
                Timestamp::now(),
                self.counter.to_le_bytes().to_vec(),
            )))
        }

        fn on_stop(&mut self) {
            self.stopped.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counting(period_ms: u64, fail_at: Option<u32>) -> (CountingDriver, Arc<AtomicU64>) {
        let stopped = Arc::new(AtomicU64::new(0));
        (
            CountingDriver {
                counter: 0,
                period: Duration::from_millis(period_ms),
                fail_at,
                stopped: stopped.clone(),
            },
            stopped,
        )
    }

    #[test]
    fn test_gated_until_start() {
        let queue = Arc::new(DeliveryQueue::new());
        let (driver, _) = counting(5, None);
        let handle = DriverHandle::spawn(driver, queue.clone()).unwrap();

        assert!(handle.wait_for_state(DriverState::Gated, Duration::from_secs(1)));
        std::thread::sleep(Duration::from_millis(30));
        assert!(queue.is_empty());

        handle.start();
        assert!(queue.pop_timeout(Duration::from_secs(1)).is_some());
        assert_eq!(handle.state(), DriverState::Running);
    }

    #[test]
    fn test_stop_returns_to_gate_and_restarts() {
        let queue = Arc::new(DeliveryQueue::new());
        let (driver, stopped) = counting(5, None);
        let handle = DriverHandle::spawn(driver, queue.clone()).unwrap();

        handle.start();
        assert!(queue.pop_timeout(Duration::from_secs(1)).is_some());
        handle.stop();
        assert!(handle.wait_for_state(DriverState::Gated, Duration::from_secs(1)));
        assert_eq!(stopped.load(Ordering::SeqCst), 1);

        queue.clear();
        std::thread::sleep(Duration::from_millis(30));
        assert!(queue.is_empty());

        handle.start();
        assert!(queue.pop_timeout(Duration::from_secs(1)).is_some());
        assert_eq!(handle.status().sessions, 2);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let queue = Arc::new(DeliveryQueue::new());
        let (driver, stopped) = counting(5, None);
        let handle = DriverHandle::spawn(driver, queue.clone()).unwrap();

        handle.start();
        handle.start();
        assert!(queue.pop_timeout(Duration::from_secs(1)).is_some());
        handle.stop();
        handle.stop();
        assert!(handle.wait_for_state(DriverState::Gated, Duration::from_secs(1)));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(stopped.load(Ordering::SeqCst), 1);
        assert_eq!(handle.status().sessions, 1);
    }

    #[test]
    fn test_sample_error_ends_running_phase() {
        let queue = Arc::new(DeliveryQueue::new());
        let (driver, stopped) = counting(1, Some(3));
        let handle = DriverHandle::spawn(driver, queue.clone()).unwrap();

        handle.start();
        assert!(handle.wait_for_state(DriverState::Gated, Duration::from_secs(1)));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(queue.len(), 2);
        assert_eq!(stopped.load(Ordering::SeqCst), 1);
        assert_eq!(handle.status().failures, 1);

        // 下一次 start() 重新进入运行阶段
        handle.start();
        assert!(queue.pop_timeout(Duration::from_secs(1)).is_some());
    }

    #[test]
    fn test_start_while_running_does_not_rearm_gate() {
        let queue = Arc::new(DeliveryQueue::new());
        let (driver, stopped) = counting(50, Some(3));
        let handle = DriverHandle::spawn(driver, queue.clone()).unwrap();

        handle.start();
        assert!(queue.pop_timeout(Duration::from_secs(1)).is_some());
        assert_eq!(handle.state(), DriverState::Running);
        handle.start();

        // 第 3 次采样失败后停在闸门，而不是立即重新运行
        assert!(queue.pop_timeout(Duration::from_secs(1)).is_some());
        assert!(handle.wait_for_state(DriverState::Gated, Duration::from_secs(1)));
        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(handle.state(), DriverState::Gated);
        assert!(queue.is_empty());
        assert_eq!(stopped.load(Ordering::SeqCst), 1);
        assert_eq!(handle.status().sessions, 1);

        handle.start();
        assert!(queue.pop_timeout(Duration::from_secs(1)).is_some());
        assert_eq!(handle.status().sessions, 2);
    }

    #[test]
    fn test_stop_then_start_restarts_running_phase() {
        let queue = Arc::new(DeliveryQueue::new());
        let (driver, stopped) = counting(10_000, None);
        let handle = DriverHandle::spawn(driver, queue.clone()).unwrap();

        handle.start();
        assert!(queue.pop_timeout(Duration::from_secs(1)).is_some());
        // 工作线程尚未观察到 stop 时再次 start：本次运行结束后重新进入
        handle.stop();
        handle.start();
        assert!(queue.pop_timeout(Duration::from_secs(1)).is_some());
        assert_eq!(handle.state(), DriverState::Running);
        assert_eq!(stopped.load(Ordering::SeqCst), 1);
        assert_eq!(handle.status().sessions, 2);
    }

    #[test]
    fn test_drop_joins_thread_from_any_state() {
        let queue = Arc::new(DeliveryQueue::new());

        let (driver, _) = counting(5, None);
        let handle = DriverHandle::spawn(driver, queue.clone()).unwrap();
        drop(handle);

        let (driver, _) = counting(5, None);
        let handle = DriverHandle::spawn(driver, queue.clone()).unwrap();
        handle.start();
        assert!(queue.pop_timeout(Duration::from_secs(1)).is_some());
        let start = Instant::now();
        drop(handle);
        assert!(start.elapsed() < JOIN_TIMEOUT);
    }

    #[test]
    fn test_long_period_interrupted_by_stop() {
        let queue = Arc::new(DeliveryQueue::new());
        let (driver, _) = counting(10_000, None);
        let handle = DriverHandle::spawn(driver, queue.clone()).unwrap();

        handle.start();
        assert!(queue.pop_timeout(Duration::from_secs(1)).is_some());
        let start = Instant::now();
        handle.stop();
        assert!(handle.wait_for_state(DriverState::Gated, Duration::from_secs(1)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    struct BlockingDriver {
        released: Arc<AtomicBool>,
    }

    impl SensorDriver for BlockingDriver {
        fn name(&self) -> &str {
            "blocking"
        }

        fn message_type(&self) -> MessageType {
            MessageType::LaserScan
        }

        fn cadence(&self) -> Cadence {
            Cadence::Blocking
        }

        fn sample(&mut self) -> Result<Option<WireMessage>, DriverError> {
            std::thread::sleep(Duration::from_millis(2));
            self.released.store(true, Ordering::SeqCst);
            Ok(None)
        }
    }

    #[test]
    fn test_blocking_cadence_loops_without_sleep() {
        let queue = Arc::new(DeliveryQueue::new());
        let released = Arc::new(AtomicBool::new(false));
        let handle = DriverHandle::spawn(
            BlockingDriver {
                released: released.clone(),
            },
            queue.clone(),
        )
        .unwrap();
        handle.start();
        std::thread::sleep(Duration::from_millis(30));
        assert!(released.load(Ordering::SeqCst));
        assert!(queue.is_empty());
        handle.stop();
        assert!(handle.wait_for_state(DriverState::Gated, Duration::from_secs(1)));
    }

    #[test]
    fn test_cadence_from_hz() {
        match Cadence::from_hz(5.0).unwrap() {
            Cadence::FixedRate(period) => {
                assert!((period.as_secs_f64() - 0.2).abs() < 1e-6, "{:?}", period)
            },
            Cadence::Blocking => panic!("Expected FixedRate"),
        }
    }

    #[test]
    fn test_cadence_rejects_bad_rates() {
        for hz in [0.0, -0.0, -5.0, f64::NAN, f64::INFINITY, f64::MIN_POSITIVE / 4.0] {
            match Cadence::from_hz(hz) {
                Err(DriverError::InvalidConfig { field, .. }) => assert_eq!(field, "rate_hz"),
                other => panic!("Expected InvalidConfig for {}, got {:?}", hz, other),
            }
        }
    }
}
