//! 驱动生命周期状态
//!
//! ```text
//! Initialized ──spawn──▶ Gated ──start()──▶ Running
//!                          ▲                   │ stop()
//!                          └──── Stopping ◀────┘
//! 任意状态 ──drop──▶ Quit
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// 驱动生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum DriverState {
    /// 已构造，工作线程尚未到达启动闸门
    #[default]
    Initialized = 0,
    /// 工作线程阻塞在启动闸门上
    Gated = 1,
    /// 正在采样
    Running = 2,
    /// 已请求停止，等待当前采样结束
    Stopping = 3,
    /// 线程已退出
    Quit = 4,
}

impl DriverState {
    /// 从 u8 转换
    ///
    /// 如果值无效，返回 Quit。
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Initialized,
            1 => Self::Gated,
            2 => Self::Running,
            3 => Self::Stopping,
            _ => Self::Quit,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn is_running(self) -> bool {
        self == Self::Running
    }

    /// 线程是否仍然存活
    pub fn is_alive(self) -> bool {
        self != Self::Quit
    }
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DriverState::Initialized => "initialized",
            DriverState::Gated => "gated",
            DriverState::Running => "running",
            DriverState::Stopping => "stopping",
            DriverState::Quit => "quit",
        };
        f.write_str(s)
    }
}

/// 驱动状态（原子版本，用于线程间共享）
#[derive(Debug)]
pub struct AtomicDriverState {
    inner: AtomicU8,
}

impl AtomicDriverState {
    pub fn new(state: DriverState) -> Self {
        Self {
            inner: AtomicU8::new(state.as_u8()),
        }
    }

    pub fn get(&self, ordering: Ordering) -> DriverState {
        DriverState::from_u8(self.inner.load(ordering))
    }

    pub fn set(&self, state: DriverState, ordering: Ordering) {
        self.inner.store(state.as_u8(), ordering);
    }

    /// 比较并交换
    ///
    /// 如果当前值等于 `current`，则设置为 `new` 并返回 true。
    pub fn compare_exchange(
        &self,
        current: DriverState,
        new: DriverState,
        success: Ordering,
        failure: Ordering,
    ) -> bool {
        self.inner
            .compare_exchange(current.as_u8(), new.as_u8(), success, failure)
            .is_ok()
    }
}

impl Default for AtomicDriverState {
    fn default() -> Self {
        Self::new(DriverState::Initialized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_conversions() {
        for state in [
            DriverState::Initialized,
            DriverState::Gated,
            DriverState::Running,
            DriverState::Stopping,
            DriverState::Quit,
        ] {
            assert_eq!(DriverState::from_u8(state.as_u8()), state);
        }
        assert_eq!(DriverState::from_u8(200), DriverState::Quit);
    }

    #[test]
    fn test_atomic_state() {
        let state = AtomicDriverState::default();
        assert_eq!(state.get(Ordering::Relaxed), DriverState::Initialized);

        state.set(DriverState::Running, Ordering::Relaxed);
        assert!(state.get(Ordering::Relaxed).is_running());

        assert!(state.compare_exchange(
            DriverState::Running,
            DriverState::Stopping,
            Ordering::AcqRel,
            Ordering::Acquire
        ));
        assert!(!state.compare_exchange(
            DriverState::Running,
            DriverState::Gated,
            Ordering::AcqRel,
            Ordering::Acquire
        ));
        assert_eq!(state.get(Ordering::Relaxed), DriverState::Stopping);
    }

    #[test]
    fn test_display() {
        assert_eq!(DriverState::Gated.to_string(), "gated");
        assert!(!DriverState::Quit.is_alive());
    }
}
