//! 调度相关操作的 Mock 实现
//!
//! 注意：这里不直接依赖 `cdi` crate（避免循环依赖）。
//! `cdi` crate 在 `mock` 特性下为这些类型实现 `SchedOps`。

use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Mock 的睡眠/唤醒操作
///
/// 时间是虚拟的：每次 `block_on` 让时钟前进 [`MockSchedOps::TICK_MS`]，
/// 因此超时路径在测试中是确定的，不依赖真实时间。
pub struct MockSchedOps {
    pub now: AtomicU64,
    pub blocks: AtomicUsize,
    pub wakes: AtomicUsize,
}

impl MockSchedOps {
    /// 每次睡眠推进的虚拟毫秒数
    pub const TICK_MS: u64 = 1;

    pub const fn new() -> Self {
        Self {
            now: AtomicU64::new(0),
            blocks: AtomicUsize::new(0),
            wakes: AtomicUsize::new(0),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    pub fn block_on(&self, _channel: usize, _deadline_ms: u64) {
        self.blocks.fetch_add(1, Ordering::Relaxed);
        self.now.fetch_add(Self::TICK_MS, Ordering::SeqCst);
    }

    pub fn wake_all(&self, _channel: usize) {
        self.wakes.fetch_add(1, Ordering::Relaxed);
    }
}

/// 全局 Mock 实例
pub static MOCK_SCHED_OPS: MockSchedOps = MockSchedOps::new();
