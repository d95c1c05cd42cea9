//! 原始自旋锁
//!
//! 实现 [`lock_api::RawMutex`]，加锁时屏蔽本地中断，解锁时恢复。
//! 因为中断状态保存在锁内部，守卫本身不携带任何状态，可以直接交给
//! `lock_api` 生成的 `Mutex` / `MutexGuard` 使用。

use crate::arch_ops;
use core::{
    hint,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

/// 中断安全的原始自旋锁
///
/// 不可重入。在中断处理程序中使用是安全的：持锁方总是先关中断，
/// 因此本地 CPU 上的中断处理程序不会与持锁的任务竞争。
#[derive(Debug)]
pub struct RawSpinLock {
    locked: AtomicBool,
    /// 加锁前的中断状态，只在持锁期间有效
    saved_flags: AtomicUsize,
}

impl RawSpinLock {
    /// 创建一个未加锁的实例
    pub const fn new() -> Self {
        RawSpinLock {
            locked: AtomicBool::new(false),
            saved_flags: AtomicUsize::new(0),
        }
    }
}

impl Default for RawSpinLock {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: locked 标志通过 Acquire/Release 保证互斥，同一时刻只有一个持有者
unsafe impl lock_api::RawMutex for RawSpinLock {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = RawSpinLock::new();

    // 守卫必须在加锁的 CPU 上释放，否则会恢复错误的中断状态
    type GuardMarker = lock_api::GuardNoSend;

    fn lock(&self) {
        // SAFETY: 保存的状态在 unlock 中恢复
        let flags = unsafe { arch_ops().read_and_disable_interrupts() };
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            hint::spin_loop();
        }
        self.saved_flags.store(flags, Ordering::Relaxed);
    }

    fn try_lock(&self) -> bool {
        // SAFETY: 失败时立即恢复
        let flags = unsafe { arch_ops().read_and_disable_interrupts() };
        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            self.saved_flags.store(flags, Ordering::Relaxed);
            true
        } else {
            unsafe { arch_ops().restore_interrupts(flags) };
            false
        }
    }

    unsafe fn unlock(&self) {
        let flags = self.saved_flags.load(Ordering::Relaxed);
        self.locked.store(false, Ordering::Release);
        // SAFETY: flags 来自 lock/try_lock
        unsafe { arch_ops().restore_interrupts(flags) };
    }

    fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}
