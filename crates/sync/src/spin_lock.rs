//! 自旋锁封装
//!
//! 基于 [`RawSpinLock`] 的 `lock_api` 互斥锁类型。

use crate::raw_spin_lock::RawSpinLock;

/// 提供对数据互斥访问的自旋锁
///
/// # 示例
/// ```ignore
/// let lock = SpinLock::new(0);
/// {
///     let mut guard = lock.lock();
///     *guard += 1;
/// } // 离开作用域，释放锁并恢复中断状态
/// ```
///
/// # 注意
/// 持锁期间中断被屏蔽：不要在持锁时等待传输完成或调用可能睡眠的接口，
/// 也不要在持锁时调用外部回调。
pub type SpinLock<T> = lock_api::Mutex<RawSpinLock, T>;

/// [`SpinLock`] 的 RAII 守卫
pub type SpinLockGuard<'a, T> = lock_api::MutexGuard<'a, RawSpinLock, T>;
