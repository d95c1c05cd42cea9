//! 调度操作 trait 定义和注册
//!
//! CDI 需要的唯一调度能力是“睡眠直到被唤醒或超时”。内核实现 [`SchedOps`]
//! 并在启动时注册，cdi crate 本身不依赖具体的调度器。

use core::sync::atomic::{AtomicUsize, Ordering};

/// 睡眠/唤醒操作
///
/// # 约定
///
/// - [`block_on`](SchedOps::block_on) 在本地中断**已关闭**时被调用，实现必须
///   原子地开中断并睡眠（例如 `sti; hlt`），返回前重新关闭中断。这样调用方在
///   关中断状态下检查条件后再睡眠，不存在丢失唤醒的窗口。
/// - `block_on` 允许虚假返回，调用方总是重新检查条件。
/// - [`wake_all`](SchedOps::wake_all) 可在中断上下文调用，必须是非阻塞的。
pub trait SchedOps: Send + Sync {
    /// 单调时钟，单位毫秒
    fn now_ms(&self) -> u64;

    /// 让当前任务在 `channel` 上睡眠，最迟在 `deadline_ms` 返回
    fn block_on(&self, channel: usize, deadline_ms: u64);

    /// 唤醒所有在 `channel` 上睡眠的任务
    fn wake_all(&self, channel: usize);
}

static SCHED_OPS_DATA: AtomicUsize = AtomicUsize::new(0);
static SCHED_OPS_VTABLE: AtomicUsize = AtomicUsize::new(0);

/// 注册调度操作实现
///
/// # Safety
/// 必须在单线程环境下调用，且只能调用一次
pub unsafe fn register_sched_ops(ops: &'static dyn SchedOps) {
    let ptr = ops as *const dyn SchedOps;
    // SAFETY: 将 fat pointer 拆分为 data 和 vtable 两部分存储
    let (data, vtable) =
        unsafe { core::mem::transmute::<*const dyn SchedOps, (usize, usize)>(ptr) };
    SCHED_OPS_DATA.store(data, Ordering::Release);
    SCHED_OPS_VTABLE.store(vtable, Ordering::Release);
}

/// 获取已注册的调度操作实现
///
/// # Panics
/// 如果尚未调用 [`register_sched_ops`] 注册实现，则 panic
#[inline]
pub fn sched_ops() -> &'static dyn SchedOps {
    let data = SCHED_OPS_DATA.load(Ordering::Acquire);
    let vtable = SCHED_OPS_VTABLE.load(Ordering::Acquire);
    if data == 0 {
        panic!("cdi: SchedOps not registered");
    }
    // SAFETY: 重组 fat pointer
    unsafe { &*core::mem::transmute::<(usize, usize), *const dyn SchedOps>((data, vtable)) }
}

/// 计算超时截止时间
#[inline]
pub(crate) fn deadline_after(timeout_ms: u64) -> u64 {
    sched_ops().now_ms().saturating_add(timeout_ms)
}
