//! 中断保护器
//!
//! 基于 RAII 屏蔽本地中断。USB 传输完成回调和 IRQ 计数器都可能在中断上下文中
//! 运行，任务上下文访问与之共享的数据时需要先进入此保护。
//!
//! 注意：禁用中断只能阻止本地 CPU 上“任务 vs 中断”的并发，
//! 多核共享数据仍需要配合 [`SpinLock`](crate::SpinLock)。

use crate::arch_ops;

/// 中断保护器
///
/// 创建时禁用中断并保存之前的状态，销毁时恢复。允许嵌套：
/// 内层保护器只会恢复到“已禁用”状态。
///
/// # 示例
/// ```ignore
/// {
///     let _guard = IntrGuard::new();
///     // 检查计数器后进入睡眠，期间不会丢失中断
/// }
/// ```
pub struct IntrGuard {
    flags: usize,
}

impl IntrGuard {
    /// 禁用中断并返回保护器
    pub fn new() -> Self {
        // SAFETY: 保存的 flags 只会在 Drop 中按相反顺序恢复
        let flags = unsafe { arch_ops().read_and_disable_interrupts() };
        IntrGuard { flags }
    }

    /// 进入保护前中断是否处于启用状态
    pub fn was_enabled(&self) -> bool {
        self.flags & arch_ops().interrupt_enable_mask() != 0
    }
}

impl Default for IntrGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IntrGuard {
    fn drop(&mut self) {
        // SAFETY: flags 来自 new() 中的 read_and_disable_interrupts
        unsafe { arch_ops().restore_interrupts(self.flags) };
    }
}
