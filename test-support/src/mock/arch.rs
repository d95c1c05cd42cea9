//! 架构相关操作的 Mock 实现

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Mock 架构操作
///
/// 中断状态是全局的一个标志位，足以支撑单线程的单元测试；
/// 需要真实并发的测试应自行实现按线程记录的版本。
pub struct MockArchOps {
    pub interrupt_state: AtomicBool,
    pub in_irq: AtomicBool,
    /// read_and_disable_interrupts 的调用次数
    pub disable_count: AtomicUsize,
}

impl MockArchOps {
    pub const fn new() -> Self {
        Self {
            interrupt_state: AtomicBool::new(true),
            in_irq: AtomicBool::new(false),
            disable_count: AtomicUsize::new(0),
        }
    }

    pub unsafe fn read_and_disable_interrupts(&self) -> usize {
        self.disable_count.fetch_add(1, Ordering::Relaxed);
        self.interrupt_state.swap(false, Ordering::SeqCst) as usize
    }

    pub unsafe fn restore_interrupts(&self, flags: usize) {
        self.interrupt_state.store(flags != 0, Ordering::SeqCst);
    }

    pub fn interrupt_enable_mask(&self) -> usize {
        0x1
    }

    pub fn in_interrupt(&self) -> bool {
        self.in_irq.load(Ordering::Relaxed)
    }
}

/// 全局 Mock 实例
pub static MOCK_ARCH_OPS: MockArchOps = MockArchOps::new();
