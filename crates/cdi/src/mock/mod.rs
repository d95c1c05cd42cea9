//! 测试用 Mock 实现
//!
//! 在 `cfg(test)` 或开启 `mock` 特性时编译，供本 crate 和类驱动 crate 的宿主机测试使用：
//!
//! - [`init_test_env`]：注册基于 `test-support` 的架构操作和虚拟时钟调度操作
//! - [`MockHostController`]：可编程应答的主控制器
//! - [`MockDevice`] / [`ConfigBuilder`]：应答标准请求的设备模型

mod device;
mod host;

pub use device::{ConfigBuilder, MockDevice, device_descriptor};
pub use host::{MockHostController, MockReply, Responder};

use core::sync::atomic::{AtomicUsize, Ordering};

use sync::ArchOps;
use test_support::mock::arch::MOCK_ARCH_OPS;
use test_support::mock::sched::MOCK_SCHED_OPS;

use crate::ops::SchedOps;

struct TestArchOps;

impl ArchOps for TestArchOps {
    unsafe fn read_and_disable_interrupts(&self) -> usize {
        // SAFETY: 转发给 mock 实现
        unsafe { MOCK_ARCH_OPS.read_and_disable_interrupts() }
    }

    unsafe fn restore_interrupts(&self, flags: usize) {
        // SAFETY: 转发给 mock 实现
        unsafe { MOCK_ARCH_OPS.restore_interrupts(flags) }
    }

    fn interrupt_enable_mask(&self) -> usize {
        MOCK_ARCH_OPS.interrupt_enable_mask()
    }

    fn in_interrupt(&self) -> bool {
        MOCK_ARCH_OPS.in_interrupt()
    }
}

struct TestSchedOps;

impl SchedOps for TestSchedOps {
    fn now_ms(&self) -> u64 {
        MOCK_SCHED_OPS.now_ms()
    }

    fn block_on(&self, channel: usize, deadline_ms: u64) {
        MOCK_SCHED_OPS.block_on(channel, deadline_ms)
    }

    fn wake_all(&self, channel: usize) {
        MOCK_SCHED_OPS.wake_all(channel)
    }
}

static TEST_ARCH_OPS: TestArchOps = TestArchOps;
static TEST_SCHED_OPS: TestSchedOps = TestSchedOps;
// 0 = uninit, 1 = initializing, 2 = ready
static ENV_INIT: AtomicUsize = AtomicUsize::new(0);

/// 注册测试用的平台操作，可重复调用
///
/// 时钟是虚拟的：每次睡眠推进 1 ms，超时路径不依赖真实时间。
pub fn init_test_env() {
    match ENV_INIT.compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire) {
        Ok(_) => {
            // SAFETY: 只有赢得 compare_exchange 的线程执行注册
            unsafe {
                sync::register_arch_ops(&TEST_ARCH_OPS);
                crate::ops::register_sched_ops(&TEST_SCHED_OPS);
            }
            ENV_INIT.store(2, Ordering::Release);
        }
        Err(_) => {
            while ENV_INIT.load(Ordering::Acquire) != 2 {
                core::hint::spin_loop();
            }
        }
    }
}
