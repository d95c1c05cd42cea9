//! 中断等待原语
//!
//! 在中断上下文（只允许递增计数器）和任务上下文（可以带超时睡眠）之间搭桥。
//!
//! 每条中断线有一个单调递增的触发计数 `fired` 和一个基线 `baseline`：
//!
//! - [`IrqTable::reset`] 把基线设为当前计数，丢弃之前累计的触发；
//! - [`IrqTable::fire`] 由底层中断分发器调用：原子递增、唤醒等待者、调用处理函数；
//! - [`IrqTable::wait`] 在关中断状态下比较计数与基线，不等则返回，否则睡眠。
//!
//! 因为判断依据是计数而不是一次性标志，`reset` 与 `wait` 之间到达的中断
//! 一定会被 `wait` 观察到。`wait` 不消费触发，下一轮等待前需再次 `reset`。

use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};

use sync::{IntrGuard, SpinLock};

use crate::config::IRQ_LINES;
use crate::ops::{deadline_after, sched_ops};

/// 中断处理函数
pub type IrqHandler = Arc<dyn Fn(u8) + Send + Sync>;

/// 中断等待相关错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqError {
    /// 中断线号超出范围
    InvalidLine,
    /// 等待超时
    Timeout,
    /// 该中断线已安装处理函数
    AlreadyInstalled,
}

impl fmt::Display for IrqError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrqError::InvalidLine => write!(f, "invalid irq line"),
            IrqError::Timeout => write!(f, "irq wait timed out"),
            IrqError::AlreadyInstalled => write!(f, "irq handler already installed"),
        }
    }
}

struct IrqLine {
    /// 只在中断上下文递增
    fired: AtomicUsize,
    /// 只在任务上下文写入
    baseline: AtomicUsize,
    handler: SpinLock<Option<IrqHandler>>,
}

impl IrqLine {
    fn new() -> Self {
        Self {
            fired: AtomicUsize::new(0),
            baseline: AtomicUsize::new(0),
            handler: SpinLock::new(None),
        }
    }

    /// 睡眠通道标识：计数器的地址
    fn channel(&self) -> usize {
        &self.fired as *const AtomicUsize as usize
    }
}

/// 中断线表
pub struct IrqTable {
    lines: [IrqLine; IRQ_LINES],
    spurious: AtomicUsize,
}

impl IrqTable {
    /// 创建中断线表，所有计数为 0
    pub fn new() -> Self {
        Self {
            lines: core::array::from_fn(|_| IrqLine::new()),
            spurious: AtomicUsize::new(0),
        }
    }

    fn line(&self, line: u8) -> Result<&IrqLine, IrqError> {
        self.lines.get(line as usize).ok_or(IrqError::InvalidLine)
    }

    /// 为中断线安装处理函数
    pub fn install_handler(
        &self,
        line: u8,
        handler: impl Fn(u8) + Send + Sync + 'static,
    ) -> Result<(), IrqError> {
        let entry = self.line(line)?;
        let mut slot = entry.handler.lock();
        if slot.is_some() {
            return Err(IrqError::AlreadyInstalled);
        }
        *slot = Some(Arc::new(handler));
        log::debug!("irq: handler installed on line {}", line);
        Ok(())
    }

    /// 移除中断线的处理函数
    pub fn remove_handler(&self, line: u8) -> Result<(), IrqError> {
        self.line(line)?.handler.lock().take();
        Ok(())
    }

    /// 中断触发（由底层中断分发器在中断上下文调用）
    ///
    /// O(1) 且不阻塞：递增计数、唤醒等待者，然后调用处理函数。
    pub fn fire(&self, line: u8) {
        let Ok(entry) = self.line(line) else {
            self.spurious.fetch_add(1, Ordering::Relaxed);
            return;
        };
        entry.fired.fetch_add(1, Ordering::AcqRel);
        sched_ops().wake_all(entry.channel());

        // 克隆出处理函数后释放锁，处理函数内可以重新安装/移除
        let handler = entry.handler.lock().clone();
        if let Some(handler) = handler {
            handler(line);
        }
    }

    /// 以当前计数为新的基线
    pub fn reset(&self, line: u8) -> Result<(), IrqError> {
        let entry = self.line(line)?;
        let now = entry.fired.load(Ordering::Acquire);
        entry.baseline.store(now, Ordering::Release);
        Ok(())
    }

    /// 等待中断线的计数越过基线，最长 `timeout_ms` 毫秒
    pub fn wait(&self, line: u8, timeout_ms: u64) -> Result<(), IrqError> {
        let entry = self.line(line)?;
        let deadline = deadline_after(timeout_ms);
        loop {
            let _guard = IntrGuard::new();
            let baseline = entry.baseline.load(Ordering::Acquire);
            if entry.fired.load(Ordering::Acquire) != baseline {
                return Ok(());
            }
            if sched_ops().now_ms() >= deadline {
                return Err(IrqError::Timeout);
            }
            sched_ops().block_on(entry.channel(), deadline);
        }
    }

    /// 中断线自上次 `reset` 以来的触发次数
    pub fn pending(&self, line: u8) -> Result<usize, IrqError> {
        let entry = self.line(line)?;
        let fired = entry.fired.load(Ordering::Acquire);
        Ok(fired.wrapping_sub(entry.baseline.load(Ordering::Acquire)))
    }

    /// 无效中断线上收到的触发次数
    pub fn spurious_count(&self) -> usize {
        self.spurious.load(Ordering::Relaxed)
    }
}

impl Default for IrqTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::init_test_env;
    use core::sync::atomic::AtomicBool;

    #[test]
    fn test_fire_after_reset_is_observed() {
        init_test_env();
        let irqs = IrqTable::new();
        irqs.reset(3).unwrap();
        irqs.fire(3);
        assert_eq!(irqs.wait(3, 10), Ok(()));
        // wait does not consume the fire
        assert_eq!(irqs.wait(3, 10), Ok(()));
    }

    #[test]
    fn test_reset_discards_earlier_fires() {
        init_test_env();
        let irqs = IrqTable::new();
        irqs.fire(5);
        irqs.fire(5);
        irqs.reset(5).unwrap();
        assert_eq!(irqs.pending(5), Ok(0));
        assert_eq!(irqs.wait(5, 20), Err(IrqError::Timeout));
    }

    #[test]
    fn test_every_interleaving_of_reset_fire_wait() {
        init_test_env();
        // Sequences of (reset | fire) followed by a wait: the wait succeeds
        // exactly when a fire happened after the most recent reset.
        let ops = [[0u8, 1, 1], [1, 0, 1], [1, 1, 0], [0, 0, 1], [1, 0, 0], [0, 1, 0]];
        for seq in ops {
            let irqs = IrqTable::new();
            let mut fired_since_reset = false;
            for op in seq {
                if op == 0 {
                    irqs.reset(1).unwrap();
                    fired_since_reset = false;
                } else {
                    irqs.fire(1);
                    fired_since_reset = true;
                }
            }
            let result = irqs.wait(1, 5);
            assert_eq!(result.is_ok(), fired_since_reset, "sequence {:?}", seq);
        }
    }

    #[test]
    fn test_invalid_line() {
        init_test_env();
        let irqs = IrqTable::new();
        let bad = IRQ_LINES as u8;
        assert_eq!(irqs.reset(bad), Err(IrqError::InvalidLine));
        assert_eq!(irqs.wait(bad, 1), Err(IrqError::InvalidLine));
        irqs.fire(bad);
        assert_eq!(irqs.spurious_count(), 1);
    }

    #[test]
    fn test_handler_runs_on_fire() {
        init_test_env();
        let irqs = IrqTable::new();
        let hit = Arc::new(AtomicBool::new(false));
        let flag = hit.clone();
        irqs.install_handler(9, move |line| {
            assert_eq!(line, 9);
            flag.store(true, Ordering::SeqCst);
        })
        .unwrap();
        assert_eq!(
            irqs.install_handler(9, |_| {}),
            Err(IrqError::AlreadyInstalled)
        );
        irqs.fire(9);
        assert!(hit.load(Ordering::SeqCst));

        irqs.remove_handler(9).unwrap();
        assert!(irqs.install_handler(9, |_| {}).is_ok());
    }
}
