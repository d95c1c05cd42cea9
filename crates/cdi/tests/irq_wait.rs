//! Interrupt-wait and blocking-refusal tests with real threads.
//!
//! The platform hooks here use a real clock and a condition variable, so a
//! `fire` from another thread genuinely races the waiter.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, Once, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use cdi::usb::descriptor::SetupPacket;
use cdi::usb::{
    HostController, Transfer, TransferEngine, TransferId, TransferRequest, UsbDevice, UsbError,
    UsbSpeed,
};
use cdi::{IrqError, IrqTable, SchedOps};
use sync::ArchOps;

std::thread_local! {
    static IRQ_ENABLED: Cell<bool> = const { Cell::new(true) };
    static IN_IRQ: Cell<bool> = const { Cell::new(false) };
}

struct ThreadArchOps;

impl ArchOps for ThreadArchOps {
    unsafe fn read_and_disable_interrupts(&self) -> usize {
        IRQ_ENABLED.with(|c| c.replace(false)) as usize
    }

    unsafe fn restore_interrupts(&self, flags: usize) {
        IRQ_ENABLED.with(|c| c.set(flags != 0));
    }

    fn interrupt_enable_mask(&self) -> usize {
        1
    }

    fn in_interrupt(&self) -> bool {
        IN_IRQ.with(|c| c.get())
    }
}

/// Sleep/wake on a single condition variable; a generation counter stands in
/// for per-channel queues. Host threads cannot enable interrupts and sleep
/// atomically, so each sleep is capped at a short slice.
struct CondvarSchedOps {
    start: OnceLock<Instant>,
    generation: Mutex<u64>,
    cond: Condvar,
}

impl SchedOps for CondvarSchedOps {
    fn now_ms(&self) -> u64 {
        self.start.get_or_init(Instant::now).elapsed().as_millis() as u64
    }

    fn block_on(&self, _channel: usize, deadline_ms: u64) {
        let seen = *self.generation.lock().unwrap();
        let remaining = deadline_ms.saturating_sub(self.now_ms());
        let guard = self.generation.lock().unwrap();
        let _ = self
            .cond
            .wait_timeout_while(guard, Duration::from_millis(remaining.clamp(1, 10)), |g| *g == seen)
            .unwrap();
    }

    fn wake_all(&self, _channel: usize) {
        *self.generation.lock().unwrap() += 1;
        self.cond.notify_all();
    }
}

static ARCH: ThreadArchOps = ThreadArchOps;
static SCHED: CondvarSchedOps = CondvarSchedOps {
    start: OnceLock::new(),
    generation: Mutex::new(0),
    cond: Condvar::new(),
};
static INIT: Once = Once::new();

fn init() {
    INIT.call_once(|| unsafe {
        sync::register_arch_ops(&ARCH);
        cdi::register_sched_ops(&SCHED);
    });
}

#[test]
fn test_fire_from_other_thread_wakes_waiter() {
    init();
    let irqs = Arc::new(IrqTable::new());
    irqs.reset(4).unwrap();

    let firing = irqs.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        firing.fire(4);
    });

    let start = Instant::now();
    assert_eq!(irqs.wait(4, 5_000), Ok(()));
    assert!(start.elapsed() < Duration::from_secs(5));
    handle.join().unwrap();
}

#[test]
fn test_fire_between_reset_and_wait_is_not_lost() {
    init();
    let irqs = Arc::new(IrqTable::new());
    for _ in 0..50 {
        irqs.reset(2).unwrap();
        let firing = irqs.clone();
        let handle = thread::spawn(move || firing.fire(2));
        handle.join().unwrap();
        assert_eq!(irqs.wait(2, 1_000), Ok(()));
    }
}

#[test]
fn test_wait_times_out_without_fire() {
    init();
    let irqs = IrqTable::new();
    irqs.reset(6).unwrap();
    let start = Instant::now();
    assert_eq!(irqs.wait(6, 30), Err(IrqError::Timeout));
    assert!(start.elapsed() >= Duration::from_millis(30));
}

struct NullHost {
    enqueued: AtomicBool,
}

impl HostController for NullHost {
    fn name(&self) -> &str {
        "null"
    }

    fn enqueue(&self, _request: &TransferRequest) -> Result<(), UsbError> {
        self.enqueued.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn cancel(&self, _id: TransferId) {}
}

#[test]
fn test_blocking_transfer_refused_in_interrupt_context() {
    init();
    let host = Arc::new(NullHost {
        enqueued: AtomicBool::new(false),
    });
    let engine = TransferEngine::new(host.clone());
    let device = UsbDevice::new(1, UsbSpeed::Full, engine.clone());
    let setup = SetupPacket::get_descriptor(1, 0, 8);

    IN_IRQ.with(|c| c.set(true));
    let transfer = Transfer::control_in(&device, setup).unwrap();
    assert_eq!(
        engine.submit_and_wait(transfer, 100),
        Err(UsbError::WouldBlock)
    );
    IN_IRQ.with(|c| c.set(false));

    assert!(!host.enqueued.load(Ordering::SeqCst));
}
