//! USB 类驱动
//!
//! 此 crate 在 [`cdi`] 的 USB 设备模型之上提供两个类驱动：
//!
//! - [`HidDriver`] - 启动协议键盘与鼠标，把报告解码成 [`cdi::InputSink`] 事件
//! - [`MsdDriver`] - 大容量存储 Bulk-Only Transport，把 LUN 注册为 [`cdi::Disk`]
//!
//! 使用前通过 [`register_class_drivers`] 把驱动注册到 [`cdi::Cdi`] 上下文，
//! 之后由 [`cdi::usb::UsbBus`] 在枚举时按接口三元组匹配。

#![no_std]

extern crate alloc;

pub mod hid;
pub mod msd;

use alloc::sync::Arc;

use cdi::{Cdi, DriverHandle, InputSink, RegisterOutcome};

pub use hid::{HidDriver, HidKind};
pub use msd::{MsdConfig, MsdDriver, MsdError};

/// 把 HID 与 MSD 驱动注册到上下文
///
/// 返回两个驱动各自的注册结果。
pub fn register_class_drivers(
    cdi: &Cdi,
    sink: Arc<dyn InputSink>,
    config: MsdConfig,
) -> (RegisterOutcome, RegisterOutcome) {
    let hid = cdi
        .drivers()
        .register(DriverHandle::UsbClass(HidDriver::new(sink)));
    let msd = cdi.drivers().register(DriverHandle::UsbClass(MsdDriver::new(
        cdi.disks().clone(),
        config,
    )));
    log::info!("usb: class drivers registered (hid {:?}, msd {:?})", hid, msd);
    (hid, msd)
}
