//! CDI 驱动核心
//!
//! 此 crate 提供与总线无关的驱动注册框架和 USB 设备模型：
//!
//! - [`Cdi`] - 显式构造的上下文，持有驱动注册表、中断线表和磁盘表
//! - [`DriverRegistry`] - 文件系统（单例）、USB 类和其他驱动的注册表
//! - [`IrqTable`] - 中断上下文到任务上下文的等待原语
//! - [`List`] - 注册表和设备模型使用的有序列表
//! - [`usb`] - 枚举、端点传输引擎和类驱动接口
//! - [`Disk`] / [`InputSink`] - 面向文件系统层和输入子系统的接口
//!
//! # 平台解耦
//!
//! 通过 trait 抽象与内核的其他部分解耦：
//! - `sync::ArchOps`: 中断开关与中断上下文查询
//! - [`SchedOps`]: 单调时钟与睡眠/唤醒
//!
//! 使用前必须调用 `sync::register_arch_ops` 和 [`register_sched_ops`] 注册实现。

#![no_std]
#![allow(clippy::module_inception)]

extern crate alloc;

pub mod block;
pub mod config;
pub mod context;
pub mod driver;
pub mod fs;
pub mod input;
pub mod irq;
pub mod list;
pub mod ops;
pub mod registry;
pub mod usb;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

// Re-export ops
pub use ops::{SchedOps, register_sched_ops, sched_ops};

pub use block::{Disk, DiskTable, RamDisk};
pub use config::UsbConfig;
pub use context::Cdi;
pub use driver::{Driver, DriverError, DriverHandle, DriverKind};
pub use fs::{FsDriver, FsError};
pub use input::{InputSink, KeyCode, MouseButton};
pub use irq::{IrqError, IrqTable};
pub use list::List;
pub use registry::{DriverRegistry, IoNamespace, NodeKind, RegisterOutcome};
