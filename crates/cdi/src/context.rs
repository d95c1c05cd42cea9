//! CDI 上下文
//!
//! 内核启动时构造一次，通过 `Arc` 传给需要它的子系统，取代全局注册表。

use alloc::sync::Arc;

use crate::block::DiskTable;
use crate::irq::IrqTable;
use crate::registry::DriverRegistry;

/// 驱动注册表、中断线表和磁盘表的持有者
pub struct Cdi {
    drivers: DriverRegistry,
    irqs: IrqTable,
    disks: Arc<DiskTable>,
}

impl Cdi {
    /// 创建上下文
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            drivers: DriverRegistry::new(),
            irqs: IrqTable::new(),
            disks: Arc::new(DiskTable::new()),
        })
    }

    /// 驱动注册表
    pub fn drivers(&self) -> &DriverRegistry {
        &self.drivers
    }

    /// 中断线表
    pub fn irqs(&self) -> &IrqTable {
        &self.irqs
    }

    /// 磁盘表
    ///
    /// 类驱动持有这个 `Arc` 而不是整个上下文，避免注册表与驱动之间的引用环。
    pub fn disks(&self) -> &Arc<DiskTable> {
        &self.disks
    }
}
