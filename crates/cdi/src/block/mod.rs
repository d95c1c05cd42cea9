//! 磁盘模块
//!
//! 文件系统层通过 [`Disk`] 读写扇区；USB 大容量存储驱动和 [`RamDisk`]
//! 都实现这个接口，并登记到 CDI 上下文的 [`DiskTable`] 中。

mod ram_disk;

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use sync::SpinLock;

use crate::fs::FsError;
use crate::list::List;

pub use ram_disk::RamDisk;

/// 扇区寻址的磁盘
pub trait Disk: Send + Sync {
    /// 磁盘名，例如 `usbmsd0`
    fn name(&self) -> String;

    /// 扇区大小（字节）
    fn sector_size(&self) -> usize;

    /// 扇区总数
    fn sector_count(&self) -> u64;

    /// 从 `start` 开始读取 `count` 个扇区
    ///
    /// `buf` 的长度至少为 `count * sector_size()`。
    fn read_sectors(&self, start: u64, buf: &mut [u8], count: usize) -> Result<(), FsError>;

    /// 从 `start` 开始写入 `count` 个扇区
    fn write_sectors(&self, start: u64, buf: &[u8], count: usize) -> Result<(), FsError>;
}

/// 检查一次扇区访问的参数，返回访问的字节数
///
/// 供 [`Disk`] 的实现在读写前调用。
pub fn check_range(
    disk: &dyn Disk,
    start: u64,
    buf_len: usize,
    count: usize,
) -> Result<usize, FsError> {
    let bytes = count
        .checked_mul(disk.sector_size())
        .ok_or(FsError::InvalidArgument)?;
    if buf_len < bytes {
        return Err(FsError::InvalidArgument);
    }
    let end = start
        .checked_add(count as u64)
        .ok_or(FsError::InvalidArgument)?;
    if end > disk.sector_count() {
        return Err(FsError::InvalidArgument);
    }
    Ok(bytes)
}

/// 已登记的磁盘
pub struct DiskTable {
    disks: SpinLock<List<Arc<dyn Disk>>>,
}

impl DiskTable {
    /// 创建空表
    pub const fn new() -> Self {
        Self {
            disks: SpinLock::new(List::new()),
        }
    }

    /// 登记磁盘；同名磁盘已存在时返回 `AlreadyExists`
    pub fn add(&self, disk: Arc<dyn Disk>) -> Result<(), FsError> {
        let name = disk.name();
        let mut disks = self.disks.lock();
        if disks.iter().any(|d| d.name() == name) {
            return Err(FsError::AlreadyExists);
        }
        disks.push_back(disk);
        drop(disks);
        log::info!("cdi: disk {} registered", name);
        Ok(())
    }

    /// 移除磁盘
    pub fn remove(&self, name: &str) -> Option<Arc<dyn Disk>> {
        let disk = self.disks.lock().remove_first(|d| d.name() == name)?;
        log::info!("cdi: disk {} removed", name);
        Some(disk)
    }

    /// 按名称查找磁盘
    pub fn find(&self, name: &str) -> Option<Arc<dyn Disk>> {
        self.disks.lock().iter().find(|d| d.name() == name).cloned()
    }

    /// 按登记顺序列出磁盘名
    pub fn names(&self) -> Vec<String> {
        self.disks.lock().iter().map(|d| d.name()).collect()
    }

    /// 已登记的磁盘数量
    pub fn len(&self) -> usize {
        self.disks.lock().len()
    }

    /// 是否没有磁盘
    pub fn is_empty(&self) -> bool {
        self.disks.lock().is_empty()
    }
}

impl Default for DiskTable {
    fn default() -> Self {
        Self::new()
    }
}
