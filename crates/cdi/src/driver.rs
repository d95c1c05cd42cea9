//! 驱动基础类型
//!
//! 包含 [`Driver`] trait、驱动种类 [`DriverKind`] 以及封闭的驱动句柄
//! [`DriverHandle`]。注册表只认识这三种驱动，按种类分派生命周期钩子。

use alloc::sync::Arc;
use core::fmt;

use crate::fs::FsDriver;
use crate::usb::UsbClassDriver;

/// 驱动种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DriverKind {
    /// 文件系统驱动（单例）
    Filesystem,
    /// USB 类驱动
    UsbClass,
    /// 其他驱动
    Misc,
}

impl DriverKind {
    /// I/O 命名空间中的目录名
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverKind::Filesystem => "fs",
            DriverKind::UsbClass => "usb",
            DriverKind::Misc => "misc",
        }
    }
}

/// 驱动生命周期错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverError {
    /// 初始化失败
    InitFailed,
    /// 依赖的资源不可用
    Unavailable,
    /// 内存不足
    NoMemory,
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverError::InitFailed => write!(f, "driver init failed"),
            DriverError::Unavailable => write!(f, "driver resource unavailable"),
            DriverError::NoMemory => write!(f, "out of memory"),
        }
    }
}

/// 驱动程序特征
///
/// `init` 由注册表保证只成功执行一次，并延迟到第一次使用时才调用；
/// `destroy` 在注销时调用，必须能处理从未初始化过的驱动。
pub trait Driver: Send + Sync {
    /// 驱动名，在同一种类内唯一
    fn name(&self) -> &str;

    /// 初始化驱动
    fn init(&self) -> Result<(), DriverError> {
        Ok(())
    }

    /// 销毁驱动
    fn destroy(&self) {}
}

/// 已注册驱动的句柄
#[derive(Clone)]
pub enum DriverHandle {
    /// 文件系统驱动
    Filesystem(Arc<dyn FsDriver>),
    /// USB 类驱动
    UsbClass(Arc<dyn UsbClassDriver>),
    /// 其他驱动
    Misc(Arc<dyn Driver>),
}

impl DriverHandle {
    /// 驱动种类
    pub fn kind(&self) -> DriverKind {
        match self {
            DriverHandle::Filesystem(_) => DriverKind::Filesystem,
            DriverHandle::UsbClass(_) => DriverKind::UsbClass,
            DriverHandle::Misc(_) => DriverKind::Misc,
        }
    }

    /// 驱动名
    pub fn name(&self) -> &str {
        match self {
            DriverHandle::Filesystem(d) => d.name(),
            DriverHandle::UsbClass(d) => d.name(),
            DriverHandle::Misc(d) => d.name(),
        }
    }

    pub(crate) fn init(&self) -> Result<(), DriverError> {
        match self {
            DriverHandle::Filesystem(d) => d.init(),
            DriverHandle::UsbClass(d) => d.init(),
            DriverHandle::Misc(d) => d.init(),
        }
    }

    pub(crate) fn destroy(&self) {
        match self {
            DriverHandle::Filesystem(d) => d.destroy(),
            DriverHandle::UsbClass(d) => d.destroy(),
            DriverHandle::Misc(d) => d.destroy(),
        }
    }
}

impl fmt::Debug for DriverHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind().as_str(), self.name())
    }
}
