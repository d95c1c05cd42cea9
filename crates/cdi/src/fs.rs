//! 文件系统驱动接口与错误类型
//!
//! 这里只定义注册契约和磁盘边界上的错误码，文件系统语义不在 CDI 的范围内。

use crate::driver::Driver;

/// 文件系统层错误
///
/// 各错误码对应标准 POSIX errno 值，可通过 [`FsError::to_errno()`] 转换。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// 文件不存在 (-ENOENT)
    NotFound,
    /// I/O 错误 (-EIO)
    IoError,
    /// 非阻塞操作将阻塞 (-EAGAIN)
    WouldBlock,
    /// 文件已存在 (-EEXIST)
    AlreadyExists,
    /// 设备不存在 (-ENODEV)
    NoDevice,
    /// 无效参数 (-EINVAL)
    InvalidArgument,
    /// 设备空间不足 (-ENOSPC)
    NoSpace,
    /// 只读文件系统 (-EROFS)
    ReadOnlyFs,
    /// 操作不支持 (-ENOTSUP)
    NotSupported,
}

impl FsError {
    /// 转换为系统调用错误码（负数）
    pub fn to_errno(&self) -> isize {
        match self {
            FsError::NotFound => -2,
            FsError::IoError => -5,
            FsError::WouldBlock => -11,
            FsError::AlreadyExists => -17,
            FsError::NoDevice => -19,
            FsError::InvalidArgument => -22,
            FsError::NoSpace => -28,
            FsError::ReadOnlyFs => -30,
            FsError::NotSupported => -95,
        }
    }
}

/// 文件系统驱动
///
/// 同一时刻最多注册一个；第二次注册被静默忽略。
pub trait FsDriver: Driver {
    /// 文件系统类型名，例如 `"fat12"`
    fn fs_type(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_values() {
        assert_eq!(FsError::NotFound.to_errno(), -2);
        assert_eq!(FsError::IoError.to_errno(), -5);
        assert_eq!(FsError::NoDevice.to_errno(), -19);
        assert_eq!(FsError::ReadOnlyFs.to_errno(), -30);
    }
}
