//! 内存模拟磁盘

use super::{Disk, check_range};
use crate::fs::FsError;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use sync::SpinLock;

/// 内存模拟的磁盘
///
/// 用于测试和开发
pub struct RamDisk {
    /// 存储数据
    data: SpinLock<Vec<u8>>,

    /// 扇区大小
    sector_size: usize,

    /// 磁盘名
    name: String,
}

impl RamDisk {
    /// 创建指定扇区数的内存磁盘
    ///
    /// 扇区大小为 0 或总字节数溢出时返回 `InvalidArgument`。
    pub fn new(name: &str, sectors: usize, sector_size: usize) -> Result<Arc<Self>, FsError> {
        let len = sectors
            .checked_mul(sector_size)
            .ok_or(FsError::InvalidArgument)?;
        Self::from_bytes(name, vec![0u8; len], sector_size)
    }

    /// 从字节数组创建，末尾不足一个扇区的部分不可访问
    pub fn from_bytes(name: &str, data: Vec<u8>, sector_size: usize) -> Result<Arc<Self>, FsError> {
        if sector_size == 0 {
            return Err(FsError::InvalidArgument);
        }
        Ok(Arc::new(Self {
            data: SpinLock::new(data),
            sector_size,
            name: String::from(name),
        }))
    }

    /// 获取原始数据（用于调试）
    pub fn raw_data(&self) -> Vec<u8> {
        self.data.lock().clone()
    }
}

impl Disk for RamDisk {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn sector_size(&self) -> usize {
        self.sector_size
    }

    fn sector_count(&self) -> u64 {
        (self.data.lock().len() / self.sector_size) as u64
    }

    fn read_sectors(&self, start: u64, buf: &mut [u8], count: usize) -> Result<(), FsError> {
        let bytes = check_range(self, start, buf.len(), count)?;
        let offset = start as usize * self.sector_size;
        let data = self.data.lock();
        buf[..bytes].copy_from_slice(&data[offset..offset + bytes]);
        Ok(())
    }

    fn write_sectors(&self, start: u64, buf: &[u8], count: usize) -> Result<(), FsError> {
        let bytes = check_range(self, start, buf.len(), count)?;
        let offset = start as usize * self.sector_size;
        let mut data = self.data.lock();
        data[offset..offset + bytes].copy_from_slice(&buf[..bytes]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::init_test_env;

    #[test]
    fn test_ramdisk_read_write_roundtrip() {
        init_test_env();
        let rd = RamDisk::new("ram0", 8, 512).unwrap();
        assert_eq!(rd.sector_size(), 512);
        assert_eq!(rd.sector_count(), 8);

        let mut wbuf = [0u8; 1024];
        wbuf[0] = 0xAA;
        wbuf[1023] = 0x55;
        rd.write_sectors(3, &wbuf, 2).unwrap();

        let mut rbuf = [0u8; 1024];
        rd.read_sectors(3, &mut rbuf, 2).unwrap();
        assert_eq!(rbuf, wbuf);

        // Other sectors remain zero.
        let mut rbuf2 = [0u8; 512];
        rd.read_sectors(2, &mut rbuf2, 1).unwrap();
        assert_eq!(rbuf2, [0u8; 512]);
    }

    #[test]
    fn test_ramdisk_bounds_and_short_buffer() {
        init_test_env();
        let rd = RamDisk::new("ram0", 2, 512).unwrap();

        let mut short = [0u8; 16];
        assert_eq!(
            rd.read_sectors(0, &mut short, 1),
            Err(FsError::InvalidArgument)
        );

        let mut ok = [0u8; 512];
        assert_eq!(rd.read_sectors(2, &mut ok, 1), Err(FsError::InvalidArgument));
        assert_eq!(rd.write_sectors(1, &[0u8; 1024], 2), Err(FsError::InvalidArgument));
        assert_eq!(rd.read_sectors(u64::MAX, &mut ok, 1), Err(FsError::InvalidArgument));
    }

    #[test]
    fn test_ramdisk_rejects_zero_sector_size() {
        init_test_env();
        assert!(RamDisk::new("ram0", 8, 0).is_err());
        assert!(RamDisk::from_bytes("ram0", vec![0u8; 512], 0).is_err());
        assert!(RamDisk::new("ram0", usize::MAX, 512).is_err());

        let rd = RamDisk::from_bytes("ram0", vec![0u8; 1000], 512).unwrap();
        assert_eq!(rd.sector_count(), 1);
    }
}
