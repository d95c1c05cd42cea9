//! 把一个 LUN 暴露为 [`Disk`]

use alloc::string::String;
use alloc::sync::Arc;

use cdi::block::check_range;
use cdi::usb::UsbError;
use cdi::{Disk, FsError};

use super::MsdError;
use super::scsi::{self, Capacity, SenseKey};
use super::transport::{BulkOnly, DataStage};

/// USB 大容量存储的一个逻辑单元
pub struct MsdDisk {
    name: String,
    transport: Arc<BulkOnly>,
    lun: u8,
    capacity: Capacity,
}

impl MsdDisk {
    /// 创建磁盘
    pub fn new(name: String, transport: Arc<BulkOnly>, lun: u8, capacity: Capacity) -> Arc<Self> {
        Arc::new(Self {
            name,
            transport,
            lun,
            capacity,
        })
    }

    /// 逻辑单元号
    pub fn lun(&self) -> u8 {
        self.lun
    }

    /// READ CAPACITY 的结果
    pub fn capacity(&self) -> Capacity {
        self.capacity
    }

    /// 每条 READ(10)/WRITE(10) 的最大块数
    fn chunk_blocks(&self) -> usize {
        let max = self.transport.config().max_sectors_per_command.max(1);
        max.min(u16::MAX as usize)
    }

    /// 按错误种类和感知键重试
    fn with_retry<T>(
        &self,
        what: &str,
        lba: u64,
        mut op: impl FnMut() -> Result<T, MsdError>,
    ) -> Result<T, FsError> {
        let retries = self.transport.config().retries;
        let mut attempt = 0;
        loop {
            let err = match op() {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            let retry = match err {
                MsdError::CommandFailed => match self.transport.request_sense(self.lun) {
                    Ok(sense) if sense.key == SenseKey::DataProtect => {
                        log::warn!("msd: {} is write protected", self.name);
                        return Err(FsError::ReadOnlyFs);
                    }
                    Ok(sense) => {
                        log::debug!(
                            "msd: {} sense {:?} asc {:#04x}/{:#04x}",
                            self.name,
                            sense.key,
                            sense.asc,
                            sense.ascq
                        );
                        sense.key.is_transient()
                    }
                    Err(_) => true,
                },
                MsdError::TagMismatch { .. } => self.transport.reset_recovery().is_ok(),
                MsdError::Transport(UsbError::NoDevice) | MsdError::Transport(UsbError::WouldBlock) => {
                    false
                }
                MsdError::InvalidCommand => false,
                _ => true,
            };

            if !retry || attempt >= retries {
                log::warn!(
                    "msd: {} {} at lba {} failed after {} attempt(s): {}",
                    self.name,
                    what,
                    lba,
                    attempt + 1,
                    err
                );
                return Err(err.into());
            }
            attempt += 1;
            log::debug!("msd: {} {} at lba {} retry {}: {}", self.name, what, lba, attempt, err);
        }
    }
}

impl Disk for MsdDisk {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn sector_size(&self) -> usize {
        self.capacity.block_len as usize
    }

    fn sector_count(&self) -> u64 {
        self.capacity.blocks()
    }

    fn read_sectors(&self, start: u64, buf: &mut [u8], count: usize) -> Result<(), FsError> {
        check_range(self, start, buf.len(), count)?;
        let sector_size = self.sector_size();
        let mut done = 0;
        while done < count {
            let n = (count - done).min(self.chunk_blocks());
            let lba = start + done as u64;
            let command = scsi::read_10(lba_u32(lba)?, n as u16);
            let bytes = n * sector_size;
            let data = self.with_retry("read", lba, || {
                let data = self
                    .transport
                    .execute(self.lun, &command, DataStage::In(bytes))?;
                if data.len() < bytes {
                    return Err(MsdError::ShortData);
                }
                Ok(data)
            })?;
            let at = done * sector_size;
            buf[at..at + bytes].copy_from_slice(&data[..bytes]);
            done += n;
        }
        Ok(())
    }

    fn write_sectors(&self, start: u64, buf: &[u8], count: usize) -> Result<(), FsError> {
        check_range(self, start, buf.len(), count)?;
        let sector_size = self.sector_size();
        let mut done = 0;
        while done < count {
            let n = (count - done).min(self.chunk_blocks());
            let lba = start + done as u64;
            let command = scsi::write_10(lba_u32(lba)?, n as u16);
            let at = done * sector_size;
            let chunk = &buf[at..at + n * sector_size];
            self.with_retry("write", lba, || {
                self.transport
                    .execute(self.lun, &command, DataStage::Out(chunk))
                    .map(|_| ())
            })?;
            done += n;
        }
        Ok(())
    }
}

fn lba_u32(lba: u64) -> Result<u32, FsError> {
    u32::try_from(lba).map_err(|_| FsError::InvalidArgument)
}
