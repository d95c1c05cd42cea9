//! USB 大容量存储类驱动（Bulk-Only Transport）
//!
//! 认领接口时查找批量 IN/OUT 端点（UFI 子类另外记录中断端点），然后对每个 LUN：
//!
//! 1. INQUIRY；
//! 2. TEST UNIT READY，未就绪时 REQUEST SENSE 并稍后重试；
//! 3. READ CAPACITY(10)；
//!
//! 最后把每个就绪的 LUN 作为 `usbmsdN` 登记到磁盘表。拔出时从磁盘表移除，
//! 之后仍被持有的磁盘句柄返回 `NoDevice`。

pub mod bot;
pub mod disk;
pub mod scsi;
pub mod transport;

use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};

use cdi::config::{DEFAULT_BULK_TIMEOUT_MS, DEFAULT_CONTROL_TIMEOUT_MS};
use cdi::usb::descriptor::class_code;
use cdi::usb::{Direction, Interface, SetupError, TransferType, UsbClassDriver, UsbError};
use cdi::{Disk, DiskTable, Driver, FsError};

use disk::MsdDisk;
use scsi::{Capacity, InquiryData};
use transport::{BotEndpoints, BulkOnly, DataStage, sleep_ms};

/// SCSI 透明命令集子类
pub const SUBCLASS_SCSI: u8 = 0x06;
/// UFI 子类（USB 软驱）
pub const SUBCLASS_UFI: u8 = 0x04;
/// Bulk-Only Transport 协议
pub const PROTOCOL_BOT: u8 = 0x50;

/// 大容量存储配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsdConfig {
    /// 单条命令（CBW、数据、CSW 各阶段）的超时
    pub command_timeout_ms: u64,
    /// 类请求和清除 halt 的超时
    pub control_timeout_ms: u64,
    /// 扇区读写失败后的重试次数
    pub retries: u32,
    /// 等待介质就绪的 TEST UNIT READY 次数
    pub unit_ready_retries: u32,
    /// 两次 TEST UNIT READY 之间的间隔
    pub unit_ready_delay_ms: u64,
    /// 每条 READ(10)/WRITE(10) 的最大扇区数
    pub max_sectors_per_command: usize,
}

impl Default for MsdConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: DEFAULT_BULK_TIMEOUT_MS,
            control_timeout_ms: DEFAULT_CONTROL_TIMEOUT_MS,
            retries: 3,
            unit_ready_retries: 5,
            unit_ready_delay_ms: 100,
            max_sectors_per_command: 64,
        }
    }
}

/// BOT 错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsdError {
    /// USB 传输失败
    Transport(UsbError),
    /// CSW 标签与 CBW 不一致，整条命令无效
    TagMismatch {
        /// 发送的标签
        expected: u32,
        /// 收到的标签
        received: u32,
    },
    /// CSW 长度、签名或状态字节不合法
    InvalidStatus,
    /// 设备报告命令失败
    CommandFailed,
    /// 设备报告相位错误
    PhaseError,
    /// 数据阶段返回的字节不足
    ShortData,
    /// 命令块长度不合法
    InvalidCommand,
}

impl From<UsbError> for MsdError {
    fn from(e: UsbError) -> Self {
        MsdError::Transport(e)
    }
}

impl From<MsdError> for FsError {
    fn from(e: MsdError) -> Self {
        match e {
            MsdError::Transport(UsbError::NoDevice) => FsError::NoDevice,
            MsdError::Transport(UsbError::WouldBlock) => FsError::WouldBlock,
            MsdError::InvalidCommand => FsError::InvalidArgument,
            _ => FsError::IoError,
        }
    }
}

impl From<MsdError> for SetupError {
    fn from(e: MsdError) -> Self {
        match e {
            MsdError::Transport(e) => SetupError::from(e),
            MsdError::CommandFailed | MsdError::InvalidCommand => SetupError::Unsupported,
            _ => SetupError::Transport(UsbError::Malformed),
        }
    }
}

impl fmt::Display for MsdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MsdError::Transport(e) => write!(f, "transport error: {}", e),
            MsdError::TagMismatch { expected, received } => {
                write!(f, "CSW tag {:#x} does not match CBW tag {:#x}", received, expected)
            }
            MsdError::InvalidStatus => write!(f, "invalid CSW"),
            MsdError::CommandFailed => write!(f, "command failed"),
            MsdError::PhaseError => write!(f, "phase error"),
            MsdError::ShortData => write!(f, "short data"),
            MsdError::InvalidCommand => write!(f, "invalid command block"),
        }
    }
}

/// 接口上保存的驱动状态
pub struct MsdInterface {
    transport: Arc<BulkOnly>,
    disks: Vec<String>,
}

impl MsdInterface {
    /// 传输层
    pub fn transport(&self) -> &Arc<BulkOnly> {
        &self.transport
    }

    /// 登记的磁盘名
    pub fn disks(&self) -> &[String] {
        &self.disks
    }
}

/// 大容量存储类驱动
pub struct MsdDriver {
    disks: Arc<DiskTable>,
    config: MsdConfig,
    next_disk: AtomicUsize,
}

impl MsdDriver {
    /// 创建驱动，就绪的 LUN 登记到 `disks`
    pub fn new(disks: Arc<DiskTable>, config: MsdConfig) -> Arc<Self> {
        Arc::new(Self {
            disks,
            config,
            next_disk: AtomicUsize::new(0),
        })
    }

    fn probe_lun(&self, transport: &Arc<BulkOnly>, lun: u8) -> Result<Arc<MsdDisk>, MsdError> {
        let raw = transport.execute(lun, &scsi::inquiry(), DataStage::In(InquiryData::LEN))?;
        let inquiry = InquiryData::parse(&raw)?;
        log::info!(
            "msd: lun {} is \"{} {}\" (type {:#04x}{})",
            lun,
            inquiry.vendor,
            inquiry.product,
            inquiry.peripheral_type,
            if inquiry.removable { ", removable" } else { "" }
        );

        self.wait_ready(transport, lun)?;

        let raw = transport.execute(lun, &scsi::read_capacity_10(), DataStage::In(Capacity::LEN))?;
        let capacity = Capacity::parse(&raw)?;

        let name = format!("usbmsd{}", self.next_disk.fetch_add(1, Ordering::Relaxed));
        Ok(MsdDisk::new(name, transport.clone(), lun, capacity))
    }

    fn wait_ready(&self, transport: &BulkOnly, lun: u8) -> Result<(), MsdError> {
        let mut attempt = 0;
        loop {
            let err = match transport.execute(lun, &scsi::test_unit_ready(), DataStage::None) {
                Ok(_) => return Ok(()),
                Err(e) => e,
            };
            if err != MsdError::CommandFailed {
                return Err(err);
            }
            // 读取感知数据同时清除单元注意状态
            let sense = transport.request_sense(lun)?;
            if !sense.key.is_transient() || attempt >= self.config.unit_ready_retries {
                log::warn!("msd: lun {} not ready: {:?}", lun, sense.key);
                return Err(err);
            }
            attempt += 1;
            sleep_ms(self.config.unit_ready_delay_ms);
        }
    }

    fn unregister(&self, names: &[String]) {
        for name in names {
            if self.disks.remove(name).is_some() {
                log::info!("msd: disk {} removed", name);
            }
        }
    }
}

impl Driver for MsdDriver {
    fn name(&self) -> &str {
        "usb-msd"
    }
}

impl UsbClassDriver for MsdDriver {
    fn matches(&self, class: u8, subclass: u8, protocol: u8) -> bool {
        class == class_code::MASS_STORAGE
            && (subclass == SUBCLASS_SCSI || subclass == SUBCLASS_UFI)
            && protocol == PROTOCOL_BOT
    }

    fn setup(&self, interface: &Arc<Interface>) -> Result<(), SetupError> {
        let bulk_in = interface
            .find_endpoint(TransferType::Bulk, Direction::In)
            .ok_or(SetupError::MissingEndpoint)?;
        let bulk_out = interface
            .find_endpoint(TransferType::Bulk, Direction::Out)
            .ok_or(SetupError::MissingEndpoint)?;
        let ufi = interface.subclass() == SUBCLASS_UFI;
        let endpoints = BotEndpoints {
            bulk_in,
            bulk_out,
            interrupt: if ufi {
                interface.find_endpoint(TransferType::Interrupt, Direction::In)
            } else {
                None
            },
        };
        let device = interface
            .device()
            .ok_or(SetupError::Transport(UsbError::NoDevice))?;

        let transport = Arc::new(BulkOnly::new(
            Arc::downgrade(&device),
            interface.number(),
            endpoints,
            ufi,
            self.config,
        ));
        let max_lun = transport.max_lun()?;

        let mut disks = Vec::new();
        for lun in 0..=max_lun {
            match self.probe_lun(&transport, lun) {
                Ok(disk) => disks.push(disk),
                Err(e) if lun == 0 => {
                    log::warn!("msd: lun 0 on interface {}: {}", interface.number(), e);
                    return Err(e.into());
                }
                Err(e) => log::warn!("msd: lun {} skipped: {}", lun, e),
            }
        }

        let mut names = Vec::new();
        for disk in disks {
            let name = disk.name();
            if let Err(e) = self.disks.add(disk.clone()) {
                log::warn!("msd: cannot register {}: {:?}", name, e);
                self.unregister(&names);
                return Err(SetupError::Unsupported);
            }
            log::info!(
                "msd: disk {} registered, {} sectors of {} bytes",
                name,
                disk.sector_count(),
                disk.sector_size()
            );
            names.push(name);
        }

        interface.set_driver_data(Arc::new(MsdInterface {
            transport,
            disks: names,
        }));
        Ok(())
    }

    fn teardown(&self, interface: &Arc<Interface>) {
        if let Some(state) = interface.driver_data::<MsdInterface>() {
            state.transport.shut_down();
            self.unregister(&state.disks);
        }
    }
}
