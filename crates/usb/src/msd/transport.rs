//! Bulk-Only Transport 状态机
//!
//! 每条命令依次经过：构造 CBW -> 批量 OUT 发送 CBW -> 数据阶段（方向和长度由命令决定）
//! -> 批量 IN 读取 CSW -> 校验 CSW。
//!
//! 错误处理遵循 BOT 1.0 §6.7：
//!
//! - 数据阶段 STALL：清除该端点的 halt，继续读取 CSW；
//! - CSW 阶段 STALL：清除 IN 端点的 halt 后重读一次；
//! - CBW 阶段失败、CSW 无效或相位错误：执行复位恢复；
//! - 标签不匹配：作为传输错误返回，由调用方决定重试或复位。
//!
//! 同一接口上的命令互斥执行，等待者睡眠而不是自旋。

use alloc::sync::Weak;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use cdi::sched_ops;
use cdi::usb::descriptor::SetupPacket;
use cdi::usb::{Endpoint, Transfer, UsbDevice, UsbError};
use sync::IntrGuard;

use super::MsdConfig;
use super::MsdError;
use super::bot::{CommandBlockWrapper, CommandStatusWrapper, CswStatus};
use super::scsi::{self, SenseData};

/// BOT 类请求
pub mod bot_request {
    /// Bulk-Only Mass Storage Reset
    pub const RESET: u8 = 0xFF;
    /// Get Max LUN
    pub const GET_MAX_LUN: u8 = 0xFE;
}

/// UFI 命令块固定补齐到 12 字节
const UFI_COMMAND_LEN: usize = 12;

/// 数据阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataStage<'a> {
    /// 没有数据阶段
    None,
    /// 从设备读取指定字节数
    In(usize),
    /// 向设备写入
    Out(&'a [u8]),
}

impl DataStage<'_> {
    fn len(&self) -> usize {
        match self {
            DataStage::None => 0,
            DataStage::In(n) => *n,
            DataStage::Out(data) => data.len(),
        }
    }
}

/// 接口端点
#[derive(Debug, Clone, Copy)]
pub struct BotEndpoints {
    /// 批量 IN
    pub bulk_in: Endpoint,
    /// 批量 OUT
    pub bulk_out: Endpoint,
    /// UFI 的中断端点（只记录，传输不使用）
    pub interrupt: Option<Endpoint>,
}

/// 一个 BOT 接口的传输层
pub struct BulkOnly {
    device: Weak<UsbDevice>,
    interface: u8,
    endpoints: BotEndpoints,
    ufi: bool,
    config: MsdConfig,
    next_tag: AtomicU32,
    busy: AtomicBool,
    detached: AtomicBool,
}

/// 命令互斥锁，释放时唤醒等待者
struct CommandGuard<'a> {
    transport: &'a BulkOnly,
}

impl Drop for CommandGuard<'_> {
    fn drop(&mut self) {
        self.transport.busy.store(false, Ordering::Release);
        sched_ops().wake_all(self.transport.channel());
    }
}

impl BulkOnly {
    /// 创建传输层
    pub fn new(
        device: Weak<UsbDevice>,
        interface: u8,
        endpoints: BotEndpoints,
        ufi: bool,
        config: MsdConfig,
    ) -> Self {
        Self {
            device,
            interface,
            endpoints,
            ufi,
            config,
            next_tag: AtomicU32::new(1),
            busy: AtomicBool::new(false),
            detached: AtomicBool::new(false),
        }
    }

    /// 接口号
    pub fn interface(&self) -> u8 {
        self.interface
    }

    /// 端点
    pub fn endpoints(&self) -> &BotEndpoints {
        &self.endpoints
    }

    /// 配置
    pub fn config(&self) -> &MsdConfig {
        &self.config
    }

    /// 设备拔出后调用，之后的命令返回 `NoDevice`
    pub fn shut_down(&self) {
        self.detached.store(true, Ordering::Release);
        sched_ops().wake_all(self.channel());
    }

    fn channel(&self) -> usize {
        &self.busy as *const AtomicBool as usize
    }

    fn device(&self) -> Result<alloc::sync::Arc<UsbDevice>, MsdError> {
        if self.detached.load(Ordering::Acquire) {
            return Err(MsdError::Transport(UsbError::NoDevice));
        }
        self.device
            .upgrade()
            .ok_or(MsdError::Transport(UsbError::NoDevice))
    }

    fn lock(&self) -> Result<CommandGuard<'_>, MsdError> {
        if sync::in_interrupt() {
            return Err(MsdError::Transport(UsbError::WouldBlock));
        }
        let deadline = sched_ops().now_ms().saturating_add(self.config.command_timeout_ms);
        loop {
            let _guard = IntrGuard::new();
            if self.detached.load(Ordering::Acquire) {
                return Err(MsdError::Transport(UsbError::NoDevice));
            }
            if self
                .busy
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return Ok(CommandGuard { transport: self });
            }
            if sched_ops().now_ms() >= deadline {
                return Err(MsdError::Transport(UsbError::Busy));
            }
            sched_ops().block_on(self.channel(), deadline);
        }
    }

    fn alloc_tag(&self) -> u32 {
        self.next_tag.fetch_add(1, Ordering::Relaxed)
    }

    /// GET MAX LUN，设备 STALL 表示只有一个 LUN
    pub fn max_lun(&self) -> Result<u8, MsdError> {
        let device = self.device()?;
        let setup = SetupPacket::class_interface(true, bot_request::GET_MAX_LUN, 0, self.interface, 1);
        match device
            .engine()
            .control_in(&device, setup, self.config.control_timeout_ms)
        {
            Ok(data) => Ok(data.first().map_or(0, |&n| n.min(15))),
            Err(UsbError::Stalled) => Ok(0),
            Err(e) => Err(MsdError::Transport(e)),
        }
    }

    /// 复位恢复：Bulk-Only Mass Storage Reset，然后清除两个批量端点的 halt
    pub fn reset_recovery(&self) -> Result<(), MsdError> {
        let device = self.device()?;
        let engine = device.engine();
        let timeout = self.config.control_timeout_ms;
        let setup = SetupPacket::class_interface(false, bot_request::RESET, 0, self.interface, 0);
        let result = engine
            .control_out(&device, setup, Vec::new(), timeout)
            .and_then(|()| engine.clear_halt(&device, &self.endpoints.bulk_in, timeout))
            .and_then(|()| engine.clear_halt(&device, &self.endpoints.bulk_out, timeout));
        match result {
            Ok(()) => {
                log::info!("msd: reset recovery on interface {} done", self.interface);
                Ok(())
            }
            Err(e) => {
                log::error!("msd: reset recovery on interface {} failed: {}", self.interface, e);
                Err(MsdError::Transport(e))
            }
        }
    }

    /// REQUEST SENSE
    pub fn request_sense(&self, lun: u8) -> Result<SenseData, MsdError> {
        let data = self.execute(lun, &scsi::request_sense(), DataStage::In(SenseData::LEN))?;
        SenseData::parse(&data)
    }

    /// 执行一条命令，返回数据阶段读到的字节（截断到实际长度）
    pub fn execute(
        &self,
        lun: u8,
        command: &[u8],
        stage: DataStage<'_>,
    ) -> Result<Vec<u8>, MsdError> {
        let _guard = self.lock()?;
        let device = self.device()?;

        let mut padded = [0u8; UFI_COMMAND_LEN];
        let command = if self.ufi && command.len() < UFI_COMMAND_LEN {
            padded[..command.len()].copy_from_slice(command);
            &padded[..]
        } else {
            command
        };

        let tag = self.alloc_tag();
        let cbw = CommandBlockWrapper::new(
            tag,
            stage.len() as u32,
            matches!(stage, DataStage::In(_)),
            lun,
            command,
        )?;

        let result = self.exchange(&device, &cbw, stage);
        match &result {
            Err(MsdError::InvalidStatus) | Err(MsdError::PhaseError) => {
                let _ = self.reset_recovery();
            }
            Err(MsdError::Transport(e))
                if !matches!(e, UsbError::NoDevice | UsbError::WouldBlock) =>
            {
                let _ = self.reset_recovery();
            }
            Err(MsdError::TagMismatch { expected, received }) => {
                log::error!(
                    "msd: CSW tag {:#x} does not match CBW tag {:#x} on interface {}",
                    received,
                    expected,
                    self.interface
                );
            }
            _ => {}
        }
        result
    }

    fn exchange(
        &self,
        device: &UsbDevice,
        cbw: &CommandBlockWrapper,
        stage: DataStage<'_>,
    ) -> Result<Vec<u8>, MsdError> {
        let engine = device.engine();
        let timeout = self.config.command_timeout_ms;
        let control_timeout = self.config.control_timeout_ms;

        // CBW
        let transfer = Transfer::bulk_out(device, self.endpoints.bulk_out, cbw.to_bytes().to_vec())?;
        engine.submit_and_wait(transfer, timeout)?;

        // 数据阶段
        let data = match stage {
            DataStage::None => Vec::new(),
            DataStage::In(len) => {
                let transfer = Transfer::bulk_in(device, self.endpoints.bulk_in, vec![0u8; len])?;
                match engine.submit_and_wait(transfer, timeout) {
                    Ok(data) => data,
                    Err(UsbError::Stalled) => {
                        log::debug!("msd: data-in stalled, tag {:#x}", cbw.tag);
                        engine.clear_halt(device, &self.endpoints.bulk_in, control_timeout)?;
                        Vec::new()
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            DataStage::Out(bytes) => {
                let transfer = Transfer::bulk_out(device, self.endpoints.bulk_out, bytes.to_vec())?;
                match engine.submit_and_wait(transfer, timeout) {
                    Ok(_) => {}
                    Err(UsbError::Stalled) => {
                        log::debug!("msd: data-out stalled, tag {:#x}", cbw.tag);
                        engine.clear_halt(device, &self.endpoints.bulk_out, control_timeout)?;
                    }
                    Err(e) => return Err(e.into()),
                }
                Vec::new()
            }
        };

        // CSW，STALL 时清除后重读一次
        let raw = match self.read_csw(device) {
            Err(UsbError::Stalled) => {
                engine.clear_halt(device, &self.endpoints.bulk_in, control_timeout)?;
                self.read_csw(device)?
            }
            other => other?,
        };
        let csw = CommandStatusWrapper::parse(&raw)?;
        csw.check_tag(cbw.tag)?;

        match csw.status {
            CswStatus::Passed => {
                if csw.data_residue != 0 {
                    log::debug!("msd: tag {:#x} residue {}", cbw.tag, csw.data_residue);
                }
                Ok(data)
            }
            CswStatus::Failed => Err(MsdError::CommandFailed),
            CswStatus::PhaseError => Err(MsdError::PhaseError),
        }
    }

    fn read_csw(&self, device: &UsbDevice) -> Result<Vec<u8>, UsbError> {
        let transfer = Transfer::bulk_in(
            device,
            self.endpoints.bulk_in,
            vec![0u8; CommandStatusWrapper::LEN],
        )?;
        device
            .engine()
            .submit_and_wait(transfer, self.config.command_timeout_ms)
    }
}

/// 睡眠指定毫秒数
pub(crate) fn sleep_ms(ms: u64) {
    let deadline = sched_ops().now_ms().saturating_add(ms);
    // 没有人会唤醒这个通道，只等超时
    let channel = &deadline as *const u64 as usize;
    while sched_ops().now_ms() < deadline {
        let _guard = IntrGuard::new();
        sched_ops().block_on(channel, deadline);
    }
}
