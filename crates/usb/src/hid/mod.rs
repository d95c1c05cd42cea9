//! USB HID 类驱动（启动协议键盘与鼠标）
//!
//! 认领接口时：
//!
//! 1. 查找唯一的中断 IN 端点，没有则失败；
//! 2. 用控制传输读取 HID 描述符，失败则失败；
//! 3. 尽力切换到启动协议并关闭空闲重复报告；
//! 4. 分配报告缓冲区（键盘 8 字节，鼠标按端点最大包长限制在 3..=8 字节）；
//! 5. 提交一个 re-arm 的中断 IN 传输，由主控制器按端点间隔轮询。
//!
//! 报告在传输完成回调中解码，回调运行在中断延伸上下文中：
//! LED 更新通过异步控制传输发出，结果只记录日志。

pub mod descriptor;
pub mod keyboard;
pub mod keymap;
pub mod mouse;

use alloc::sync::{Arc, Weak};
use alloc::vec;
use alloc::vec::Vec;

use cdi::config::DEFAULT_CONTROL_TIMEOUT_MS;
use cdi::usb::descriptor::{SetupPacket, class_code, descriptor_type};
use cdi::usb::{
    Direction, Interface, SetupError, Transfer, TransferEngine, TransferId, TransferStatus,
    TransferType, UsbClassDriver, UsbDevice,
};
use cdi::{Driver, InputSink};
use sync::SpinLock;

use descriptor::{HidDescriptor, PROTOCOL_BOOT, REPORT_TYPE_OUTPUT, hid_request};
use keyboard::{KEYBOARD_REPORT_LEN, KeyboardState, Leds};
use mouse::{MOUSE_REPORT_MAX, MOUSE_REPORT_MIN};

/// 启动接口子类
pub const SUBCLASS_BOOT: u8 = 1;

/// 启动协议设备种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HidKind {
    /// 键盘（协议 1）
    Keyboard,
    /// 鼠标（协议 2）
    Mouse,
}

impl HidKind {
    /// 由接口协议码识别
    pub fn from_protocol(protocol: u8) -> Option<Self> {
        match protocol {
            1 => Some(HidKind::Keyboard),
            2 => Some(HidKind::Mouse),
            _ => None,
        }
    }

    /// 报告缓冲区长度
    pub fn report_len(&self, max_packet: u16) -> usize {
        match self {
            HidKind::Keyboard => KEYBOARD_REPORT_LEN,
            HidKind::Mouse => (max_packet as usize).clamp(MOUSE_REPORT_MIN, MOUSE_REPORT_MAX),
        }
    }
}

/// 接口上保存的驱动状态
pub struct HidInterface {
    kind: HidKind,
    descriptor: HidDescriptor,
    engine: Arc<TransferEngine>,
    poll: SpinLock<Option<TransferId>>,
    keyboard: Arc<SpinLock<KeyboardState>>,
}

impl HidInterface {
    /// 设备种类
    pub fn kind(&self) -> HidKind {
        self.kind
    }

    /// 设备返回的 HID 描述符
    pub fn descriptor(&self) -> &HidDescriptor {
        &self.descriptor
    }

    /// 轮询传输的标识，轮询结束后为 `None`
    pub fn poll(&self) -> Option<TransferId> {
        *self.poll.lock()
    }

    /// 键盘的本地 LED 位图
    pub fn leds(&self) -> Leds {
        self.keyboard.lock().leds()
    }

    fn stop(&self) {
        if let Some(id) = self.poll.lock().take() {
            self.engine.abort(id);
        }
    }
}

/// HID 类驱动
pub struct HidDriver {
    sink: Arc<dyn InputSink>,
    control_timeout_ms: u64,
}

impl HidDriver {
    /// 以事件接收者创建驱动
    pub fn new(sink: Arc<dyn InputSink>) -> Arc<Self> {
        Self::with_timeout(sink, DEFAULT_CONTROL_TIMEOUT_MS)
    }

    /// 指定控制传输超时
    pub fn with_timeout(sink: Arc<dyn InputSink>, control_timeout_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            sink,
            control_timeout_ms,
        })
    }

    fn read_hid_descriptor(
        &self,
        device: &UsbDevice,
        interface: u8,
    ) -> Result<HidDescriptor, SetupError> {
        let setup = SetupPacket::get_interface_descriptor(
            descriptor_type::HID,
            0,
            interface,
            HidDescriptor::LEN as u16,
        );
        let raw = device
            .engine()
            .control_in(device, setup, self.control_timeout_ms)?;
        Ok(HidDescriptor::parse(&raw)?)
    }

    /// SET_PROTOCOL(boot) 与 SET_IDLE(0)，部分设备不支持，失败只记录
    fn configure_boot(&self, device: &UsbDevice, interface: u8) {
        let requests = [
            (hid_request::SET_PROTOCOL, PROTOCOL_BOOT),
            (hid_request::SET_IDLE, 0),
        ];
        for (request, value) in requests {
            let setup = SetupPacket::class_interface(false, request, value, interface, 0);
            if let Err(e) =
                device
                    .engine()
                    .control_out(device, setup, Vec::new(), self.control_timeout_ms)
            {
                log::debug!(
                    "hid: request {:#04x} on interface {} failed: {}",
                    request,
                    interface,
                    e
                );
            }
        }
    }
}

impl Driver for HidDriver {
    fn name(&self) -> &str {
        "usb-hid"
    }
}

impl UsbClassDriver for HidDriver {
    fn matches(&self, class: u8, subclass: u8, protocol: u8) -> bool {
        class == class_code::HID
            && subclass == SUBCLASS_BOOT
            && HidKind::from_protocol(protocol).is_some()
    }

    fn setup(&self, interface: &Arc<Interface>) -> Result<(), SetupError> {
        let kind = HidKind::from_protocol(interface.protocol()).ok_or(SetupError::Unsupported)?;
        let endpoint = interface
            .find_endpoint(TransferType::Interrupt, Direction::In)
            .ok_or(SetupError::MissingEndpoint)?;
        let device = interface
            .device()
            .ok_or(SetupError::Transport(cdi::usb::UsbError::NoDevice))?;

        let descriptor = self.read_hid_descriptor(&device, interface.number())?;
        self.configure_boot(&device, interface.number());

        let len = kind.report_len(endpoint.max_packet());
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(len)
            .map_err(|_| SetupError::NoMemory)?;
        buffer.resize(len, 0);

        let keyboard = Arc::new(SpinLock::new(KeyboardState::new()));
        let poll = ReportPoll {
            kind,
            interface: interface.number(),
            device: Arc::downgrade(&device),
            sink: self.sink.clone(),
            keyboard: keyboard.clone(),
        };
        let transfer = Transfer::interrupt_in(&device, endpoint, buffer)?
            .with_rearm()
            .with_completion(move |t| poll.on_report(t));

        let state = Arc::new(HidInterface {
            kind,
            descriptor,
            engine: device.engine().clone(),
            poll: SpinLock::new(None),
            keyboard,
        });
        interface.set_driver_data(state.clone());

        let id = device.engine().submit(transfer)?;
        *state.poll.lock() = Some(id);
        log::info!(
            "hid: {:?} on interface {}, endpoint {:#04x} every {} frame(s)",
            kind,
            interface.number(),
            endpoint.address(),
            endpoint.interval()
        );
        Ok(())
    }

    fn teardown(&self, interface: &Arc<Interface>) {
        if let Some(state) = interface.driver_data::<HidInterface>() {
            state.stop();
            log::info!("hid: {:?} on interface {} removed", state.kind, interface.number());
        }
    }
}

/// 完成回调持有的解码上下文
struct ReportPoll {
    kind: HidKind,
    interface: u8,
    device: Weak<UsbDevice>,
    sink: Arc<dyn InputSink>,
    keyboard: Arc<SpinLock<KeyboardState>>,
}

impl ReportPoll {
    fn on_report(&self, transfer: &mut Transfer) {
        match transfer.status() {
            TransferStatus::Success => {}
            TransferStatus::Aborted => {
                log::debug!("hid: poll on interface {} stopped", self.interface);
                return;
            }
            status => {
                log::warn!(
                    "hid: poll on interface {} ended with {:?}",
                    self.interface,
                    status
                );
                return;
            }
        }

        match self.kind {
            HidKind::Mouse => mouse::process_report(transfer.data(), &*self.sink),
            HidKind::Keyboard => {
                let leds = self.keyboard.lock().process(transfer.data(), &*self.sink);
                if let Some(leds) = leds {
                    self.update_leds(leds);
                }
            }
        }
    }

    /// SET_REPORT(Output)，不等待完成
    fn update_leds(&self, leds: Leds) {
        let Some(device) = self.device.upgrade() else {
            return;
        };
        let setup = SetupPacket::class_interface(
            false,
            hid_request::SET_REPORT,
            REPORT_TYPE_OUTPUT << 8,
            self.interface,
            1,
        );
        let interface = self.interface;
        let result = device
            .engine()
            .control_out_async(&device, setup, vec![leds.bits()], move |t| {
                if t.status() != TransferStatus::Success {
                    log::debug!(
                        "hid: LED update on interface {} ended with {:?}",
                        interface,
                        t.status()
                    );
                }
            });
        if let Err(e) = result {
            log::warn!("hid: LED update on interface {} not sent: {}", interface, e);
        }
    }
}
