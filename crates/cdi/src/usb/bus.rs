//! USB 总线：枚举与拔出
//!
//! 枚举按 USB 2.0 第 9 章的顺序进行：
//!
//! 1. 在地址 0 读取设备描述符的前 8 字节，得到 EP0 最大包长；
//! 2. 从地址池分配地址并 SET_ADDRESS（`Attached -> Addressed`）；
//! 3. 读取完整设备描述符、配置描述符头和完整配置，SET_CONFIGURATION
//!    （`Addressed -> Configured`）；
//! 4. 对每个接口按注册顺序尝试匹配的类驱动，任一接口被认领后
//!    `Configured -> InterfaceClaimed -> Active`。
//!
//! 拔出先隔离设备地址（取消所有传输），等待进行中的枚举退出，再对每个已认领的
//! 接口调用一次 `teardown`，最后回收地址。

use alloc::sync::Arc;
use alloc::vec::Vec;

use sync::{IntrGuard, SpinLock};

use super::descriptor::{
    ConfigDescriptor, DeviceDescriptor, SetupPacket, descriptor_type, parse_configuration,
};
use super::device::{Configuration, DeviceState, Interface, UsbDevice, UsbSpeed};
use super::error::UsbError;
use super::transfer::TransferEngine;
use crate::config::{MAX_USB_ADDRESS, UsbConfig};
use crate::context::Cdi;
use crate::list::List;
use crate::ops::{deadline_after, sched_ops};

/// 地址池：1..=127
struct AddressPool {
    used: u128,
}

impl AddressPool {
    const fn new() -> Self {
        // 地址 0 是默认地址，永不分配
        Self { used: 1 }
    }

    fn alloc(&mut self) -> Option<u8> {
        let address = (1..=MAX_USB_ADDRESS).find(|a| self.used & (1u128 << a) == 0)?;
        self.used |= 1u128 << address;
        Some(address)
    }

    fn free(&mut self, address: u8) {
        if address != 0 && address <= MAX_USB_ADDRESS {
            self.used &= !(1u128 << address);
        }
    }
}

/// USB 总线
pub struct UsbBus {
    cdi: Arc<Cdi>,
    engine: Arc<TransferEngine>,
    config: UsbConfig,
    devices: SpinLock<List<Arc<UsbDevice>>>,
    addresses: SpinLock<AddressPool>,
}

impl UsbBus {
    /// 创建总线
    pub fn new(cdi: Arc<Cdi>, engine: Arc<TransferEngine>, config: UsbConfig) -> Arc<Self> {
        Arc::new(Self {
            cdi,
            engine,
            config,
            devices: SpinLock::new(List::new()),
            addresses: SpinLock::new(AddressPool::new()),
        })
    }

    /// 传输引擎
    pub fn engine(&self) -> &Arc<TransferEngine> {
        &self.engine
    }

    /// 总线配置
    pub fn config(&self) -> &UsbConfig {
        &self.config
    }

    /// 按连接顺序列出设备
    pub fn devices(&self) -> Vec<Arc<UsbDevice>> {
        self.devices.lock().iter().cloned().collect()
    }

    /// 查找端口上的设备
    pub fn device_on_port(&self, port: u32) -> Option<Arc<UsbDevice>> {
        self.devices.lock().iter().find(|d| d.port() == port).cloned()
    }

    /// 端口上接入了新设备：枚举并绑定类驱动
    pub fn attach(&self, port: u32, speed: UsbSpeed) -> Result<Arc<UsbDevice>, UsbError> {
        let device = UsbDevice::new(port, speed, self.engine.clone());
        {
            let mut devices = self.devices.lock();
            if devices.iter().any(|d| d.port() == port) {
                return Err(UsbError::Busy);
            }
            if devices.len() >= self.config.max_devices {
                return Err(UsbError::NoAddress);
            }
            device.set_enumerating(true);
            devices.push_back(device.clone());
        }
        log::info!("usb: device attached on port {} ({:?})", port, speed);

        let result = self
            .enumerate(&device)
            .map(|()| self.bind_interfaces(&device));

        device.set_enumerating(false);
        sched_ops().wake_all(device.enumerating_channel());

        match result {
            Ok(()) => Ok(device),
            Err(e) => {
                log::warn!("usb: enumeration on port {} failed: {}", port, e);
                if device.state() != DeviceState::Detached {
                    // 拔出路径没有介入，由这里收尾
                    let _ = device.transition(DeviceState::Detached);
                    self.release(&device);
                }
                Err(e)
            }
        }
    }

    fn enumerate(&self, device: &Arc<UsbDevice>) -> Result<(), UsbError> {
        let timeout = self.config.control_timeout_ms;

        // 1. 前 8 字节得到 EP0 最大包长
        let head = self.engine.control_in(
            device,
            SetupPacket::get_descriptor(descriptor_type::DEVICE, 0, 8),
            timeout,
        )?;
        let mps0 = DeviceDescriptor::parse_max_packet0(&head)?;
        device.set_ep0_max_packet(mps0 as u16);

        // 2. 分配地址
        let address = self.addresses.lock().alloc().ok_or(UsbError::NoAddress)?;
        if let Err(e) = self.engine.control_out(
            device,
            SetupPacket::set_address(address),
            Vec::new(),
            timeout,
        ) {
            self.addresses.lock().free(address);
            return Err(e);
        }
        device.set_address(address);
        device.transition(DeviceState::Addressed)?;

        // 3. 描述符与配置
        let raw = self.engine.control_in(
            device,
            SetupPacket::get_descriptor(descriptor_type::DEVICE, 0, DeviceDescriptor::LEN as u16),
            timeout,
        )?;
        let descriptor = DeviceDescriptor::parse(&raw)?;
        if descriptor.num_configurations == 0 {
            return Err(UsbError::Malformed);
        }
        device.set_descriptor(descriptor);

        let raw = self.engine.control_in(
            device,
            SetupPacket::get_descriptor(
                descriptor_type::CONFIGURATION,
                0,
                ConfigDescriptor::LEN as u16,
            ),
            timeout,
        )?;
        let header = ConfigDescriptor::parse(&raw)?;
        let raw = self.engine.control_in(
            device,
            SetupPacket::get_descriptor(descriptor_type::CONFIGURATION, 0, header.total_length),
            timeout,
        )?;
        let parsed = parse_configuration(&raw)?;

        self.engine.control_out(
            device,
            SetupPacket::set_configuration(parsed.descriptor.configuration_value),
            Vec::new(),
            timeout,
        )?;
        device.set_configuration(Arc::new(Configuration::build(&parsed, device)));
        device.transition(DeviceState::Configured)?;

        log::info!(
            "usb: device {:04x}:{:04x} at address {}, {} interface(s)",
            descriptor.vendor_id,
            descriptor.product_id,
            address,
            parsed.interfaces.len()
        );
        Ok(())
    }

    /// 为每个接口尝试匹配的类驱动
    fn bind_interfaces(&self, device: &Arc<UsbDevice>) {
        let mut claimed = 0;
        for interface in device.interfaces() {
            if device.ensure_present().is_err() {
                return;
            }
            if self.bind_interface(&interface) {
                claimed += 1;
            }
        }

        if claimed == 0 {
            log::info!("usb: no driver for device at address {}", device.address());
            return;
        }
        // 拔出可能已经把状态改成 Detached，迁移失败无妨
        let _ = device
            .transition(DeviceState::InterfaceClaimed)
            .and_then(|()| device.transition(DeviceState::Active));
    }

    fn bind_interface(&self, interface: &Arc<Interface>) -> bool {
        let candidates = self.cdi.drivers().usb_candidates(
            interface.class(),
            interface.subclass(),
            interface.protocol(),
        );
        for driver in candidates {
            match driver.setup(interface) {
                Ok(()) => {
                    interface.claim(driver.clone());
                    log::info!(
                        "usb: interface {} claimed by {}",
                        interface.number(),
                        driver.name()
                    );
                    return true;
                }
                Err(e) => {
                    log::warn!(
                        "usb: {} setup on interface {} failed: {}",
                        driver.name(),
                        interface.number(),
                        e
                    );
                    interface.clear_driver_data();
                }
            }
        }
        false
    }

    /// 端口上的设备被拔出
    ///
    /// 若枚举在 `detach_timeout_ms` 内没有退出返回 `Busy`，设备保持隔离，可以再次调用。
    pub fn detach(&self, port: u32) -> Result<(), UsbError> {
        let device = self.device_on_port(port).ok_or(UsbError::NoDevice)?;
        device.transition(DeviceState::Detached)?;

        let address = device.address();
        self.engine.fence_device(address);

        if device.is_enumerating() {
            if sync::in_interrupt() {
                return Err(UsbError::WouldBlock);
            }
            self.wait_enumeration(&device)?;
        }

        // 枚举期间地址可能已经改变
        let final_address = device.address();
        if final_address != address {
            self.engine.fence_device(final_address);
        }

        for interface in device.interfaces() {
            if let Some(driver) = interface.take_driver() {
                driver.teardown(&interface);
                log::debug!(
                    "usb: {} released interface {}",
                    driver.name(),
                    interface.number()
                );
            }
            interface.clear_driver_data();
        }

        self.engine.unfence_device(address);
        self.release(&device);
        log::info!("usb: device on port {} detached", port);
        Ok(())
    }

    fn wait_enumeration(&self, device: &UsbDevice) -> Result<(), UsbError> {
        let deadline = deadline_after(self.config.detach_timeout_ms);
        loop {
            let _guard = IntrGuard::new();
            if !device.is_enumerating() {
                return Ok(());
            }
            if sched_ops().now_ms() >= deadline {
                log::warn!("usb: port {} still enumerating", device.port());
                return Err(UsbError::Busy);
            }
            sched_ops().block_on(device.enumerating_channel(), deadline);
        }
    }

    /// 回收地址并从设备列表移除
    fn release(&self, device: &Arc<UsbDevice>) {
        let address = device.address();
        self.engine.unfence_device(address);
        self.addresses.lock().free(address);
        self.devices.lock().remove_first(|d| Arc::ptr_eq(d, device));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{Driver, DriverHandle};
    use crate::mock::{ConfigBuilder, MockDevice, MockHostController, device_descriptor, init_test_env};
    use crate::usb::{
        Direction, EndpointKey, SetupError, Transfer, TransferStatus, TransferType,
        UsbClassDriver,
    };
    use alloc::vec;
    use core::sync::atomic::{AtomicUsize, Ordering};

    /// Claims class 0xFF interfaces and keeps one interrupt-IN poll running.
    struct PollDriver {
        fail_setup: bool,
        setups: AtomicUsize,
        teardowns: AtomicUsize,
        aborted: Arc<AtomicUsize>,
    }

    impl PollDriver {
        fn new(fail_setup: bool) -> Arc<Self> {
            Arc::new(Self {
                fail_setup,
                setups: AtomicUsize::new(0),
                teardowns: AtomicUsize::new(0),
                aborted: Arc::new(AtomicUsize::new(0)),
            })
        }
    }

    impl Driver for PollDriver {
        fn name(&self) -> &str {
            "poll"
        }
    }

    impl UsbClassDriver for PollDriver {
        fn matches(&self, class: u8, _subclass: u8, _protocol: u8) -> bool {
            class == 0xFF
        }

        fn setup(&self, interface: &Arc<Interface>) -> Result<(), SetupError> {
            self.setups.fetch_add(1, Ordering::SeqCst);
            interface.set_driver_data(Arc::new(42u32));
            if self.fail_setup {
                return Err(SetupError::Unsupported);
            }
            let ep = interface
                .find_endpoint(TransferType::Interrupt, Direction::In)
                .ok_or(SetupError::MissingEndpoint)?;
            let device = interface.device().ok_or(SetupError::Transport(UsbError::NoDevice))?;
            let aborted = self.aborted.clone();
            let transfer = Transfer::interrupt_in(&device, ep, vec![0; 8])?
                .with_rearm()
                .with_completion(move |t| {
                    if t.status() == TransferStatus::Aborted {
                        aborted.fetch_add(1, Ordering::SeqCst);
                    }
                });
            device.engine().submit(transfer)?;
            Ok(())
        }

        fn teardown(&self, _interface: &Arc<Interface>) {
            self.teardowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn vendor_config() -> Vec<u8> {
        ConfigBuilder::new(1)
            .interface(0, 0, 0xFF, 0, 0)
            .endpoint(0x81, 0x03, 8, 10)
            .interface(1, 0, 0x0A, 0, 0)
            .endpoint(0x02, 0x02, 64, 0)
            .build()
    }

    fn bus_with(driver: Arc<PollDriver>) -> (Arc<UsbBus>, Arc<MockHostController>) {
        init_test_env();
        let cdi = Cdi::new();
        cdi.drivers().register(DriverHandle::UsbClass(driver));
        let hc = MockHostController::new();
        let engine = TransferEngine::new(hc.clone());
        hc.attach_engine(&engine);
        (UsbBus::new(cdi, engine, UsbConfig::default()), hc)
    }

    #[test]
    fn test_enumerate_bind_and_detach() {
        let driver = PollDriver::new(false);
        let (bus, hc) = bus_with(driver.clone());
        let model = MockDevice::new(device_descriptor(0x1234, 0x5678, 64), vendor_config()).install(&hc);

        let device = bus.attach(1, UsbSpeed::Full).unwrap();
        assert_eq!(device.state(), DeviceState::Active);
        assert_eq!(device.address(), 1);
        assert_eq!(device.vendor_id(), Some(0x1234));
        assert_eq!(device.ep0().max_packet(), 64);
        assert_eq!(model.lock().address, Some(1));
        assert_eq!(model.lock().configuration, Some(1));

        let interfaces = device.interfaces();
        assert_eq!(interfaces.len(), 2);
        assert!(interfaces[0].is_claimed());
        assert!(!interfaces[1].is_claimed());
        assert_eq!(interfaces[0].driver_data::<u32>().as_deref(), Some(&42));
        assert_eq!(bus.engine().pending_count(1), 1);
        assert_eq!(driver.setups.load(Ordering::SeqCst), 1);

        bus.detach(1).unwrap();
        assert_eq!(device.state(), DeviceState::Detached);
        assert_eq!(driver.teardowns.load(Ordering::SeqCst), 1);
        assert_eq!(driver.aborted.load(Ordering::SeqCst), 1);
        assert_eq!(bus.engine().pending_count(1), 0);
        assert!(!interfaces[0].is_claimed());
        assert!(interfaces[0].driver_data::<u32>().is_none());
        assert!(bus.devices().is_empty());
        assert_eq!(bus.detach(1), Err(UsbError::NoDevice));

        // the address is free again
        MockDevice::new(device_descriptor(0x1234, 0x5678, 64), vendor_config()).install(&hc);
        let again = bus.attach(2, UsbSpeed::Full).unwrap();
        assert_eq!(again.address(), 1);
    }

    #[test]
    fn test_failed_setup_leaves_interface_unclaimed() {
        let driver = PollDriver::new(true);
        let (bus, hc) = bus_with(driver.clone());
        MockDevice::new(device_descriptor(1, 2, 8), vendor_config()).install(&hc);

        let device = bus.attach(3, UsbSpeed::Low).unwrap();
        assert_eq!(device.state(), DeviceState::Configured);
        let interfaces = device.interfaces();
        assert!(!interfaces[0].is_claimed());
        assert!(interfaces[0].driver_data::<u32>().is_none());

        bus.detach(3).unwrap();
        assert_eq!(driver.teardowns.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_malformed_configuration_fails_enumeration() {
        let (bus, hc) = bus_with(PollDriver::new(false));
        let mut config = vendor_config();
        config[9] = 3;
        MockDevice::new(device_descriptor(1, 2, 8), config).install(&hc);

        assert_eq!(bus.attach(4, UsbSpeed::Full).err(), Some(UsbError::Malformed));
        assert!(bus.devices().is_empty());
        let key = EndpointKey {
            device: 1,
            endpoint: 0,
        };
        assert!(!bus.engine().is_halted(key));
        assert!(!bus.engine().is_fenced(1));
    }

    #[test]
    fn test_unresponsive_device_times_out() {
        let (bus, hc) = bus_with(PollDriver::new(false));
        hc.clear_responder();
        assert_eq!(bus.attach(5, UsbSpeed::High).err(), Some(UsbError::TimedOut));
        assert!(bus.devices().is_empty());
        assert_eq!(hc.deferred_len(), 0);
    }

    #[test]
    fn test_address_pool() {
        let mut pool = AddressPool::new();
        assert_eq!(pool.alloc(), Some(1));
        assert_eq!(pool.alloc(), Some(2));
        pool.free(1);
        assert_eq!(pool.alloc(), Some(1));
        for _ in 3..=MAX_USB_ADDRESS {
            assert!(pool.alloc().is_some());
        }
        assert_eq!(pool.alloc(), None);
        pool.free(0);
        assert_eq!(pool.alloc(), None);
    }
}
