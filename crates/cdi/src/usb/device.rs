//! USB 设备、接口与端点模型
//!
//! 设备拥有其配置，配置拥有接口和端点；接口通过 `Weak` 回指设备，
//! 因此接口和端点不会比设备活得更久。
//!
//! 这些结构只在枚举和拔出路径上修改，两者不会对同一个设备并发执行。

use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::any::Any;
use core::sync::atomic::{AtomicBool, Ordering};

use sync::SpinLock;

use super::class::UsbClassDriver;
use super::descriptor::{DeviceDescriptor, EndpointDescriptor, ParsedConfiguration};
use super::error::UsbError;
use super::transfer::TransferEngine;
use crate::list::List;

/// 传输方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// 设备到主机
    In,
    /// 主机到设备
    Out,
}

/// 端点传输类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferType {
    /// 控制传输
    Control,
    /// 同步传输
    Isochronous,
    /// 批量传输
    Bulk,
    /// 中断传输
    Interrupt,
}

impl TransferType {
    fn from_attributes(attributes: u8) -> Self {
        match attributes & 0x03 {
            0 => TransferType::Control,
            1 => TransferType::Isochronous,
            2 => TransferType::Bulk,
            _ => TransferType::Interrupt,
        }
    }
}

/// 设备速度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbSpeed {
    /// 1.5 Mbit/s
    Low,
    /// 12 Mbit/s
    Full,
    /// 480 Mbit/s
    High,
    /// 5 Gbit/s
    Super,
}

impl UsbSpeed {
    /// 读取设备描述符前假定的 EP0 最大包长
    pub fn default_ep0_max_packet(&self) -> u16 {
        match self {
            UsbSpeed::Low | UsbSpeed::Full => 8,
            UsbSpeed::High => 64,
            UsbSpeed::Super => 512,
        }
    }
}

/// 端点，枚举完成后不可变
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    address: u8,
    direction: Direction,
    transfer_type: TransferType,
    max_packet: u16,
    interval: u8,
}

impl Endpoint {
    /// 默认控制端点 EP0
    pub fn control0(max_packet: u16) -> Self {
        Self {
            address: 0,
            direction: Direction::Out,
            transfer_type: TransferType::Control,
            max_packet,
            interval: 0,
        }
    }

    /// 由端点描述符构造
    pub fn from_descriptor(desc: &EndpointDescriptor) -> Self {
        Self {
            address: desc.endpoint_address,
            direction: if desc.is_in() {
                Direction::In
            } else {
                Direction::Out
            },
            transfer_type: TransferType::from_attributes(desc.attributes),
            max_packet: desc.max_packet(),
            interval: desc.interval,
        }
    }

    /// 端点地址（含方向位）
    pub fn address(&self) -> u8 {
        self.address
    }

    /// 端点号
    pub fn number(&self) -> u8 {
        self.address & 0x0F
    }

    /// 方向（控制端点双向，此值无意义）
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// 传输类型
    pub fn transfer_type(&self) -> TransferType {
        self.transfer_type
    }

    /// 最大包长
    pub fn max_packet(&self) -> u16 {
        self.max_packet
    }

    /// 轮询间隔（中断端点）
    pub fn interval(&self) -> u8 {
        self.interval
    }
}

/// 设备枚举状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// 已连接，使用默认地址 0
    Attached,
    /// 已分配地址
    Addressed,
    /// 已读取描述符并设置配置
    Configured,
    /// 至少一个接口被类驱动认领
    InterfaceClaimed,
    /// 类驱动已提交稳态传输
    Active,
    /// 已拔出
    Detached,
}

impl DeviceState {
    /// 是否允许从 `self` 迁移到 `to`
    pub fn can_transition(&self, to: DeviceState) -> bool {
        use DeviceState::*;
        matches!(
            (self, to),
            (_, Detached)
                | (Attached, Addressed)
                | (Addressed, Configured)
                | (Configured, InterfaceClaimed)
                | (InterfaceClaimed, Active)
        )
    }
}

/// 设备中的一个功能接口（备用设置 0）
pub struct Interface {
    number: u8,
    alternate: u8,
    class: u8,
    subclass: u8,
    protocol: u8,
    endpoints: List<Endpoint>,
    class_descriptors: Vec<u8>,
    device: Weak<UsbDevice>,
    driver: SpinLock<Option<Arc<dyn UsbClassDriver>>>,
    driver_data: SpinLock<Option<Arc<dyn Any + Send + Sync>>>,
}

impl Interface {
    /// 接口号
    pub fn number(&self) -> u8 {
        self.number
    }

    /// 备用设置
    pub fn alternate(&self) -> u8 {
        self.alternate
    }

    /// 接口类
    pub fn class(&self) -> u8 {
        self.class
    }

    /// 接口子类
    pub fn subclass(&self) -> u8 {
        self.subclass
    }

    /// 接口协议
    pub fn protocol(&self) -> u8 {
        self.protocol
    }

    /// 端点列表
    pub fn endpoints(&self) -> &List<Endpoint> {
        &self.endpoints
    }

    /// 接口描述符之后的类特定描述符原始字节
    pub fn class_descriptors(&self) -> &[u8] {
        &self.class_descriptors
    }

    /// 查找第一个给定类型和方向的端点
    pub fn find_endpoint(&self, ty: TransferType, dir: Direction) -> Option<Endpoint> {
        self.endpoints
            .iter()
            .find(|ep| ep.transfer_type() == ty && ep.direction() == dir)
            .copied()
    }

    /// 所属设备；设备已释放时返回 `None`
    pub fn device(&self) -> Option<Arc<UsbDevice>> {
        self.device.upgrade()
    }

    /// 保存类驱动私有状态
    pub fn set_driver_data(&self, data: Arc<dyn Any + Send + Sync>) {
        *self.driver_data.lock() = Some(data);
    }

    /// 取回类驱动私有状态
    pub fn driver_data<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let data = self.driver_data.lock().clone()?;
        data.downcast::<T>().ok()
    }

    /// 释放类驱动私有状态
    pub fn clear_driver_data(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.driver_data.lock().take()
    }

    /// 是否已被类驱动认领
    pub fn is_claimed(&self) -> bool {
        self.driver.lock().is_some()
    }

    /// 认领该接口的类驱动
    pub fn driver(&self) -> Option<Arc<dyn UsbClassDriver>> {
        self.driver.lock().clone()
    }

    pub(crate) fn claim(&self, driver: Arc<dyn UsbClassDriver>) {
        *self.driver.lock() = Some(driver);
    }

    /// 取走认领者；保证 teardown 对每个接口只执行一次
    pub(crate) fn take_driver(&self) -> Option<Arc<dyn UsbClassDriver>> {
        self.driver.lock().take()
    }
}

impl core::fmt::Debug for Interface {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Interface")
            .field("number", &self.number)
            .field("class", &self.class)
            .field("subclass", &self.subclass)
            .field("protocol", &self.protocol)
            .field("endpoints", &self.endpoints.len())
            .finish()
    }
}

/// 设备的活动配置
pub struct Configuration {
    value: u8,
    interfaces: List<Arc<Interface>>,
}

impl Configuration {
    /// 由解析后的配置描述符构建，接口回指 `device`
    pub fn build(parsed: &ParsedConfiguration, device: &Arc<UsbDevice>) -> Self {
        let interfaces = parsed
            .interfaces
            .iter()
            .map(|p| {
                Arc::new(Interface {
                    number: p.descriptor.interface_number,
                    alternate: p.descriptor.alternate_setting,
                    class: p.descriptor.class,
                    subclass: p.descriptor.subclass,
                    protocol: p.descriptor.protocol,
                    endpoints: p.endpoints.iter().map(Endpoint::from_descriptor).collect(),
                    class_descriptors: p.extra.clone(),
                    device: Arc::downgrade(device),
                    driver: SpinLock::new(None),
                    driver_data: SpinLock::new(None),
                })
            })
            .collect();
        Self {
            value: parsed.descriptor.configuration_value,
            interfaces,
        }
    }

    /// bConfigurationValue
    pub fn value(&self) -> u8 {
        self.value
    }

    /// 接口列表
    pub fn interfaces(&self) -> &List<Arc<Interface>> {
        &self.interfaces
    }

    /// 所有接口的端点
    pub fn endpoints(&self) -> List<Endpoint> {
        self.interfaces
            .iter()
            .flat_map(|i| i.endpoints().iter().copied())
            .collect()
    }
}

struct DeviceInner {
    state: DeviceState,
    address: u8,
    ep0_max_packet: u16,
    descriptor: Option<DeviceDescriptor>,
    config: Option<Arc<Configuration>>,
}

/// 一个物理连接的 USB 设备
pub struct UsbDevice {
    port: u32,
    speed: UsbSpeed,
    engine: Arc<TransferEngine>,
    inner: SpinLock<DeviceInner>,
    enumerating: AtomicBool,
}

impl UsbDevice {
    /// 新连接的设备，处于 `Attached` 状态、地址 0
    pub fn new(port: u32, speed: UsbSpeed, engine: Arc<TransferEngine>) -> Arc<Self> {
        Arc::new(Self {
            port,
            speed,
            engine,
            inner: SpinLock::new(DeviceInner {
                state: DeviceState::Attached,
                address: 0,
                ep0_max_packet: speed.default_ep0_max_packet(),
                descriptor: None,
                config: None,
            }),
            enumerating: AtomicBool::new(false),
        })
    }

    /// 根端口号
    pub fn port(&self) -> u32 {
        self.port
    }

    /// 速度
    pub fn speed(&self) -> UsbSpeed {
        self.speed
    }

    /// 传输引擎
    pub fn engine(&self) -> &Arc<TransferEngine> {
        &self.engine
    }

    /// 当前状态
    pub fn state(&self) -> DeviceState {
        self.inner.lock().state
    }

    /// 总线地址
    pub fn address(&self) -> u8 {
        self.inner.lock().address
    }

    /// 默认控制端点
    pub fn ep0(&self) -> Endpoint {
        Endpoint::control0(self.inner.lock().ep0_max_packet)
    }

    /// 设备描述符
    pub fn descriptor(&self) -> Option<DeviceDescriptor> {
        self.inner.lock().descriptor
    }

    /// 厂商 ID
    pub fn vendor_id(&self) -> Option<u16> {
        self.descriptor().map(|d| d.vendor_id)
    }

    /// 产品 ID
    pub fn product_id(&self) -> Option<u16> {
        self.descriptor().map(|d| d.product_id)
    }

    /// 活动配置
    pub fn configuration(&self) -> Option<Arc<Configuration>> {
        self.inner.lock().config.clone()
    }

    /// 按顺序列出接口
    pub fn interfaces(&self) -> Vec<Arc<Interface>> {
        self.configuration()
            .map(|c| c.interfaces().iter().cloned().collect())
            .unwrap_or_default()
    }

    /// 是否正在枚举
    pub fn is_enumerating(&self) -> bool {
        self.enumerating.load(Ordering::Acquire)
    }

    pub(crate) fn set_enumerating(&self, value: bool) {
        self.enumerating.store(value, Ordering::Release);
    }

    /// 等待通道：枚举标志的地址
    pub(crate) fn enumerating_channel(&self) -> usize {
        &self.enumerating as *const AtomicBool as usize
    }

    /// 迁移状态，非法迁移返回 `InvalidState`
    pub(crate) fn transition(&self, to: DeviceState) -> Result<(), UsbError> {
        let mut inner = self.inner.lock();
        if !inner.state.can_transition(to) {
            return Err(UsbError::InvalidState);
        }
        log::debug!(
            "usb: port {} {:?} -> {:?}",
            self.port,
            inner.state,
            to
        );
        inner.state = to;
        Ok(())
    }

    /// 已拔出时返回 `NoDevice`
    pub(crate) fn ensure_present(&self) -> Result<(), UsbError> {
        if self.state() == DeviceState::Detached {
            return Err(UsbError::NoDevice);
        }
        Ok(())
    }

    pub(crate) fn set_address(&self, address: u8) {
        self.inner.lock().address = address;
    }

    pub(crate) fn set_ep0_max_packet(&self, max_packet: u16) {
        self.inner.lock().ep0_max_packet = max_packet;
    }

    pub(crate) fn set_descriptor(&self, descriptor: DeviceDescriptor) {
        self.inner.lock().descriptor = Some(descriptor);
    }

    pub(crate) fn set_configuration(&self, config: Arc<Configuration>) {
        self.inner.lock().config = Some(config);
    }
}

impl core::fmt::Debug for UsbDevice {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("UsbDevice")
            .field("port", &self.port)
            .field("address", &inner.address)
            .field("state", &inner.state)
            .finish()
    }
}
