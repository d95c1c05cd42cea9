//! USB 类驱动接口

use alloc::sync::Arc;

use super::device::Interface;
use super::error::SetupError;
use crate::driver::Driver;

/// USB 类驱动
///
/// 注册表按接口的类/子类/协议三元组调用 [`matches`](UsbClassDriver::matches)
/// 选择驱动，然后由总线在枚举路径上调用 [`setup`](UsbClassDriver::setup)。
pub trait UsbClassDriver: Driver {
    /// 是否处理该接口三元组
    fn matches(&self, class: u8, subclass: u8, protocol: u8) -> bool;

    /// 认领接口：查找端点、读取类描述符、提交稳态传输
    ///
    /// 失败时接口保持未认领状态，通过 `set_driver_data` 保存的状态会被总线释放。
    fn setup(&self, interface: &Arc<Interface>) -> Result<(), SetupError>;

    /// 拔出时调用，每个接口恰好一次
    ///
    /// 调用时设备的所有传输已经被取消。
    fn teardown(&self, interface: &Arc<Interface>);
}
