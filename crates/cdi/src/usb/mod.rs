//! USB 设备模型
//!
//! - [`descriptor`]：标准描述符与 setup 包的线格式
//! - [`UsbDevice`] / [`Interface`] / [`Endpoint`]：枚举得到的设备模型
//! - [`TransferEngine`]：端点 I/O 的异步提交与完成
//! - [`UsbBus`]：枚举状态机与拔出
//! - [`UsbClassDriver`]：类驱动接口
//!
//! 主控制器寄存器编程不在这里，主控制器驱动实现 [`HostController`] 即可接入。

pub mod descriptor;

mod bus;
mod class;
mod device;
mod error;
mod host;
mod transfer;

pub use bus::UsbBus;
pub use class::UsbClassDriver;
pub use device::{
    Configuration, DeviceState, Direction, Endpoint, Interface, TransferType, UsbDevice, UsbSpeed,
};
pub use error::{SetupError, UsbError};
pub use host::{Completion, EndpointKey, HostController, TransferId, TransferRequest};
pub use transfer::{CompletionFn, Transfer, TransferEngine, TransferStatus};
