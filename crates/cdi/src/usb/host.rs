//! 主控制器接口
//!
//! 寄存器级编程不在本 crate 范围内。主控制器驱动实现 [`HostController`]，
//! 接收 [`TransferRequest`]，并在硬件完成时调用
//! [`TransferEngine::complete`](super::TransferEngine::complete) 按端点报告结果。

use alloc::vec::Vec;

use super::descriptor::SetupPacket;
use super::device::{Endpoint, TransferType};
use super::error::UsbError;

/// 传输标识，重新提交（re-arm）时保持不变
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransferId(pub usize);

/// 端点键：设备地址 + 端点地址
///
/// 控制端点的 IN/OUT 共用一个键（端点 0），其他端点按含方向位的地址区分。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EndpointKey {
    /// 设备地址
    pub device: u8,
    /// 端点地址（含方向位）
    pub endpoint: u8,
}

impl EndpointKey {
    /// 由设备地址和端点构造
    pub fn new(device: u8, endpoint: &Endpoint) -> Self {
        let endpoint = match endpoint.transfer_type() {
            TransferType::Control => endpoint.number(),
            _ => endpoint.address(),
        };
        Self { device, endpoint }
    }

    /// 是否为控制端点
    pub fn is_control(&self) -> bool {
        self.endpoint & 0x0F == 0
    }
}

/// 交给主控制器的请求
#[derive(Debug, Clone)]
pub struct TransferRequest {
    /// 传输标识
    pub id: TransferId,
    /// 目标端点
    pub key: EndpointKey,
    /// 端点属性
    pub endpoint: Endpoint,
    /// 控制传输的 setup 阶段
    pub setup: Option<SetupPacket>,
    /// OUT 方向的数据
    pub data: Vec<u8>,
    /// 请求长度
    pub length: usize,
}

/// 主控制器报告的完成数据
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion<'a> {
    /// IN 方向收到的数据
    Received(&'a [u8]),
    /// OUT 方向实际发送的字节数
    Sent(usize),
    /// 没有数据阶段
    Empty,
}

/// 主控制器
pub trait HostController: Send + Sync {
    /// 控制器名
    fn name(&self) -> &str;

    /// 把请求加入硬件队列
    ///
    /// 同一端点上的请求必须按提交顺序完成。实现可以在本调用内直接完成请求，
    /// 调用时引擎不持有任何锁。
    fn enqueue(&self, request: &TransferRequest) -> Result<(), UsbError>;

    /// 取消请求并隔离硬件
    ///
    /// 返回后硬件不得再访问该请求，也不得再为它报告完成。
    fn cancel(&self, id: TransferId);
}
