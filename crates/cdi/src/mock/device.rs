//! Mock 设备：应答枚举用的标准请求

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use sync::SpinLock;

use super::host::{MockHostController, MockReply, Responder};
use crate::usb::TransferRequest;
use crate::usb::TransferStatus;
use crate::usb::descriptor::{DeviceDescriptor, descriptor_type, request, request_type};

/// 构造设备描述符（USB 2.0，单配置）
pub fn device_descriptor(vendor_id: u16, product_id: u16, max_packet0: u8) -> [u8; 18] {
    DeviceDescriptor {
        bcd_usb: 0x0200,
        max_packet_size0: max_packet0,
        vendor_id,
        product_id,
        bcd_device: 0x0100,
        num_configurations: 1,
        ..Default::default()
    }
    .to_bytes()
}

/// 配置描述符构造器
///
/// 自动回填 wTotalLength、bNumInterfaces 和每个接口的 bNumEndpoints。
pub struct ConfigBuilder {
    bytes: Vec<u8>,
    last_interface: Option<usize>,
    num_interfaces: u8,
}

impl ConfigBuilder {
    /// 以 bConfigurationValue 开始一个配置
    pub fn new(value: u8) -> Self {
        Self {
            bytes: vec![9, descriptor_type::CONFIGURATION, 0, 0, 0, value, 0, 0x80, 50],
            last_interface: None,
            num_interfaces: 0,
        }
    }

    /// 追加接口描述符
    pub fn interface(mut self, number: u8, alternate: u8, class: u8, subclass: u8, protocol: u8) -> Self {
        self.last_interface = Some(self.bytes.len());
        if alternate == 0 {
            self.num_interfaces += 1;
        }
        self.bytes.extend_from_slice(&[
            9,
            descriptor_type::INTERFACE,
            number,
            alternate,
            0,
            class,
            subclass,
            protocol,
            0,
        ]);
        self
    }

    /// 追加类特定描述符（原样写入）
    pub fn class_descriptor(mut self, bytes: &[u8]) -> Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    /// 追加端点描述符
    pub fn endpoint(mut self, address: u8, attributes: u8, max_packet: u16, interval: u8) -> Self {
        if let Some(at) = self.last_interface {
            self.bytes[at + 4] += 1;
        }
        let mps = max_packet.to_le_bytes();
        self.bytes.extend_from_slice(&[
            7,
            descriptor_type::ENDPOINT,
            address,
            attributes,
            mps[0],
            mps[1],
            interval,
        ]);
        self
    }

    /// 完成并返回线格式
    pub fn build(mut self) -> Vec<u8> {
        let total = (self.bytes.len() as u16).to_le_bytes();
        self.bytes[2] = total[0];
        self.bytes[3] = total[1];
        self.bytes[4] = self.num_interfaces;
        self.bytes
    }
}

/// 应答标准请求的设备模型
///
/// 其余请求（类请求、批量和中断传输）交给可选的类处理器，没有处理器时挂起。
pub struct MockDevice {
    device: [u8; 18],
    config: Vec<u8>,
    /// 最近一次 SET_ADDRESS 的地址
    pub address: Option<u8>,
    /// 最近一次 SET_CONFIGURATION 的配置值
    pub configuration: Option<u8>,
    /// 收到的 GET_DESCRIPTOR 次数
    pub descriptor_reads: usize,
    class_handler: Option<Responder>,
}

impl MockDevice {
    /// 由设备描述符和完整配置描述符创建
    pub fn new(device: [u8; 18], config: Vec<u8>) -> Self {
        Self {
            device,
            config,
            address: None,
            configuration: None,
            descriptor_reads: 0,
            class_handler: None,
        }
    }

    /// 设置类处理器
    pub fn with_class_handler(
        mut self,
        handler: impl FnMut(&TransferRequest) -> MockReply + Send + 'static,
    ) -> Self {
        self.class_handler = Some(Box::new(handler));
        self
    }

    /// 应答一个请求
    pub fn respond(&mut self, req: &TransferRequest) -> MockReply {
        let Some(setup) = req.setup else {
            return self.delegate(req);
        };
        let standard_device =
            (setup.request_type & 0x7F) == (request_type::STANDARD | request_type::DEVICE);
        match (standard_device, setup.request) {
            (true, request::GET_DESCRIPTOR) => {
                self.descriptor_reads += 1;
                let mut data = match (setup.value >> 8) as u8 {
                    descriptor_type::DEVICE => self.device.to_vec(),
                    descriptor_type::CONFIGURATION => self.config.clone(),
                    _ => return MockReply::Complete(TransferStatus::Stalled, Vec::new()),
                };
                data.truncate(setup.length as usize);
                MockReply::Complete(TransferStatus::Success, data)
            }
            (true, request::SET_ADDRESS) => {
                self.address = Some(setup.value as u8);
                MockReply::Complete(TransferStatus::Success, Vec::new())
            }
            (true, request::SET_CONFIGURATION) => {
                self.configuration = Some(setup.value as u8);
                MockReply::Complete(TransferStatus::Success, Vec::new())
            }
            _ if setup.request == request::CLEAR_FEATURE
                && setup.request_type == request_type::ENDPOINT =>
            {
                MockReply::Complete(TransferStatus::Success, Vec::new())
            }
            _ => self.delegate(req),
        }
    }

    fn delegate(&mut self, req: &TransferRequest) -> MockReply {
        match self.class_handler.as_mut() {
            Some(handler) => handler(req),
            None => MockReply::Defer,
        }
    }

    /// 作为主控制器的应答器安装，返回共享句柄以便测试检查状态
    pub fn install(self, hc: &MockHostController) -> Arc<SpinLock<MockDevice>> {
        let shared = Arc::new(SpinLock::new(self));
        let device = shared.clone();
        hc.set_responder(move |req| device.lock().respond(req));
        shared
    }
}
