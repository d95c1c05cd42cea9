//! USB 标准描述符
//!
//! 所有描述符都按小端、无填充的线格式逐字节解析，不依赖结构体内存布局。

use alloc::vec::Vec;

use super::error::UsbError;

/// 描述符类型
pub mod descriptor_type {
    /// 设备描述符
    pub const DEVICE: u8 = 1;
    /// 配置描述符
    pub const CONFIGURATION: u8 = 2;
    /// 接口描述符
    pub const INTERFACE: u8 = 4;
    /// 端点描述符
    pub const ENDPOINT: u8 = 5;
    /// HID 类描述符
    pub const HID: u8 = 0x21;
    /// HID 报告描述符
    pub const HID_REPORT: u8 = 0x22;
}

/// 接口类代码
pub mod class_code {
    /// 人机接口设备
    pub const HID: u8 = 0x03;
    /// 大容量存储
    pub const MASS_STORAGE: u8 = 0x08;
}

/// 标准请求
pub mod request {
    /// GET_STATUS
    pub const GET_STATUS: u8 = 0x00;
    /// CLEAR_FEATURE
    pub const CLEAR_FEATURE: u8 = 0x01;
    /// SET_ADDRESS
    pub const SET_ADDRESS: u8 = 0x05;
    /// GET_DESCRIPTOR
    pub const GET_DESCRIPTOR: u8 = 0x06;
    /// SET_CONFIGURATION
    pub const SET_CONFIGURATION: u8 = 0x09;
}

/// bmRequestType 各字段
pub mod request_type {
    /// 设备到主机
    pub const DIR_IN: u8 = 0x80;
    /// 主机到设备
    pub const DIR_OUT: u8 = 0x00;
    /// 标准请求
    pub const STANDARD: u8 = 0x00;
    /// 类请求
    pub const CLASS: u8 = 0x20;
    /// 接收者：设备
    pub const DEVICE: u8 = 0x00;
    /// 接收者：接口
    pub const INTERFACE: u8 = 0x01;
    /// 接收者：端点
    pub const ENDPOINT: u8 = 0x02;
}

/// ENDPOINT_HALT 特性选择子
pub const FEATURE_ENDPOINT_HALT: u16 = 0;

fn le16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

/// 检查描述符头部：长度足够且类型正确，返回声明的长度
fn check_header(bytes: &[u8], min_len: usize, ty: u8) -> Result<usize, UsbError> {
    if bytes.len() < min_len {
        return Err(UsbError::Malformed);
    }
    let len = bytes[0] as usize;
    if len < min_len || bytes[1] != ty {
        return Err(UsbError::Malformed);
    }
    Ok(len)
}

/// 设备描述符（18 字节）
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceDescriptor {
    pub bcd_usb: u16,
    pub device_class: u8,
    pub device_subclass: u8,
    pub device_protocol: u8,
    pub max_packet_size0: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub bcd_device: u16,
    pub manufacturer_index: u8,
    pub product_index: u8,
    pub serial_index: u8,
    pub num_configurations: u8,
}

impl DeviceDescriptor {
    /// 线格式长度
    pub const LEN: usize = 18;

    /// 解析完整的设备描述符
    pub fn parse(bytes: &[u8]) -> Result<Self, UsbError> {
        check_header(bytes, Self::LEN, descriptor_type::DEVICE)?;
        Ok(Self {
            bcd_usb: le16(bytes, 2),
            device_class: bytes[4],
            device_subclass: bytes[5],
            device_protocol: bytes[6],
            max_packet_size0: bytes[7],
            vendor_id: le16(bytes, 8),
            product_id: le16(bytes, 10),
            bcd_device: le16(bytes, 12),
            manufacturer_index: bytes[14],
            product_index: bytes[15],
            serial_index: bytes[16],
            num_configurations: bytes[17],
        })
    }

    /// 从前 8 个字节中取出 EP0 最大包长
    ///
    /// 地址分配前只读取 8 字节，这足以得到 bMaxPacketSize0。
    pub fn parse_max_packet0(bytes: &[u8]) -> Result<u8, UsbError> {
        if bytes.len() < 8 || bytes[1] != descriptor_type::DEVICE {
            return Err(UsbError::Malformed);
        }
        match bytes[7] {
            8 | 16 | 32 | 64 => Ok(bytes[7]),
            _ => Err(UsbError::Malformed),
        }
    }

    /// 编码为线格式
    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[0] = Self::LEN as u8;
        out[1] = descriptor_type::DEVICE;
        out[2..4].copy_from_slice(&self.bcd_usb.to_le_bytes());
        out[4] = self.device_class;
        out[5] = self.device_subclass;
        out[6] = self.device_protocol;
        out[7] = self.max_packet_size0;
        out[8..10].copy_from_slice(&self.vendor_id.to_le_bytes());
        out[10..12].copy_from_slice(&self.product_id.to_le_bytes());
        out[12..14].copy_from_slice(&self.bcd_device.to_le_bytes());
        out[14] = self.manufacturer_index;
        out[15] = self.product_index;
        out[16] = self.serial_index;
        out[17] = self.num_configurations;
        out
    }
}

/// 配置描述符头（9 字节）
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConfigDescriptor {
    pub total_length: u16,
    pub num_interfaces: u8,
    pub configuration_value: u8,
    pub configuration_index: u8,
    pub attributes: u8,
    pub max_power: u8,
}

impl ConfigDescriptor {
    /// 线格式长度
    pub const LEN: usize = 9;

    /// 解析配置描述符头
    pub fn parse(bytes: &[u8]) -> Result<Self, UsbError> {
        check_header(bytes, Self::LEN, descriptor_type::CONFIGURATION)?;
        let total_length = le16(bytes, 2);
        if (total_length as usize) < Self::LEN {
            return Err(UsbError::Malformed);
        }
        Ok(Self {
            total_length,
            num_interfaces: bytes[4],
            configuration_value: bytes[5],
            configuration_index: bytes[6],
            attributes: bytes[7],
            max_power: bytes[8],
        })
    }
}

/// 接口描述符（9 字节）
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InterfaceDescriptor {
    pub interface_number: u8,
    pub alternate_setting: u8,
    pub num_endpoints: u8,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub interface_index: u8,
}

impl InterfaceDescriptor {
    /// 线格式长度
    pub const LEN: usize = 9;

    /// 解析接口描述符
    pub fn parse(bytes: &[u8]) -> Result<Self, UsbError> {
        check_header(bytes, Self::LEN, descriptor_type::INTERFACE)?;
        Ok(Self {
            interface_number: bytes[2],
            alternate_setting: bytes[3],
            num_endpoints: bytes[4],
            class: bytes[5],
            subclass: bytes[6],
            protocol: bytes[7],
            interface_index: bytes[8],
        })
    }
}

/// 端点描述符（7 字节）
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EndpointDescriptor {
    pub endpoint_address: u8,
    pub attributes: u8,
    pub max_packet_size: u16,
    pub interval: u8,
}

impl EndpointDescriptor {
    /// 线格式长度
    pub const LEN: usize = 7;

    /// 解析端点描述符
    pub fn parse(bytes: &[u8]) -> Result<Self, UsbError> {
        check_header(bytes, Self::LEN, descriptor_type::ENDPOINT)?;
        Ok(Self {
            endpoint_address: bytes[2],
            attributes: bytes[3],
            max_packet_size: le16(bytes, 4),
            interval: bytes[6],
        })
    }

    /// 端点号（bit 3:0）
    pub fn endpoint_number(&self) -> u8 {
        self.endpoint_address & 0x0F
    }

    /// 是否为 IN 端点（bit 7）
    pub fn is_in(&self) -> bool {
        self.endpoint_address & 0x80 != 0
    }

    /// 传输类型（bmAttributes bit 1:0）
    pub fn transfer_type(&self) -> u8 {
        self.attributes & 0x03
    }

    /// 最大包长（bit 10:0）
    pub fn max_packet(&self) -> u16 {
        self.max_packet_size & 0x07FF
    }
}

/// 8 字节控制请求
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupPacket {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl SetupPacket {
    /// 线格式长度
    pub const LEN: usize = 8;

    /// 数据阶段是否为设备到主机
    pub fn is_in(&self) -> bool {
        self.request_type & request_type::DIR_IN != 0
    }

    /// 编码为线格式
    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[0] = self.request_type;
        out[1] = self.request;
        out[2..4].copy_from_slice(&self.value.to_le_bytes());
        out[4..6].copy_from_slice(&self.index.to_le_bytes());
        out[6..8].copy_from_slice(&self.length.to_le_bytes());
        out
    }

    /// 从线格式解码
    pub fn from_bytes(bytes: &[u8; Self::LEN]) -> Self {
        Self {
            request_type: bytes[0],
            request: bytes[1],
            value: le16(bytes, 2),
            index: le16(bytes, 4),
            length: le16(bytes, 6),
        }
    }

    /// GET_DESCRIPTOR（设备接收者）
    pub fn get_descriptor(ty: u8, index: u8, length: u16) -> Self {
        Self {
            request_type: request_type::DIR_IN | request_type::STANDARD | request_type::DEVICE,
            request: request::GET_DESCRIPTOR,
            value: ((ty as u16) << 8) | index as u16,
            index: 0,
            length,
        }
    }

    /// SET_ADDRESS
    pub fn set_address(address: u8) -> Self {
        Self {
            request_type: request_type::DIR_OUT | request_type::STANDARD | request_type::DEVICE,
            request: request::SET_ADDRESS,
            value: address as u16,
            index: 0,
            length: 0,
        }
    }

    /// SET_CONFIGURATION
    pub fn set_configuration(value: u8) -> Self {
        Self {
            request_type: request_type::DIR_OUT | request_type::STANDARD | request_type::DEVICE,
            request: request::SET_CONFIGURATION,
            value: value as u16,
            index: 0,
            length: 0,
        }
    }

    /// CLEAR_FEATURE(ENDPOINT_HALT)
    pub fn clear_endpoint_halt(endpoint_address: u8) -> Self {
        Self {
            request_type: request_type::DIR_OUT | request_type::STANDARD | request_type::ENDPOINT,
            request: request::CLEAR_FEATURE,
            value: FEATURE_ENDPOINT_HALT,
            index: endpoint_address as u16,
            length: 0,
        }
    }

    /// 接口接收者的类请求
    pub fn class_interface(dir_in: bool, request: u8, value: u16, interface: u8, length: u16) -> Self {
        let dir = if dir_in {
            request_type::DIR_IN
        } else {
            request_type::DIR_OUT
        };
        Self {
            request_type: dir | request_type::CLASS | request_type::INTERFACE,
            request,
            value,
            index: interface as u16,
            length,
        }
    }

    /// 接口接收者的标准 GET_DESCRIPTOR（用于读取类描述符）
    pub fn get_interface_descriptor(ty: u8, index: u8, interface: u8, length: u16) -> Self {
        Self {
            request_type: request_type::DIR_IN | request_type::STANDARD | request_type::INTERFACE,
            request: request::GET_DESCRIPTOR,
            value: ((ty as u16) << 8) | index as u16,
            index: interface as u16,
            length,
        }
    }
}

/// 配置中的一个接口（只保留备用设置 0）
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedInterface {
    pub descriptor: InterfaceDescriptor,
    pub endpoints: Vec<EndpointDescriptor>,
    /// 接口描述符之后的类特定描述符原始字节
    pub extra: Vec<u8>,
}

/// 解析后的完整配置
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedConfiguration {
    pub descriptor: ConfigDescriptor,
    pub interfaces: Vec<ParsedInterface>,
}

/// 按 bLength 遍历完整的配置描述符
///
/// 非 0 备用设置的接口及其端点被跳过；未知类型的描述符归入当前接口的 `extra`。
pub fn parse_configuration(bytes: &[u8]) -> Result<ParsedConfiguration, UsbError> {
    let descriptor = ConfigDescriptor::parse(bytes)?;
    let total = descriptor.total_length as usize;
    if bytes.len() < total {
        return Err(UsbError::Malformed);
    }

    let mut interfaces: Vec<ParsedInterface> = Vec::new();
    // 当前是否处于被跳过的备用设置中
    let mut skipping = false;
    let mut pos = bytes[0] as usize;

    while pos < total {
        if total - pos < 2 {
            return Err(UsbError::Malformed);
        }
        let len = bytes[pos] as usize;
        if len < 2 || pos + len > total {
            return Err(UsbError::Malformed);
        }
        let desc = &bytes[pos..pos + len];

        match desc[1] {
            descriptor_type::INTERFACE => {
                let iface = InterfaceDescriptor::parse(desc)?;
                skipping = iface.alternate_setting != 0;
                if !skipping {
                    interfaces.push(ParsedInterface {
                        descriptor: iface,
                        endpoints: Vec::new(),
                        extra: Vec::new(),
                    });
                }
            }
            descriptor_type::ENDPOINT => {
                let ep = EndpointDescriptor::parse(desc)?;
                if !skipping {
                    interfaces
                        .last_mut()
                        .ok_or(UsbError::Malformed)?
                        .endpoints
                        .push(ep);
                }
            }
            _ => {
                if skipping {
                    // 属于被跳过的备用设置
                } else if let Some(iface) = interfaces.last_mut() {
                    iface.extra.extend_from_slice(desc);
                }
            }
        }
        pos += len;
    }

    Ok(ParsedConfiguration {
        descriptor,
        interfaces,
    })
}

/// 在类特定描述符字节中查找给定类型的第一个描述符
pub fn find_class_descriptor(extra: &[u8], ty: u8) -> Option<&[u8]> {
    let mut pos = 0;
    while pos + 2 <= extra.len() {
        let len = extra[pos] as usize;
        if len < 2 || pos + len > extra.len() {
            return None;
        }
        if extra[pos + 1] == ty {
            return Some(&extra[pos..pos + len]);
        }
        pos += len;
    }
    None
}
