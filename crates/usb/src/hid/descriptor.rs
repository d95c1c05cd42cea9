//! HID 类描述符与类请求

use cdi::usb::UsbError;
use cdi::usb::descriptor::descriptor_type;

/// HID 类请求
pub mod hid_request {
    /// SET_REPORT
    pub const SET_REPORT: u8 = 0x09;
    /// SET_IDLE
    pub const SET_IDLE: u8 = 0x0A;
    /// SET_PROTOCOL
    pub const SET_PROTOCOL: u8 = 0x0B;
}

/// SET_PROTOCOL 的 wValue：启动协议
pub const PROTOCOL_BOOT: u16 = 0;

/// SET_REPORT 的报告类型：输出报告（wValue 高字节）
pub const REPORT_TYPE_OUTPUT: u16 = 0x02;

/// HID 描述符（9 字节，小端，无填充）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HidDescriptor {
    /// bcdHID
    pub bcd_hid: u16,
    /// bCountryCode
    pub country_code: u8,
    /// bNumDescriptors
    pub num_descriptors: u8,
    /// 第一个下级描述符的类型，通常是报告描述符
    pub report_type: u8,
    /// 第一个下级描述符的长度
    pub report_length: u16,
}

impl HidDescriptor {
    /// 线格式长度
    pub const LEN: usize = 9;

    /// 解析线格式
    pub fn parse(bytes: &[u8]) -> Result<Self, UsbError> {
        if bytes.len() < Self::LEN
            || (bytes[0] as usize) < Self::LEN
            || bytes[1] != descriptor_type::HID
        {
            return Err(UsbError::Malformed);
        }
        let desc = Self {
            bcd_hid: u16::from_le_bytes([bytes[2], bytes[3]]),
            country_code: bytes[4],
            num_descriptors: bytes[5],
            report_type: bytes[6],
            report_length: u16::from_le_bytes([bytes[7], bytes[8]]),
        };
        if desc.num_descriptors == 0 {
            return Err(UsbError::Malformed);
        }
        Ok(desc)
    }

    /// 编码为线格式
    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let bcd = self.bcd_hid.to_le_bytes();
        let len = self.report_length.to_le_bytes();
        [
            Self::LEN as u8,
            descriptor_type::HID,
            bcd[0],
            bcd[1],
            self.country_code,
            self.num_descriptors,
            self.report_type,
            len[0],
            len[1],
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEYBOARD: [u8; 9] = [0x09, 0x21, 0x11, 0x01, 0x00, 0x01, 0x22, 0x3F, 0x00];

    #[test]
    fn test_parse_keyboard_descriptor() {
        let desc = HidDescriptor::parse(&KEYBOARD).unwrap();
        assert_eq!(desc.bcd_hid, 0x0111);
        assert_eq!(desc.num_descriptors, 1);
        assert_eq!(desc.report_type, descriptor_type::HID_REPORT);
        assert_eq!(desc.report_length, 63);
        assert_eq!(desc.to_bytes(), KEYBOARD);
    }

    #[test]
    fn test_reject_bad_descriptor() {
        assert_eq!(HidDescriptor::parse(&KEYBOARD[..8]), Err(UsbError::Malformed));

        let mut wrong_type = KEYBOARD;
        wrong_type[1] = 0x22;
        assert_eq!(HidDescriptor::parse(&wrong_type), Err(UsbError::Malformed));

        let mut no_reports = KEYBOARD;
        no_reports[5] = 0;
        assert_eq!(HidDescriptor::parse(&no_reports), Err(UsbError::Malformed));
    }
}
