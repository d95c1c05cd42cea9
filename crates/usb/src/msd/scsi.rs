//! SCSI 透明命令集（SFF-8070i/UFI 共用的子集）

use alloc::string::String;

use super::MsdError;

/// 操作码
pub mod opcode {
    /// TEST UNIT READY
    pub const TEST_UNIT_READY: u8 = 0x00;
    /// REQUEST SENSE
    pub const REQUEST_SENSE: u8 = 0x03;
    /// INQUIRY
    pub const INQUIRY: u8 = 0x12;
    /// READ CAPACITY(10)
    pub const READ_CAPACITY_10: u8 = 0x25;
    /// READ(10)
    pub const READ_10: u8 = 0x28;
    /// WRITE(10)
    pub const WRITE_10: u8 = 0x2A;
}

/// 感知键
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenseKey {
    /// 无错误
    NoSense,
    /// 已恢复的错误
    RecoveredError,
    /// 设备未就绪
    NotReady,
    /// 介质错误
    MediumError,
    /// 硬件错误
    HardwareError,
    /// 非法请求
    IllegalRequest,
    /// 介质更换或复位后的单元注意
    UnitAttention,
    /// 写保护
    DataProtect,
    /// 命令被中止
    AbortedCommand,
    /// 其他
    Other(u8),
}

impl SenseKey {
    /// 由感知数据第 2 字节的低 4 位解码
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x0F {
            0x0 => SenseKey::NoSense,
            0x1 => SenseKey::RecoveredError,
            0x2 => SenseKey::NotReady,
            0x3 => SenseKey::MediumError,
            0x4 => SenseKey::HardwareError,
            0x5 => SenseKey::IllegalRequest,
            0x6 => SenseKey::UnitAttention,
            0x7 => SenseKey::DataProtect,
            0xB => SenseKey::AbortedCommand,
            other => SenseKey::Other(other),
        }
    }

    /// 编码为低 4 位
    pub fn bits(&self) -> u8 {
        match self {
            SenseKey::NoSense => 0x0,
            SenseKey::RecoveredError => 0x1,
            SenseKey::NotReady => 0x2,
            SenseKey::MediumError => 0x3,
            SenseKey::HardwareError => 0x4,
            SenseKey::IllegalRequest => 0x5,
            SenseKey::UnitAttention => 0x6,
            SenseKey::DataProtect => 0x7,
            SenseKey::AbortedCommand => 0xB,
            SenseKey::Other(bits) => bits & 0x0F,
        }
    }

    /// 重发同一命令是否可能成功
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SenseKey::NoSense
                | SenseKey::RecoveredError
                | SenseKey::NotReady
                | SenseKey::UnitAttention
                | SenseKey::AbortedCommand
        )
    }
}

/// 固定格式感知数据
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenseData {
    /// 感知键
    pub key: SenseKey,
    /// 附加感知码
    pub asc: u8,
    /// 附加感知码限定符
    pub ascq: u8,
}

impl SenseData {
    /// REQUEST SENSE 分配长度
    pub const LEN: usize = 18;

    /// 解析，至少需要 14 字节（ASC/ASCQ 在第 12、13 字节）
    pub fn parse(bytes: &[u8]) -> Result<Self, MsdError> {
        if bytes.len() < 14 {
            return Err(MsdError::ShortData);
        }
        Ok(Self {
            key: SenseKey::from_bits(bytes[2]),
            asc: bytes[12],
            ascq: bytes[13],
        })
    }
}

/// INQUIRY 标准数据
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InquiryData {
    /// 外设类型（0 = 直接访问块设备）
    pub peripheral_type: u8,
    /// 可移动介质
    pub removable: bool,
    /// 厂商标识
    pub vendor: String,
    /// 产品标识
    pub product: String,
}

impl InquiryData {
    /// INQUIRY 分配长度
    pub const LEN: usize = 36;

    /// 解析标准 INQUIRY 数据
    pub fn parse(bytes: &[u8]) -> Result<Self, MsdError> {
        if bytes.len() < Self::LEN {
            return Err(MsdError::ShortData);
        }
        Ok(Self {
            peripheral_type: bytes[0] & 0x1F,
            removable: bytes[1] & 0x80 != 0,
            vendor: ascii_field(&bytes[8..16]),
            product: ascii_field(&bytes[16..32]),
        })
    }
}

fn ascii_field(bytes: &[u8]) -> String {
    let text: String = bytes
        .iter()
        .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '?' })
        .collect();
    String::from(text.trim_end())
}

/// READ CAPACITY(10) 结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capacity {
    /// 最后一个逻辑块地址
    pub last_lba: u32,
    /// 块长度（字节）
    pub block_len: u32,
}

impl Capacity {
    /// 响应长度
    pub const LEN: usize = 8;

    /// 解析大端格式的响应
    pub fn parse(bytes: &[u8]) -> Result<Self, MsdError> {
        if bytes.len() < Self::LEN {
            return Err(MsdError::ShortData);
        }
        let capacity = Self {
            last_lba: u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            block_len: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        };
        if capacity.block_len == 0 {
            return Err(MsdError::InvalidStatus);
        }
        Ok(capacity)
    }

    /// 块数
    pub fn blocks(&self) -> u64 {
        self.last_lba as u64 + 1
    }
}

/// TEST UNIT READY
pub fn test_unit_ready() -> [u8; 6] {
    [opcode::TEST_UNIT_READY, 0, 0, 0, 0, 0]
}

/// REQUEST SENSE
pub fn request_sense() -> [u8; 6] {
    [opcode::REQUEST_SENSE, 0, 0, 0, SenseData::LEN as u8, 0]
}

/// INQUIRY
pub fn inquiry() -> [u8; 6] {
    [opcode::INQUIRY, 0, 0, 0, InquiryData::LEN as u8, 0]
}

/// READ CAPACITY(10)
pub fn read_capacity_10() -> [u8; 10] {
    [opcode::READ_CAPACITY_10, 0, 0, 0, 0, 0, 0, 0, 0, 0]
}

/// READ(10)
pub fn read_10(lba: u32, blocks: u16) -> [u8; 10] {
    rw_10(opcode::READ_10, lba, blocks)
}

/// WRITE(10)
pub fn write_10(lba: u32, blocks: u16) -> [u8; 10] {
    rw_10(opcode::WRITE_10, lba, blocks)
}

fn rw_10(op: u8, lba: u32, blocks: u16) -> [u8; 10] {
    let lba = lba.to_be_bytes();
    let blocks = blocks.to_be_bytes();
    [op, 0, lba[0], lba[1], lba[2], lba[3], 0, blocks[0], blocks[1], 0]
}

/// 解析 READ(10)/WRITE(10) 命令块中的 LBA 和块数
pub fn parse_rw_10(command: &[u8]) -> Option<(u32, u16)> {
    if command.len() < 10 {
        return None;
    }
    let lba = u32::from_be_bytes([command[2], command[3], command[4], command[5]]);
    let blocks = u16::from_be_bytes([command[7], command[8]]);
    Some((lba, blocks))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_write_10_layout() {
        let cmd = read_10(0x0102_0304, 0x0506);
        assert_eq!(cmd, [0x28, 0, 1, 2, 3, 4, 0, 5, 6, 0]);
        assert_eq!(parse_rw_10(&cmd), Some((0x0102_0304, 0x0506)));
        assert_eq!(write_10(9, 1)[0], opcode::WRITE_10);
        assert_eq!(parse_rw_10(&cmd[..9]), None);
    }

    #[test]
    fn test_capacity() {
        let cap = Capacity::parse(&[0, 0, 0x0F, 0xFF, 0, 0, 2, 0]).unwrap();
        assert_eq!(cap.last_lba, 0xFFF);
        assert_eq!(cap.block_len, 512);
        assert_eq!(cap.blocks(), 0x1000);
        assert_eq!(Capacity::parse(&[0; 7]), Err(MsdError::ShortData));
        assert_eq!(Capacity::parse(&[0; 8]), Err(MsdError::InvalidStatus));
    }

    #[test]
    fn test_sense_and_inquiry() {
        let mut sense = [0u8; 18];
        sense[0] = 0x70;
        sense[2] = 0x07;
        sense[12] = 0x27;
        let parsed = SenseData::parse(&sense).unwrap();
        assert_eq!(parsed.key, SenseKey::DataProtect);
        assert_eq!(parsed.asc, 0x27);
        assert!(!parsed.key.is_transient());
        assert!(SenseKey::UnitAttention.is_transient());
        assert_eq!(SenseKey::from_bits(0x0E), SenseKey::Other(0x0E));
        assert_eq!(SenseKey::Other(0x0E).bits(), 0x0E);

        let mut inq = [0u8; 36];
        inq[1] = 0x80;
        inq[8..16].copy_from_slice(b"ACME    ");
        inq[16..32].copy_from_slice(b"Flash Disk      ");
        let data = InquiryData::parse(&inq).unwrap();
        assert_eq!(data.peripheral_type, 0);
        assert!(data.removable);
        assert_eq!(data.vendor, "ACME");
        assert_eq!(data.product, "Flash Disk");
    }
}
