//! Bulk-Only Transport 的命令与状态封装
//!
//! 两个结构都是小端、无填充的固定布局：
//!
//! - CBW（31 字节）：签名、标签、数据长度、方向标志、LUN、命令长度、16 字节命令
//! - CSW（13 字节）：签名、标签、残余长度、状态

use super::MsdError;

/// CBW 签名 "USBC"
pub const CBW_SIGNATURE: u32 = 0x4342_5355;
/// CSW 签名 "USBS"
pub const CSW_SIGNATURE: u32 = 0x5342_5355;

/// CBW 标志：数据阶段为设备到主机
pub const CBW_FLAG_DATA_IN: u8 = 0x80;

/// 命令块最大长度
pub const MAX_COMMAND_LEN: usize = 16;

/// 命令块包装
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandBlockWrapper {
    /// 由主机选择，设备在 CSW 中原样返回
    pub tag: u32,
    /// 数据阶段的预期字节数
    pub data_transfer_length: u32,
    /// 方向标志
    pub flags: u8,
    /// 逻辑单元号
    pub lun: u8,
    command_len: u8,
    command: [u8; MAX_COMMAND_LEN],
}

impl CommandBlockWrapper {
    /// 线格式长度
    pub const LEN: usize = 31;

    /// 构造 CBW，命令长度必须在 1..=16
    pub fn new(
        tag: u32,
        data_transfer_length: u32,
        data_in: bool,
        lun: u8,
        command: &[u8],
    ) -> Result<Self, MsdError> {
        if command.is_empty() || command.len() > MAX_COMMAND_LEN {
            return Err(MsdError::InvalidCommand);
        }
        let mut block = [0u8; MAX_COMMAND_LEN];
        block[..command.len()].copy_from_slice(command);
        Ok(Self {
            tag,
            data_transfer_length,
            flags: if data_in { CBW_FLAG_DATA_IN } else { 0 },
            lun: lun & 0x0F,
            command_len: command.len() as u8,
            command: block,
        })
    }

    /// 数据阶段是否为 IN
    pub fn is_data_in(&self) -> bool {
        self.flags & CBW_FLAG_DATA_IN != 0
    }

    /// 命令字节
    pub fn command(&self) -> &[u8] {
        &self.command[..self.command_len as usize]
    }

    /// 编码为线格式
    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[0..4].copy_from_slice(&CBW_SIGNATURE.to_le_bytes());
        out[4..8].copy_from_slice(&self.tag.to_le_bytes());
        out[8..12].copy_from_slice(&self.data_transfer_length.to_le_bytes());
        out[12] = self.flags;
        out[13] = self.lun;
        out[14] = self.command_len;
        out[15..31].copy_from_slice(&self.command);
        out
    }

    /// 解析线格式
    pub fn parse(bytes: &[u8]) -> Result<Self, MsdError> {
        if bytes.len() != Self::LEN || read_u32(bytes, 0) != CBW_SIGNATURE {
            return Err(MsdError::InvalidCommand);
        }
        let command_len = bytes[14];
        if command_len == 0 || command_len as usize > MAX_COMMAND_LEN {
            return Err(MsdError::InvalidCommand);
        }
        let mut command = [0u8; MAX_COMMAND_LEN];
        command.copy_from_slice(&bytes[15..31]);
        Ok(Self {
            tag: read_u32(bytes, 4),
            data_transfer_length: read_u32(bytes, 8),
            flags: bytes[12],
            lun: bytes[13] & 0x0F,
            command_len,
            command,
        })
    }
}

/// CSW 状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CswStatus {
    /// 命令成功
    Passed,
    /// 命令失败，需要 REQUEST SENSE
    Failed,
    /// 相位错误，需要复位恢复
    PhaseError,
}

impl CswStatus {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(CswStatus::Passed),
            1 => Some(CswStatus::Failed),
            2 => Some(CswStatus::PhaseError),
            _ => None,
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            CswStatus::Passed => 0,
            CswStatus::Failed => 1,
            CswStatus::PhaseError => 2,
        }
    }
}

/// 命令状态包装
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandStatusWrapper {
    /// 回显的标签
    pub tag: u32,
    /// 预期长度与实际传输长度之差
    pub data_residue: u32,
    /// 状态
    pub status: CswStatus,
}

impl CommandStatusWrapper {
    /// 线格式长度
    pub const LEN: usize = 13;

    /// 解析线格式，长度、签名或状态字节不合法时返回 `InvalidStatus`
    pub fn parse(bytes: &[u8]) -> Result<Self, MsdError> {
        if bytes.len() != Self::LEN || read_u32(bytes, 0) != CSW_SIGNATURE {
            return Err(MsdError::InvalidStatus);
        }
        let status = CswStatus::from_byte(bytes[12]).ok_or(MsdError::InvalidStatus)?;
        Ok(Self {
            tag: read_u32(bytes, 4),
            data_residue: read_u32(bytes, 8),
            status,
        })
    }

    /// 编码为线格式
    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[0..4].copy_from_slice(&CSW_SIGNATURE.to_le_bytes());
        out[4..8].copy_from_slice(&self.tag.to_le_bytes());
        out[8..12].copy_from_slice(&self.data_residue.to_le_bytes());
        out[12] = self.status.to_byte();
        out
    }

    /// 校验标签是否与刚发送的 CBW 一致
    pub fn check_tag(&self, expected: u32) -> Result<(), MsdError> {
        if self.tag != expected {
            return Err(MsdError::TagMismatch {
                expected,
                received: self.tag,
            });
        }
        Ok(())
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cbw_layout() {
        let cbw = CommandBlockWrapper::new(0x1122_3344, 512, true, 1, &[0x28, 0, 0, 0, 0, 8, 0, 0, 1, 0])
            .unwrap();
        let bytes = cbw.to_bytes();
        assert_eq!(&bytes[0..4], b"USBC");
        assert_eq!(&bytes[4..8], &[0x44, 0x33, 0x22, 0x11]);
        assert_eq!(&bytes[8..12], &[0x00, 0x02, 0x00, 0x00]);
        assert_eq!(bytes[12], 0x80);
        assert_eq!(bytes[13], 1);
        assert_eq!(bytes[14], 10);
        assert_eq!(bytes[15], 0x28);
        assert_eq!(bytes[20], 8);
        assert!(bytes[25..].iter().all(|&b| b == 0));

        let parsed = CommandBlockWrapper::parse(&bytes).unwrap();
        assert_eq!(parsed, cbw);
        assert!(parsed.is_data_in());
        assert_eq!(parsed.command().len(), 10);
    }

    #[test]
    fn test_cbw_rejects_bad_command_length() {
        assert_eq!(
            CommandBlockWrapper::new(1, 0, false, 0, &[]),
            Err(MsdError::InvalidCommand)
        );
        assert_eq!(
            CommandBlockWrapper::new(1, 0, false, 0, &[0; 17]),
            Err(MsdError::InvalidCommand)
        );
    }

    #[test]
    fn test_csw_parse() {
        let raw = [b'U', b'S', b'B', b'S', 7, 0, 0, 0, 0x10, 0, 0, 0, 1];
        let csw = CommandStatusWrapper::parse(&raw).unwrap();
        assert_eq!(csw.tag, 7);
        assert_eq!(csw.data_residue, 16);
        assert_eq!(csw.status, CswStatus::Failed);
        assert_eq!(csw.to_bytes(), raw);
        assert_eq!(csw.check_tag(7), Ok(()));
        assert_eq!(
            csw.check_tag(8),
            Err(MsdError::TagMismatch {
                expected: 8,
                received: 7
            })
        );
    }

    #[test]
    fn test_csw_rejects_garbage() {
        let mut raw = CommandStatusWrapper {
            tag: 1,
            data_residue: 0,
            status: CswStatus::Passed,
        }
        .to_bytes();
        assert!(CommandStatusWrapper::parse(&raw[..12]).is_err());

        raw[12] = 3;
        assert_eq!(CommandStatusWrapper::parse(&raw), Err(MsdError::InvalidStatus));

        raw[12] = 0;
        raw[0] = b'X';
        assert_eq!(CommandStatusWrapper::parse(&raw), Err(MsdError::InvalidStatus));
    }
}
