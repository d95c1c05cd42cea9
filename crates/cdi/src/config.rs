//! 配置常量

/// 控制传输的默认超时（毫秒）
pub const DEFAULT_CONTROL_TIMEOUT_MS: u64 = 1000;

/// 批量传输的默认超时（毫秒）
pub const DEFAULT_BULK_TIMEOUT_MS: u64 = 5000;

/// 拔出设备时等待枚举退出的默认超时（毫秒）
pub const DEFAULT_DETACH_TIMEOUT_MS: u64 = 1000;

/// 默认的中断线数量
pub const IRQ_LINES: usize = 32;

/// 可分配的最大 USB 地址
pub const MAX_USB_ADDRESS: u8 = 127;

/// USB 总线配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbConfig {
    /// 枚举及类驱动控制传输超时
    pub control_timeout_ms: u64,
    /// 批量传输超时
    pub bulk_timeout_ms: u64,
    /// detach 等待进行中的枚举退出的超时
    pub detach_timeout_ms: u64,
    /// 同时挂载的最大设备数
    pub max_devices: usize,
}

impl Default for UsbConfig {
    fn default() -> Self {
        Self {
            control_timeout_ms: DEFAULT_CONTROL_TIMEOUT_MS,
            bulk_timeout_ms: DEFAULT_BULK_TIMEOUT_MS,
            detach_timeout_ms: DEFAULT_DETACH_TIMEOUT_MS,
            max_devices: MAX_USB_ADDRESS as usize,
        }
    }
}
