//! USB 错误类型

use core::fmt;

/// USB 传输层错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbError {
    /// 端点返回 STALL，需要先清除才能继续使用
    Stalled,
    /// 超过调用者给定的时限
    TimedOut,
    /// 传输被取消
    Aborted,
    /// 设备已拔出或被隔离
    NoDevice,
    /// 端点处于 halt 状态
    Halted,
    /// 请求的方向或类型与端点不符
    EndpointMismatch,
    /// 不支持的传输类型或请求
    NotSupported,
    /// 在中断上下文中请求了阻塞操作
    WouldBlock,
    /// 设备状态不允许该操作
    InvalidState,
    /// 描述符格式错误
    Malformed,
    /// 地址池耗尽
    NoAddress,
    /// 设备忙（例如枚举尚未退出）
    Busy,
    /// 主控制器拒绝了请求
    HostError,
}

impl fmt::Display for UsbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            UsbError::Stalled => "endpoint stalled",
            UsbError::TimedOut => "transfer timed out",
            UsbError::Aborted => "transfer aborted",
            UsbError::NoDevice => "no such device",
            UsbError::Halted => "endpoint halted",
            UsbError::EndpointMismatch => "endpoint direction or type mismatch",
            UsbError::NotSupported => "not supported",
            UsbError::WouldBlock => "would block in interrupt context",
            UsbError::InvalidState => "invalid device state",
            UsbError::Malformed => "malformed descriptor",
            UsbError::NoAddress => "no free usb address",
            UsbError::Busy => "device busy",
            UsbError::HostError => "host controller error",
        };
        f.write_str(msg)
    }
}

/// 类驱动 `setup` 错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupError {
    /// 缺少所需的端点
    MissingEndpoint,
    /// 类描述符无法读取或格式错误
    Descriptor,
    /// 传输失败
    Transport(UsbError),
    /// 缓冲区分配失败
    NoMemory,
    /// 驱动不支持该接口
    Unsupported,
}

impl From<UsbError> for SetupError {
    fn from(e: UsbError) -> Self {
        match e {
            UsbError::Malformed => SetupError::Descriptor,
            other => SetupError::Transport(other),
        }
    }
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupError::MissingEndpoint => write!(f, "required endpoint missing"),
            SetupError::Descriptor => write!(f, "class descriptor unreadable"),
            SetupError::Transport(e) => write!(f, "transport error: {}", e),
            SetupError::NoMemory => write!(f, "out of memory"),
            SetupError::Unsupported => write!(f, "interface not supported"),
        }
    }
}
