//! 输入事件接口
//!
//! HID 类驱动把解码后的报告转换成通用输入事件，交给键盘/鼠标子系统。
//! [`InputSink`] 的方法会在传输完成路径（中断上下文）上调用，必须是非阻塞的。

/// 通用键码（与 Linux input 子系统的键码一致）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyCode(pub u16);

#[allow(missing_docs)]
impl KeyCode {
    pub const ESC: Self = Self(1);
    pub const A: Self = Self(30);
    pub const B: Self = Self(48);
    pub const C: Self = Self(46);
    pub const ENTER: Self = Self(28);
    pub const SPACE: Self = Self(57);
    pub const LEFTCTRL: Self = Self(29);
    pub const LEFTSHIFT: Self = Self(42);
    pub const RIGHTSHIFT: Self = Self(54);
    pub const LEFTALT: Self = Self(56);
    pub const CAPSLOCK: Self = Self(58);
    pub const NUMLOCK: Self = Self(69);
    pub const SCROLLLOCK: Self = Self(70);
    pub const RIGHTCTRL: Self = Self(97);
    pub const RIGHTALT: Self = Self(100);
    pub const LEFTMETA: Self = Self(125);
    pub const RIGHTMETA: Self = Self(126);
}

/// 鼠标按键
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    /// 左键
    Left,
    /// 右键
    Right,
    /// 中键
    Middle,
}

/// 输入事件接收者
pub trait InputSink: Send + Sync {
    /// 按键按下（`pressed == true`）或释放
    fn key_event(&self, key: KeyCode, pressed: bool);

    /// 鼠标相对移动
    fn mouse_move(&self, dx: i32, dy: i32);

    /// 鼠标按键状态
    fn mouse_button(&self, button: MouseButton, pressed: bool);
}
