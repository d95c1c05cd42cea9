//! 启动协议键盘报告解码
//!
//! 报告固定 8 字节：
//!
//! | 字节 | 内容 |
//! |------|------|
//! | 0    | 修饰键位图（左 Ctrl/Shift/Alt/GUI，右 Ctrl/Shift/Alt/GUI） |
//! | 1    | 保留 |
//! | 2..8 | 最多 6 个同时按下的普通键用法码 |
//!
//! 协议没有释放通知：上一份报告里的键如果在新报告的 6 个槽里找不到，就合成一次释放。

use bitflags::bitflags;
use cdi::InputSink;

use super::keymap::{
    USAGE_CAPS_LOCK, USAGE_LEFT_CTRL, USAGE_NUM_LOCK, USAGE_SCROLL_LOCK, is_key_usage,
    usage_to_keycode,
};

/// 启动协议键盘报告长度
pub const KEYBOARD_REPORT_LEN: usize = 8;

const KEY_SLOTS: core::ops::Range<usize> = 2..KEYBOARD_REPORT_LEN;

/// 所有槽都是该值表示按键过多，报告无效
const USAGE_ERROR_ROLL_OVER: u8 = 0x01;

bitflags! {
    /// 修饰字节
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Modifiers: u8 {
        /// 左 Ctrl
        const LEFT_CTRL = 1 << 0;
        /// 左 Shift
        const LEFT_SHIFT = 1 << 1;
        /// 左 Alt
        const LEFT_ALT = 1 << 2;
        /// 左 GUI
        const LEFT_GUI = 1 << 3;
        /// 右 Ctrl
        const RIGHT_CTRL = 1 << 4;
        /// 右 Shift
        const RIGHT_SHIFT = 1 << 5;
        /// 右 Alt
        const RIGHT_ALT = 1 << 6;
        /// 右 GUI
        const RIGHT_GUI = 1 << 7;
    }
}

bitflags! {
    /// 键盘 LED 输出报告
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Leds: u8 {
        /// Num Lock
        const NUM_LOCK = 1 << 0;
        /// Caps Lock
        const CAPS_LOCK = 1 << 1;
        /// Scroll Lock
        const SCROLL_LOCK = 1 << 2;
    }
}

impl Leds {
    fn for_usage(usage: u8) -> Option<Self> {
        match usage {
            USAGE_NUM_LOCK => Some(Leds::NUM_LOCK),
            USAGE_CAPS_LOCK => Some(Leds::CAPS_LOCK),
            USAGE_SCROLL_LOCK => Some(Leds::SCROLL_LOCK),
            _ => None,
        }
    }
}

/// 键盘状态：上一份有效报告和本地 LED 位图
#[derive(Debug, Clone)]
pub struct KeyboardState {
    last: [u8; KEYBOARD_REPORT_LEN],
    leds: Leds,
}

impl Default for KeyboardState {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyboardState {
    /// 没有按键按下的初始状态
    pub const fn new() -> Self {
        Self {
            last: [0; KEYBOARD_REPORT_LEN],
            leds: Leds::empty(),
        }
    }

    /// 当前 LED 位图
    pub fn leds(&self) -> Leds {
        self.leds
    }

    /// 当前按下的修饰键
    pub fn modifiers(&self) -> Modifiers {
        Modifiers::from_bits_retain(self.last[0])
    }

    /// 当前按下的普通键用法码
    pub fn pressed(&self) -> impl Iterator<Item = u8> + '_ {
        self.last[KEY_SLOTS].iter().copied().filter(|&u| is_key_usage(u))
    }

    /// 处理一份报告并向 `sink` 发送事件
    ///
    /// 锁定键改变了 LED 位图时返回新的位图，调用方负责发给设备。
    pub fn process(&mut self, report: &[u8], sink: &dyn InputSink) -> Option<Leds> {
        if report.len() < 3 {
            log::debug!("hid: short keyboard report ({} bytes)", report.len());
            return None;
        }
        let mut new = [0u8; KEYBOARD_REPORT_LEN];
        let n = report.len().min(KEYBOARD_REPORT_LEN);
        new[..n].copy_from_slice(&report[..n]);

        self.process_modifiers(new[0], sink);

        // 幻影状态：只接受修饰键，保留上次的按键集合
        if new[KEY_SLOTS].iter().all(|&u| u == USAGE_ERROR_ROLL_OVER) {
            self.last[0] = new[0];
            return None;
        }

        // 擦除与旧报告匹配的槽，剩下的才是新按下的键
        let mut scratch = new;
        for i in KEY_SLOTS {
            let usage = self.last[i];
            // 旧报告里重复的用法码只处理第一次出现
            if !is_key_usage(usage) || self.last[KEY_SLOTS.start..i].contains(&usage) {
                continue;
            }
            let mut found = false;
            for slot in &mut scratch[KEY_SLOTS] {
                if *slot == usage {
                    *slot = 0;
                    found = true;
                }
            }
            if !found {
                emit_key(sink, usage, false);
            }
        }

        let before = self.leds;
        for i in KEY_SLOTS {
            let usage = scratch[i];
            if !is_key_usage(usage) {
                continue;
            }
            // 同一份报告里重复出现的用法码只报一次
            for slot in &mut scratch[i + 1..KEYBOARD_REPORT_LEN] {
                if *slot == usage {
                    *slot = 0;
                }
            }
            emit_key(sink, usage, true);
            if let Some(led) = Leds::for_usage(usage) {
                self.leds.toggle(led);
            }
        }

        self.last = new;
        (self.leds != before).then_some(self.leds)
    }

    fn process_modifiers(&self, new: u8, sink: &dyn InputSink) {
        let changed = self.last[0] ^ new;
        for bit in 0..8u8 {
            if changed & (1 << bit) != 0 {
                emit_key(sink, USAGE_LEFT_CTRL + bit, new & (1 << bit) != 0);
            }
        }
    }
}

fn emit_key(sink: &dyn InputSink, usage: u8, pressed: bool) {
    match usage_to_keycode(usage) {
        Some(key) => sink.key_event(key, pressed),
        None => log::debug!("hid: unmapped usage {:#04x}", usage),
    }
}
