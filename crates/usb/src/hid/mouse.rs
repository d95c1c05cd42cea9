//! 启动协议鼠标报告解码

use bitflags::bitflags;
use cdi::{InputSink, MouseButton};

/// 启动协议鼠标报告的最短长度：按键、X、Y
pub const MOUSE_REPORT_MIN: usize = 3;

/// 启动协议鼠标报告缓冲区上限（含滚轮和厂商字节）
pub const MOUSE_REPORT_MAX: usize = 8;

bitflags! {
    /// 按键字节
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Buttons: u8 {
        /// 左键
        const LEFT = 1 << 0;
        /// 右键
        const RIGHT = 1 << 1;
        /// 中键
        const MIDDLE = 1 << 2;
    }
}

const BUTTON_MAP: [(Buttons, MouseButton); 3] = [
    (Buttons::LEFT, MouseButton::Left),
    (Buttons::RIGHT, MouseButton::Right),
    (Buttons::MIDDLE, MouseButton::Middle),
];

/// 处理一份鼠标报告
///
/// 每份报告都发送一次移动和三个按键的当前状态。
pub fn process_report(report: &[u8], sink: &dyn InputSink) {
    if report.len() < MOUSE_REPORT_MIN {
        log::debug!("hid: short mouse report ({} bytes)", report.len());
        return;
    }
    let buttons = Buttons::from_bits_truncate(report[0]);
    let dx = report[1] as i8 as i32;
    let dy = report[2] as i8 as i32;

    sink.mouse_move(dx, dy);
    for (flag, button) in BUTTON_MAP {
        sink.mouse_button(button, buttons.contains(flag));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;
    use cdi::KeyCode;
    use sync::SpinLock;

    #[derive(Debug, PartialEq)]
    enum Event {
        Move(i32, i32),
        Button(MouseButton, bool),
    }

    #[derive(Default)]
    struct Recorder {
        events: SpinLock<Vec<Event>>,
    }

    impl InputSink for Recorder {
        fn key_event(&self, _key: KeyCode, _pressed: bool) {}

        fn mouse_move(&self, dx: i32, dy: i32) {
            self.events.lock().push(Event::Move(dx, dy));
        }

        fn mouse_button(&self, button: MouseButton, pressed: bool) {
            self.events.lock().push(Event::Button(button, pressed));
        }
    }

    #[test]
    fn test_signed_motion_and_buttons() {
        cdi::mock::init_test_env();
        let sink = Recorder::default();
        process_report(&[0b101, 0xFE, 0x05, 0x00], &sink);
        assert_eq!(
            *sink.events.lock(),
            [
                Event::Move(-2, 5),
                Event::Button(MouseButton::Left, true),
                Event::Button(MouseButton::Right, false),
                Event::Button(MouseButton::Middle, true),
            ]
        );
    }

    #[test]
    fn test_short_report_ignored() {
        cdi::mock::init_test_env();
        let sink = Recorder::default();
        process_report(&[1, 2], &sink);
        assert!(sink.events.lock().is_empty());
    }
}
