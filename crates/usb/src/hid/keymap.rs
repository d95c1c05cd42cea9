//! HID 键盘用法码到通用键码的映射

use cdi::KeyCode;

/// 用法码 (Usage Page 0x07) 到键码的查找表，0 表示未映射
#[rustfmt::skip]
static USAGE_TO_KEYCODE: [u8; 256] = [
      0,   0,   0,   0,  30,  48,  46,  32,  18,  33,  34,  35,  23,  36,  37,  38,
     50,  49,  24,  25,  16,  19,  31,  20,  22,  47,  17,  45,  21,  44,   2,   3,
      4,   5,   6,   7,   8,   9,  10,  11,  28,   1,  14,  15,  57,  12,  13,  26,
     27,  43,  43,  39,  40,  41,  51,  52,  53,  58,  59,  60,  61,  62,  63,  64,
     65,  66,  67,  68,  87,  88,  99,  70, 119, 110, 102, 104, 111, 107, 109, 106,
    105, 108, 103,  69,  98,  55,  74,  78,  96,  79,  80,  81,  75,  76,  77,  71,
     72,  73,  82,  83,  86, 127, 116, 117, 183, 184, 185, 186, 187, 188, 189, 190,
    191, 192, 193, 194, 134, 138, 130, 132, 128, 129, 131, 137, 133, 135, 136, 113,
    115, 114,   0,   0,   0, 121,   0,  89,  93, 124,  92,  94,  95,   0,   0,   0,
    122, 123,  90,  91,  85,   0,   0,   0,   0,   0,   0,   0, 111,   0,   0,   0,
      0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,
      0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,
      0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,
      0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,
     29,  42,  56, 125,  97,  54, 100, 126, 164, 166, 165, 163, 161, 115, 114, 113,
    150, 158, 159, 128, 136, 177, 178, 176, 142, 152, 173, 140,   0,   0,   0,   0,
];

/// Caps Lock 的用法码
pub const USAGE_CAPS_LOCK: u8 = 0x39;
/// Scroll Lock 的用法码
pub const USAGE_SCROLL_LOCK: u8 = 0x47;
/// Num Lock 的用法码
pub const USAGE_NUM_LOCK: u8 = 0x53;
/// 第一个修饰键（左 Ctrl）的用法码，修饰字节的第 i 位对应 `0xE0 + i`
pub const USAGE_LEFT_CTRL: u8 = 0xE0;

/// 0..=3 是 "无按键"、ErrorRollOver、POSTFail 和保留值
pub fn is_key_usage(usage: u8) -> bool {
    usage > 3
}

/// 查表，未映射的用法码返回 `None`
pub fn usage_to_keycode(usage: u8) -> Option<KeyCode> {
    match USAGE_TO_KEYCODE[usage as usize] {
        0 => None,
        code => Some(KeyCode(code as u16)),
    }
}
