//! 消息描述字 `MessageInfo`
//!
//! 一条 IPC 消息的元信息压缩在一个机器字中，布局与 seL4 保持一致：
//!
//! | 63..12 | 11..9          | 8..7       | 6..0   |
//! |--------|----------------|------------|--------|
//! | label  | caps_unwrapped | extra_caps | length |
//!
//! 这个字在线程的 MsgInfo 寄存器和 IPC Buffer 之间传递，因此提供
//! `from_word` / `to_word`，从不可信来源恢复时使用 `from_word_security`。

use bit_field::BitField;

use crate::config::MSG_MAX_LEN;

const LENGTH_RANGE: core::ops::Range<usize> = 0..7;
const EXTRA_CAPS_RANGE: core::ops::Range<usize> = 7..9;
const CAPS_UNWRAPPED_RANGE: core::ops::Range<usize> = 9..12;
const LABEL_RANGE: core::ops::Range<usize> = 12..64;

#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct MessageInfo(usize);

impl MessageInfo {
    #[inline]
    pub fn new(label: usize, caps_unwrapped: usize, extra_caps: usize, length: usize) -> Self {
        let mut info = MessageInfo::default();
        info.set_label(label);
        info.set_caps_unwrapped(caps_unwrapped);
        info.set_extra_caps(extra_caps);
        info.set_length(length);
        info
    }

    #[inline]
    pub fn from_word(word: usize) -> Self {
        Self(word)
    }

    /// 从用户提供的字恢复消息描述字，消息长度会被截断到 [`MSG_MAX_LEN`]
    #[inline]
    pub fn from_word_security(word: usize) -> Self {
        let mut info = Self::from_word(word);
        if info.length() > MSG_MAX_LEN {
            info.set_length(MSG_MAX_LEN);
        }
        info
    }

    #[inline]
    pub fn to_word(self) -> usize {
        self.0
    }

    #[inline]
    pub fn label(&self) -> usize {
        self.0.get_bits(LABEL_RANGE)
    }

    #[inline]
    pub fn set_label(&mut self, label: usize) {
        self.0.set_bits(LABEL_RANGE, label);
    }

    #[inline]
    pub fn caps_unwrapped(&self) -> usize {
        self.0.get_bits(CAPS_UNWRAPPED_RANGE)
    }

    #[inline]
    pub fn set_caps_unwrapped(&mut self, mask: usize) {
        self.0.set_bits(CAPS_UNWRAPPED_RANGE, mask);
    }

    #[inline]
    pub fn extra_caps(&self) -> usize {
        self.0.get_bits(EXTRA_CAPS_RANGE)
    }

    #[inline]
    pub fn set_extra_caps(&mut self, count: usize) {
        self.0.set_bits(EXTRA_CAPS_RANGE, count);
    }

    #[inline]
    pub fn length(&self) -> usize {
        self.0.get_bits(LENGTH_RANGE)
    }

    #[inline]
    pub fn set_length(&mut self, length: usize) {
        self.0.set_bits(LENGTH_RANGE, length);
    }
}
