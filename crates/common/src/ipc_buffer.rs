//! 用户态 IPC Buffer 的布局
//!
//! 消息长度超过消息寄存器数量时，剩余部分经由这块与用户态共享的内存
//! 传递。布局与 seL4 的 `seL4_IPCBuffer` 对应。

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::config::{MSG_MAX_EXTRA_CAPS, MSG_MAX_LEN};

#[repr(C)]
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct IpcBuffer {
    /// 消息描述字的副本
    pub tag: usize,
    /// 消息正文
    pub msg: [usize; MSG_MAX_LEN],
    /// 用户自定义数据
    pub user_data: usize,
    /// 发送时存放 extra cap 的 cptr，接收时被解包的 badge 写回到这里
    pub caps_or_badges: [usize; MSG_MAX_EXTRA_CAPS],
    /// 接收 capability 时使用的 CNode cptr
    pub receive_cnode: usize,
    /// 接收 slot 在 CNode 中的下标
    pub receive_index: usize,
    /// 接收 slot 的寻址深度
    pub receive_depth: usize,
}

impl IpcBuffer {
    pub const fn empty() -> Self {
        IpcBuffer {
            tag: 0,
            msg: [0; MSG_MAX_LEN],
            user_data: 0,
            caps_or_badges: [0; MSG_MAX_EXTRA_CAPS],
            receive_cnode: 0,
            receive_index: 0,
            receive_depth: 0,
        }
    }

    /// 第 i 个 extra cap 的 cptr
    #[inline]
    pub fn extra_cptr(&self, i: usize) -> usize {
        self.caps_or_badges[i]
    }

    /// 清空整个 buffer
    #[inline]
    pub fn clear(&mut self) {
        self.as_mut_bytes().fill(0);
    }
}
