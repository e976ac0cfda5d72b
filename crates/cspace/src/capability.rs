//! capability 的种类与权限

use bitflags::bitflags;

bitflags! {
    /// capability 携带的访问权限
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CapRights: usize {
        const WRITE = 1 << 0;
        const READ = 1 << 1;
        const GRANT = 1 << 2;
        const GRANT_REPLY = 1 << 3;
    }
}

/// IPC 路径上会出现的 capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Capability {
    #[default]
    Null,
    /// 指向 Endpoint 对象，badge 用于区分发送方
    Endpoint {
        ptr: usize,
        badge: usize,
        rights: CapRights,
    },
    /// 指向 Notification 对象
    Notification {
        ptr: usize,
        badge: usize,
        rights: CapRights,
    },
    /// 应答 capability，指向被应答的 TCB
    Reply {
        tcb_ptr: usize,
        master: bool,
        can_grant: bool,
    },
    /// 单级 CNode，slot 数量为 `1 << radix`
    CNode { ptr: usize, radix: usize },
}

impl Capability {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Capability::Null)
    }

    /// 派生一个可以放进其他 slot 的副本
    ///
    /// Reply capability 不可派生，得到 Null，调用方据此中止传递。
    pub fn derive(&self) -> Capability {
        match *self {
            Capability::Null | Capability::Reply { .. } => Capability::Null,
            other => other,
        }
    }
}
