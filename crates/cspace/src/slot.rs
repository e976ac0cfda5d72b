//! capability slot 与 MDB 链表
//!
//! 每个 slot 除了 capability 本身还带一个 MDB（mapping database）节点，
//! 同一个对象派生出的 capability 通过 prev / next 串成链，删除和撤销
//! 沿着这条链进行。节点之间用 slot 的地址互相引用，0 表示链表端点。

use common::{LookupFault, convert_to_mut_type_ref};

use crate::capability::Capability;

/// MDB 链表节点
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MdbNode {
    pub prev: usize,
    pub next: usize,
    pub revocable: bool,
    pub first_badged: bool,
}

/// 存放一个 capability 的 slot
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapSlot {
    pub cap: Capability,
    pub mdb: MdbNode,
}

impl CapSlot {
    pub const fn empty() -> Self {
        CapSlot {
            cap: Capability::Null,
            mdb: MdbNode {
                prev: 0,
                next: 0,
                revocable: false,
                first_badged: false,
            },
        }
    }

    #[inline]
    pub fn ptr(&self) -> usize {
        self as *const CapSlot as usize
    }

    /// 把这个 slot 从 MDB 链表中摘除并清空
    ///
    /// 只删除当前 slot 本身，不递归处理后代。
    pub fn delete_one(&mut self) {
        let MdbNode { prev, next, .. } = self.mdb;
        if let Some(prev_slot) = (prev != 0).then(|| convert_to_mut_type_ref::<CapSlot>(prev)) {
            prev_slot.mdb.next = next;
        }
        if let Some(next_slot) = (next != 0).then(|| convert_to_mut_type_ref::<CapSlot>(next)) {
            next_slot.mdb.prev = prev;
        }
        self.cap = Capability::Null;
        self.mdb = MdbNode::default();
    }
}

/// 把 capability 写入 dest，并把 dest 挂到 src 在 MDB 链表中的后面
pub fn cap_slot_insert(cap: Capability, src: &mut CapSlot, dest: &mut CapSlot) {
    debug_assert!(dest.cap.is_null());
    let first_badged = match (&cap, &src.cap) {
        (Capability::Endpoint { badge, .. }, Capability::Endpoint { badge: src_badge, .. }) => {
            *badge != 0 && *badge != *src_badge
        }
        (
            Capability::Notification { badge, .. },
            Capability::Notification { badge: src_badge, .. },
        ) => *badge != 0 && *badge != *src_badge,
        _ => false,
    };
    dest.cap = cap;
    dest.mdb.prev = src.ptr();
    dest.mdb.next = src.mdb.next;
    dest.mdb.revocable = first_badged;
    dest.mdb.first_badged = first_badged;
    if let Some(next_slot) =
        (src.mdb.next != 0).then(|| convert_to_mut_type_ref::<CapSlot>(src.mdb.next))
    {
        next_slot.mdb.prev = dest.ptr();
    }
    src.mdb.next = dest.ptr();
}

/// 在一个单级 CNode 中按 cptr 寻址
///
/// - `root`  必须是一个 CNode capability
/// - `cptr`  待解析的 capability 指针
/// - `depth` 剩余的寻址位数
///
/// 返回找到的 slot 和剩余未解析的位数，调用方按需检查剩余位数是否为 0。
pub fn resolve_address(
    root: &Capability,
    cptr: usize,
    depth: usize,
) -> Result<(&'static mut CapSlot, usize), LookupFault> {
    let Capability::CNode { ptr, radix } = *root else {
        return Err(LookupFault::InvalidRoot);
    };
    if radix > depth {
        return Err(LookupFault::DepthMismatch {
            bits_left: depth,
            bits_found: radix,
        });
    }
    let bits_remaining = depth - radix;
    let index = (cptr >> bits_remaining) & ((1 << radix) - 1);
    let slot = convert_to_mut_type_ref::<CapSlot>(ptr + index * core::mem::size_of::<CapSlot>());
    Ok((slot, bits_remaining))
}
