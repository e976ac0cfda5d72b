//! capability 空间模型
//!
//! IPC 的 capability 传递需要的最小 cspace：capability 的种类与权限、
//! 存放 capability 的 slot（带 MDB 链表）以及 CNode 寻址。
#![cfg_attr(not(test), no_std)]

mod capability;
mod slot;

pub use capability::{CapRights, Capability};
pub use slot::{CapSlot, MdbNode, cap_slot_insert, resolve_address};
