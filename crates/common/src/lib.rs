//! 内核对象模型的公共部分
//!
//! 这里存放被 cspace / task / ipc 共享的基础设施：配置常量、消息描述字、
//! 错误（Fault）类型、IPC Buffer 布局、寄存器模型以及地址到对象引用的
//! 转换工具。
#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod fault;
pub mod ipc_buffer;
pub mod log_impl;
pub mod message;
pub mod registers;
mod utils;

pub use fault::{Fault, LookupFault};
pub use ipc_buffer::IpcBuffer;
pub use message::MessageInfo;
pub use registers::{ArchContext, ArchReg};
pub use utils::*;
