//! 进程间通信
//!
//! Endpoint 和 Notification 两种内核对象，以及线程间消息搬运的全部
//! 路径。Endpoint 是同步会合点，发送和接收双方都可能在它的队列上
//! 阻塞；Notification 是异步信号字，badge 按位累积。消息正文经由
//! 消息寄存器和 IPC Buffer 传递，capability 随消息转移时在接收方的
//! cspace 里落位。
#![cfg_attr(not(test), no_std)]

mod endpoint;
mod notification;
mod transfer;

pub use endpoint::{EpState, Endpoint};
pub use notification::{Notification, NtfnState};
pub use transfer::Transfer;
