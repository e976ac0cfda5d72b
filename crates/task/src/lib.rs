//! 线程控制块与调度
//!
//! TCB 的结构、线程状态、挂在 Endpoint / Notification 上的侵入式等待
//! 队列，以及 IPC 路径会触碰到的调度器操作。
#![cfg_attr(not(test), no_std)]

mod queue;
pub mod scheduler;
mod tcb;
mod thread_state;

pub use queue::TcbQueue;
pub use scheduler::{possible_switch_to, reschedule_required, schedule, schedule_tcb};
pub use tcb::{Tcb, set_thread_state};
pub use thread_state::{TcbState, ThreadState};
