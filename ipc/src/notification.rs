//! Notification
//!
//! 异步信号字。信号没人收时 badge 按位或累积在 msg_identifier 里，
//! 等待者出现后一次性取走。可以和一个 TCB 绑定，绑定后即使线程阻塞
//! 在 Endpoint 的接收上，信号也能把它拉起来。

use common::ArchReg;
use common::{convert_to_mut_type_ref, convert_to_option_mut_type_ref};
use task::scheduler::possible_switch_to;
use task::{Tcb, TcbQueue, ThreadState, set_thread_state};

use crate::transfer::Transfer;

#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NtfnState {
    #[default]
    Idle = 0,
    /// 队列里有阻塞的等待者
    Waiting = 1,
    /// 有未取走的信号
    Active = 2,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Notification {
    state: NtfnState,
    /// 累积的 badge
    msg_identifier: usize,
    queue: TcbQueue,
    /// 绑定的 TCB 的地址，0 表示没有绑定
    bound_tcb: usize,
}

impl Notification {
    pub fn new() -> Self {
        Notification::default()
    }

    #[inline]
    pub fn ptr(&self) -> usize {
        self as *const Notification as usize
    }

    #[inline]
    pub fn state(&self) -> NtfnState {
        self.state
    }

    #[inline]
    pub fn msg_identifier(&self) -> usize {
        self.msg_identifier
    }

    #[inline]
    pub fn bound_tcb(&self) -> usize {
        self.bound_tcb
    }

    /// 置为 Active 并记下 badge
    #[inline]
    pub fn active(&mut self, badge: usize) {
        self.state = NtfnState::Active;
        self.msg_identifier = badge;
    }

    #[inline]
    pub fn bind_tcb(&mut self, tcb: &mut Tcb) {
        self.bound_tcb = tcb.ptr();
    }

    #[inline]
    pub fn unbind_tcb(&mut self) {
        self.bound_tcb = 0;
    }

    /// 解除绑定，同时清掉 TCB 那一侧的记录
    pub fn safe_unbind_tcb(&mut self) {
        let tcb = self.bound_tcb;
        self.unbind_tcb();
        if tcb != 0 {
            convert_to_mut_type_ref::<Tcb>(tcb).unbind_notification();
        }
    }

    /// 把一个阻塞等信号的线程摘下来并置为 Inactive
    pub fn cancel_signal(&mut self, tcb: &mut Tcb) {
        self.queue.ep_dequeue(tcb);
        if self.queue.empty() {
            self.state = NtfnState::Idle;
        }
        set_thread_state(tcb, ThreadState::Inactive);
    }

    /// 清空等待队列，队列上的线程全部重启并重新入就绪队列
    pub fn cancel_all_signal(&mut self) {
        if self.state != NtfnState::Waiting {
            return;
        }
        let mut cursor = self.queue.head;
        self.state = NtfnState::Idle;
        self.queue = TcbQueue::new();
        while cursor != 0 {
            let thread = convert_to_mut_type_ref::<Tcb>(cursor);
            cursor = thread.ep_next;
            set_thread_state(thread, ThreadState::Restart);
            thread.sched_enqueue();
        }
        task::scheduler::reschedule_required();
    }

    /// 发送信号
    ///
    /// - Idle：绑定线程正阻塞在 Endpoint 接收上时直接把它拉起来收
    ///   signal，否则记下 badge 转 Active
    /// - Waiting：唤醒队头的等待者
    /// - Active：badge 按位或进已有的 msg_identifier
    pub fn send_signal(&mut self, badge: usize) {
        match self.state {
            NtfnState::Idle => {
                if let Some(tcb) = convert_to_option_mut_type_ref::<Tcb>(self.bound_tcb) {
                    if tcb.get_state() == ThreadState::BlockedOnReceive {
                        tcb.cancel_ipc();
                        set_thread_state(tcb, ThreadState::Running);
                        tcb.context.set_register(ArchReg::Badge, badge);
                        possible_switch_to(tcb);
                    } else {
                        self.active(badge);
                    }
                } else {
                    self.active(badge);
                }
            }
            NtfnState::Waiting => {
                let dest = convert_to_mut_type_ref::<Tcb>(self.queue.head);
                self.queue.ep_dequeue(dest);
                if self.queue.empty() {
                    self.state = NtfnState::Idle;
                }
                set_thread_state(dest, ThreadState::Running);
                dest.context.set_register(ArchReg::Badge, badge);
                possible_switch_to(dest);
            }
            NtfnState::Active => {
                self.msg_identifier |= badge;
            }
        }
    }

    /// 等待信号
    ///
    /// Active 时立即取走累积的 badge；否则阻塞等待挂队列，非阻塞等待
    /// 把 badge 寄存器清零后返回。
    pub fn receive_signal(&mut self, recv_thread: &mut Tcb, is_blocking: bool) {
        match self.state {
            NtfnState::Idle | NtfnState::Waiting => {
                if is_blocking {
                    recv_thread.state.blocking_object = self.ptr();
                    set_thread_state(recv_thread, ThreadState::BlockedOnNotification);
                    self.queue.ep_append(recv_thread);
                    self.state = NtfnState::Waiting;
                } else {
                    recv_thread.context.set_register(ArchReg::Badge, 0);
                }
            }
            NtfnState::Active => {
                recv_thread
                    .context
                    .set_register(ArchReg::Badge, self.msg_identifier);
                self.state = NtfnState::Idle;
            }
        }
    }

    /// 被绑定线程在接收前探测信号，取走则返回 true
    pub(crate) fn try_complete_signal(&mut self, tcb: &mut Tcb) -> bool {
        if self.state == NtfnState::Active {
            tcb.context
                .set_register(ArchReg::Badge, self.msg_identifier);
            self.state = NtfnState::Idle;
            return true;
        }
        false
    }
}
