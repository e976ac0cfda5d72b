//! Endpoint
//!
//! 同步 IPC 的会合点。没有对端时发送者和接收者都挂在同一条等待队列
//! 上，状态标明队列里等的是哪一方；双方会合时消息当场搬运，队列空了
//! 状态回到 Idle。

use common::ArchReg;
use common::convert_to_mut_type_ref;
use task::scheduler::possible_switch_to;
use task::{Tcb, TcbQueue, ThreadState, set_thread_state};

use crate::transfer::Transfer;

#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EpState {
    #[default]
    Idle = 0,
    /// 队列里挂的是阻塞的发送者
    Send = 1,
    /// 队列里挂的是阻塞的接收者
    Recv = 2,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Endpoint {
    state: EpState,
    queue: TcbQueue,
}

impl Endpoint {
    pub fn new() -> Self {
        Endpoint::default()
    }

    #[inline]
    pub fn ptr(&self) -> usize {
        self as *const Endpoint as usize
    }

    #[inline]
    pub fn state(&self) -> EpState {
        self.state
    }

    #[inline]
    pub fn queue(&self) -> &TcbQueue {
        &self.queue
    }

    /// 把一个阻塞在这里的线程摘下来并置为 Inactive
    pub fn cancel_ipc(&mut self, tcb: &mut Tcb) {
        self.queue.ep_dequeue(tcb);
        if self.queue.empty() {
            self.state = EpState::Idle;
        }
        set_thread_state(tcb, ThreadState::Inactive);
    }

    /// 清空等待队列，队列上的线程全部重启并重新入就绪队列
    pub fn cancel_all_ipc(&mut self) {
        if self.state == EpState::Idle {
            return;
        }
        let mut cursor = self.queue.head;
        self.state = EpState::Idle;
        self.queue = TcbQueue::new();
        while cursor != 0 {
            let thread = convert_to_mut_type_ref::<Tcb>(cursor);
            cursor = thread.ep_next;
            set_thread_state(thread, ThreadState::Restart);
            thread.sched_enqueue();
        }
        task::scheduler::reschedule_required();
    }

    /// 只驱逐携带指定 badge 的阻塞发送者，其余发送者留在队列上
    pub fn cancel_badged_sends(&mut self, badge: usize) {
        if self.state != EpState::Send {
            return;
        }
        let mut queue = self.queue;
        self.state = EpState::Idle;
        self.queue = TcbQueue::new();
        let mut cursor = queue.head;
        while cursor != 0 {
            let thread = convert_to_mut_type_ref::<Tcb>(cursor);
            cursor = thread.ep_next;
            if thread.state.blocking_ipc_badge == badge {
                set_thread_state(thread, ThreadState::Restart);
                thread.sched_enqueue();
                queue.ep_dequeue(thread);
            }
        }
        self.queue = queue;
        if !self.queue.empty() {
            self.state = EpState::Send;
        }
        task::scheduler::reschedule_required();
    }

    /// 发送一条消息
    ///
    /// 没有接收者等待时，阻塞发送把 `src_thread` 挂到队尾，非阻塞发送
    /// 直接丢弃消息。有接收者时当场完成搬运；Call 语义下还会在接收者
    /// 那里放一个 reply capability，发送者转为等待应答。
    ///
    /// - `blocking` 没有对端时是否阻塞
    /// - `do_call` 是否是 Call
    /// - `can_grant` 发送者的 capability 是否带 Grant 权限
    /// - `badge` 发送者 capability 上的 badge
    /// - `can_grant_reply` 是否带 GrantReply 权限
    pub fn send_ipc(
        &mut self,
        src_thread: &mut Tcb,
        blocking: bool,
        do_call: bool,
        can_grant: bool,
        badge: usize,
        can_grant_reply: bool,
    ) {
        match self.state {
            EpState::Idle | EpState::Send => {
                if blocking {
                    src_thread.state.set(ThreadState::BlockedOnSend);
                    src_thread.state.blocking_object = self.ptr();
                    src_thread.state.blocking_ipc_can_grant = can_grant;
                    src_thread.state.blocking_ipc_badge = badge;
                    src_thread.state.blocking_ipc_can_grant_reply = can_grant_reply;
                    src_thread.state.blocking_ipc_is_call = do_call;
                    task::scheduler::schedule_tcb(src_thread);

                    self.queue.ep_append(src_thread);
                    self.state = EpState::Send;
                }
            }
            EpState::Recv => {
                let dest_thread = convert_to_mut_type_ref::<Tcb>(self.queue.head);
                self.queue.ep_dequeue(dest_thread);
                if self.queue.empty() {
                    self.state = EpState::Idle;
                }
                let ep_ptr = self.ptr();
                src_thread.do_ipc_transfer(dest_thread, Some(ep_ptr), badge, can_grant);
                let reply_can_grant = dest_thread.state.blocking_ipc_can_grant;
                set_thread_state(dest_thread, ThreadState::Running);
                possible_switch_to(dest_thread);
                if do_call {
                    if can_grant || can_grant_reply {
                        dest_thread.setup_caller_cap(src_thread, reply_can_grant);
                    } else {
                        set_thread_state(src_thread, ThreadState::Inactive);
                    }
                }
            }
        }
    }

    /// 接收一条消息
    ///
    /// 绑定 Notification 上有待取信号时优先消费信号并立即返回。没有
    /// 发送者等待时，阻塞接收挂队列，非阻塞接收把 badge 寄存器清零后
    /// 返回。有发送者时当场搬运，Call 的发送者转为等待应答。
    pub fn receive_ipc(&mut self, thread: &mut Tcb, is_blocking: bool, grant: bool) {
        if thread.complete_signal() {
            return;
        }
        match self.state {
            EpState::Idle | EpState::Recv => {
                if is_blocking {
                    thread.state.blocking_object = self.ptr();
                    thread.state.blocking_ipc_can_grant = grant;
                    set_thread_state(thread, ThreadState::BlockedOnReceive);
                    self.queue.ep_append(thread);
                    self.state = EpState::Recv;
                } else {
                    thread.context.set_register(ArchReg::Badge, 0);
                }
            }
            EpState::Send => {
                let sender = convert_to_mut_type_ref::<Tcb>(self.queue.head);
                self.queue.ep_dequeue(sender);
                if self.queue.empty() {
                    self.state = EpState::Idle;
                }
                let badge = sender.state.blocking_ipc_badge;
                let can_grant = sender.state.blocking_ipc_can_grant;
                let can_grant_reply = sender.state.blocking_ipc_can_grant_reply;
                let ep_ptr = self.ptr();
                sender.do_ipc_transfer(thread, Some(ep_ptr), badge, can_grant);
                let do_call = sender.state.blocking_ipc_is_call;
                if do_call {
                    if can_grant || can_grant_reply {
                        thread.setup_caller_cap(sender, grant);
                    } else {
                        set_thread_state(sender, ThreadState::Inactive);
                    }
                } else {
                    set_thread_state(sender, ThreadState::Running);
                    possible_switch_to(sender);
                }
            }
        }
    }
}
