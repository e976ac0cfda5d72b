//! 线程控制块
//!
//! TCB 通过地址互相引用：调度队列和 Endpoint 等待队列都是侵入式链表，
//! 节点字段直接嵌在 TCB 里。每个 TCB 自带一个 5 slot 的小 CNode，存放
//! cspace 根、应答 capability 等，布局见 [`common::config`] 中的
//! `TCB_*` 下标。

use common::config::{
    CAP_FAULT_LOOKUP_FAILURE_TYPE, MSG_MAX_EXTRA_CAPS, MSG_MAX_LEN, TCB_CALLER, TCB_CNODE_ENTRIES,
    TCB_CTABLE, TCB_REPLY, TIME_SLICE, WORD_BITS,
};
use common::registers::MSG_REGISTER_NUM;
use common::{
    ArchContext, ArchReg, Fault, IpcBuffer, LookupFault, MessageInfo,
    convert_to_mut_type_ref, convert_to_option_mut_type_ref,
};
use cspace::{CapSlot, Capability, MdbNode, cap_slot_insert, resolve_address};

use crate::scheduler::{self, ready_queues_index};
use crate::thread_state::{TcbState, ThreadState};

#[repr(C)]
#[derive(Debug, Clone)]
pub struct Tcb {
    /// 寄存器上下文
    pub context: ArchContext,
    /// 线程状态与阻塞元信息
    pub state: TcbState,
    /// 绑定的 Notification 的地址，0 表示没有绑定
    pub bound_notification: usize,
    /// 线程当前的错误
    pub fault: Fault,
    /// 最近一次 capability 寻址失败的原因
    pub lookup_failure: LookupFault,
    pub domain: usize,
    pub priority: usize,
    pub time_slice: usize,
    /// IPC Buffer 的地址，0 表示没有配置
    pub ipc_buffer: usize,
    /// TCB 自带的 CNode
    pub cnode: [CapSlot; TCB_CNODE_ENTRIES],
    pub sched_next: usize,
    pub sched_prev: usize,
    pub ep_next: usize,
    pub ep_prev: usize,
}

impl Tcb {
    pub fn new() -> Self {
        Tcb {
            context: ArchContext::default(),
            state: TcbState::default(),
            bound_notification: 0,
            fault: Fault::Null,
            lookup_failure: LookupFault::InvalidRoot,
            domain: 0,
            priority: 0,
            time_slice: TIME_SLICE,
            ipc_buffer: 0,
            cnode: [CapSlot::empty(); TCB_CNODE_ENTRIES],
            sched_next: 0,
            sched_prev: 0,
            ep_next: 0,
            ep_prev: 0,
        }
    }

    #[inline]
    pub fn ptr(&self) -> usize {
        self as *const Tcb as usize
    }

    #[inline]
    pub fn get_state(&self) -> ThreadState {
        self.state.get()
    }

    #[inline]
    pub fn is_runnable(&self) -> bool {
        matches!(
            self.get_state(),
            ThreadState::Running | ThreadState::Restart
        )
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        matches!(
            self.get_state(),
            ThreadState::Inactive
                | ThreadState::BlockedOnNotification
                | ThreadState::BlockedOnReceive
                | ThreadState::BlockedOnReply
                | ThreadState::BlockedOnSend
        )
    }

    #[inline]
    pub fn is_current(&self) -> bool {
        self.ptr() == scheduler::current_thread_ptr()
    }

    #[inline]
    pub fn bind_notification(&mut self, addr: usize) {
        self.bound_notification = addr;
    }

    #[inline]
    pub fn unbind_notification(&mut self) {
        self.bound_notification = 0;
    }

    /// IPC Buffer，未配置时返回 [`Option::None`]
    #[inline]
    pub fn ipc_buffer(&self) -> Option<&'static IpcBuffer> {
        common::convert_to_option_type_ref::<IpcBuffer>(self.ipc_buffer)
    }

    #[inline]
    pub fn ipc_buffer_mut(&self) -> Option<&'static mut IpcBuffer> {
        convert_to_option_mut_type_ref::<IpcBuffer>(self.ipc_buffer)
    }

    // ---------- 调度队列 ----------

    /// 挂入所在 (domain, priority) 的就绪队列队尾
    pub fn sched_enqueue(&mut self) {
        if self.state.tcb_queued {
            return;
        }
        let self_ptr = self.ptr();
        let (dom, prio) = (self.domain, self.priority);
        let idx = ready_queues_index(dom, prio);
        let mut rq = scheduler::lock_ready_queues();
        let tail = rq.queues[idx].tail;
        if tail == 0 {
            rq.queues[idx].head = self_ptr;
            rq.add_to_bitmap(dom, prio);
        } else {
            convert_to_mut_type_ref::<Tcb>(tail).sched_next = self_ptr;
        }
        self.sched_prev = tail;
        self.sched_next = 0;
        rq.queues[idx].tail = self_ptr;
        drop(rq);
        self.state.tcb_queued = true;
    }

    /// 与 [`Tcb::sched_enqueue`] 相同，保留这个名字与入口用于时间片轮转
    pub fn sched_append(&mut self) {
        if self.state.tcb_queued {
            return;
        }
        let self_ptr = self.ptr();
        let (dom, prio) = (self.domain, self.priority);
        let idx = ready_queues_index(dom, prio);
        let mut rq = scheduler::lock_ready_queues();
        if rq.queues[idx].head == 0 {
            rq.queues[idx].head = self_ptr;
            rq.add_to_bitmap(dom, prio);
        } else {
            let tail = rq.queues[idx].tail;
            convert_to_mut_type_ref::<Tcb>(tail).sched_next = self_ptr;
        }
        self.sched_prev = rq.queues[idx].tail;
        self.sched_next = 0;
        rq.queues[idx].tail = self_ptr;
        drop(rq);
        self.state.tcb_queued = true;
    }

    /// 从就绪队列中摘除
    pub fn sched_dequeue(&mut self) {
        if !self.state.tcb_queued {
            return;
        }
        let (dom, prio) = (self.domain, self.priority);
        let idx = ready_queues_index(dom, prio);
        let mut rq = scheduler::lock_ready_queues();
        if self.sched_prev != 0 {
            convert_to_mut_type_ref::<Tcb>(self.sched_prev).sched_next = self.sched_next;
        } else {
            rq.queues[idx].head = self.sched_next;
            if self.sched_next == 0 {
                rq.remove_from_bitmap(dom, prio);
            }
        }
        if self.sched_next != 0 {
            convert_to_mut_type_ref::<Tcb>(self.sched_next).sched_prev = self.sched_prev;
        } else {
            rq.queues[idx].tail = self.sched_prev;
        }
        drop(rq);
        self.state.tcb_queued = false;
    }

    /// 切换到这个线程
    pub fn switch_to_this(&mut self) {
        log::trace!("switch to {:#x}", self.ptr());
        self.sched_dequeue();
        scheduler::set_current_thread(self);
    }

    /// 挂起：置为 Inactive 并移出就绪队列
    pub fn suspend(&mut self) {
        set_thread_state(self, ThreadState::Inactive);
        self.sched_dequeue();
    }

    /// 重启一个停住的线程，重新参与调度
    pub fn restart(&mut self) {
        if self.is_stopped() {
            self.setup_reply_master();
            set_thread_state(self, ThreadState::Restart);
            self.sched_enqueue();
            scheduler::possible_switch_to(self);
        }
    }

    // ---------- capability ----------

    /// 确保 reply slot 里有 master reply capability
    pub fn setup_reply_master(&mut self) {
        let self_ptr = self.ptr();
        let slot = &mut self.cnode[TCB_REPLY];
        if slot.cap.is_null() {
            slot.cap = Capability::Reply {
                tcb_ptr: self_ptr,
                master: true,
                can_grant: true,
            };
            slot.mdb = MdbNode {
                prev: 0,
                next: 0,
                revocable: true,
                first_badged: true,
            };
        }
    }

    /// Call 成功投递后在接收者的 caller slot 里放一个指向发送者的
    /// reply capability，发送者阻塞等待应答
    pub fn setup_caller_cap(&mut self, sender: &mut Tcb, can_grant: bool) {
        set_thread_state(sender, ThreadState::BlockedOnReply);
        let sender_ptr = sender.ptr();
        let reply_slot = &mut sender.cnode[TCB_REPLY];
        match reply_slot.cap {
            Capability::Reply {
                tcb_ptr,
                master,
                can_grant: master_grant,
            } => {
                assert!(master && master_grant);
                assert_eq!(tcb_ptr, sender_ptr);
            }
            _ => panic!("reply slot does not hold a master reply cap"),
        }
        let caller_slot = &mut self.cnode[TCB_CALLER];
        assert!(caller_slot.cap.is_null());
        cap_slot_insert(
            Capability::Reply {
                tcb_ptr: sender_ptr,
                master: false,
                can_grant,
            },
            reply_slot,
            caller_slot,
        );
    }

    #[inline]
    pub fn delete_caller_cap(&mut self) {
        self.cnode[TCB_CALLER].delete_one();
    }

    /// 在线程自己的 cspace 根里解析一个 cptr
    pub fn lookup_slot(&self, cptr: usize) -> Result<&'static mut CapSlot, LookupFault> {
        let root = self.cnode[TCB_CTABLE].cap;
        resolve_address(&root, cptr, WORD_BITS).map(|(slot, _)| slot)
    }

    /// 按 IPC Buffer 里的描述找到接收 capability 用的 slot
    pub fn get_receive_slot(&mut self) -> Option<&'static mut CapSlot> {
        let buffer = self.ipc_buffer()?;
        let root_slot = self.lookup_slot(buffer.receive_cnode).ok()?;
        let (slot, bits_remaining) =
            resolve_address(&root_slot.cap, buffer.receive_index, buffer.receive_depth).ok()?;
        (bits_remaining == 0).then_some(slot)
    }

    /// 把消息描述字声明的 extra cap 的 slot 地址解析到 `res` 中
    ///
    /// `res` 以 0 结尾（写满时没有终结符）。寻址失败返回 cap fault。
    pub fn lookup_extra_caps(
        &mut self,
        res: &mut [usize; MSG_MAX_EXTRA_CAPS],
    ) -> Result<(), Fault> {
        let info = MessageInfo::from_word_security(self.context.register(ArchReg::MsgInfo));
        if let Some(buffer) = self.ipc_buffer() {
            let length = info.extra_caps();
            let mut i = 0;
            while i < length {
                let cptr = buffer.extra_cptr(i);
                let slot = self.lookup_slot(cptr).map_err(|lookup_fault| {
                    self.lookup_failure = lookup_fault;
                    Fault::Cap {
                        address: cptr,
                        in_receive_phase: false,
                    }
                })?;
                res[i] = slot.ptr();
                i += 1;
            }
            if i < MSG_MAX_EXTRA_CAPS {
                res[i] = 0;
            }
        }
        Ok(())
    }

    // ---------- 消息寄存器 ----------

    /// 写第 offset 个消息字，放不进寄存器的部分写入 IPC Buffer
    ///
    /// 返回下一个可写的位置；没有 buffer 时多余的字被丢弃。
    pub fn set_mr(&mut self, offset: usize, value: usize) -> usize {
        if offset >= MSG_REGISTER_NUM {
            if let Some(buffer) = self.ipc_buffer_mut() {
                if offset < MSG_MAX_LEN {
                    buffer.msg[offset] = value;
                    return offset + 1;
                }
            }
            MSG_REGISTER_NUM
        } else {
            self.context.set_register(ArchReg::Msg(offset), value);
            offset + 1
        }
    }

    /// 把消息正文拷贝给接收者，先走寄存器，剩余部分经由双方的 IPC Buffer
    ///
    /// 返回实际送达的字数。
    pub fn copy_mrs(&self, receiver: &mut Tcb, length: usize) -> usize {
        let mut i = 0;
        while i < length && i < MSG_REGISTER_NUM {
            receiver
                .context
                .set_register(ArchReg::Msg(i), self.context.register(ArchReg::Msg(i)));
            i += 1;
        }
        if let (Some(send_buffer), Some(recv_buffer)) = (self.ipc_buffer(), receiver.ipc_buffer_mut())
        {
            while i < length {
                recv_buffer.msg[i] = send_buffer.msg[i];
                i += 1;
            }
        }
        i
    }

    /// 按 fault 消息表把寄存器拷贝给接收者
    pub fn copy_fault_mrs(&self, receiver: &mut Tcb, id: usize, length: usize) {
        let len = core::cmp::min(length, MSG_REGISTER_NUM);
        for i in 0..len {
            receiver.context.set_register(
                ArchReg::Msg(i),
                self.context.register(ArchReg::FaultMessage(id, i)),
            );
        }
        if let Some(buffer) = receiver.ipc_buffer_mut() {
            for i in len..length {
                buffer.msg[i] = self.context.register(ArchReg::FaultMessage(id, i));
            }
        }
    }

    /// [`Tcb::copy_fault_mrs`] 的应答方向：把消息写回对方的 fault 寄存器
    pub fn copy_fault_mrs_for_reply(&self, receiver: &mut Tcb, id: usize, length: usize) {
        let len = core::cmp::min(length, MSG_REGISTER_NUM);
        for i in 0..len {
            receiver.context.set_register(
                ArchReg::FaultMessage(id, i),
                self.context.register(ArchReg::Msg(i)),
            );
        }
        if let Some(buffer) = self.ipc_buffer() {
            for i in len..length {
                receiver
                    .context
                    .set_register(ArchReg::FaultMessage(id, i), buffer.msg[i]);
            }
        }
    }

    /// 把 lookup fault 的描述写进消息
    pub fn set_lookup_fault_mrs(&mut self, offset: usize, fault: &LookupFault) -> usize {
        debug_assert!(offset == CAP_FAULT_LOOKUP_FAILURE_TYPE || offset == 1);
        let i = self.set_mr(offset, fault.label() + 1);
        match *fault {
            LookupFault::InvalidRoot => i,
            LookupFault::MissingCap { bits_left } => self.set_mr(offset + 1, bits_left),
            LookupFault::DepthMismatch {
                bits_left,
                bits_found,
            } => {
                self.set_mr(offset + 1, bits_left);
                self.set_mr(offset + 2, bits_found)
            }
            LookupFault::GuardMismatch {
                bits_left,
                guard_found,
                bits_found,
            } => {
                self.set_mr(offset + 1, bits_left);
                self.set_mr(offset + 2, guard_found);
                self.set_mr(offset + 3, bits_found)
            }
        }
    }
}

/// 设置线程状态并让调度器重新审视这个线程
#[inline]
pub fn set_thread_state(tcb: &mut Tcb, state: ThreadState) {
    tcb.state.set(state);
    scheduler::schedule_tcb(tcb);
}
