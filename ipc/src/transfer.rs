//! 消息搬运
//!
//! 发送方和接收方会合后具体的拷贝动作都在这里：普通消息走消息寄存器
//! 加 IPC Buffer，fault 消息按 fault 类型展开成固定格式，capability
//! 随消息转移时在接收方 cspace 里派生落位。对指向同一个 Endpoint 的
//! capability 做 unwrap，只传 badge 不传 capability 本身。

use common::config::{
    CAP_FAULT_ADDR, CAP_FAULT_IN_RECV_PHASE, CAP_FAULT_IP, CAP_FAULT_LOOKUP_FAILURE_TYPE,
    MESSAGE_ID_EXCEPTION, MESSAGE_ID_SYSCALL, MSG_MAX_EXTRA_CAPS, TCB_REPLY, VM_FAULT_ADDR,
    VM_FAULT_FSR, VM_FAULT_IP, VM_FAULT_PREFETCH_FAULT,
};
use common::registers::{EXCEPTION_MESSAGE_LEN, SYSCALL_MESSAGE_LEN};
use common::{
    ArchReg, Fault, MessageInfo, convert_to_mut_type_ref, convert_to_option_mut_type_ref,
};
use cspace::{CapSlot, Capability, cap_slot_insert};
use task::scheduler::possible_switch_to;
use task::{Tcb, ThreadState, set_thread_state};

use crate::endpoint::{Endpoint, EpState};
use crate::notification::Notification;

/// TCB 在 IPC 路径上的动作
///
/// Endpoint / Notification 负责会合与排队，真正碰消息内容的方法都
/// 收拢在这个 trait 里。
pub trait Transfer {
    /// 把线程从它阻塞的对象上撤下来
    fn cancel_ipc(&mut self);

    /// 作为接收方落位 extra caps，并改写消息描述字
    fn set_transfer_caps(
        &mut self,
        ep_ptr: Option<usize>,
        info: &mut MessageInfo,
        current_extra_caps: &[usize; MSG_MAX_EXTRA_CAPS],
    );

    /// 把自己的 fault 展开成消息发给 receiver
    fn do_fault_transfer(&self, receiver: &mut Tcb, badge: usize);

    /// 普通消息搬运
    fn do_normal_transfer(
        &mut self,
        receiver: &mut Tcb,
        ep_ptr: Option<usize>,
        badge: usize,
        can_grant: bool,
    );

    /// fault 应答：把应答消息写回 receiver 的 fault 寄存器
    ///
    /// 返回 receiver 是否应该重新投入运行。
    fn do_fault_reply_transfer(&mut self, receiver: &mut Tcb) -> bool;

    /// 消费绑定 Notification 上的待取信号，取到返回 true
    fn complete_signal(&mut self) -> bool;

    /// 按是否带 fault 选择搬运方式
    fn do_ipc_transfer(
        &mut self,
        receiver: &mut Tcb,
        ep_ptr: Option<usize>,
        badge: usize,
        grant: bool,
    );

    /// 通过 reply capability 应答 receiver，slot 是 reply cap 所在的 slot
    fn do_reply(&mut self, receiver: &mut Tcb, slot: &mut CapSlot, grant: bool);
}

impl Transfer for Tcb {
    fn cancel_ipc(&mut self) {
        match self.get_state() {
            ThreadState::BlockedOnSend | ThreadState::BlockedOnReceive => {
                let ep = convert_to_mut_type_ref::<Endpoint>(self.state.blocking_object);
                assert_ne!(ep.state(), EpState::Idle);
                ep.cancel_ipc(self);
            }
            ThreadState::BlockedOnNotification => {
                let ntfn = convert_to_mut_type_ref::<Notification>(self.state.blocking_object);
                ntfn.cancel_signal(self);
            }
            ThreadState::BlockedOnReply => {
                self.fault = Fault::Null;
                let caller_slot_ptr = self.cnode[TCB_REPLY].mdb.next;
                if caller_slot_ptr != 0 {
                    convert_to_mut_type_ref::<CapSlot>(caller_slot_ptr).delete_one();
                }
            }
            _ => {}
        }
    }

    fn set_transfer_caps(
        &mut self,
        ep_ptr: Option<usize>,
        info: &mut MessageInfo,
        current_extra_caps: &[usize; MSG_MAX_EXTRA_CAPS],
    ) {
        info.set_extra_caps(0);
        info.set_caps_unwrapped(0);
        if current_extra_caps[0] == 0 {
            return;
        }
        let Some(buffer) = self.ipc_buffer_mut() else {
            return;
        };
        let mut dest_slot = self.get_receive_slot();
        let mut i = 0;
        while i < MSG_MAX_EXTRA_CAPS && current_extra_caps[i] != 0 {
            let slot = convert_to_mut_type_ref::<CapSlot>(current_extra_caps[i]);
            match slot.cap {
                Capability::Endpoint { ptr, badge, .. } if Some(ptr) == ep_ptr => {
                    // 指回同一个 Endpoint 的 cap 只传 badge
                    buffer.caps_or_badges[i] = badge;
                    info.set_caps_unwrapped(info.caps_unwrapped() | (1 << i));
                }
                _ => {
                    let Some(dest) = dest_slot.take() else {
                        break;
                    };
                    let derived = slot.cap.derive();
                    if derived.is_null() {
                        break;
                    }
                    cap_slot_insert(derived, slot, dest);
                }
            }
            i += 1;
        }
        info.set_extra_caps(i);
    }

    fn do_fault_transfer(&self, receiver: &mut Tcb, badge: usize) {
        let sent = match self.fault {
            Fault::Cap {
                address,
                in_receive_phase,
            } => {
                receiver.set_mr(CAP_FAULT_IP, self.context.register(ArchReg::FaultIp));
                receiver.set_mr(CAP_FAULT_ADDR, address);
                receiver.set_mr(CAP_FAULT_IN_RECV_PHASE, in_receive_phase as usize);
                receiver.set_lookup_fault_mrs(CAP_FAULT_LOOKUP_FAILURE_TYPE, &self.lookup_failure)
            }
            Fault::UnknownSyscall { syscall_number } => {
                self.copy_fault_mrs(receiver, MESSAGE_ID_SYSCALL, SYSCALL_MESSAGE_LEN);
                receiver.set_mr(SYSCALL_MESSAGE_LEN, syscall_number)
            }
            Fault::UserException { number, code } => {
                self.copy_fault_mrs(receiver, MESSAGE_ID_EXCEPTION, EXCEPTION_MESSAGE_LEN);
                receiver.set_mr(EXCEPTION_MESSAGE_LEN, number);
                receiver.set_mr(EXCEPTION_MESSAGE_LEN + 1, code)
            }
            Fault::Vm {
                address,
                fsr,
                instruction_fault,
            } => {
                receiver.set_mr(VM_FAULT_IP, self.context.register(ArchReg::FaultIp));
                receiver.set_mr(VM_FAULT_ADDR, address);
                receiver.set_mr(VM_FAULT_PREFETCH_FAULT, instruction_fault as usize);
                receiver.set_mr(VM_FAULT_FSR, fsr)
            }
            Fault::Null => panic!("no fault to transfer"),
        };
        let info = MessageInfo::new(self.fault.label(), 0, 0, sent);
        receiver
            .context
            .set_register(ArchReg::MsgInfo, info.to_word());
        receiver.context.set_register(ArchReg::Badge, badge);
    }

    fn do_normal_transfer(
        &mut self,
        receiver: &mut Tcb,
        ep_ptr: Option<usize>,
        badge: usize,
        can_grant: bool,
    ) {
        let mut tag = MessageInfo::from_word_security(self.context.register(ArchReg::MsgInfo));
        let mut current_extra_caps = [0; MSG_MAX_EXTRA_CAPS];
        if can_grant {
            // 发送阶段的寻址失败只是不带 cap，不构成 fault
            let _ = self.lookup_extra_caps(&mut current_extra_caps);
        }
        let msg_transferred = self.copy_mrs(receiver, tag.length());
        receiver.set_transfer_caps(ep_ptr, &mut tag, &current_extra_caps);
        tag.set_length(msg_transferred);
        receiver
            .context
            .set_register(ArchReg::MsgInfo, tag.to_word());
        receiver.context.set_register(ArchReg::Badge, badge);
    }

    fn do_fault_reply_transfer(&mut self, receiver: &mut Tcb) -> bool {
        let tag = MessageInfo::from_word_security(self.context.register(ArchReg::MsgInfo));
        match receiver.fault {
            Fault::UnknownSyscall { .. } => {
                self.copy_fault_mrs_for_reply(
                    receiver,
                    MESSAGE_ID_SYSCALL,
                    core::cmp::min(tag.length(), SYSCALL_MESSAGE_LEN),
                );
                tag.label() == 0
            }
            Fault::UserException { .. } => {
                self.copy_fault_mrs_for_reply(
                    receiver,
                    MESSAGE_ID_EXCEPTION,
                    core::cmp::min(tag.length(), EXCEPTION_MESSAGE_LEN),
                );
                tag.label() == 0
            }
            _ => true,
        }
    }

    fn complete_signal(&mut self) -> bool {
        if let Some(ntfn) = convert_to_option_mut_type_ref::<Notification>(self.bound_notification)
        {
            return ntfn.try_complete_signal(self);
        }
        false
    }

    fn do_ipc_transfer(
        &mut self,
        receiver: &mut Tcb,
        ep_ptr: Option<usize>,
        badge: usize,
        grant: bool,
    ) {
        if self.fault.is_null() {
            self.do_normal_transfer(receiver, ep_ptr, badge, grant);
        } else {
            log::debug!("transfer fault {:?} to {:#x}", self.fault, receiver.ptr());
            self.do_fault_transfer(receiver, badge);
        }
    }

    fn do_reply(&mut self, receiver: &mut Tcb, slot: &mut CapSlot, grant: bool) {
        assert_eq!(receiver.get_state(), ThreadState::BlockedOnReply);
        if receiver.fault.is_null() {
            self.do_ipc_transfer(receiver, None, 0, grant);
            slot.delete_one();
            set_thread_state(receiver, ThreadState::Running);
            possible_switch_to(receiver);
        } else {
            slot.delete_one();
            if self.do_fault_reply_transfer(receiver) {
                receiver.fault = Fault::Null;
                set_thread_state(receiver, ThreadState::Restart);
                possible_switch_to(receiver);
            } else {
                receiver.fault = Fault::Null;
                set_thread_state(receiver, ThreadState::Inactive);
            }
        }
    }
}
