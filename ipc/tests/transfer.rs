//! fault 消息与 capability 转移

use common::config::{
    MESSAGE_ID_EXCEPTION, MESSAGE_ID_SYSCALL, MSG_MAX_EXTRA_CAPS, TCB_CALLER, TCB_CTABLE,
    WORD_BITS,
};
use common::registers::{EXCEPTION_MESSAGE_LEN, MSG_REGISTER_NUM, SYSCALL_MESSAGE_LEN};
use common::{ArchReg, Fault, IpcBuffer, LookupFault, MessageInfo, convert_to_mut_type_ref};
use cspace::{CapRights, CapSlot, Capability};
use ipc::{Endpoint, Transfer};
use spin::Mutex;
use task::scheduler;
use task::{Tcb, ThreadState};

static SERIAL: Mutex<()> = Mutex::new(());

fn boot() {
    scheduler::init();
    let idle = Box::leak(Box::new(Tcb::new()));
    idle.state.set(ThreadState::IdleThreadState);
    scheduler::set_idle_thread(idle);
    scheduler::set_current_thread(idle);
}

fn new_thread(prio: usize) -> &'static mut Tcb {
    let tcb = Box::leak(Box::new(Tcb::new()));
    tcb.priority = prio;
    let buffer = Box::leak(Box::new(IpcBuffer::empty()));
    tcb.ipc_buffer = buffer as *mut IpcBuffer as usize;
    tcb
}

const CNODE_RADIX: usize = 4;

/// 给线程配一个 16 slot 的单级 cspace，返回 slot 数组
fn new_cspace(tcb: &mut Tcb) -> &'static mut [CapSlot; 1 << CNODE_RADIX] {
    let slots = Box::leak(Box::new([CapSlot::empty(); 1 << CNODE_RADIX]));
    tcb.cnode[TCB_CTABLE].cap = Capability::CNode {
        ptr: slots.as_ptr() as usize,
        radix: CNODE_RADIX,
    };
    slots
}

/// 单级 cspace 里第 index 个 slot 的 cptr
const fn cptr_of(index: usize) -> usize {
    index << (WORD_BITS - CNODE_RADIX)
}

fn read_mr(tcb: &Tcb, i: usize) -> usize {
    if i < MSG_REGISTER_NUM {
        tcb.context.register(ArchReg::Msg(i))
    } else {
        tcb.ipc_buffer().map(|buffer| buffer.msg[i]).unwrap_or(0)
    }
}

#[test]
fn grant_moves_cap_into_receive_slot() {
    let _guard = SERIAL.lock();
    boot();
    let ep = Box::leak(Box::new(Endpoint::new()));
    let sender = new_thread(10);
    let receiver = new_thread(10);

    let sender_slots = new_cspace(sender);
    sender_slots[5].cap = Capability::Endpoint {
        ptr: 0x9000,
        badge: 3,
        rights: CapRights::all(),
    };

    // 接收窗口：根 cnode 的 2 号 slot 里放一个二级 cnode，7 号 slot 收 cap
    let receiver_slots = new_cspace(receiver);
    let dest_slots = Box::leak(Box::new([CapSlot::empty(); 1 << CNODE_RADIX]));
    receiver_slots[2].cap = Capability::CNode {
        ptr: dest_slots.as_ptr() as usize,
        radix: CNODE_RADIX,
    };
    let buffer = receiver.ipc_buffer_mut().unwrap();
    buffer.receive_cnode = cptr_of(2);
    buffer.receive_index = 7;
    buffer.receive_depth = CNODE_RADIX;

    ep.receive_ipc(receiver, true, true);

    let info = MessageInfo::new(4, 0, 1, 0);
    sender.context.set_register(ArchReg::MsgInfo, info.to_word());
    sender.ipc_buffer_mut().unwrap().caps_or_badges[0] = cptr_of(5);
    ep.send_ipc(sender, true, false, true, 0x1, false);

    assert!(matches!(
        dest_slots[7].cap,
        Capability::Endpoint { ptr: 0x9000, badge: 3, .. }
    ));
    assert_eq!(dest_slots[7].mdb.prev, sender_slots[5].ptr());
    let info = MessageInfo::from_word(receiver.context.register(ArchReg::MsgInfo));
    assert_eq!(info.extra_caps(), 1);
    assert_eq!(info.caps_unwrapped(), 0);
}

#[test]
fn cap_to_same_endpoint_is_unwrapped_to_badge() {
    let _guard = SERIAL.lock();
    boot();
    let ep = Box::leak(Box::new(Endpoint::new()));
    let sender = new_thread(10);
    let receiver = new_thread(10);

    let sender_slots = new_cspace(sender);
    sender_slots[5].cap = Capability::Endpoint {
        ptr: ep.ptr(),
        badge: 0x42,
        rights: CapRights::all(),
    };
    new_cspace(receiver);

    ep.receive_ipc(receiver, true, true);

    let info = MessageInfo::new(0, 0, 1, 0);
    sender.context.set_register(ArchReg::MsgInfo, info.to_word());
    sender.ipc_buffer_mut().unwrap().caps_or_badges[0] = cptr_of(5);
    ep.send_ipc(sender, true, false, true, 0x1, false);

    let recv_buffer = receiver.ipc_buffer().unwrap();
    assert_eq!(recv_buffer.caps_or_badges[0], 0x42);
    let info = MessageInfo::from_word(receiver.context.register(ArchReg::MsgInfo));
    assert_eq!(info.caps_unwrapped(), 1);
    assert_eq!(info.extra_caps(), 1);
}

#[test]
fn grant_without_receive_window_drops_cap() {
    let _guard = SERIAL.lock();
    boot();
    let ep = Box::leak(Box::new(Endpoint::new()));
    let sender = new_thread(10);
    let receiver = new_thread(10);

    let sender_slots = new_cspace(sender);
    sender_slots[5].cap = Capability::Endpoint {
        ptr: 0x9000,
        badge: 3,
        rights: CapRights::all(),
    };
    // 接收方没有配置接收窗口
    new_cspace(receiver);

    ep.receive_ipc(receiver, true, true);
    let info = MessageInfo::new(0, 0, 1, 0);
    sender.context.set_register(ArchReg::MsgInfo, info.to_word());
    sender.ipc_buffer_mut().unwrap().caps_or_badges[0] = cptr_of(5);
    ep.send_ipc(sender, true, false, true, 0x1, false);

    let info = MessageInfo::from_word(receiver.context.register(ArchReg::MsgInfo));
    assert_eq!(info.extra_caps(), 0);
    assert_eq!(info.caps_unwrapped(), 0);
    assert_eq!(receiver.get_state(), ThreadState::Running);
}

#[test]
fn unknown_syscall_fault_is_rendered_as_message() {
    let _guard = SERIAL.lock();
    boot();
    let ep = Box::leak(Box::new(Endpoint::new()));
    let faulter = new_thread(10);
    let handler = new_thread(10);

    faulter.fault = Fault::UnknownSyscall {
        syscall_number: 0x123,
    };
    for i in 0..SYSCALL_MESSAGE_LEN {
        faulter
            .context
            .set_register(ArchReg::FaultMessage(MESSAGE_ID_SYSCALL, i), 100 + i);
    }
    ep.send_ipc(faulter, true, false, true, 0x6, false);
    ep.receive_ipc(handler, true, true);

    let info = MessageInfo::from_word(handler.context.register(ArchReg::MsgInfo));
    assert_eq!(info.label(), Fault::UnknownSyscall { syscall_number: 0 }.label());
    assert_eq!(info.length(), SYSCALL_MESSAGE_LEN + 1);
    for i in 0..SYSCALL_MESSAGE_LEN {
        assert_eq!(read_mr(handler, i), 100 + i);
    }
    assert_eq!(read_mr(handler, SYSCALL_MESSAGE_LEN), 0x123);
    assert_eq!(handler.context.register(ArchReg::Badge), 0x6);
}

#[test]
fn vm_fault_is_rendered_as_message() {
    let _guard = SERIAL.lock();
    boot();
    let ep = Box::leak(Box::new(Endpoint::new()));
    let faulter = new_thread(10);
    let handler = new_thread(10);

    faulter.context.set_register(ArchReg::FaultIp, 0x5000);
    faulter.fault = Fault::Vm {
        address: 0x7777,
        fsr: 0xd,
        instruction_fault: true,
    };
    ep.send_ipc(faulter, true, false, true, 0x2, false);
    ep.receive_ipc(handler, true, true);

    let info = MessageInfo::from_word(handler.context.register(ArchReg::MsgInfo));
    assert_eq!(
        info.label(),
        Fault::Vm { address: 0, fsr: 0, instruction_fault: false }.label()
    );
    assert_eq!(info.length(), 4);
    assert_eq!(read_mr(handler, 0), 0x5000);
    assert_eq!(read_mr(handler, 1), 0x7777);
    assert_eq!(read_mr(handler, 2), 1);
    assert_eq!(read_mr(handler, 3), 0xd);
    assert_eq!(handler.context.register(ArchReg::Badge), 0x2);
}

#[test]
fn user_exception_fault_is_rendered_as_message() {
    let _guard = SERIAL.lock();
    boot();
    let ep = Box::leak(Box::new(Endpoint::new()));
    let faulter = new_thread(10);
    let handler = new_thread(10);

    faulter.fault = Fault::UserException {
        number: 0x9,
        code: 0x2,
    };
    for i in 0..EXCEPTION_MESSAGE_LEN {
        faulter
            .context
            .set_register(ArchReg::FaultMessage(MESSAGE_ID_EXCEPTION, i), 300 + i);
    }
    ep.send_ipc(faulter, true, false, true, 0x3, false);
    ep.receive_ipc(handler, true, true);

    let info = MessageInfo::from_word(handler.context.register(ArchReg::MsgInfo));
    assert_eq!(info.label(), Fault::UserException { number: 0, code: 0 }.label());
    assert_eq!(info.length(), EXCEPTION_MESSAGE_LEN + 2);
    for i in 0..EXCEPTION_MESSAGE_LEN {
        assert_eq!(read_mr(handler, i), 300 + i);
    }
    assert_eq!(read_mr(handler, EXCEPTION_MESSAGE_LEN), 0x9);
    assert_eq!(read_mr(handler, EXCEPTION_MESSAGE_LEN + 1), 0x2);
    assert_eq!(handler.context.register(ArchReg::Badge), 0x3);
}

#[test]
fn cap_fault_carries_lookup_failure() {
    let _guard = SERIAL.lock();
    boot();
    let ep = Box::leak(Box::new(Endpoint::new()));
    let faulter = new_thread(10);
    let handler = new_thread(10);

    faulter.context.set_register(ArchReg::FaultIp, 0x4000);
    faulter.fault = Fault::Cap {
        address: 0xBEEF,
        in_receive_phase: true,
    };
    faulter.lookup_failure = LookupFault::GuardMismatch {
        bits_left: 20,
        guard_found: 0x3,
        bits_found: 4,
    };
    ep.receive_ipc(handler, true, true);
    ep.send_ipc(faulter, true, false, true, 0x1, false);

    let info = MessageInfo::from_word(handler.context.register(ArchReg::MsgInfo));
    assert_eq!(info.label(), Fault::Cap { address: 0, in_receive_phase: false }.label());
    assert_eq!(info.length(), 7);
    assert_eq!(read_mr(handler, 0), 0x4000);
    assert_eq!(read_mr(handler, 1), 0xBEEF);
    assert_eq!(read_mr(handler, 2), 1);
    // lookup fault 类型按 label + 1 编码，GuardMismatch 是 4
    assert_eq!(read_mr(handler, 3), 4);
    assert_eq!(read_mr(handler, 4), 20);
    assert_eq!(read_mr(handler, 5), 0x3);
    assert_eq!(read_mr(handler, 6), 4);
}

#[test]
fn fault_reply_restarts_faulting_thread() {
    let _guard = SERIAL.lock();
    boot();
    let faulter = new_thread(10);
    let handler = new_thread(10);

    faulter.setup_reply_master();
    handler.setup_caller_cap(faulter, true);
    faulter.fault = Fault::UnknownSyscall {
        syscall_number: 0x1,
    };

    // 应答 label 0 表示重启，消息写回 fault 寄存器
    let info = MessageInfo::new(0, 0, 0, 6);
    handler.context.set_register(ArchReg::MsgInfo, info.to_word());
    for i in 0..6 {
        handler.set_mr(i, 200 + i);
    }
    let slot = convert_to_mut_type_ref::<CapSlot>(handler.cnode[TCB_CALLER].ptr());
    handler.do_reply(faulter, slot, true);

    assert_eq!(faulter.get_state(), ThreadState::Restart);
    assert!(faulter.fault.is_null());
    for i in 0..6 {
        assert_eq!(
            faulter
                .context
                .register(ArchReg::FaultMessage(MESSAGE_ID_SYSCALL, i)),
            200 + i
        );
    }
    assert!(handler.cnode[TCB_CALLER].cap.is_null());
}

#[test]
fn fault_reply_with_nonzero_label_suspends_thread() {
    let _guard = SERIAL.lock();
    boot();
    let faulter = new_thread(10);
    let handler = new_thread(10);

    faulter.setup_reply_master();
    handler.setup_caller_cap(faulter, true);
    faulter.fault = Fault::UnknownSyscall {
        syscall_number: 0x1,
    };

    let info = MessageInfo::new(1, 0, 0, 0);
    handler.context.set_register(ArchReg::MsgInfo, info.to_word());
    let slot = convert_to_mut_type_ref::<CapSlot>(handler.cnode[TCB_CALLER].ptr());
    handler.do_reply(faulter, slot, true);

    assert_eq!(faulter.get_state(), ThreadState::Inactive);
    assert!(faulter.fault.is_null());
}

#[test]
fn cancel_ipc_on_blocked_reply_deletes_caller_cap() {
    let _guard = SERIAL.lock();
    boot();
    let caller = new_thread(10);
    let server = new_thread(10);
    caller.setup_reply_master();
    server.setup_caller_cap(caller, true);
    assert_eq!(caller.get_state(), ThreadState::BlockedOnReply);

    caller.cancel_ipc();
    assert!(server.cnode[TCB_CALLER].cap.is_null());
    assert_eq!(caller.cnode[common::config::TCB_REPLY].mdb.next, 0);
}

#[test]
fn lookup_extra_caps_resolves_declared_slots() {
    let _guard = SERIAL.lock();
    boot();
    let sender = new_thread(10);
    let sender_slots = new_cspace(sender);
    sender_slots[5].cap = Capability::Endpoint {
        ptr: 0x9000,
        badge: 0,
        rights: CapRights::all(),
    };
    sender.ipc_buffer_mut().unwrap().caps_or_badges[0] = cptr_of(5);

    let info = MessageInfo::new(0, 0, 2, 0);
    sender.context.set_register(ArchReg::MsgInfo, info.to_word());
    let mut res = [0usize; MSG_MAX_EXTRA_CAPS];
    sender.lookup_extra_caps(&mut res).unwrap();
    assert_eq!(res[0], sender_slots[5].ptr());
    // 第二个 cptr 是 0，解析到根 cnode 的 0 号 slot
    assert_eq!(res[1], sender_slots[0].ptr());
    assert_eq!(res[2], 0);
}
