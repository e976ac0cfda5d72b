//! 内核模型的配置常量
//!
//! 数值取自 seL4 的默认配置，调度相关的位图大小由字长推导。

/// 机器字的位数的对数，64 位平台上为 6
pub const WORD_RADIX: usize = 6;
/// 机器字的位数
pub const WORD_BITS: usize = 1 << WORD_RADIX;

// 调度相关
pub const NUM_DOMAINS: usize = 1;
pub const NUM_PRIORITIES: usize = 256;
pub const L2_BITMAP_SIZE: usize = (NUM_PRIORITIES + WORD_BITS - 1) / WORD_BITS;
pub const NUM_READY_QUEUES: usize = NUM_DOMAINS * NUM_PRIORITIES;
/// 每个时间片包含的 timer tick 数量
pub const TIME_SLICE: usize = 5;

// 消息相关
/// 一条 IPC 消息最多携带的字数
pub const MSG_MAX_LEN: usize = 120;
/// 一条 IPC 消息最多附带的 capability 数量
pub const MSG_MAX_EXTRA_CAPS: usize = 3;

// TCB 自带 CNode 中各个 slot 的下标
pub const TCB_CTABLE: usize = 0;
pub const TCB_VTABLE: usize = 1;
pub const TCB_REPLY: usize = 2;
pub const TCB_CALLER: usize = 3;
pub const TCB_BUFFER: usize = 4;
pub const TCB_CNODE_ENTRIES: usize = 5;

// Cap fault 消息的寄存器布局
pub const CAP_FAULT_IP: usize = 0;
pub const CAP_FAULT_ADDR: usize = 1;
pub const CAP_FAULT_IN_RECV_PHASE: usize = 2;
pub const CAP_FAULT_LOOKUP_FAILURE_TYPE: usize = 3;
pub const CAP_FAULT_BITS_LEFT: usize = 4;
pub const CAP_FAULT_DEPTH_MISMATCH_BITS_FOUND: usize = 5;
pub const CAP_FAULT_GUARD_MISMATCH_GUARD_FOUND: usize = CAP_FAULT_DEPTH_MISMATCH_BITS_FOUND;
pub const CAP_FAULT_GUARD_MISMATCH_BITS_FOUND: usize = 6;

// VM fault 消息的寄存器布局
pub const VM_FAULT_IP: usize = 0;
pub const VM_FAULT_ADDR: usize = 1;
pub const VM_FAULT_PREFETCH_FAULT: usize = 2;
pub const VM_FAULT_FSR: usize = 3;

// Fault 消息复制时使用的消息表编号，见 [`crate::registers::FAULT_MESSAGES`]
pub const MESSAGE_ID_SYSCALL: usize = 0;
pub const MESSAGE_ID_EXCEPTION: usize = 1;
