//! 线程错误（Fault）类型
//!
//! 线程在用户态触发的各类错误记录在 TCB 中，错误发生后通过 IPC 转发给
//! fault handler。tag 的数值与 seL4 保持一致（注意 5 是 VMFault，4 被
//! 架构相关的错误占用）。

/// 线程错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fault {
    /// 没有错误
    #[default]
    Null,
    /// capability 寻址失败，具体原因记录在 TCB 的 [`LookupFault`] 中
    Cap { address: usize, in_receive_phase: bool },
    /// 未知系统调用
    UnknownSyscall { syscall_number: usize },
    /// 用户态异常
    UserException { number: usize, code: usize },
    /// 缺页错误
    Vm {
        address: usize,
        fsr: usize,
        instruction_fault: bool,
    },
}

impl Fault {
    /// 错误的 tag，作为 fault 消息的 label 发送给 fault handler
    pub fn label(&self) -> usize {
        match self {
            Fault::Null => 0,
            Fault::Cap { .. } => 1,
            Fault::UnknownSyscall { .. } => 2,
            Fault::UserException { .. } => 3,
            Fault::Vm { .. } => 5,
        }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Fault::Null)
    }
}

/// capability 寻址失败的具体原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LookupFault {
    /// CSpace 根不是一个合法的 CNode
    #[default]
    InvalidRoot,
    /// 寻址中途遇到空 slot
    MissingCap { bits_left: usize },
    /// cptr 的深度与 CNode 树不匹配
    DepthMismatch { bits_left: usize, bits_found: usize },
    /// guard 不匹配
    GuardMismatch {
        bits_left: usize,
        guard_found: usize,
        bits_found: usize,
    },
}

impl LookupFault {
    /// 原因的 tag，写入 cap fault 消息的 LookupFailureType 字段
    pub fn label(&self) -> usize {
        match self {
            LookupFault::InvalidRoot => 0,
            LookupFault::MissingCap { .. } => 1,
            LookupFault::DepthMismatch { .. } => 2,
            LookupFault::GuardMismatch { .. } => 3,
        }
    }
}
