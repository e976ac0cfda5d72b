//! 线程上下文的寄存器模型
//!
//! 寄存器编号沿用 riscv64 的布局：通用寄存器在前，后面跟着平台相关的
//! 状态寄存器和内核记录的 FaultIP / NextIP。IPC 相关代码不直接使用
//! 数字下标，而是通过 [`ArchReg`] 命名访问。

pub const REG_RA: usize = 0;
pub const REG_SP: usize = 1;
pub const REG_TLS_BASE: usize = 3;
/// a0，IPC 的 badge 经由这个寄存器返回
pub const REG_BADGE: usize = 9;
/// a1，消息描述字所在寄存器
pub const REG_MSG_INFO: usize = 10;
pub const REG_SCAUSE: usize = 31;
pub const REG_SSTATUS: usize = 32;
pub const REG_FAULT_IP: usize = 33;
pub const REG_NEXT_IP: usize = 34;
pub const CONTEXT_REG_NUM: usize = 35;

/// 消息寄存器数量，放不下的部分经由 IPC Buffer 传递
pub const MSG_REGISTER_NUM: usize = 4;
/// 消息寄存器：a2 - a5
pub const MSG_REGISTERS: [usize; MSG_REGISTER_NUM] = [11, 12, 13, 14];

/// 未知系统调用 fault 消息的长度
pub const SYSCALL_MESSAGE_LEN: usize = 10;
/// 用户态异常 fault 消息的长度
pub const EXCEPTION_MESSAGE_LEN: usize = 2;
pub const MAX_FAULT_MESSAGE_LEN: usize = SYSCALL_MESSAGE_LEN;

/// fault 消息使用的寄存器表，第一行是系统调用消息，第二行是异常消息
pub const FAULT_MESSAGES: [[usize; MAX_FAULT_MESSAGE_LEN]; 2] = [
    [33, 1, 0, 9, 10, 11, 12, 13, 14, 15],
    [33, 1, 0, 0, 0, 0, 0, 0, 0, 0],
];

/// 按用途命名的寄存器
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchReg {
    TlsBase,
    Badge,
    MsgInfo,
    FaultIp,
    NextIp,
    /// 第 i 个消息寄存器
    Msg(usize),
    /// fault 消息表 id 中的第 i 个寄存器
    FaultMessage(usize, usize),
}

impl ArchReg {
    /// 转换成上下文中的寄存器下标
    pub const fn to_index(self) -> usize {
        match self {
            ArchReg::TlsBase => REG_TLS_BASE,
            ArchReg::Badge => REG_BADGE,
            ArchReg::MsgInfo => REG_MSG_INFO,
            ArchReg::FaultIp => REG_FAULT_IP,
            ArchReg::NextIp => REG_NEXT_IP,
            ArchReg::Msg(i) => MSG_REGISTERS[i],
            ArchReg::FaultMessage(id, i) => FAULT_MESSAGES[id][i],
        }
    }
}

/// 一个线程的寄存器上下文
#[repr(C)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchContext {
    registers: [usize; CONTEXT_REG_NUM],
}

impl Default for ArchContext {
    fn default() -> Self {
        ArchContext {
            registers: [0; CONTEXT_REG_NUM],
        }
    }
}

impl ArchContext {
    #[inline]
    pub fn register(&self, reg: ArchReg) -> usize {
        self.registers[reg.to_index()]
    }

    #[inline]
    pub fn set_register(&mut self, reg: ArchReg, value: usize) {
        self.registers[reg.to_index()] = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn badge_and_cap_share_a0() {
        assert_eq!(ArchReg::Badge.to_index(), 9);
        assert_eq!(ArchReg::MsgInfo.to_index(), 10);
    }

    #[test]
    fn msg_registers_follow_msg_info() {
        for (i, reg) in MSG_REGISTERS.iter().enumerate() {
            assert_eq!(ArchReg::Msg(i).to_index(), *reg);
        }
    }

    #[test]
    fn fault_message_tables() {
        // 两张表的第一个寄存器都是 FaultIP
        assert_eq!(ArchReg::FaultMessage(0, 0).to_index(), REG_FAULT_IP);
        assert_eq!(ArchReg::FaultMessage(1, 0).to_index(), REG_FAULT_IP);
    }

    #[test]
    fn context_register_round_trip() {
        let mut ctx = ArchContext::default();
        ctx.set_register(ArchReg::Badge, 0x1234);
        ctx.set_register(ArchReg::Msg(2), 7);
        assert_eq!(ctx.register(ArchReg::Badge), 0x1234);
        assert_eq!(ctx.register(ArchReg::Msg(2)), 7);
        assert_eq!(ctx.register(ArchReg::Msg(0)), 0);
    }
}
