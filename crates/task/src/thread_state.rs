//! 线程状态
//!
//! 除了状态本身，线程阻塞期间的元信息（阻塞在哪个对象上、发送时携带的
//! badge 和权限）也记录在这里。原始内核把这些字段压缩在一个位域里，
//! 这里展开成普通结构体，语义不变。

/// 线程的调度状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThreadState {
    #[default]
    Inactive,
    Running,
    Restart,
    BlockedOnReceive,
    BlockedOnSend,
    BlockedOnReply,
    BlockedOnNotification,
    IdleThreadState,
}

/// 线程状态与阻塞元信息
#[derive(Debug, Clone, Default)]
pub struct TcbState {
    state: ThreadState,
    /// 阻塞所在的 Endpoint / Notification 的地址
    pub blocking_object: usize,
    /// 阻塞发送时携带的 badge
    pub blocking_ipc_badge: usize,
    pub blocking_ipc_can_grant: bool,
    pub blocking_ipc_can_grant_reply: bool,
    /// 这次发送是否是 Call
    pub blocking_ipc_is_call: bool,
    /// 是否已经在某个就绪队列里
    pub tcb_queued: bool,
}

impl TcbState {
    #[inline]
    pub fn get(&self) -> ThreadState {
        self.state
    }

    #[inline]
    pub fn set(&mut self, state: ThreadState) {
        self.state = state;
    }
}
