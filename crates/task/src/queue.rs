//! Endpoint / Notification 上的等待队列
//!
//! 侵入式双向链表，节点就是 TCB 本身，通过 `ep_next` / `ep_prev` 两个
//! 地址串联。队列头尾以地址形式保存在内核对象里，使用时拷出来改完再
//! 写回去。

use common::convert_to_mut_type_ref;

use crate::tcb::Tcb;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TcbQueue {
    pub head: usize,
    pub tail: usize,
}

impl TcbQueue {
    pub const fn new() -> Self {
        TcbQueue { head: 0, tail: 0 }
    }

    /// 追加到队尾
    pub fn ep_append(&mut self, tcb: &mut Tcb) {
        if self.head == 0 {
            self.head = tcb.ptr();
        } else {
            convert_to_mut_type_ref::<Tcb>(self.tail).ep_next = tcb.ptr();
        }
        tcb.ep_prev = self.tail;
        tcb.ep_next = 0;
        self.tail = tcb.ptr();
    }

    /// 从队列中摘除，tcb 可以位于队列任意位置
    pub fn ep_dequeue(&mut self, tcb: &mut Tcb) {
        if tcb.ep_prev != 0 {
            convert_to_mut_type_ref::<Tcb>(tcb.ep_prev).ep_next = tcb.ep_next;
        } else {
            self.head = tcb.ep_next;
        }
        if tcb.ep_next != 0 {
            convert_to_mut_type_ref::<Tcb>(tcb.ep_next).ep_prev = tcb.ep_prev;
        } else {
            self.tail = tcb.ep_prev;
        }
    }

    #[inline]
    pub fn empty(&self) -> bool {
        self.head == 0
    }
}
