//! 调度器
//!
//! 每个 (domain, priority) 一条就绪队列，配合两级位图在 O(1) 时间内
//! 找到最高优先级。全局状态用原子量和自旋锁保存，`init` 可以把它们
//! 重置为开机时的样子。
//!
//! scheduler action 有三种取值：
//! - [`SCHEDULER_ACTION_RESUME_CURRENT_THREAD`]：什么都不做
//! - [`SCHEDULER_ACTION_CHOOSE_NEW_THREAD`]：从就绪队列挑一个
//! - 其他值：候选线程的 TCB 地址，优先直接切换过去

use core::sync::atomic::{AtomicUsize, Ordering};

use common::config::{
    L2_BITMAP_SIZE, NUM_DOMAINS, NUM_PRIORITIES, NUM_READY_QUEUES, TIME_SLICE, WORD_BITS,
    WORD_RADIX,
};
use common::convert_to_mut_type_ref;
use spin::{Mutex, MutexGuard};

use crate::queue::TcbQueue;
use crate::tcb::Tcb;
use crate::thread_state::ThreadState;

pub const SCHEDULER_ACTION_RESUME_CURRENT_THREAD: usize = 0;
pub const SCHEDULER_ACTION_CHOOSE_NEW_THREAD: usize = 1;

static KS_CUR_THREAD: AtomicUsize = AtomicUsize::new(0);
static KS_IDLE_THREAD: AtomicUsize = AtomicUsize::new(0);
static KS_CUR_DOMAIN: AtomicUsize = AtomicUsize::new(0);
static KS_SCHEDULER_ACTION: AtomicUsize =
    AtomicUsize::new(SCHEDULER_ACTION_CHOOSE_NEW_THREAD);

pub(crate) struct ReadyQueues {
    pub queues: [TcbQueue; NUM_READY_QUEUES],
    l1_bitmap: [usize; NUM_DOMAINS],
    l2_bitmap: [[usize; L2_BITMAP_SIZE]; NUM_DOMAINS],
}

#[inline]
const fn prio_to_l1index(prio: usize) -> usize {
    prio >> WORD_RADIX
}

/// l1 位图按高优先级在高位排列，这里做一次翻转
#[inline]
const fn invert_l1index(l1index: usize) -> usize {
    L2_BITMAP_SIZE - 1 - l1index
}

impl ReadyQueues {
    const fn new() -> Self {
        ReadyQueues {
            queues: [TcbQueue::new(); NUM_READY_QUEUES],
            l1_bitmap: [0; NUM_DOMAINS],
            l2_bitmap: [[0; L2_BITMAP_SIZE]; NUM_DOMAINS],
        }
    }

    pub fn add_to_bitmap(&mut self, dom: usize, prio: usize) {
        let l1index = prio_to_l1index(prio);
        let l1index_inverted = invert_l1index(l1index);
        self.l1_bitmap[dom] |= 1 << l1index;
        self.l2_bitmap[dom][l1index_inverted] |= 1 << (prio & ((1 << WORD_RADIX) - 1));
    }

    pub fn remove_from_bitmap(&mut self, dom: usize, prio: usize) {
        let l1index = prio_to_l1index(prio);
        let l1index_inverted = invert_l1index(l1index);
        self.l2_bitmap[dom][l1index_inverted] &= !(1 << (prio & ((1 << WORD_RADIX) - 1)));
        if self.l2_bitmap[dom][l1index_inverted] == 0 {
            self.l1_bitmap[dom] &= !(1 << l1index);
        }
    }

    /// 位图非空时当前 domain 里的最高优先级
    fn highest_prio(&self, dom: usize) -> usize {
        let l1index = WORD_BITS - 1 - self.l1_bitmap[dom].leading_zeros() as usize;
        let l1index_inverted = invert_l1index(l1index);
        let l2index =
            WORD_BITS - 1 - self.l2_bitmap[dom][l1index_inverted].leading_zeros() as usize;
        (l1index << WORD_RADIX) | l2index
    }
}

static READY_QUEUES: Mutex<ReadyQueues> = Mutex::new(ReadyQueues::new());

pub(crate) fn lock_ready_queues() -> MutexGuard<'static, ReadyQueues> {
    READY_QUEUES.lock()
}

#[inline]
pub const fn ready_queues_index(dom: usize, prio: usize) -> usize {
    dom * NUM_PRIORITIES + prio
}

#[inline]
pub fn current_domain() -> usize {
    KS_CUR_DOMAIN.load(Ordering::Relaxed)
}

#[inline]
pub fn current_thread_ptr() -> usize {
    KS_CUR_THREAD.load(Ordering::Relaxed)
}

/// 当前线程，要求已经设置过
#[inline]
pub fn current_thread() -> &'static mut Tcb {
    convert_to_mut_type_ref::<Tcb>(current_thread_ptr())
}

#[inline]
pub fn set_current_thread(tcb: &Tcb) {
    KS_CUR_THREAD.store(tcb.ptr(), Ordering::Relaxed);
}

#[inline]
pub fn idle_thread_ptr() -> usize {
    KS_IDLE_THREAD.load(Ordering::Relaxed)
}

#[inline]
pub fn set_idle_thread(tcb: &Tcb) {
    KS_IDLE_THREAD.store(tcb.ptr(), Ordering::Relaxed);
}

#[inline]
fn scheduler_action() -> usize {
    KS_SCHEDULER_ACTION.load(Ordering::Relaxed)
}

#[inline]
fn set_scheduler_action(action: usize) {
    KS_SCHEDULER_ACTION.store(action, Ordering::Relaxed);
}

/// 把全局调度状态重置为开机时的样子
pub fn init() {
    *READY_QUEUES.lock() = ReadyQueues::new();
    KS_CUR_THREAD.store(0, Ordering::Relaxed);
    KS_IDLE_THREAD.store(0, Ordering::Relaxed);
    KS_CUR_DOMAIN.store(0, Ordering::Relaxed);
    set_scheduler_action(SCHEDULER_ACTION_CHOOSE_NEW_THREAD);
}

fn is_highest_prio(dom: usize, prio: usize) -> bool {
    let rq = READY_QUEUES.lock();
    rq.l1_bitmap[dom] == 0 || prio >= rq.highest_prio(dom)
}

/// 线程状态变化后检查是否需要重新调度
///
/// 只有当前线程自己失去 runnable 时才触发。
pub fn schedule_tcb(tcb: &Tcb) {
    if tcb.ptr() == current_thread_ptr()
        && scheduler_action() == SCHEDULER_ACTION_RESUME_CURRENT_THREAD
        && !tcb.is_runnable()
    {
        reschedule_required();
    }
}

/// 强制下一次 `schedule` 重选线程，原先的候选线程退回就绪队列
pub fn reschedule_required() {
    let action = scheduler_action();
    if action != SCHEDULER_ACTION_RESUME_CURRENT_THREAD
        && action != SCHEDULER_ACTION_CHOOSE_NEW_THREAD
    {
        convert_to_mut_type_ref::<Tcb>(action).sched_enqueue();
    }
    set_scheduler_action(SCHEDULER_ACTION_CHOOSE_NEW_THREAD);
}

/// 提名 target 作为下一个运行的线程
///
/// 已经有候选线程时退化成重新调度，跨 domain 的线程只入队不提名。
pub fn possible_switch_to(target: &mut Tcb) {
    if current_domain() != target.domain {
        target.sched_enqueue();
    } else if scheduler_action() != SCHEDULER_ACTION_RESUME_CURRENT_THREAD {
        reschedule_required();
        target.sched_enqueue();
    } else {
        set_scheduler_action(target.ptr());
    }
}

/// 从就绪队列里挑出最高优先级的线程并切换，队列全空时切到 idle
fn choose_thread() {
    let thread_ptr = {
        let rq = READY_QUEUES.lock();
        let dom = current_domain();
        if rq.l1_bitmap[dom] != 0 {
            let prio = rq.highest_prio(dom);
            let head = rq.queues[ready_queues_index(dom, prio)].head;
            assert_ne!(head, 0);
            head
        } else {
            0
        }
    };
    if thread_ptr != 0 {
        convert_to_mut_type_ref::<Tcb>(thread_ptr).switch_to_this();
    } else {
        convert_to_mut_type_ref::<Tcb>(idle_thread_ptr()).switch_to_this();
    }
}

/// 按 scheduler action 完成一次调度决策
pub fn schedule() {
    if scheduler_action() != SCHEDULER_ACTION_RESUME_CURRENT_THREAD {
        let current = current_thread();
        let was_runnable = current.is_runnable();
        if was_runnable {
            current.sched_enqueue();
        }
        if scheduler_action() == SCHEDULER_ACTION_CHOOSE_NEW_THREAD {
            choose_thread();
        } else {
            let candidate = convert_to_mut_type_ref::<Tcb>(scheduler_action());
            // 候选线程优先级不占优时走慢速路径重选，避免饿死高优先级线程
            let fastfail =
                current_thread_ptr() == idle_thread_ptr() || candidate.priority < current.priority;
            if fastfail && !is_highest_prio(current_domain(), candidate.priority) {
                candidate.sched_enqueue();
                set_scheduler_action(SCHEDULER_ACTION_CHOOSE_NEW_THREAD);
                choose_thread();
            } else if was_runnable && candidate.priority == current.priority {
                candidate.sched_append();
                set_scheduler_action(SCHEDULER_ACTION_CHOOSE_NEW_THREAD);
                choose_thread();
            } else {
                candidate.switch_to_this();
            }
        }
    }
    set_scheduler_action(SCHEDULER_ACTION_RESUME_CURRENT_THREAD);
}

/// 时钟中断：当前线程时间片用尽时轮转
pub fn timer_tick() {
    let current = current_thread();
    if current.get_state() == ThreadState::Running {
        if current.time_slice > 1 {
            current.time_slice -= 1;
        } else {
            current.time_slice = TIME_SLICE;
            current.sched_append();
            reschedule_required();
        }
    }
}

/// 让当前线程真正开始运行，Restart 状态的线程从 fault 时的 PC 继续
pub fn activate_thread() {
    use crate::tcb::set_thread_state;
    use common::ArchReg;

    let current = current_thread();
    match current.get_state() {
        ThreadState::Running => {}
        ThreadState::Restart => {
            let fault_ip = current.context.register(ArchReg::FaultIp);
            current.context.set_register(ArchReg::NextIp, fault_ip);
            set_thread_state(current, ThreadState::Running);
        }
        ThreadState::IdleThreadState => {}
        state => panic!("current thread is not schedulable: {:?}", state),
    }
}
