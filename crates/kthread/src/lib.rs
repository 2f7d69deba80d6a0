//! 内核线程的创建、退出、取消、fork 时的复制以及回收。
//!
//! 线程控制块放在一个定长的池里，用 [`Tid`] 寻址；进程的线程集合和各个等待队列里存的都是
//! `Tid` 而不是指针。控制块与等待队列的所有修改都在同一把关中断的自旋锁下进行。
//!
//! 本模块从不自己切换上下文，只准备好状态，切换交给 [`hal::Scheduler`] 和 [`hal::ProcessLayer`]。

#![cfg_attr(not(test), no_std)]

#[macro_use]
extern crate kernel_tracer;
extern crate alloc;

mod cancel;
mod context;
pub mod hal;
mod hart;
mod lifecycle;
#[cfg(feature = "mtp")]
mod reaper;
mod registry;
mod stack;
mod thread;
mod waitq;

use defines::{config::KTHREAD_LIMIT, error::Error};
use klocks::SpinNoIrqMutex;

pub use self::{
    context::{Context, KThreadFn},
    stack::{KernelStack, StackAllocator},
    thread::{RetVal, Thread, ThreadFlags, ThreadStatus, Tid},
    waitq::WaitChannel,
};
use self::{
    hal::{PageAllocator, ProcessLayer, Scheduler},
    hart::Harts,
    registry::Registry,
    waitq::WaitQueues,
};

/// 受同一把锁保护的线程控制块和等待队列
pub(crate) struct ThreadTable {
    threads: Registry,
    queues: WaitQueues,
}

impl ThreadTable {
    #[track_caller]
    fn thread(&self, tid: Tid) -> &Thread {
        self.threads
            .get(tid)
            .unwrap_or_else(|| panic!("thread {tid} does not exist"))
    }

    #[track_caller]
    fn thread_mut(&mut self, tid: Tid) -> &mut Thread {
        self.threads
            .get_mut(tid)
            .unwrap_or_else(|| panic!("thread {tid} does not exist"))
    }

    /// 线程是否在某个等待队列上
    fn is_queued(&self, tid: Tid) -> bool {
        self.threads
            .get(tid)
            .and_then(Thread::wait_channel)
            .is_some_and(|chan| self.queues.contains(chan, tid))
    }

    /// 把睡眠中的线程从它的等待队列上摘下来，设为就绪。之后由调用者通知调度器
    #[track_caller]
    fn wake(&mut self, tid: Tid) {
        let thread = self
            .threads
            .get_mut(tid)
            .unwrap_or_else(|| panic!("thread {tid} does not exist"));
        debug_assert!(thread.status.is_sleeping(), "wake {tid} while {:?}", thread.status);
        let chan = thread
            .wchan
            .take()
            .unwrap_or_else(|| panic!("sleeping thread {tid} has no wait channel"));
        thread.status = ThreadStatus::Runnable;
        let removed = self.queues.remove_thread(chan, tid);
        debug_assert!(removed, "thread {tid} is not on {chan}");
    }

    /// 让正在运行的线程睡在 `chan` 上。调用者随后释放锁并切换走
    #[track_caller]
    fn block(&mut self, tid: Tid, chan: WaitChannel, status: ThreadStatus) {
        debug_assert!(status.is_sleeping());
        let thread = self.thread_mut(tid);
        assert_eq!(
            thread.status,
            ThreadStatus::Runnable,
            "thread {tid} blocks on {chan} while not runnable"
        );
        thread.status = status;
        thread.wchan = Some(chan);
        self.queues.push(chan, tid);
    }

    /// 已经从队列中出队的线程，清理它的睡眠状态
    fn mark_dequeued(&mut self, tid: Tid, chan: WaitChannel) {
        let thread = self.thread_mut(tid);
        debug_assert_eq!(thread.wchan, Some(chan));
        thread.wchan = None;
        thread.status = ThreadStatus::Runnable;
    }
}

/// 内核线程子系统
pub struct KThreads {
    table: SpinNoIrqMutex<ThreadTable>,
    stacks: StackAllocator,
    procs: &'static dyn ProcessLayer,
    sched: &'static dyn Scheduler,
    harts: Harts,
    #[cfg(feature = "mtp")]
    reaper: reaper::Reaper,
}

impl KThreads {
    pub fn new(
        pages: &'static dyn PageAllocator,
        procs: &'static dyn ProcessLayer,
        sched: &'static dyn Scheduler,
    ) -> Self {
        Self::with_limit(KTHREAD_LIMIT, pages, procs, sched)
    }

    /// 线程控制块池的容量为 `limit`，不能超过 [`KTHREAD_LIMIT`]
    pub fn with_limit(
        limit: usize,
        pages: &'static dyn PageAllocator,
        procs: &'static dyn ProcessLayer,
        sched: &'static dyn Scheduler,
    ) -> Self {
        assert!(limit <= KTHREAD_LIMIT, "kthread limit {limit} exceeds {KTHREAD_LIMIT}");
        #[allow(unused_mut)]
        let mut queues = WaitQueues::default();
        #[cfg(feature = "mtp")]
        let reaper = reaper::Reaper::new(&mut queues);
        Self {
            table: SpinNoIrqMutex::new(ThreadTable {
                threads: Registry::with_limit(limit),
                queues,
            }),
            stacks: StackAllocator::new(pages),
            procs,
            sched,
            harts: Harts::new(),
            #[cfg(feature = "mtp")]
            reaper,
        }
    }

    /// 当前 hart 上正在运行的线程
    pub fn current(&self) -> Option<Tid> {
        self.harts
            .get(self.sched.hart_id())
            .lock()
            .curr_thread()
    }

    #[track_caller]
    pub(crate) fn curr_tid(&self) -> Tid {
        self.current().unwrap_or_else(|| {
            panic!("no thread running on hart {}", self.sched.hart_id())
        })
    }

    /// 调度器切换到 `tid` 时调用，返回之前在该 hart 上的线程
    ///
    /// 必须在切换完成、之前的线程不再使用自己的栈之后调用。join 和 reaper 以此判断能否回收已退出的线程
    pub fn replace_current(&self, tid: Option<Tid>) -> Option<Tid> {
        self.harts
            .get(self.sched.hart_id())
            .lock()
            .replace_thread(tid)
    }

    /// 锁住线程表然后读取线程控制块。`tid` 已失效时返回 `None`
    pub fn with_thread<R>(&self, tid: Tid, f: impl FnOnce(&Thread) -> R) -> Option<R> {
        self.table.lock_with(|table| table.threads.get(tid).map(f))
    }

    pub fn thread_count(&self) -> usize {
        self.table.lock().threads.len()
    }

    /// 线程是否在某个等待队列上
    pub fn is_queued(&self, tid: Tid) -> bool {
        self.table.lock().is_queued(tid)
    }

    /// 所有存活线程中，等待队列成员关系与状态是否一致
    ///
    /// 即：在某个队列上，当且仅当处于睡眠状态且等待队列引用非空
    pub fn queue_membership_consistent(&self) -> bool {
        self.table.lock_with(|table| {
            table.threads.iter().all(|thread| {
                let queued = table.is_queued(thread.tid());
                queued == (thread.status.is_sleeping() && thread.wchan.is_some())
            })
        })
    }

    /// 当前线程上一次操作的错误。只有线程自己会读写
    pub fn errno(&self) -> Option<Error> {
        let tid = self.curr_tid();
        self.table.lock_with(|table| table.thread(tid).errno)
    }

    pub fn set_errno(&self, errno: Option<Error>) {
        let tid = self.curr_tid();
        self.table.lock_with(|table| table.thread_mut(tid).errno = errno);
    }
}
