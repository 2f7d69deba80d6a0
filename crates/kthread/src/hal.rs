//! 内核线程模块依赖的外部组件。
//!
//! 页分配器、进程层和调度器都不在本模块内实现，这里只约定本模块会调用的接口。
//! 所有这些方法都在**不持有**线程表锁的情况下被调用，因此实现可以反过来调用 [`KThreads`]。
//!
//! [`KThreads`]: crate::KThreads

use core::fmt;

use crate::{RetVal, Tid};

/// 进程号，由进程层分配
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub usize);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 页表的标识（比如 riscv 的 satp 值）。页表归进程所有，线程只是引用它
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct PageTableToken(pub usize);

/// 物理页分配器
pub trait PageAllocator: Sync {
    /// 分配 `npages` 个连续的页，返回起始地址。内存不足时返回 `None`，不会重试
    fn alloc_pages(&self, npages: usize) -> Option<usize>;

    /// 释放从 `base` 开始的 `npages` 个页，必须与分配时一致
    fn free_pages(&self, base: usize, npages: usize);
}

/// 进程层。维护进程的线程集合以及僵尸相关的记录
pub trait ProcessLayer: Sync {
    /// 进程的页表，新线程的上下文会引用它
    fn page_table(&self, pid: Pid) -> PageTableToken;

    /// 把线程加入进程的线程集合
    fn link_thread(&self, pid: Pid, tid: Tid);

    /// 把线程从进程的线程集合中移除，返回它之前是否在集合中
    fn unlink_thread(&self, pid: Pid, tid: Tid) -> bool;

    /// 当前线程已经退出。进程层完成自己的记录后切换走，永远不会再回来
    ///
    /// 此时仍在退出线程的栈上运行。切换完成后调度器调用 [`KThreads::replace_current`]，之后线程才能被回收
    ///
    /// [`KThreads::replace_current`]: crate::KThreads::replace_current
    fn thread_exited(&self, pid: Pid, tid: Tid, retval: RetVal) -> !;
}

/// 调度器。运行队列、调度策略以及真正的上下文切换都在它那里
pub trait Scheduler: Sync {
    /// 调用者所在的 hart
    fn hart_id(&self) -> usize {
        0
    }

    /// 将线程放入运行队列。线程此时已经是 `Runnable` 状态
    fn make_runnable(&self, tid: Tid);

    /// 切换到别的线程。当前线程再次被调度时才返回
    fn switch(&self);
}
