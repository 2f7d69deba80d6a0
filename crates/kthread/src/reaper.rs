//! detach、join 以及回收已退出线程的 reaper 线程
//!
//! 被 detach 的线程退出时进入 `dead` 队列，由 reaper 线程统一回收。
//! 加锁顺序：先线程表，再 `dead`

use core::sync::atomic::{AtomicBool, Ordering};

use defines::{
    config::REAPD_QUEUE_LEN,
    error::{errno, KResult},
};
use heapless::Deque;
use klocks::{Once, SpinMutex};

use crate::{
    hal::Pid,
    thread::{RetVal, ThreadFlags, ThreadStatus, Tid},
    waitq::{WaitChannel, WaitQueues},
    KThreads, ThreadTable,
};

pub(crate) struct Reaper {
    /// 已退出、等待回收的 detached 线程
    dead: SpinMutex<Deque<Tid, REAPD_QUEUE_LEN>>,
    /// reaper 线程空闲时睡在这里
    reapd_chan: WaitChannel,
    /// join 的线程都睡在这里，被唤醒时按 tid 精确唤醒
    join_chan: WaitChannel,
    shutdown: AtomicBool,
    daemon: Once<Tid>,
}

impl Reaper {
    pub fn new(queues: &mut WaitQueues) -> Self {
        Self {
            dead: SpinMutex::new(Deque::new()),
            reapd_chan: queues.create(),
            join_chan: queues.create(),
            shutdown: AtomicBool::new(false),
            daemon: Once::new(),
        }
    }

    #[track_caller]
    fn push_dead(&self, tid: Tid) {
        self.dead
            .lock()
            .push_back(tid)
            .unwrap_or_else(|tid| panic!("reaper queue is full when pushing {tid}"));
    }

    /// 若 reaper 线程正在睡眠，把它唤醒
    fn wake_reapd(&self, table: &mut ThreadTable) -> Option<Tid> {
        let tid = table.queues.pop(self.reapd_chan)?;
        table.mark_dequeued(tid, self.reapd_chan);
        Some(tid)
    }
}

fn reapd_entry(kthreads: usize, _: usize) -> RetVal {
    // SAFETY: `reapd_init` 传入的是 `&'static KThreads`
    let kthreads = unsafe { &*(kthreads as *const KThreads) };
    kthreads.reapd_run()
}

impl KThreads {
    /// 线程退出时在线程表锁内调用。返回需要交给调度器的线程
    pub(crate) fn on_exit(&self, table: &mut ThreadTable, tid: Tid) -> Option<Tid> {
        let thread = table.thread(tid);
        if thread.flags.contains(ThreadFlags::DETACHED) {
            self.reaper.push_dead(tid);
            return self.reaper.wake_reapd(table);
        }
        let joiner = thread.joiner?;
        let waiting = table
            .threads
            .get(joiner)
            .is_some_and(|j| j.wchan == Some(self.reaper.join_chan));
        if waiting {
            table.wake(joiner);
            Some(joiner)
        } else {
            None
        }
    }

    /// 线程退出后由 reaper 回收，不能再被 join
    pub fn detach(&self, tid: Tid) -> KResult<()> {
        let woken = self.table.lock_with(|table| -> KResult<Option<Tid>> {
            let thread = table.threads.get_mut(tid).ok_or(errno::ESRCH)?;
            if thread.flags.contains(ThreadFlags::DETACHED) || thread.joiner.is_some() {
                return Err(errno::EINVAL);
            }
            thread.flags.insert(ThreadFlags::DETACHED);
            if thread.status != ThreadStatus::Exited {
                return Ok(None);
            }
            self.reaper.push_dead(tid);
            Ok(self.reaper.wake_reapd(table))
        })?;
        if let Some(reapd) = woken {
            self.sched.make_runnable(reapd);
        }
        trace!("detach thread {tid}");
        Ok(())
    }

    /// 等待 `tid` 退出，回收它并返回退出值。等待期间可被取消，此时返回 `EINTR`
    pub fn join(&self, tid: Tid) -> KResult<RetVal> {
        let curr = self.curr_tid();
        if curr == tid {
            return Err(errno::EDEADLK);
        }
        loop {
            let exited = self.table.lock_with(|table| -> KResult<Option<RetVal>> {
                let thread = table.threads.get_mut(tid).ok_or(errno::ESRCH)?;
                if thread.flags.contains(ThreadFlags::DETACHED)
                    || thread.joiner.is_some_and(|joiner| joiner != curr)
                {
                    return Err(errno::EINVAL);
                }
                if thread.status == ThreadStatus::Exited {
                    thread.joiner = None;
                    return Ok(Some(thread.retval));
                }
                if table.thread(curr).is_cancelled() {
                    table.thread_mut(tid).joiner = None;
                    return Err(errno::EINTR);
                }
                table.thread_mut(tid).joiner = Some(curr);
                table.block(curr, self.reaper.join_chan, ThreadStatus::SleepingCancellable);
                Ok(None)
            })?;
            if let Some(retval) = exited {
                self.wait_off_hart(tid);
                self.destroy(tid);
                trace!("thread {curr} joins {tid}");
                return Ok(retval);
            }

            self.sched.switch();

            let cancelled = self.table.lock_with(|table| {
                if !table.thread(curr).is_cancelled() {
                    return false;
                }
                if let Some(thread) = table.threads.get_mut(tid) {
                    if thread.joiner == Some(curr) {
                        thread.joiner = None;
                    }
                }
                true
            });
            if cancelled {
                return Err(errno::EINTR);
            }
        }
    }

    /// 在进程 `pid` 中启动 reaper 线程，只能调用一次
    pub fn reapd_init(&'static self, pid: Pid) -> Tid {
        let mut created = false;
        let &tid = self.reaper.daemon.call_once(|| {
            created = true;
            self.create(pid, reapd_entry, self as *const Self as usize, 0)
        });
        assert!(created, "reaper already started as {tid}");
        self.sched.make_runnable(tid);
        info!("reaper thread {tid} started");
        tid
    }

    pub fn reaper_thread(&self) -> Option<Tid> {
        self.reaper.daemon.get().copied()
    }

    /// reaper 线程的主循环。反复回收 `dead` 中的线程，空闲时睡眠，直到 [`reapd_shutdown`](Self::reapd_shutdown)
    pub fn reapd_run(&self) -> RetVal {
        let curr = self.curr_tid();
        while !self.reaper.shutdown.load(Ordering::Acquire) {
            self.reap_dead();
            let idle = self.table.lock_with(|table| {
                let idle = self.reaper.dead.lock().is_empty()
                    && !self.reaper.shutdown.load(Ordering::Acquire);
                if idle {
                    table.block(curr, self.reaper.reapd_chan, ThreadStatus::Sleeping);
                }
                idle
            });
            if idle {
                self.sched.switch();
            }
        }
        let reaped = self.reap_dead();
        info!("reaper thread {curr} exits, {reaped} threads reaped at last");
        RetVal::NULL
    }

    /// 等待已退出的 `tid` 离开它所在的 hart。
    ///
    /// 线程标记为退出、唤醒 joiner 或 reaper 之后，还要在自己的栈上切换走，在那之前不能回收它的栈
    fn wait_off_hart(&self, tid: Tid) {
        while self.harts.running_on(tid).is_some() {
            core::hint::spin_loop();
        }
    }

    /// 回收 `dead` 中的所有线程，返回回收的数量
    pub fn reap_dead(&self) -> usize {
        let mut reaped = 0;
        loop {
            let Some(tid) = self.reaper.dead.lock().pop_front() else {
                break;
            };
            self.wait_off_hart(tid);
            self.destroy(tid);
            reaped += 1;
        }
        if reaped > 0 {
            trace!("reap {reaped} dead threads");
        }
        reaped
    }

    /// 让 reaper 线程在处理完手头的线程后退出
    pub fn reapd_shutdown(&self) {
        self.reaper.shutdown.store(true, Ordering::Release);
        self.wakeup_on(self.reaper.reapd_chan);
    }
}
