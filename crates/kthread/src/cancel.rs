//! 取消以及等待队列上的睡眠与唤醒
//!
//! 取消只是设置标志和退出值。处于可取消睡眠的线程会被唤醒，由它自己在醒来后检查标志然后退出；
//! 不可取消的睡眠不受影响，线程醒来后同样会看到标志

use defines::error::{errno, KResult};
use smallvec::SmallVec;

use crate::{
    thread::{RetVal, ThreadStatus, Tid},
    waitq::WaitChannel,
    KThreads,
};

impl KThreads {
    /// 取消 `target`，退出值记为 `retval`。取消自己等同于 [`exit`](Self::exit)。
    ///
    /// 不会阻塞。对已退出的线程什么也不做
    pub fn cancel(&self, target: Tid, retval: RetVal) {
        if self.current() == Some(target) {
            self.exit(retval);
        }
        let status = self.table.lock_with(|table| {
            let thread = table.thread_mut(target);
            let status = thread.status;
            if status == ThreadStatus::Exited {
                return status;
            }
            thread.retval = retval;
            thread.set_cancelled();
            if status == ThreadStatus::SleepingCancellable {
                table.wake(target);
            }
            status
        });
        match status {
            ThreadStatus::Exited => debug!("cancel exited thread {target}, ignored"),
            ThreadStatus::SleepingCancellable => {
                debug!("cancel thread {target} and wake it up");
                self.sched.make_runnable(target);
            }
            _ => debug!("cancel thread {target}"),
        }
    }

    /// 当前线程睡在 `chan` 上，直到被 [`wakeup_on`](Self::wakeup_on) 唤醒。不会被取消打断
    pub fn sleep_on(&self, chan: WaitChannel) {
        let tid = self.curr_tid();
        self.table
            .lock_with(|table| table.block(tid, chan, ThreadStatus::Sleeping));
        trace!("thread {tid} sleeps on {chan}");
        self.sched.switch();
    }

    /// 可被取消打断的睡眠。线程已被取消，或者睡眠期间被取消时返回 `EINTR`
    pub fn cancellable_sleep_on(&self, chan: WaitChannel) -> KResult<()> {
        let tid = self.curr_tid();
        let blocked = self.table.lock_with(|table| {
            if table.thread(tid).is_cancelled() {
                return false;
            }
            table.block(tid, chan, ThreadStatus::SleepingCancellable);
            true
        });
        if !blocked {
            return Err(errno::EINTR);
        }
        trace!("thread {tid} sleeps on {chan}, cancellable");
        self.sched.switch();

        if self.table.lock_with(|table| table.thread(tid).is_cancelled()) {
            return Err(errno::EINTR);
        }
        Ok(())
    }

    /// 唤醒 `chan` 上等得最久的线程
    pub fn wakeup_on(&self, chan: WaitChannel) -> Option<Tid> {
        let tid = self.table.lock_with(|table| {
            let tid = table.queues.pop(chan)?;
            table.mark_dequeued(tid, chan);
            Some(tid)
        })?;
        trace!("wake up thread {tid} on {chan}");
        self.sched.make_runnable(tid);
        Some(tid)
    }

    /// 唤醒 `chan` 上的所有线程，返回唤醒的数量
    pub fn broadcast_on(&self, chan: WaitChannel) -> usize {
        let woken: SmallVec<[Tid; 8]> = self.table.lock_with(|table| {
            let mut woken = SmallVec::new();
            while let Some(tid) = table.queues.pop(chan) {
                table.mark_dequeued(tid, chan);
                woken.push(tid);
            }
            woken
        });
        for &tid in &woken {
            self.sched.make_runnable(tid);
        }
        trace!("wake up {} threads on {chan}", woken.len());
        woken.len()
    }

    pub fn new_wait_channel(&self) -> WaitChannel {
        self.table.lock().queues.create()
    }

    /// 删除一个等待队列。队列上还有线程时 panic
    pub fn remove_wait_channel(&self, chan: WaitChannel) {
        self.table.lock().queues.remove(chan);
    }

    /// `chan` 上正在睡眠的线程数
    pub fn queue_len(&self, chan: WaitChannel) -> usize {
        self.table.lock().queues.len(chan)
    }
}
