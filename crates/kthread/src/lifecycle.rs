use defines::error::{errno, KResult};
use scopeguard::ScopeGuard;

use crate::{
    context::{Context, KThreadFn},
    hal::Pid,
    thread::{RetVal, Thread, ThreadStatus, Tid},
    KThreads,
};
#[cfg(not(feature = "mtp"))]
use crate::ThreadTable;

impl KThreads {
    /// 在进程 `pid` 中创建一个从 `entry(arg1, arg2)` 开始执行的线程。
    ///
    /// 线程已处于 `Runnable`，但还没有交给调度器，由调用者决定何时 `make_runnable`。
    /// 内核栈或线程控制块耗尽时直接 panic
    pub fn create(&self, pid: Pid, entry: KThreadFn, arg1: usize, arg2: usize) -> Tid {
        self.try_create(pid, entry, arg1, arg2)
            .unwrap_or_else(|err| panic!("failed to create kernel thread in process {pid}: {err}"))
    }

    /// 与 [`create`](Self::create) 相同，但资源耗尽时返回 `ENOMEM`，已分配的资源会被释放
    pub fn try_create(&self, pid: Pid, entry: KThreadFn, arg1: usize, arg2: usize) -> KResult<Tid> {
        let stack = scopeguard::guard(self.stacks.alloc()?, |stack| self.stacks.free(stack));
        let ctx = Context::setup(entry, arg1, arg2, &stack, self.procs.page_table(pid));
        let allocated = self.table.lock().threads.alloc(stack, |tid, stack| {
            Thread::new(tid, ctx, ScopeGuard::into_inner(stack), Some(pid))
        });
        // 池满时，栈在锁释放之后才随 guard 一起归还
        let tid = match allocated {
            Ok(tid) => tid,
            Err(_stack) => {
                warn!("kthread pool exhausted");
                return Err(errno::ENOMEM);
            }
        };
        self.procs.link_thread(pid, tid);
        debug!("create thread {tid} in process {pid}");
        Ok(tid)
    }

    /// 回收一个不会再运行的线程：释放内核栈，从进程中移除，归还线程控制块。
    ///
    /// 同一个 `tid` 回收两次会 panic
    #[track_caller]
    pub fn destroy(&self, tid: Tid) {
        debug_assert!(
            self.harts.running_on(tid).is_none(),
            "destroy thread {tid} while it is running"
        );
        let mut thread = self.table.lock_with(|table| {
            if let Some(thread) = table.threads.get(tid) {
                debug_assert_eq!(
                    thread.status,
                    ThreadStatus::Exited,
                    "destroy thread {tid} before it exits"
                );
                debug_assert!(!table.is_queued(tid), "destroy queued thread {tid}");
            }
            table.threads.free(tid)
        });

        let stack = thread
            .kstack
            .take()
            .unwrap_or_else(|| panic!("thread {tid} has no kernel stack"));
        self.stacks.free(stack);
        if let Some(pid) = thread.process {
            if self.procs.unlink_thread(pid, tid) {
                trace!("unlink thread {tid} from process {pid}");
            }
        }
        debug!("destroy thread {tid}");
    }

    /// 结束当前线程，`retval` 作为退出值。之后交给进程层，不会返回
    pub fn exit(&self, retval: RetVal) -> ! {
        let tid = self.curr_tid();
        let (pid, woken) = self.table.lock_with(|table| {
            assert!(!table.is_queued(tid), "exiting thread {tid} is on a wait queue");
            let thread = table.thread_mut(tid);
            assert!(
                thread.wchan.is_none(),
                "exiting thread {tid} still waits on {:?}",
                thread.wchan
            );
            assert_ne!(thread.status, ThreadStatus::Exited, "thread {tid} exits twice");
            let pid = thread
                .process
                .unwrap_or_else(|| panic!("thread {tid} exits without a process"));
            thread.retval = retval;
            thread.status = ThreadStatus::Exited;
            (pid, self.on_exit(table, tid))
        });
        if let Some(woken) = woken {
            self.sched.make_runnable(woken);
        }
        debug!("thread {tid} exits with {:#x}", retval.0);
        self.procs.thread_exited(pid, tid, retval)
    }

    /// 为 fork 复制一个线程。
    ///
    /// 新线程有自己的内核栈，上下文中的栈指针和栈范围已经指向新栈。
    /// 它不属于任何进程，由 fork 路径调用 [`bind_process`](Self::bind_process) 决定归属
    pub fn clone_thread(&self, source: Tid) -> Tid {
        let stack = self
            .stacks
            .alloc()
            .unwrap_or_else(|err| panic!("failed to allocate kernel stack to clone {source}: {err}"));
        let stack = scopeguard::guard(stack, |stack| self.stacks.free(stack));

        let allocated = self.table.lock_with(|table| {
            let src = table.thread(source);
            assert_eq!(
                src.status,
                ThreadStatus::Runnable,
                "clone thread {source} while not runnable"
            );
            let mut ctx = src.ctx.clone();
            ctx.rebind_stack(&stack);
            let (retval, errno, cancelled, wchan) =
                (src.retval, src.errno, src.is_cancelled(), src.wchan);

            table.threads.alloc(stack, |tid, stack| {
                let mut thread = Thread::new(tid, ctx, ScopeGuard::into_inner(stack), None);
                thread.retval = retval;
                thread.errno = errno;
                if cancelled {
                    thread.set_cancelled();
                }
                // 只复制引用，新线程并不在该队列上
                thread.wchan = wchan;
                thread
            })
        });
        let tid = allocated
            .unwrap_or_else(|_stack| panic!("kthread pool exhausted while cloning {source}"));
        debug!("clone thread {source} as {tid}");
        tid
    }

    /// 把 clone 出来的线程交给进程 `pid`，同时换上它的页表
    pub fn bind_process(&self, tid: Tid, pid: Pid) {
        let page_table = self.procs.page_table(pid);
        self.table.lock_with(|table| {
            let thread = table.thread_mut(tid);
            assert!(
                thread.process.is_none(),
                "thread {tid} already belongs to process {:?}",
                thread.process
            );
            thread.process = Some(pid);
            thread.ctx.page_table = page_table;
        });
        self.procs.link_thread(pid, tid);
        trace!("bind thread {tid} to process {pid}");
    }

    #[cfg(not(feature = "mtp"))]
    #[allow(clippy::unused_self)]
    fn on_exit(&self, _table: &mut ThreadTable, _tid: Tid) -> Option<Tid> {
        None
    }
}
