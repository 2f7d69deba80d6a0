#![allow(dead_code)]

use std::{
    cell::Cell,
    collections::HashMap,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex, Once,
    },
};

use defines::config::{KTHREAD_LIMIT, PAGE_SIZE};
use kernel_tracer::{LevelFilter, Record, Tracer};
use kthread::{
    hal::{PageAllocator, PageTableToken, Pid, ProcessLayer, Scheduler},
    KThreads, RetVal, Tid,
};

/// `ProcessLayer::thread_exited` 的 panic payload，用来观察不返回的 `exit`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadExited {
    pub pid: Pid,
    pub tid: Tid,
    pub retval: RetVal,
}

/// 只记账的页分配器
pub struct MockPages {
    total: usize,
    free: Mutex<usize>,
    next: AtomicUsize,
}

impl MockPages {
    pub fn in_use(&self) -> usize {
        self.total - *self.free.lock().unwrap()
    }
}

impl PageAllocator for MockPages {
    fn alloc_pages(&self, npages: usize) -> Option<usize> {
        let mut free = self.free.lock().unwrap();
        *free = free.checked_sub(npages)?;
        Some(self.next.fetch_add(npages * PAGE_SIZE, Ordering::Relaxed))
    }

    fn free_pages(&self, _base: usize, npages: usize) {
        *self.free.lock().unwrap() += npages;
    }
}

#[derive(Default)]
pub struct MockProcs {
    threads: Mutex<HashMap<Pid, Vec<Tid>>>,
    exited: Mutex<Vec<ThreadExited>>,
}

impl MockProcs {
    pub fn threads_of(&self, pid: Pid) -> Vec<Tid> {
        self.threads
            .lock()
            .unwrap()
            .get(&pid)
            .cloned()
            .unwrap_or_default()
    }

    pub fn exited(&self) -> Vec<ThreadExited> {
        self.exited.lock().unwrap().clone()
    }
}

impl ProcessLayer for MockProcs {
    fn page_table(&self, pid: Pid) -> PageTableToken {
        PageTableToken((8 << 60) | pid.0)
    }

    fn link_thread(&self, pid: Pid, tid: Tid) {
        self.threads.lock().unwrap().entry(pid).or_default().push(tid);
    }

    fn unlink_thread(&self, pid: Pid, tid: Tid) -> bool {
        let mut threads = self.threads.lock().unwrap();
        let Some(list) = threads.get_mut(&pid) else {
            return false;
        };
        let Some(pos) = list.iter().position(|t| *t == tid) else {
            return false;
        };
        list.remove(pos);
        true
    }

    fn thread_exited(&self, pid: Pid, tid: Tid, retval: RetVal) -> ! {
        let exited = ThreadExited { pid, tid, retval };
        self.exited.lock().unwrap().push(exited);
        panic::panic_any(exited)
    }
}

type SwitchHook = Box<dyn FnOnce() + Send>;

#[derive(Default)]
pub struct MockSched {
    runnable: Mutex<Vec<Tid>>,
    switches: AtomicUsize,
    hook: Mutex<Option<SwitchHook>>,
}

impl MockSched {
    pub fn runnable(&self) -> Vec<Tid> {
        self.runnable.lock().unwrap().clone()
    }

    pub fn switches(&self) -> usize {
        self.switches.load(Ordering::SeqCst)
    }

    /// 下一次 `switch` 时执行 `f`，模拟当前线程睡眠期间别的线程做的事
    pub fn on_switch(&self, f: impl FnOnce() + Send + 'static) {
        *self.hook.lock().unwrap() = Some(Box::new(f));
    }
}

thread_local! {
    static HART_ID: Cell<usize> = const { Cell::new(0) };
}

/// 在 hart `hart_id` 上执行 `f`。每个测试线程默认在 hart 0 上
pub fn on_hart<R>(hart_id: usize, f: impl FnOnce() -> R) -> R {
    let prev = HART_ID.replace(hart_id);
    let result = panic::catch_unwind(AssertUnwindSafe(f));
    HART_ID.set(prev);
    result.unwrap_or_else(|payload| panic::resume_unwind(payload))
}

impl Scheduler for MockSched {
    fn hart_id(&self) -> usize {
        HART_ID.get()
    }

    fn make_runnable(&self, tid: Tid) {
        self.runnable.lock().unwrap().push(tid);
    }

    fn switch(&self) {
        self.switches.fetch_add(1, Ordering::SeqCst);
        let hook = self.hook.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
    }
}

pub struct Env {
    pub kt: &'static KThreads,
    pub pages: &'static MockPages,
    pub procs: &'static MockProcs,
    pub sched: &'static MockSched,
}

pub fn env() -> Env {
    env_with(KTHREAD_LIMIT, 1 << 20)
}

/// 线程控制块池容量为 `limit`，一共有 `npages` 个物理页
pub fn env_with(limit: usize, npages: usize) -> Env {
    setup_once();
    let pages = leak(MockPages {
        total: npages,
        free: Mutex::new(npages),
        next: AtomicUsize::new(0x8020_0000),
    });
    let procs = leak(MockProcs::default());
    let sched = leak(MockSched::default());
    let kt = leak(KThreads::with_limit(limit, pages, procs, sched));
    Env {
        kt,
        pages,
        procs,
        sched,
    }
}

fn leak<T>(value: T) -> &'static T {
    Box::leak(Box::new(value))
}

/// 把日志收集起来，测试可以检查某条日志是否出现过
struct LogSink {
    lines: Mutex<Vec<String>>,
}

impl Tracer for LogSink {
    fn log(&self, record: &Record<'_>) {
        let mut line = String::new();
        kernel_tracer::write_record(&mut line, record).unwrap();
        self.lines.lock().unwrap().push(line);
    }
}

static LOGS: LogSink = LogSink {
    lines: Mutex::new(Vec::new()),
};

/// 至今所有测试记录下的日志中，是否有包含 `needle` 的
pub fn logged(needle: &str) -> bool {
    LOGS.lines.lock().unwrap().iter().any(|line| line.contains(needle))
}

/// 注册日志输出。另外默认的 panic hook 会为每个 `ThreadExited` 打印一遍，太吵
fn setup_once() {
    static QUIET: Once = Once::new();
    QUIET.call_once(|| {
        kernel_tracer::init(&LOGS);
        kernel_tracer::set_max_level(LevelFilter::Debug);
        let default = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if info.payload().downcast_ref::<ThreadExited>().is_none() {
                default(info);
            }
        }));
    });
}

pub fn entry(_: usize, _: usize) -> RetVal {
    RetVal::NULL
}

/// 以 `tid` 为当前线程执行 `f`，结束后恢复原来的当前线程
pub fn run_as<R>(kt: &KThreads, tid: Tid, f: impl FnOnce() -> R) -> R {
    let prev = kt.replace_current(Some(tid));
    let result = panic::catch_unwind(AssertUnwindSafe(f));
    kt.replace_current(prev);
    result.unwrap_or_else(|payload| panic::resume_unwind(payload))
}

/// 以 `tid` 为当前线程执行 `f`，`f` 必须让线程退出
pub fn run_until_exit(kt: &KThreads, tid: Tid, f: impl FnOnce()) -> ThreadExited {
    let prev = kt.replace_current(Some(tid));
    let result = panic::catch_unwind(AssertUnwindSafe(|| catch_exit(f)));
    kt.replace_current(prev);
    result.unwrap_or_else(|payload| panic::resume_unwind(payload))
}

/// 执行必然退出的 `f`，不动当前线程。用来模拟线程退出后还没被切换走的时候
pub fn catch_exit(f: impl FnOnce()) -> ThreadExited {
    let payload = panic::catch_unwind(AssertUnwindSafe(f)).expect_err("thread returned from exit");
    match payload.downcast::<ThreadExited>() {
        Ok(exited) => *exited,
        Err(payload) => panic::resume_unwind(payload),
    }
}
