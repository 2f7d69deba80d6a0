use defines::config::HART_NUM;
use klocks::SpinMutex;

use crate::thread::Tid;

/// 可以认为代表一个处理器。存放 per-hart 的数据
///
/// 一般只会被所在的 hart 访问，锁只是为了让外面读取（比如断言线程不在运行）时是安全的
pub(crate) struct Hart {
    hart_id: usize,
    /// 当前 hart 上正在运行的线程
    thread: Option<Tid>,
}

impl Hart {
    const fn new(hart_id: usize) -> Self {
        Self {
            hart_id,
            thread: None,
        }
    }

    pub fn hart_id(&self) -> usize {
        self.hart_id
    }

    pub fn replace_thread(&mut self, new_thread: Option<Tid>) -> Option<Tid> {
        core::mem::replace(&mut self.thread, new_thread)
    }

    pub fn curr_thread(&self) -> Option<Tid> {
        self.thread
    }
}

pub(crate) struct Harts {
    harts: [SpinMutex<Hart>; HART_NUM],
}

impl Harts {
    pub fn new() -> Self {
        Self {
            harts: core::array::from_fn(|id| SpinMutex::new(Hart::new(id))),
        }
    }

    #[track_caller]
    pub fn get(&self, hart_id: usize) -> &SpinMutex<Hart> {
        self.harts
            .get(hart_id)
            .unwrap_or_else(|| panic!("hart {hart_id} out of range"))
    }

    /// 正在运行该线程的 hart
    pub fn running_on(&self, tid: Tid) -> Option<usize> {
        self.harts.iter().find_map(|hart| {
            let hart = hart.lock();
            (hart.curr_thread() == Some(tid)).then(|| hart.hart_id())
        })
    }
}
