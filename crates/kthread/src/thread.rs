use core::fmt;

use bitflags::bitflags;
use defines::error::Error;

use crate::{context::Context, hal::Pid, stack::KernelStack, waitq::WaitChannel};

/// 线程控制块的句柄。槽位被回收再利用后代数会变化，旧句柄因此失效
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tid {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl Tid {
    pub fn index(self) -> usize {
        self.index as usize
    }
}

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.index, self.generation)
    }
}

/// 线程的退出值。对本模块而言是不透明的一个字
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct RetVal(pub usize);

impl RetVal {
    pub const NULL: Self = Self(0);
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ThreadStatus {
    /// 就绪或正在运行
    Runnable,
    /// 在等待队列上睡眠，不会被取消打断
    Sleeping,
    /// 在等待队列上睡眠，取消会把它唤醒
    SleepingCancellable,
    /// 已经退出，只等着被回收
    Exited,
}

impl ThreadStatus {
    pub fn is_sleeping(self) -> bool {
        matches!(self, Self::Sleeping | Self::SleepingCancellable)
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ThreadFlags: u8 {
        /// 已被取消。一旦设置就不会再清除
        const CANCELLED = 1 << 0;
        /// 退出后由 reaper 回收，不需要 join
        const DETACHED = 1 << 1;
    }
}

/// 线程控制块
#[derive(Debug)]
pub struct Thread {
    tid: Tid,
    pub(crate) ctx: Context,
    pub(crate) kstack: Option<KernelStack>,
    pub(crate) status: ThreadStatus,
    /// 由线程自己在退出时写入，或者由取消者在它退出前写入
    pub(crate) retval: RetVal,
    /// 只有线程自己会读写
    pub(crate) errno: Option<Error>,
    pub(crate) flags: ThreadFlags,
    /// 正在等待的队列。不拥有该队列
    pub(crate) wchan: Option<WaitChannel>,
    /// 所属进程，设置后不再改变。clone 出来的线程在 fork 完成前为 `None`
    pub(crate) process: Option<Pid>,
    /// 正在 join 它的线程
    #[cfg(feature = "mtp")]
    pub(crate) joiner: Option<Tid>,
}

impl Thread {
    pub(crate) fn new(tid: Tid, ctx: Context, kstack: KernelStack, process: Option<Pid>) -> Self {
        Self {
            tid,
            ctx,
            kstack: Some(kstack),
            status: ThreadStatus::Runnable,
            retval: RetVal::NULL,
            errno: None,
            flags: ThreadFlags::empty(),
            wchan: None,
            process,
            #[cfg(feature = "mtp")]
            joiner: None,
        }
    }

    pub fn tid(&self) -> Tid {
        self.tid
    }

    pub fn status(&self) -> ThreadStatus {
        self.status
    }

    pub fn retval(&self) -> RetVal {
        self.retval
    }

    pub fn errno(&self) -> Option<Error> {
        self.errno
    }

    pub fn is_cancelled(&self) -> bool {
        self.flags.contains(ThreadFlags::CANCELLED)
    }

    pub fn flags(&self) -> ThreadFlags {
        self.flags
    }

    pub fn wait_channel(&self) -> Option<WaitChannel> {
        self.wchan
    }

    pub fn process(&self) -> Option<Pid> {
        self.process
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn kstack(&self) -> Option<&KernelStack> {
        self.kstack.as_ref()
    }

    pub(crate) fn set_cancelled(&mut self) {
        self.flags.insert(ThreadFlags::CANCELLED);
    }
}
