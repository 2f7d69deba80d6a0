const KB: usize = 1024;

/// 一个页大小的 bit 数
pub const PAGE_SIZE_BITS: usize = 12;
/// 页大小
pub const PAGE_SIZE: usize = 1 << PAGE_SIZE_BITS;

/// 内核线程栈的大小，不含 guard page
pub const KSTACK_SIZE: usize = 56 * KB;
/// 一个内核栈实际占用的页数。多出的一页是 guard page，放在栈的低地址端
pub const KSTACK_PAGES: usize = KSTACK_SIZE.div_ceil(PAGE_SIZE) + 1;

/// 同时存活的内核线程控制块的上限
pub const KTHREAD_LIMIT: usize = 256;

/// 处理器（hart）的数量
pub const HART_NUM: usize = 8;

/// reaper 待回收队列的容量。不小于线程上限，入队就不会失败
pub const REAPD_QUEUE_LEN: usize = KTHREAD_LIMIT;
