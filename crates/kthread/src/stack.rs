//! 内核栈的分配与释放
//!
//! 每个内核栈占 [`KSTACK_PAGES`] 个连续的页，最低的一页是 guard page，从不存放栈内容，
//! 栈从高地址向下增长，溢出时会先踩到它

use core::ops::Range;

use defines::{
    config::{KSTACK_PAGES, PAGE_SIZE},
    error::{errno, KResult},
};

use crate::hal::PageAllocator;

/// 一个内核栈。没有实现 `Clone`，只能原样交还给 [`StackAllocator::free`]
#[derive(Debug, PartialEq, Eq)]
pub struct KernelStack {
    base: usize,
    npages: usize,
}

impl KernelStack {
    /// 分配得到的起始地址，也就是 guard page 的起始地址
    pub fn base(&self) -> usize {
        self.base
    }

    pub fn npages(&self) -> usize {
        self.npages
    }

    pub fn guard_range(&self) -> Range<usize> {
        self.base..self.base + PAGE_SIZE
    }

    /// 可用栈空间的低地址
    pub fn bottom(&self) -> usize {
        self.base + PAGE_SIZE
    }

    /// 栈顶（不含），初始的栈指针
    pub fn top(&self) -> usize {
        self.base + self.npages * PAGE_SIZE
    }

    /// 可用栈空间的大小，不含 guard page
    pub fn size(&self) -> usize {
        self.top() - self.bottom()
    }

    /// 不对应任何真实内存的栈，只给不关心栈的测试用
    #[cfg(test)]
    pub(crate) fn dangling() -> Self {
        Self {
            base: PAGE_SIZE,
            npages: KSTACK_PAGES,
        }
    }
}

pub struct StackAllocator {
    pages: &'static dyn PageAllocator,
}

impl StackAllocator {
    pub const fn new(pages: &'static dyn PageAllocator) -> Self {
        Self { pages }
    }

    /// 分配一个新的内核栈。内存不足时返回 `ENOMEM`
    pub fn alloc(&self) -> KResult<KernelStack> {
        let base = self.pages.alloc_pages(KSTACK_PAGES).ok_or(errno::ENOMEM)?;
        debug_assert_eq!(base % PAGE_SIZE, 0, "unaligned stack {base:#x}");
        trace!("alloc kernel stack {base:#x}, {KSTACK_PAGES} pages");
        Ok(KernelStack {
            base,
            npages: KSTACK_PAGES,
        })
    }

    pub fn free(&self, stack: KernelStack) {
        trace!("free kernel stack {:#x}", stack.base);
        self.pages.free_pages(stack.base, stack.npages);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use defines::{
        config::{KSTACK_PAGES, KSTACK_SIZE, PAGE_SIZE},
        error::errno,
    };

    use super::StackAllocator;
    use crate::hal::PageAllocator;

    /// 只记账不碰内存的页分配器
    struct Pages {
        free: Mutex<usize>,
        next: Mutex<usize>,
        freed: Mutex<Vec<(usize, usize)>>,
    }

    impl Pages {
        fn leak(free: usize) -> &'static Self {
            Box::leak(Box::new(Self {
                free: Mutex::new(free),
                next: Mutex::new(0x8000_0000),
                freed: Mutex::new(Vec::new()),
            }))
        }
    }

    impl PageAllocator for Pages {
        fn alloc_pages(&self, npages: usize) -> Option<usize> {
            let mut free = self.free.lock().unwrap();
            *free = free.checked_sub(npages)?;
            let mut next = self.next.lock().unwrap();
            let base = *next;
            *next += npages * PAGE_SIZE;
            Some(base)
        }

        fn free_pages(&self, base: usize, npages: usize) {
            *self.free.lock().unwrap() += npages;
            self.freed.lock().unwrap().push((base, npages));
        }
    }

    #[test]
    fn stack_has_one_guard_page_below_usable_space() {
        let pages = Pages::leak(64);
        let stacks = StackAllocator::new(pages);
        let stack = stacks.alloc().unwrap();

        assert_eq!(KSTACK_PAGES, KSTACK_SIZE.div_ceil(PAGE_SIZE) + 1);
        assert_eq!(stack.npages(), KSTACK_PAGES);
        assert_eq!(stack.guard_range(), stack.base()..stack.bottom());
        assert!(stack.size() >= KSTACK_SIZE);
        assert_eq!(stack.top() - stack.base(), KSTACK_PAGES * PAGE_SIZE);
        assert_eq!(*pages.free.lock().unwrap(), 64 - KSTACK_PAGES);
    }

    #[test]
    fn free_returns_exactly_the_allocated_pages() {
        let pages = Pages::leak(64);
        let stacks = StackAllocator::new(pages);
        let stack = stacks.alloc().unwrap();
        let base = stack.base();
        stacks.free(stack);

        assert_eq!(*pages.free.lock().unwrap(), 64);
        assert_eq!(*pages.freed.lock().unwrap(), [(base, KSTACK_PAGES)]);
    }

    #[test]
    fn exhaustion_is_reported_not_retried() {
        let pages = Pages::leak(KSTACK_PAGES + 1);
        let stacks = StackAllocator::new(pages);
        let first = stacks.alloc().unwrap();
        assert_eq!(stacks.alloc(), Err(errno::ENOMEM));
        stacks.free(first);
        assert!(stacks.alloc().is_ok());
    }
}
