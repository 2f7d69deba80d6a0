use crate::{hal::PageTableToken, stack::KernelStack, RetVal};

/// 内核线程的入口函数。返回值会作为线程的退出值
pub type KThreadFn = fn(usize, usize) -> RetVal;

/// 线程切换时保存的上下文，布局与切换汇编约定一致
///
/// 新线程第一次被切换到时，切换代码从 `ra` 处开始执行，
/// 并以 `a[0]`、`a[1]` 作为入口函数的两个参数
#[derive(Clone, Debug, PartialEq, Eq, Default)]
#[repr(C)]
pub struct Context {
    pub ra: usize,
    pub sp: usize,
    /// callee-saved 寄存器 s0~s11
    pub s: [usize; 12],
    pub a: [usize; 2],
    pub page_table: PageTableToken,
    /// 可用栈空间的低地址
    pub kstack: usize,
    pub kstack_size: usize,
}

impl Context {
    /// 让上下文在新栈上从 `entry(arg1, arg2)` 开始执行，使用进程的页表
    pub fn setup(
        entry: KThreadFn,
        arg1: usize,
        arg2: usize,
        stack: &KernelStack,
        page_table: PageTableToken,
    ) -> Self {
        let mut ctx = Self {
            ra: entry as usize,
            a: [arg1, arg2],
            page_table,
            ..Self::default()
        };
        ctx.rebind_stack(stack);
        ctx
    }

    /// 换到另一个栈上，其余寄存器保持不变。fork 时用
    pub fn rebind_stack(&mut self, stack: &KernelStack) {
        self.kstack = stack.bottom();
        self.kstack_size = stack.size();
        // 栈顶按 16 字节对齐
        self.sp = stack.top() & !0xf;
    }
}
