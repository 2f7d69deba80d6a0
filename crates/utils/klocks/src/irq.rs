//! 关中断的 RAII 守卫
//!
//! 只有 riscv64 上真正操作 `sstatus.SIE`。在宿主机上（比如跑测试时）没有中断可关，守卫什么也不做

use core::marker::PhantomData;

pub struct NoIrqGuard {
    #[cfg(target_arch = "riscv64")]
    before: bool,
    // 不允许 Guard 越过 .await 或被送到别的 hart 上
    _not_send: PhantomData<*const ()>,
}

impl NoIrqGuard {
    #[allow(clippy::new_without_default)]
    #[inline]
    pub fn new() -> Self {
        #[cfg(target_arch = "riscv64")]
        {
            use riscv::register::sstatus;
            let before = sstatus::read().sie();
            if before {
                unsafe { sstatus::clear_sie() };
            }
            Self {
                before,
                _not_send: PhantomData,
            }
        }
        #[cfg(not(target_arch = "riscv64"))]
        Self {
            _not_send: PhantomData,
        }
    }
}

impl Drop for NoIrqGuard {
    #[inline]
    fn drop(&mut self) {
        #[cfg(target_arch = "riscv64")]
        if self.before {
            unsafe { riscv::register::sstatus::set_sie() };
        }
    }
}
