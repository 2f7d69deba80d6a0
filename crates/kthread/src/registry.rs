//! 线程控制块池
//!
//! 容量固定的 slab，用 [`Tid`] 寻址。槽位被回收时代数加一，过期的 `Tid` 找不到任何线程

use alloc::vec::Vec;

use slab::Slab;

use crate::thread::{Thread, Tid};

pub struct Registry {
    threads: Slab<Thread>,
    /// 每个槽位当前的代数
    generations: Vec<u32>,
    limit: usize,
}

impl Registry {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            threads: Slab::with_capacity(limit),
            generations: Vec::with_capacity(limit),
            limit,
        }
    }

    /// 分配一个槽位，用 `payload` 构造线程控制块。池满时原样交还 `payload`
    pub fn alloc<T>(&mut self, payload: T, f: impl FnOnce(Tid, T) -> Thread) -> Result<Tid, T> {
        if self.threads.len() >= self.limit {
            return Err(payload);
        }
        let entry = self.threads.vacant_entry();
        let index = entry.key();
        if index == self.generations.len() {
            self.generations.push(0);
        }
        let tid = Tid {
            index: index as u32,
            generation: self.generations[index],
        };
        let thread = f(tid, payload);
        debug_assert_eq!(thread.tid(), tid);
        entry.insert(thread);
        Ok(tid)
    }

    /// 回收一个槽位。`tid` 过期时 panic，这样重复回收一定会被发现
    #[track_caller]
    pub fn free(&mut self, tid: Tid) -> Thread {
        assert!(self.contains(tid), "free stale thread {tid}");
        let index = tid.index();
        self.generations[index] = self.generations[index].wrapping_add(1);
        self.threads.remove(index)
    }

    pub fn contains(&self, tid: Tid) -> bool {
        self.get(tid).is_some()
    }

    pub fn get(&self, tid: Tid) -> Option<&Thread> {
        self.threads.get(tid.index()).filter(|t| t.tid() == tid)
    }

    pub fn get_mut(&mut self, tid: Tid) -> Option<&mut Thread> {
        self.threads.get_mut(tid.index()).filter(|t| t.tid() == tid)
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Thread> + '_ {
        self.threads.iter().map(|(_, t)| t)
    }
}

#[cfg(test)]
mod tests {
    use super::Registry;
    use crate::{context::Context, stack::KernelStack, thread::Thread};

    fn alloc(reg: &mut Registry) -> Option<crate::Tid> {
        reg.alloc(KernelStack::dangling(), |tid, stack| {
            Thread::new(tid, Context::default(), stack, None)
        })
        .ok()
    }

    #[test]
    fn pool_is_bounded() {
        let mut reg = Registry::with_limit(2);
        let a = alloc(&mut reg).unwrap();
        let _b = alloc(&mut reg).unwrap();
        assert!(alloc(&mut reg).is_none());
        reg.free(a);
        assert!(alloc(&mut reg).is_some());
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn reused_slot_gets_new_generation() {
        let mut reg = Registry::with_limit(4);
        let a = alloc(&mut reg).unwrap();
        reg.free(a);
        let b = alloc(&mut reg).unwrap();
        assert_eq!(a.index(), b.index());
        assert_ne!(a, b);
        assert!(reg.get(a).is_none());
        assert!(reg.get(b).is_some());
    }

    #[test]
    #[should_panic(expected = "free stale thread")]
    fn double_free_is_rejected() {
        let mut reg = Registry::with_limit(4);
        let a = alloc(&mut reg).unwrap();
        reg.free(a);
        reg.free(a);
    }
}
