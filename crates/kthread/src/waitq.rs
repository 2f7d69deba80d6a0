//! 等待队列。线程控制块只记录自己在哪个队列上，队列里存的是 [`Tid`]

use alloc::collections::VecDeque;
use core::fmt;

use slab::Slab;

use crate::thread::Tid;

/// 等待队列的句柄
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WaitChannel(usize);

impl fmt::Display for WaitChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wchan#{}", self.0)
    }
}

#[derive(Default)]
pub(crate) struct WaitQueues {
    queues: Slab<VecDeque<Tid>>,
}

impl WaitQueues {
    pub fn create(&mut self) -> WaitChannel {
        WaitChannel(self.queues.insert(VecDeque::new()))
    }

    #[track_caller]
    pub fn remove(&mut self, chan: WaitChannel) {
        let queue = self.queues.remove(chan.0);
        assert!(queue.is_empty(), "{chan} still has {} sleepers", queue.len());
    }

    #[track_caller]
    fn queue_mut(&mut self, chan: WaitChannel) -> &mut VecDeque<Tid> {
        self.queues
            .get_mut(chan.0)
            .unwrap_or_else(|| panic!("{chan} does not exist"))
    }

    pub fn push(&mut self, chan: WaitChannel, tid: Tid) {
        self.queue_mut(chan).push_back(tid);
    }

    pub fn pop(&mut self, chan: WaitChannel) -> Option<Tid> {
        self.queue_mut(chan).pop_front()
    }

    /// 把线程从队列中摘下来，返回它原来是否在队列中
    pub fn remove_thread(&mut self, chan: WaitChannel, tid: Tid) -> bool {
        let queue = self.queue_mut(chan);
        match queue.iter().position(|t| *t == tid) {
            Some(pos) => {
                queue.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, chan: WaitChannel, tid: Tid) -> bool {
        self.queues.get(chan.0).is_some_and(|q| q.contains(&tid))
    }

    pub fn len(&self, chan: WaitChannel) -> usize {
        self.queues.get(chan.0).map_or(0, VecDeque::len)
    }
}
