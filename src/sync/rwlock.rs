//! Read/write lock with writer-preference starvation avoidance (spec
//! §4.6): once a writer is waiting, later readers queue behind it rather
//! than continuing to join the existing readers, so a steady stream of
//! readers cannot starve a writer indefinitely.

use std::collections::VecDeque;

use spin::Mutex as SpinMutex;

use crate::processor::{self, block_current};
use crate::task::{BlockReason, TaskId};

enum Holder {
    None,
    Readers(u32),
    Writer(TaskId),
}

struct State {
    holder: Holder,
    reader_waiters: VecDeque<TaskId>,
    writer_waiters: VecDeque<TaskId>,
}

pub struct RwLock {
    state: SpinMutex<State>,
}

impl RwLock {
    pub fn new() -> Self {
        RwLock {
            state: SpinMutex::new(State {
                holder: Holder::None,
                reader_waiters: VecDeque::new(),
                writer_waiters: VecDeque::new(),
            }),
        }
    }

    pub fn read_acquire(&self) {
        let me = processor::this_task().unwrap_or_else(|| crate::error::fatal("read_acquire() outside a task"));
        loop {
            let mut st = self.state.lock();
            let can_join = !matches!(st.holder, Holder::Writer(_)) && st.writer_waiters.is_empty();
            if can_join {
                st.holder = match st.holder {
                    Holder::Readers(n) => Holder::Readers(n + 1),
                    _ => Holder::Readers(1),
                };
                return;
            }
            st.reader_waiters.push_back(me);
            drop(st);
            block_current(BlockReason::EntryQueue);
            if matches!(self.state.lock().holder, Holder::Readers(_)) {
                // Promoted as part of a reader batch; done.
                return;
            }
        }
    }

    pub fn write_acquire(&self) {
        let me = processor::this_task().unwrap_or_else(|| crate::error::fatal("write_acquire() outside a task"));
        loop {
            let mut st = self.state.lock();
            if matches!(st.holder, Holder::None) {
                st.holder = Holder::Writer(me);
                return;
            }
            st.writer_waiters.push_back(me);
            drop(st);
            block_current(BlockReason::EntryQueue);
            let st = self.state.lock();
            if matches!(st.holder, Holder::Writer(t) if t == me) {
                return;
            }
        }
    }

    pub fn read_release(&self) {
        let mut st = self.state.lock();
        match st.holder {
            Holder::Readers(n) if n > 1 => {
                st.holder = Holder::Readers(n - 1);
            }
            Holder::Readers(_) => {
                st.holder = Holder::None;
                self.promote(&mut st);
            }
            _ => crate::error::fatal("read_release() without a held read lock"),
        }
    }

    pub fn write_release(&self) {
        let mut st = self.state.lock();
        debug_assert!(matches!(st.holder, Holder::Writer(_)));
        st.holder = Holder::None;
        self.promote(&mut st);
    }

    /// Hand the lock to the next waiter(s), preferring a single queued
    /// writer over any number of queued readers.
    fn promote(&self, st: &mut State) {
        if let Some(writer) = st.writer_waiters.pop_front() {
            st.holder = Holder::Writer(writer);
            wake(writer);
            return;
        }
        if !st.reader_waiters.is_empty() {
            let batch: Vec<_> = st.reader_waiters.drain(..).collect();
            st.holder = Holder::Readers(batch.len() as u32);
            for r in batch {
                wake(r);
            }
        }
    }
}

impl Default for RwLock {
    fn default() -> Self {
        Self::new()
    }
}

fn wake(task: TaskId) {
    if let Some(cluster) = processor::this_cluster() {
        cluster.wake_task(task);
    } else {
        crate::error::fatal("wake() outside a cluster");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_lock_has_no_holder() {
        let l = RwLock::new();
        assert!(matches!(l.state.lock().holder, Holder::None));
    }
}
