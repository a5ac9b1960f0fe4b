//! Reentrant owner lock (spec §4.6): a lock reentrant by task identity,
//! usable with an associated condition lock.
//!
//! Implemented directly on a spinlock plus a FIFO waiter queue rather than
//! on [`crate::mutex_object::MutexObject`]: an owner lock has no entry
//! operations or accept protocol, just acquire/release and a recursion
//! count, matching the original `uOwnerLock`.

use std::collections::VecDeque;

use spin::Mutex as SpinMutex;

use crate::processor::{self, block_current};
use crate::task::{BlockReason, TaskId};

struct State {
    owner: Option<TaskId>,
    depth: u32,
    waiters: VecDeque<TaskId>,
}

/// A mutual-exclusion lock that the same task may acquire more than once
/// without deadlocking itself, releasing only once the acquire count drops
/// back to zero.
pub struct OwnerLock {
    state: SpinMutex<State>,
}

impl OwnerLock {
    pub fn new() -> Self {
        OwnerLock {
            state: SpinMutex::new(State {
                owner: None,
                depth: 0,
                waiters: VecDeque::new(),
            }),
        }
    }

    pub fn acquire(&self) {
        let me = processor::this_task().unwrap_or_else(|| crate::error::fatal("acquire() outside a task"));
        loop {
            let mut st = self.state.lock();
            match st.owner {
                None => {
                    st.owner = Some(me);
                    st.depth = 1;
                    return;
                }
                Some(owner) if owner == me => {
                    st.depth += 1;
                    return;
                }
                Some(_) => {
                    st.waiters.push_back(me);
                    drop(st);
                    block_current(BlockReason::EntryQueue);
                    // Re-check: we may have been woken as the new owner.
                }
            }
        }
    }

    /// Returns `false` without blocking if another task holds the lock.
    pub fn try_acquire(&self) -> bool {
        let me = processor::this_task().unwrap_or_else(|| crate::error::fatal("try_acquire() outside a task"));
        let mut st = self.state.lock();
        match st.owner {
            None => {
                st.owner = Some(me);
                st.depth = 1;
                true
            }
            Some(owner) if owner == me => {
                st.depth += 1;
                true
            }
            Some(_) => false,
        }
    }

    /// Release one level of recursion; the lock passes to the next waiter
    /// only once `depth` reaches zero.
    pub fn release(&self) {
        let me = processor::this_task();
        let mut st = self.state.lock();
        debug_assert_eq!(st.owner, me, "release() by non-owner");
        st.depth -= 1;
        if st.depth > 0 {
            return;
        }
        if let Some(next) = st.waiters.pop_front() {
            st.owner = Some(next);
            st.depth = 1;
            drop(st);
            wake(next);
        } else {
            st.owner = None;
        }
    }

    pub fn held_by_current(&self) -> bool {
        self.state.lock().owner == processor::this_task()
    }
}

impl Default for OwnerLock {
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
    fn fresh_lock_is_unheld() {
        let l = OwnerLock::new();
        assert!(!l.held_by_current());
    }
}
