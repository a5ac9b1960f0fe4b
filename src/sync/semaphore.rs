//! Counting semaphore with `P`/`V`/`TryP` and a timed `P` (spec §4.6).
//!
//! Built directly on a cluster's spinlock and wake primitives rather than
//! on [`crate::mutex_object::MutexObject`], since a semaphore has no entry
//! operations or accept protocol to speak of — just a counter and a FIFO of
//! blocked waiters, as the original `uSemaphore` is implemented.

use std::collections::VecDeque;
use std::time::Duration;

use spin::Mutex as SpinMutex;

use crate::error::Outcome;
use crate::processor::{self, block_current};
use crate::task::{BlockReason, TaskId};
use crate::timer::TimerHandle;

struct Waiter {
    task: TaskId,
    timer: Option<TimerHandle>,
}

struct State {
    count: i64,
    waiters: VecDeque<Waiter>,
}

/// A counting semaphore (spec GLOSSARY, §4.6).
pub struct Semaphore {
    state: SpinMutex<State>,
}

impl Semaphore {
    pub fn new(initial: i64) -> Self {
        Semaphore {
            state: SpinMutex::new(State {
                count: initial,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Decrement, blocking the caller if the count would go negative.
    pub fn p(&self) {
        let me = processor::this_task().unwrap_or_else(|| crate::error::fatal("P() outside a task"));
        {
            let mut st = self.state.lock();
            if st.count > 0 {
                st.count -= 1;
                return;
            }
            st.waiters.push_back(Waiter { task: me, timer: None });
        }
        block_current(BlockReason::Semaphore);
    }

    /// Decrement without blocking; `true` on success.
    pub fn try_p(&self) -> bool {
        let mut st = self.state.lock();
        if st.count > 0 {
            st.count -= 1;
            true
        } else {
            false
        }
    }

    /// Decrement, blocking up to `duration`. Resolves the signal-vs-timeout
    /// race via a single `TimerHandle` winner flag under this semaphore's
    /// own spinlock (spec §4.6, §5 "Cancellation").
    pub fn p_timed(&self, duration: Duration) -> Outcome<()> {
        let me = processor::this_task().unwrap_or_else(|| crate::error::fatal("P(timeout) outside a task"));
        let handle = {
            let mut st = self.state.lock();
            if st.count > 0 {
                st.count -= 1;
                return Outcome::Signalled(());
            }
            let cluster = processor::this_cluster()
                .unwrap_or_else(|| crate::error::fatal("P(timeout) outside a cluster"));
            let (handle, _deadline) = cluster.time_queue().lock().arm(me, duration);
            st.waiters.push_back(Waiter {
                task: me,
                timer: Some(handle.clone()),
            });
            handle
        };

        block_current(BlockReason::Timed);

        // `v()` removes a waiter from the queue before ever waking it, so
        // finding ourselves still queued means no `v()` has served us yet:
        // this wake came from the timer, and we are the only other party
        // that can claim its handle.
        let mut st = self.state.lock();
        if let Some(idx) = st.waiters.iter().position(|w| w.task == me) {
            let won = handle.try_claim();
            debug_assert!(won, "timer handle claimed twice");
            st.waiters.remove(idx);
            return Outcome::TimedOut;
        }
        Outcome::Signalled(())
    }

    /// Increment, waking the longest-waiting blocked task if any.
    pub fn v(&self) {
        let mut st = self.state.lock();
        while let Some(waiter) = st.waiters.pop_front() {
            let claimed = waiter.timer.as_ref().map(|h| h.try_claim()).unwrap_or(true);
            if claimed {
                drop(st);
                wake(waiter.task);
                return;
            }
            // This waiter's timer already fired and claimed the race;
            // skip it and try the next one.
        }
        st.count += 1;
    }

    /// The current count, for diagnostics (mirrors `sem_getvalue`).
    pub fn counter(&self) -> i64 {
        self.state.lock().count
    }

    /// `true` if no task is currently blocked waiting on this semaphore.
    pub fn empty(&self) -> bool {
        self.state.lock().waiters.is_empty()
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
    fn try_p_respects_count() {
        let s = Semaphore::new(1);
        assert!(s.try_p());
        assert!(!s.try_p());
        s.v();
        assert!(s.try_p());
    }

    #[test]
    fn counter_tracks_v_without_waiters() {
        let s = Semaphore::new(0);
        assert_eq!(s.counter(), 0);
        s.v();
        s.v();
        assert_eq!(s.counter(), 2);
        assert!(s.empty());
    }
}
