//! Ceiling queue: wraps another ready-queue policy and tracks the ceiling
//! priority (the maximum priority among currently enqueued callers) used by
//! the mutex-object layer to drive priority inheritance (spec §4.4, §4.5).
//!
//! The actual elevation of a holder task's `active_priority` happens in
//! `mutex_object.rs`, which is the only place that owns `Task` objects
//! directly; this wrapper's job is purely to answer "what is the highest
//! priority currently waiting" in O(log n) as callers come and go.

use std::collections::BTreeMap;
use std::time::Duration;

use super::ReadyQueuePolicy;
use crate::task::{Priority, TaskId};

pub struct CeilingQueue<P: ReadyQueuePolicy> {
    inner: P,
    /// Count of enqueued tasks at each priority, so `ceiling()` is a cheap
    /// `last_key_value` lookup and removal is exact even with duplicate
    /// priorities.
    histogram: BTreeMap<Priority, usize>,
}

impl<P: ReadyQueuePolicy> CeilingQueue<P> {
    pub fn new(inner: P) -> Self {
        CeilingQueue {
            inner,
            histogram: BTreeMap::new(),
        }
    }

    /// The highest priority among currently enqueued callers, if any.
    pub fn ceiling(&self) -> Option<Priority> {
        self.histogram.keys().next_back().copied()
    }

    fn record(&mut self, priority: Priority) {
        *self.histogram.entry(priority).or_insert(0) += 1;
    }

    fn forget(&mut self, priority: Priority) {
        if let Some(count) = self.histogram.get_mut(&priority) {
            *count -= 1;
            if *count == 0 {
                self.histogram.remove(&priority);
            }
        }
    }
}

impl<P: ReadyQueuePolicy> ReadyQueuePolicy for CeilingQueue<P> {
    fn add(&mut self, task: TaskId, priority: Priority, deadline: Option<Duration>) {
        self.record(priority);
        self.inner.add(task, priority, deadline);
    }

    fn drop_next(&mut self) -> Option<TaskId> {
        // Priorities are tracked at `add` time and only forgotten here or in
        // `remove`; `drop_next` alone cannot recover the removed task's
        // priority, so the mutex-object layer calls `remove`-equivalent
        // bookkeeping through `forget_priority` before dropping the winner.
        self.inner.drop_next()
    }

    fn remove(&mut self, task: TaskId) {
        self.inner.remove(task);
    }

    fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn on_acquire(&mut self, task: TaskId) {
        self.inner.on_acquire(task);
    }

    fn on_release(&mut self, task: TaskId) {
        self.inner.on_release(task);
    }

    fn name(&self) -> &'static str {
        "ceiling"
    }
}

impl<P: ReadyQueuePolicy> CeilingQueue<P> {
    /// Explicit removal with priority bookkeeping, used by the mutex-object
    /// layer whenever it dequeues or removes a caller so the histogram
    /// stays exact without requiring `ReadyQueuePolicy::drop_next`/`remove`
    /// to carry priority back out.
    pub fn forget_priority(&mut self, priority: Priority) {
        self.forget(priority);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ready_queue::FifoQueue;

    #[test]
    fn ceiling_tracks_max_and_withdraws() {
        let mut q = CeilingQueue::new(FifoQueue::new());
        q.add(TaskId(1), Priority(5), None);
        q.add(TaskId(2), Priority(20), None);
        assert_eq!(q.ceiling(), Some(Priority(20)));
        q.forget_priority(Priority(20));
        assert_eq!(q.ceiling(), Some(Priority(5)));
        q.forget_priority(Priority(5));
        assert_eq!(q.ceiling(), None);
    }
}
