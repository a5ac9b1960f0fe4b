//! Pluggable ready-queue policies (spec §4.4).
//!
//! Grounded on the teacher's `scheduler::traits::Scheduler` /
//! `scheduler::policies::RoundRobinPolicy` mechanism-policy split: a
//! cluster holds a `Box<dyn ReadyQueuePolicy>` (the mechanism side only
//! ever calls through the trait) and the policy owns whatever ordering
//! structure it needs. Unlike the teacher, which notifies the policy
//! through a `SchedEvent` stream, this crate's ready queue is simple enough
//! that the trait exposes `add`/`drop_next`/`remove` directly (spec §9
//! "Pluggable ready queue. Expose as a capability set `{empty, add, drop,
//! on_acquire, on_release, reschedule_hint}`").

pub mod ceiling;
pub mod deadline;
pub mod fifo;
pub mod lifo;
pub mod priority;

use std::time::Duration;

use crate::task::{Priority, TaskId};

pub use ceiling::CeilingQueue;
pub use deadline::DeadlineMonotonicQueue;
pub use fifo::FifoQueue;
pub use lifo::LifoQueue;
pub use priority::StaticPriorityQueue;

/// The capability set a ready-queue implementation must provide.
///
/// `on_acquire`/`on_release` let a priority-aware policy (or a
/// [`CeilingQueue`] wrapping one) implement priority inheritance: they are
/// called by the mutex-object layer, not by the cluster's own dispatch
/// loop, whenever ownership of a serialized resource changes hands.
pub trait ReadyQueuePolicy: Send {
    /// Enqueue `task`, ready to run, with its current active priority and,
    /// for deadline-aware policies, a relative deadline.
    fn add(&mut self, task: TaskId, priority: Priority, deadline: Option<Duration>);

    /// Remove and return the next task to run, or `None` if empty.
    fn drop_next(&mut self) -> Option<TaskId>;

    /// Remove a specific task from the queue (it blocked or was migrated
    /// away before being dispatched). No-op if not present.
    fn remove(&mut self, task: TaskId);

    /// True if no task is currently enqueued.
    fn is_empty(&self) -> bool;

    /// Called when `task` acquires a serialized resource this policy backs
    /// (e.g. a mutex object using this queue as its entry queue).
    fn on_acquire(&mut self, _task: TaskId) {}

    /// Called when `task` releases a serialized resource this policy backs.
    fn on_release(&mut self, _task: TaskId) {}

    /// Human-readable policy name, for diagnostics.
    fn name(&self) -> &'static str;
}

/// Default policy per spec §4.4 ("FIFO (default)").
pub fn default_policy() -> Box<dyn ReadyQueuePolicy> {
    Box::new(FifoQueue::new())
}
