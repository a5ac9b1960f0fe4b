//! Public condition-variable handle (spec §4.5 "Condition variables").
//!
//! A [`ConditionVariable`] is a thin, borrowed view onto one condition id of
//! a [`MutexObject`]; the queue itself lives inside the object's own
//! spinlock-guarded state. Monitors built on [`MutexObject`] (see `sync/`)
//! hand these out via [`MutexObject::condition`] rather than exposing the
//! `pub(crate)` primitives directly.

use crate::mutex_object::MutexObject;

/// A named condition queue belonging to some [`MutexObject`]. Two
/// `ConditionVariable`s with the same `id` on the same object refer to the
/// same queue; distinct ids are independent (spec GLOSSARY "Condition set").
pub struct ConditionVariable<'a> {
    object: &'a MutexObject,
    id: u32,
}

impl<'a> ConditionVariable<'a> {
    pub(crate) fn new(object: &'a MutexObject, id: u32) -> Self {
        ConditionVariable { object, id }
    }

    /// Block the caller on this condition, releasing the monitor to the
    /// next owner (acceptor-stack top, else urgent queue, else entry
    /// queue). Resumes only once ownership is handed back.
    pub fn wait(&self) {
        self.object.wait(self.id, None);
    }

    /// As [`ConditionVariable::wait`], additionally storing `info` for a
    /// later [`ConditionVariable::front`] to inspect.
    pub fn wait_with(&self, info: u64) {
        self.object.wait(self.id, Some(info));
    }

    /// Move this condition's head to the urgent queue; the caller keeps
    /// ownership and continues.
    pub fn signal(&self) {
        self.object.signal(self.id);
    }

    /// Hand ownership to this condition's head immediately, suspending the
    /// caller on the acceptor stack until it is resumed in turn.
    pub fn signal_block(&self) {
        self.object.signal_block(self.id);
    }

    /// Move every waiter to eligible status; at most one becomes `Ready`
    /// immediately, the rest wake only as ownership later passes to them.
    pub fn signal_all(&self) {
        self.object.signal_all(self.id);
    }

    /// Inspect the `info` stored by the head waiter, if any, without
    /// removing it from the queue.
    pub fn front(&self) -> Option<u64> {
        self.object.front(self.id)
    }
}

impl MutexObject {
    /// Obtain a handle to one of this object's condition queues.
    pub fn condition(&self, id: u32) -> ConditionVariable<'_> {
        ConditionVariable::new(self, id)
    }
}
