//! Asynchronous exception delivery (spec §4.8).
//!
//! Modeled as the typed-variant mailbox described in spec §9's
//! "re-architectable patterns": a non-local exception is queued as a
//! `{Resume, Throw, Cancel}` envelope, and the polling point is a single
//! call (`Mailbox::poll`) that drains it.

use std::collections::VecDeque;

use crate::task::TaskId;

/// A payload carried by an asynchronous exception envelope. The kernel
/// treats this opaquely; the translator boundary (out of scope per spec §1)
/// is responsible for giving it meaning.
pub type Payload = Box<dyn std::any::Any + Send>;

/// One entry in a task's mailbox.
pub enum Envelope {
    /// Invoke the first matching resumption handler in the target's
    /// handler stack without unwinding.
    Resume(Payload),
    /// Begin stack unwinding at the target's current frame.
    Throw(Payload),
    /// Request cooperative cancellation; a no-op if the target is already
    /// terminating (spec §4.8).
    Cancel,
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Envelope::Resume(_) => write!(f, "Envelope::Resume(..)"),
            Envelope::Throw(_) => write!(f, "Envelope::Throw(..)"),
            Envelope::Cancel => write!(f, "Envelope::Cancel"),
        }
    }
}

/// A FIFO queue of pending envelopes for one task. Delivery order is
/// arrival order within the mailbox (spec §4.8).
#[derive(Default)]
pub struct Mailbox {
    pending: VecDeque<(TaskId, Envelope)>,
}

impl Mailbox {
    /// Enqueue an envelope sent by `from`.
    pub fn send(&mut self, from: TaskId, envelope: Envelope) {
        self.pending.push_back((from, envelope));
    }

    /// True if at least one envelope is queued.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Drain and return every pending envelope, in arrival order. Called
    /// only at a polling point when the task's enable counter is zero.
    pub fn drain(&mut self) -> Vec<(TaskId, Envelope)> {
        self.pending.drain(..).collect()
    }

    /// Drop all pending envelopes without delivering them. Used when a task
    /// reaches `Terminate`: delivery to an already-terminating task is a
    /// no-op, not an error (spec §4.8).
    pub fn discard(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelopes_drain_in_arrival_order() {
        let mut mb = Mailbox::default();
        let sender = TaskId(1);
        mb.send(sender, Envelope::Resume(Box::new(1u32)));
        mb.send(sender, Envelope::Throw(Box::new(2u32)));
        mb.send(sender, Envelope::Cancel);
        let drained = mb.drain();
        assert_eq!(drained.len(), 3);
        assert!(matches!(drained[0].1, Envelope::Resume(_)));
        assert!(matches!(drained[1].1, Envelope::Throw(_)));
        assert!(matches!(drained[2].1, Envelope::Cancel));
        assert!(!mb.has_pending());
    }

    #[test]
    fn discard_drops_without_delivery() {
        let mut mb = Mailbox::default();
        mb.send(TaskId(1), Envelope::Cancel);
        mb.discard();
        assert!(!mb.has_pending());
    }
}
