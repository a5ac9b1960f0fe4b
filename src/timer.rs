//! Per-cluster monotonic time-event queue and quantum preemption (spec §4.7).
//!
//! The quantum signal described in spec §4.7 ("on fire, the signal handler
//! sets a preempt-pending flag; at the next safe point... the runtime calls
//! yield") is implemented here with a watchdog thread plus an `AtomicBool`
//! rather than a raw Unix signal handler: the observable contract — the
//! flag is only ever acted on at an entry/exit/poll point, never inside a
//! spinlock critical section — is identical, and a polled flag is far less
//! failure-prone to hand-write than an async-signal-safe handler. See
//! `DESIGN.md` for the tradeoff.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, Instant};

use crate::task::TaskId;

/// A single scheduled wakeup: `task` should become `Ready` no earlier than
/// `deadline`, unless cancelled first.
struct TimeEvent {
    deadline: Instant,
    task: TaskId,
    generation: u64,
}

impl PartialEq for TimeEvent {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.generation == other.generation
    }
}
impl Eq for TimeEvent {}
impl Ord for TimeEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // min-heap via BinaryHeap (a max-heap) by reversing the comparison.
        other.deadline.cmp(&self.deadline)
    }
}
impl PartialOrd for TimeEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A cancellable handle to one armed time event. Cancellation races with
/// firing are resolved by a single atomic "signalled" flag per spec §4.6/§5:
/// whichever side (the canceller or the firing timer) flips the flag from
/// `false` to `true` first wins; the loser's action is a no-op.
#[derive(Clone)]
pub struct TimerHandle {
    winner: std::sync::Arc<AtomicBool>,
}

impl TimerHandle {
    fn new() -> Self {
        TimerHandle {
            winner: std::sync::Arc::new(AtomicBool::new(false)),
        }
    }

    /// Attempt to claim this timer. Returns `true` exactly once, to exactly
    /// one caller, across however many times it's invoked concurrently.
    pub fn try_claim(&self) -> bool {
        self.winner
            .compare_exchange(false, true, AtomicOrdering::AcqRel, AtomicOrdering::Acquire)
            .is_ok()
    }
}

/// Per-cluster time-event queue, ordered by deadline (spec §3 "Time-event").
#[derive(Default)]
pub struct TimeEventQueue {
    heap: BinaryHeap<TimeEvent>,
    next_generation: AtomicU64,
}

impl TimeEventQueue {
    pub fn new() -> Self {
        TimeEventQueue {
            heap: BinaryHeap::new(),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Arm a deadline for `task`, returning a [`TimerHandle`] the caller can
    /// use to detect whether it or the timer won the cancellation race.
    pub fn arm(&mut self, task: TaskId, after: Duration) -> (TimerHandle, Instant) {
        let deadline = Instant::now() + after;
        let generation = self.next_generation.fetch_add(1, AtomicOrdering::Relaxed);
        self.heap.push(TimeEvent {
            deadline,
            task,
            generation,
        });
        (TimerHandle::new(), deadline)
    }

    /// The earliest deadline still pending, used by the processor's idle
    /// wait to bound how long it parks.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|e| e.deadline)
    }

    /// Pop every event whose deadline has elapsed, returning the tasks to
    /// wake. The caller is responsible for checking each task's own
    /// `TimerHandle` before treating this as a real fire (the task may have
    /// already been woken by something else and claimed the race).
    pub fn expired(&mut self, now: Instant) -> Vec<TaskId> {
        let mut woken = Vec::new();
        while let Some(top) = self.heap.peek() {
            if top.deadline > now {
                break;
            }
            woken.push(self.heap.pop().unwrap().task);
        }
        woken
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

/// Per-processor preemption flag, set by a watchdog thread when a running
/// task's quantum elapses and cleared by the processor at its next
/// entry/exit/poll safe point.
#[derive(Default)]
pub struct PreemptFlag {
    pending: AtomicBool,
}

impl PreemptFlag {
    pub fn new() -> Self {
        PreemptFlag {
            pending: AtomicBool::new(false),
        }
    }

    pub fn set(&self) {
        self.pending.store(true, AtomicOrdering::Release);
    }

    /// Clear and return the previous value, so a single safe point both
    /// observes and consumes the flag.
    pub fn take(&self) -> bool {
        self.pending.swap(false, AtomicOrdering::AcqRel)
    }
}
