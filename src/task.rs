//! Base-task descriptor and state machine (spec §3, §4.3).
//!
//! Grounded on the teacher's `scheduler::thread` module (`ThreadId`,
//! `ThreadState`, `Thread`) generalized from a kernel-thread-per-task model
//! to a stackful-coroutine-per-task model: a [`Task`] owns its own
//! [`Stack`]/[`Context`] rather than an interrupt-frame snapshot of a real
//! CPU, and is scheduled cooperatively within whichever [`Processor`]
//! currently runs it.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use crate::context::{Context, Stack};
use crate::exception::Mailbox;

/// Unique task identity, stable for the task's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub(crate) u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_task_id() -> TaskId {
    TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
}

/// A task's position in the state machine of spec §4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    New,
    Ready,
    Running,
    Blocked,
    Halt,
    Terminate,
}

/// A task's scheduling priority. Higher numeric value runs first under a
/// priority-aware policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(pub i32);

impl Priority {
    pub const MIN: Priority = Priority(i32::MIN);
    pub const NORMAL: Priority = Priority(0);
    pub const MAX: Priority = Priority(i32::MAX);
}

impl Default for Priority {
    fn default() -> Self {
        Priority::NORMAL
    }
}

/// Why a task is currently `Blocked`. Used by the ready-queue policy and by
/// diagnostics; not itself load-bearing for correctness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    EntryQueue,
    Condition,
    AcceptorSlot,
    Semaphore,
    Timed,
    Idle,
    Other,
}

/// Records one mutex object's contribution to a task's inherited priority,
/// so that on release the kernel can withdraw exactly the increment that
/// blocker attributed (spec §4.5 "priority inheritance").
#[derive(Debug, Clone, Copy)]
pub(crate) struct InheritedContribution {
    pub object: u64,
    pub amount: Priority,
}

/// Per-task bookkeeping of which mutex objects are currently held, in
/// nesting order, to support nested mutex-object entry (one operation
/// calling into another mutex object) together with priority inheritance.
#[derive(Debug, Default)]
pub struct MutexFrameStack {
    frames: Vec<u64>,
    pub(crate) inherited: Vec<InheritedContribution>,
}

impl MutexFrameStack {
    pub fn push(&mut self, object: u64) {
        self.frames.push(object);
    }

    pub fn pop(&mut self) -> Option<u64> {
        self.frames.pop()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn top(&self) -> Option<u64> {
        self.frames.last().copied()
    }
}

/// A schedulable execution entity: a stack, a state, priorities, queue
/// linkage and the exception/priority-inheritance bookkeeping described in
/// spec §3.
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub(crate) stack: Option<Stack>,
    pub(crate) context: Context,
    pub(crate) state: TaskState,
    pub(crate) home_cluster: usize,
    pub(crate) current_cluster: usize,
    pub(crate) base_priority: Priority,
    pub(crate) active_priority: Priority,
    pub(crate) mutex_frames: MutexFrameStack,
    pub(crate) mailbox: Mailbox,
    /// The task's installed asynchronous-exception handler, if any (spec
    /// §4.8's "first matching resumption handler", simplified to a single
    /// slot: full handler-stack matching by exception type belongs to the
    /// translator boundary above this kernel, not to it).
    pub(crate) handler: Option<Box<dyn Fn(&crate::exception::Envelope) + Send>>,
    /// Non-zero suppresses delivery of asynchronous exceptions (spec §4.8).
    pub(crate) enable_count: AtomicUsize,
    pub(crate) block_reason: Option<BlockReason>,
    pub(crate) quantum: std::time::Duration,
    pub(crate) wake_deadline: Option<Instant>,
    pub(crate) exit_code: i32,
    /// The task's body, taken and run exactly once by the trampoline on
    /// first dispatch.
    pub(crate) entry: Option<Box<dyn FnOnce() + Send>>,
}

impl Task {
    pub(crate) fn new(
        name: impl Into<String>,
        home_cluster: usize,
        priority: Priority,
        quantum: std::time::Duration,
        stack: Stack,
        context: Context,
        entry: Option<Box<dyn FnOnce() + Send>>,
    ) -> Self {
        Task {
            id: next_task_id(),
            name: name.into(),
            stack: Some(stack),
            context,
            state: TaskState::New,
            home_cluster,
            current_cluster: home_cluster,
            base_priority: priority,
            active_priority: priority,
            mutex_frames: MutexFrameStack::default(),
            mailbox: Mailbox::default(),
            handler: None,
            enable_count: AtomicUsize::new(0),
            block_reason: None,
            quantum,
            wake_deadline: None,
            exit_code: 0,
            entry,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn active_priority(&self) -> Priority {
        self.active_priority
    }

    pub fn base_priority(&self) -> Priority {
        self.base_priority
    }

    /// Raise `active_priority` by inheritance; never lowers it directly
    /// (withdrawal happens by recomputing from `mutex_frames.inherited`).
    pub(crate) fn raise_active_priority(&mut self, at_least: Priority) {
        if at_least > self.active_priority {
            self.active_priority = at_least;
        }
    }

    /// Recompute `active_priority` as `max(base, max(inherited contributions))`,
    /// the invariant spec §4.5 requires after a withdrawal.
    pub(crate) fn recompute_active_priority(&mut self) {
        let mut p = self.base_priority;
        for c in &self.mutex_frames.inherited {
            if c.amount > p {
                p = c.amount;
            }
        }
        self.active_priority = p;
    }

    pub fn is_enabled(&self) -> bool {
        self.enable_count.load(Ordering::Acquire) == 0
    }

    pub(crate) fn enable(&self) {
        let prev = self.enable_count.load(Ordering::Acquire);
        if prev > 0 {
            self.enable_count.fetch_sub(1, Ordering::AcqRel);
        }
    }

    pub(crate) fn disable(&self) {
        self.enable_count.fetch_add(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("base_priority", &self.base_priority)
            .field("active_priority", &self.active_priority)
            .finish()
    }
}
