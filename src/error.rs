//! Crate-wide error kinds.
//!
//! Kernel-internal precondition violations are not modeled as `Result` —
//! they go through [`fatal`], which logs and aborts, mirroring the
//! teacher's `panic = "abort"` posture for unrecoverable kernel state.

use thiserror::Error;

use crate::task::TaskId;

/// The error kinds a caller of the public API can observe.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KernelError {
    /// A mutex-object call was made on an object that is being (or has been)
    /// destroyed.
    #[error("entry call made on mutex object {object} while it is being destroyed")]
    EntryFailure {
        /// Opaque id of the mutex object, for diagnostics.
        object: u64,
    },

    /// `signal`/`wait` observed a condition variable whose owning monitor no
    /// longer exists. Surfaced at the `wait` site as a resumption exception.
    #[error("condition variable's owning monitor no longer exists")]
    BrokenCondition,

    /// An asynchronous exception arrived at a task with no matching handler;
    /// this propagates to `main` and sets the process exit code.
    #[error("task {task} received an unhandled asynchronous exception")]
    UnhandledNonLocal {
        /// The task that failed to handle the exception.
        task: TaskId,
    },

    /// Detected only for the boot task at shutdown: all processors idle, all
    /// tasks blocked, no timer pending.
    #[error("deadlock: all processors idle, all tasks blocked, no timer pending")]
    Deadlock,

    /// Internal invariant violation. Constructing this value is the last
    /// step before [`fatal`] aborts the process.
    #[error("fatal kernel invariant violation: {0}")]
    Fatal(String),
}

/// The result of a timed operation. `TimeoutExpired` is never an `Err` —
/// per spec, timed waits report their outcome through this two-value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The wait was satisfied before its deadline.
    Signalled(T),
    /// The deadline elapsed before the wait was satisfied.
    TimedOut,
}

impl<T> Outcome<T> {
    /// True if this outcome represents a successful signal, not a timeout.
    pub fn is_signalled(&self) -> bool {
        matches!(self, Outcome::Signalled(_))
    }

    /// True if the deadline elapsed.
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Outcome::TimedOut)
    }
}

pub type KernelResult<T> = Result<T, KernelError>;

/// Log an internal invariant violation at `error` and abort the process.
///
/// Used only for conditions that can never legitimately occur (corrupted
/// queue linkage, a task with two active queue memberships, a double
/// release of mutual exclusion). User-level failures are reported through
/// `KernelError`, never through this path.
#[cold]
#[track_caller]
pub fn fatal(message: impl Into<String>) -> ! {
    let message = message.into();
    log::error!("fatal: {message}");
    eprintln!("uexec: fatal: {message}");
    std::process::abort();
}
