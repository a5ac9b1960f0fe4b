//! uexec: a user-level M:N concurrency execution kernel.
//!
//! Multiplexes stackful tasks over a small pool of kernel threads
//! (processors) grouped into clusters. The central subsystem is the
//! [`mutex_object`] layer: a uC++-style monitor with an entry queue, an
//! `accept` statement implementing bidirectional rendezvous, condition
//! variables, and priority inheritance. See `SPEC_FULL.md` for the full
//! module map.
//!
//! Translator-boundary calls (spec §6) correspond to the free functions in
//! [`processor`]: `yield_now`, `block_current`, `poll`, `sleep`, plus
//! `this_task`/`this_cluster` for resources that need to reach the
//! currently running task without it passing a handle explicitly.

pub mod cluster;
pub mod condition;
pub mod config;
pub mod context;
pub mod error;
pub mod exception;
pub mod mutex_object;
pub mod processor;
pub mod ready_queue;
pub mod runtime;
pub mod sync;
pub mod task;
pub mod timer;

pub use cluster::Cluster;
pub use condition::ConditionVariable;
pub use config::Config;
pub use error::{KernelError, KernelResult, Outcome};
pub use exception::Envelope;
pub use mutex_object::{AcceptAlternative, AcceptResult, MutexObject};
pub use processor::{
    active_priority, block_current, disable_exceptions, enable_exceptions, migrate, poll, set_exception_handler,
    sleep, this_cluster, this_task, yield_now,
};
pub use runtime::{run, set_exit_code};
pub use task::{BlockReason, Priority, TaskId, TaskState};
