//! Higher-level synchronization primitives (spec §4.6), built either on the
//! mutex-object machinery or directly on a cluster's spinlocks, mirroring
//! the teacher's split between `ipc` (monitor-style) and lower-level
//! scheduler primitives.

mod barrier;
mod owner_lock;
mod rwlock;
mod semaphore;

pub use barrier::Barrier;
pub use owner_lock::OwnerLock;
pub use rwlock::RwLock;
pub use semaphore::Semaphore;
