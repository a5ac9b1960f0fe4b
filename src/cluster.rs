//! Cluster: owns a ready queue, a set of processors, and a time-event queue
//! (spec §3, §4.9).
//!
//! Grounded on the teacher's `SchedulerCore`/`Process` split (a shared,
//! spinlock-guarded table of schedulable entities, mutated only through a
//! small API) generalized from "the one kernel-wide scheduler" to "one
//! scheduler per cluster", since spec §5 makes everything but the system
//! cluster, the process allocator, and the `this_*` thread-locals per-object
//! rather than global.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AOrdering};
use std::sync::{Arc, Condvar, Mutex as StdMutex};
use std::time::{Duration, Instant};

use lazy_static::lazy_static;
use spin::Mutex as SpinMutex;

use crate::context::Stack;
use crate::error::fatal;
use crate::exception::Envelope;
use crate::ready_queue::ReadyQueuePolicy;
use crate::task::{Priority, Task, TaskId, TaskState};
use crate::timer::TimeEventQueue;

static NEXT_CLUSTER_ID: AtomicUsize = AtomicUsize::new(1);

lazy_static! {
    /// Every live cluster, keyed by id, so a migrating task's destination
    /// (named only by id in `Task::current_cluster`) can be looked back up
    /// to an `Arc<Cluster>` from inside the processor dispatch loop (spec
    /// §4.9 "processor, cluster lifecycle").
    static ref REGISTRY: SpinMutex<HashMap<usize, std::sync::Weak<Cluster>>> =
        SpinMutex::new(HashMap::new());
}

/// Look up a live cluster by id, as assigned at [`Cluster::new`].
pub fn by_id(id: usize) -> Option<Arc<Cluster>> {
    REGISTRY.lock().get(&id).and_then(|w| w.upgrade())
}

/// A group of processors sharing one ready queue (spec GLOSSARY).
pub struct Cluster {
    pub id: usize,
    pub name: String,
    ready: SpinMutex<Box<dyn ReadyQueuePolicy>>,
    /// Every task whose home or current cluster is this one, *except* while
    /// it is actually running on some processor (at which point the
    /// processor holds it locally, with exclusive unsynchronized access,
    /// since by the state-machine invariant only one processor can ever be
    /// running a given task at a time).
    tasks: SpinMutex<HashMap<TaskId, Box<Task>>>,
    /// Tasks that reached `Halt` and are waiting for the reaper.
    halted: SpinMutex<Vec<Box<Task>>>,
    time_queue: SpinMutex<TimeEventQueue>,
    idle_lock: StdMutex<()>,
    idle_cv: Condvar,
    processor_count: AtomicUsize,
    shutting_down: AtomicBool,
}

impl Cluster {
    pub fn new(name: impl Into<String>, policy: Box<dyn ReadyQueuePolicy>) -> Arc<Cluster> {
        let id = NEXT_CLUSTER_ID.fetch_add(1, AOrdering::Relaxed);
        let name = name.into();
        log::info!("cluster {id} ({name}) created, policy={}", policy.name());
        let cluster = Arc::new(Cluster {
            id,
            name,
            ready: SpinMutex::new(policy),
            tasks: SpinMutex::new(HashMap::new()),
            halted: SpinMutex::new(Vec::new()),
            time_queue: SpinMutex::new(TimeEventQueue::new()),
            idle_lock: StdMutex::new(()),
            idle_cv: Condvar::new(),
            processor_count: AtomicUsize::new(0),
            shutting_down: AtomicBool::new(false),
        });
        REGISTRY.lock().insert(id, Arc::downgrade(&cluster));
        cluster
    }

    /// Create a task homed on this cluster, ready to run. `entry` is taken
    /// and invoked exactly once, on first dispatch, by the task trampoline.
    pub fn spawn_task(
        self: &Arc<Self>,
        name: impl Into<String>,
        priority: Priority,
        quantum: Duration,
        stack_size: usize,
        entry: impl FnOnce() + Send + 'static,
    ) -> TaskId {
        let stack = Stack::new(stack_size);
        let context = stack.prime(crate::processor::task_trampoline);
        let task = Box::new(Task::new(
            name,
            self.id,
            priority,
            quantum,
            stack,
            context,
            Some(Box::new(entry)),
        ));
        let id = task.id;
        log::debug!("cluster {}: spawned {} ({})", self.id, id, task.name);
        self.tasks.lock().insert(id, task);
        self.enqueue_ready(id, priority);
        id
    }

    pub(crate) fn enqueue_ready(&self, id: TaskId, priority: Priority) {
        self.ready.lock().add(id, priority, None);
        self.wake_idle();
    }

    pub(crate) fn take_task(&self, id: TaskId) -> Option<Box<Task>> {
        self.tasks.lock().remove(&id)
    }

    pub(crate) fn store_task(&self, task: Box<Task>) {
        self.tasks.lock().insert(task.id, task);
    }

    pub(crate) fn pop_ready(&self) -> Option<TaskId> {
        self.ready.lock().drop_next()
    }

    pub(crate) fn ready_is_empty(&self) -> bool {
        self.ready.lock().is_empty()
    }

    /// Transition a blocked task back to `Ready` and enqueue it. No-op if
    /// the task is not currently `Blocked` (a defensive guard against
    /// spurious or duplicate wakes, e.g. a signal racing a timeout).
    pub fn wake_task(&self, id: TaskId) {
        let mut tasks = self.tasks.lock();
        if let Some(task) = tasks.get_mut(&id) {
            if task.state == TaskState::Blocked {
                task.state = TaskState::Ready;
                let prio = task.active_priority();
                drop(tasks);
                log::trace!("cluster {}: wake {}", self.id, id);
                self.enqueue_ready(id, prio);
            }
        }
    }

    /// Run `f` with mutable access to a currently-not-running task, if it
    /// exists. Used by resources (mutex objects, condition variables,
    /// semaphores) to inspect or mutate a blocked task's state under the
    /// cluster's own spinlock rather than their own.
    pub(crate) fn with_task_mut<R>(&self, id: TaskId, f: impl FnOnce(&mut Task) -> R) -> Option<R> {
        self.tasks.lock().get_mut(&id).map(f)
    }

    /// Current active priority of `id`, if it is homed here and not
    /// presently running on some processor (which holds it locally while
    /// dispatched). Exposed so callers can observe priority-inheritance
    /// boosts directly (spec §4.5, §8 scenario 3).
    pub fn active_priority(&self, id: TaskId) -> Option<Priority> {
        self.with_task_mut(id, |t| t.active_priority())
    }

    /// If `id` is currently sitting in the ready queue (rather than running
    /// or blocked), remove and re-add it at its current active priority.
    /// Priority inheritance otherwise only takes effect at the holder's
    /// *next* natural enqueue (its following yield or block), which would
    /// leave it stuck behind lower-priority ready tasks in a
    /// priority-banded policy until then; this is the "reschedule hint"
    /// named in spec §4.4's ready-queue capability set.
    pub(crate) fn reprioritize(&self, id: TaskId) {
        let prio = {
            let tasks = self.tasks.lock();
            match tasks.get(&id) {
                Some(task) if task.state == TaskState::Ready => task.active_priority(),
                _ => return,
            }
        };
        let mut ready = self.ready.lock();
        ready.remove(id);
        ready.add(id, prio, None);
    }

    /// `resume E at U` / `throw E at U` (spec §4.8): enqueue `envelope` in
    /// `target`'s mailbox. `target` must currently be homed on this cluster
    /// and not mid-reap; briefly spins if it is between table entries (e.g.
    /// caught exactly at a dispatch boundary) rather than requiring the
    /// caller to retry.
    pub fn send_envelope(&self, target: TaskId, from: TaskId, envelope: Envelope) {
        loop {
            let mut tasks = self.tasks.lock();
            if let Some(task) = tasks.get_mut(&target) {
                task.mailbox.send(from, envelope);
                return;
            }
            drop(tasks);
            std::hint::spin_loop();
        }
    }

    pub(crate) fn time_queue(&self) -> &SpinMutex<TimeEventQueue> {
        &self.time_queue
    }

    pub(crate) fn push_halted(&self, task: Box<Task>) {
        self.halted.lock().push(task);
        self.wake_idle();
    }

    /// Drain one halted task for the reaper to reclaim, if any.
    pub fn reap_one(&self) -> Option<Box<Task>> {
        self.halted.lock().pop()
    }

    pub fn halted_count(&self) -> usize {
        self.halted.lock().len()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.lock().len()
    }

    pub(crate) fn register_processor(&self) {
        self.processor_count.fetch_add(1, AOrdering::AcqRel);
    }

    pub(crate) fn deregister_processor(&self) {
        self.processor_count.fetch_sub(1, AOrdering::AcqRel);
    }

    pub fn processor_count(&self) -> usize {
        self.processor_count.load(AOrdering::Acquire)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(AOrdering::Acquire)
    }

    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, AOrdering::Release);
        self.wake_idle();
    }

    /// Park the calling processor until a task is enqueued, a halted task
    /// needs reaping, shutdown begins, or (if `deadline` is given) that
    /// instant passes.
    pub(crate) fn wait_idle(&self, deadline: Option<Instant>) {
        let guard = self.idle_lock.lock().unwrap_or_else(|e| fatal(format!("idle lock poisoned: {e}")));
        let predicate = |_: &mut ()| {
            self.ready_is_empty() && self.halted_count() == 0 && !self.is_shutting_down()
        };
        match deadline {
            Some(deadline) => {
                let timeout = deadline.saturating_duration_since(Instant::now());
                let _ = self
                    .idle_cv
                    .wait_timeout_while(guard, timeout, predicate)
                    .unwrap_or_else(|e| fatal(format!("idle cv poisoned: {e}")));
            }
            None => {
                let _ = self
                    .idle_cv
                    .wait_while(guard, predicate)
                    .unwrap_or_else(|e| fatal(format!("idle cv poisoned: {e}")));
            }
        }
    }

    pub(crate) fn wake_idle(&self) {
        self.idle_cv.notify_all();
    }

    /// `Deadlock` per spec §7: all processors idle, all tasks blocked, no
    /// timer pending. Checked only by the boot task at shutdown.
    pub fn is_deadlocked(&self) -> bool {
        self.ready_is_empty()
            && self.halted_count() == 0
            && self.time_queue.lock().is_empty()
            && self
                .tasks
                .lock()
                .values()
                .all(|t| t.state() == TaskState::Blocked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ready_queue::FifoQueue;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn spawn_enqueues_and_pop_returns_it() {
        let cluster = Cluster::new("test", Box::new(FifoQueue::new()));
        static RAN: AtomicU32 = AtomicU32::new(0);
        let id = cluster.spawn_task("t", Priority::NORMAL, Duration::ZERO, 64 * 1024, || {
            RAN.fetch_add(1, AOrdering::SeqCst);
        });
        assert_eq!(cluster.pop_ready(), Some(id));
        assert!(cluster.ready_is_empty());
    }

    #[test]
    fn wake_is_noop_unless_blocked() {
        let cluster = Cluster::new("test", Box::new(FifoQueue::new()));
        let id = cluster.spawn_task("t", Priority::NORMAL, Duration::ZERO, 64 * 1024, || {});
        // Task is New/Ready already on the queue; waking it must not double-enqueue.
        cluster.wake_task(id);
        let popped = cluster.pop_ready();
        assert_eq!(popped, Some(id));
        assert!(cluster.ready_is_empty());
    }
}
