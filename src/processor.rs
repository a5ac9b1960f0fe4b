//! Processor main loop and the `this_cluster`/`this_processor`/`this_task`
//! thread-locals (spec §4.2, §5).
//!
//! A processor is a kernel thread bound to exactly one cluster at a time.
//! It repeatedly pops the next ready task, switches into it, and on return
//! (the task yielded, blocked, or halted) updates bookkeeping and loops.
//! Grounded on the teacher's `Scheduler::get_next_thread`/dispatch loop,
//! translated from "pick the next thread and iret into its interrupt frame"
//! to "pick the next task and cooperatively `switch_to` its stack".

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering as AOrdering};
use std::sync::{Arc, Condvar, Mutex as StdMutex};
use std::time::{Duration, Instant};

use spin::Mutex as SpinMutex;

use crate::cluster::Cluster;
use crate::context::{Context, switch_to};
use crate::error::fatal;
use crate::exception::Envelope;
use crate::task::{BlockReason, Task, TaskId, TaskState};
use crate::timer::PreemptFlag;

/// What a running task's thread-local points back at, so that free
/// functions like [`yield_now`] can find their way to the right `Task`,
/// cluster, and processor context without the task body needing to carry
/// any of that explicitly.
struct CurrentTask {
    /// Raw pointer to the `Task` the currently executing code *is*. Valid
    /// for as long as this thread is inside the `switch_to` call that
    /// entered it — which, by the state-machine invariant, is the only
    /// window during which this thread is running this task at all.
    task: *mut Task,
    /// The processor's own context, to switch back into on yield/block.
    processor_ctx: *const Context,
    cluster: Arc<Cluster>,
    preempt: Arc<PreemptFlag>,
}

thread_local! {
    static CURRENT: RefCell<Option<CurrentTask>> = const { RefCell::new(None) };
}

/// The id of the task currently running on this kernel thread, if any.
pub fn this_task() -> Option<TaskId> {
    CURRENT.with(|c| c.borrow().as_ref().map(|c| unsafe { (*c.task).id }))
}

/// The cluster the currently running task belongs to, if any.
pub fn this_cluster() -> Option<Arc<Cluster>> {
    CURRENT.with(|c| c.borrow().as_ref().map(|c| c.cluster.clone()))
}

/// Enter a region where asynchronous exception delivery is suppressed
/// (spec §4.8). Nests: matched by an equal number of [`enable_exceptions`]
/// calls before delivery resumes.
pub fn disable_exceptions() {
    with_current(|cur| unsafe { (*cur.task).disable() });
}

/// Leave one level of a disabled region. Once the count returns to zero,
/// the next [`poll`] point (including the one `yield_now`/`block_current`
/// already perform) delivers anything queued meanwhile.
pub fn enable_exceptions() {
    with_current(|cur| unsafe { (*cur.task).enable() });
}

/// The active priority of the currently running task, if any. Reads the
/// task directly through the running-task pointer rather than
/// [`Cluster::active_priority`], since a running task is held locally by
/// its processor and is not present in the cluster's own task table.
pub fn active_priority() -> Option<crate::task::Priority> {
    CURRENT.with(|c| c.borrow().as_ref().map(|c| unsafe { (*c.task).active_priority() }))
}

fn with_current<R>(f: impl FnOnce(&CurrentTask) -> R) -> R {
    CURRENT.with(|c| {
        let borrow = c.borrow();
        let cur = borrow
            .as_ref()
            .unwrap_or_else(|| fatal("called outside any running task"));
        f(cur)
    })
}

/// A kernel thread bound to one cluster at a time (spec §3 "Processor").
pub struct Processor {
    pub id: usize,
    cluster: SpinMutex<Arc<Cluster>>,
    shutdown: Arc<AtomicBool>,
    current_deadline: Arc<StdMutex<Option<Instant>>>,
    deadline_cv: Arc<Condvar>,
    idle: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
    watchdog: Option<std::thread::JoinHandle<()>>,
}

impl Processor {
    /// Spawn a new processor thread bound to `cluster`.
    pub fn spawn(id: usize, cluster: Arc<Cluster>) -> Processor {
        cluster.register_processor();
        let shutdown = Arc::new(AtomicBool::new(false));
        let current_deadline = Arc::new(StdMutex::new(None));
        let deadline_cv = Arc::new(Condvar::new());
        let idle = Arc::new(AtomicBool::new(true));
        let preempt = Arc::new(PreemptFlag::new());

        let watchdog = {
            let deadline = current_deadline.clone();
            let cv = deadline_cv.clone();
            let shutdown = shutdown.clone();
            let preempt = preempt.clone();
            std::thread::Builder::new()
                .name(format!("uexec-watchdog-{id}"))
                .spawn(move || watchdog_loop(deadline, cv, preempt, shutdown))
                .expect("spawn watchdog thread")
        };

        let handle = {
            let cluster = cluster.clone();
            let shutdown = shutdown.clone();
            let current_deadline = current_deadline.clone();
            let deadline_cv = deadline_cv.clone();
            let idle = idle.clone();
            let preempt = preempt.clone();
            std::thread::Builder::new()
                .name(format!("uexec-processor-{id}"))
                .spawn(move || {
                    run_loop(
                        id,
                        cluster,
                        shutdown,
                        current_deadline,
                        deadline_cv,
                        idle,
                        preempt,
                    )
                })
                .expect("spawn processor thread")
        };

        Processor {
            id,
            cluster: SpinMutex::new(cluster),
            shutdown,
            current_deadline,
            deadline_cv,
            idle,
            handle: Some(handle),
            watchdog: Some(watchdog),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.idle.load(AOrdering::Acquire)
    }

    /// Request this processor finish its current quantum and stop.
    pub fn shutdown(&self) {
        self.shutdown.store(true, AOrdering::Release);
        self.deadline_cv.notify_all();
    }

    pub fn join(&mut self) {
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
        if let Some(h) = self.watchdog.take() {
            let _ = h.join();
        }
    }
}

impl Drop for Processor {
    fn drop(&mut self) {
        self.shutdown();
        self.join();
    }
}

fn watchdog_loop(
    current_deadline: Arc<StdMutex<Option<Instant>>>,
    cv: Arc<Condvar>,
    preempt: Arc<PreemptFlag>,
    shutdown: Arc<AtomicBool>,
) {
    let mut guard = current_deadline.lock().unwrap_or_else(|e| fatal(format!("{e}")));
    loop {
        if shutdown.load(AOrdering::Acquire) {
            return;
        }
        match *guard {
            None => {
                guard = cv.wait(guard).unwrap_or_else(|e| fatal(format!("{e}")));
            }
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    preempt.set();
                    *guard = None;
                    continue;
                }
                let (g2, _timed_out) = cv
                    .wait_timeout(guard, deadline - now)
                    .unwrap_or_else(|e| fatal(format!("{e}")));
                guard = g2;
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_loop(
    id: usize,
    mut cluster: Arc<Cluster>,
    shutdown: Arc<AtomicBool>,
    current_deadline: Arc<StdMutex<Option<Instant>>>,
    deadline_cv: Arc<Condvar>,
    idle: Arc<AtomicBool>,
    preempt: Arc<PreemptFlag>,
) {
    let mut processor_ctx = Context::empty();

    loop {
        if shutdown.load(AOrdering::Acquire) {
            break;
        }

        match cluster.pop_ready() {
            Some(tid) => {
                idle.store(false, AOrdering::Release);
                let mut task = cluster
                    .take_task(tid)
                    .unwrap_or_else(|| fatal(format!("{tid} on ready queue but missing from table")));
                task.state = TaskState::Running;

                if !task.quantum.is_zero() {
                    *current_deadline.lock().unwrap() = Some(Instant::now() + task.quantum);
                    deadline_cv.notify_all();
                }

                CURRENT.with(|c| {
                    *c.borrow_mut() = Some(CurrentTask {
                        task: task.as_mut() as *mut Task,
                        processor_ctx: &processor_ctx as *const Context,
                        cluster: cluster.clone(),
                        preempt: preempt.clone(),
                    });
                });

                log::trace!("processor {id}: switch to {tid}");
                unsafe {
                    switch_to(&mut processor_ctx as *mut Context, &task.context as *const Context);
                }
                log::trace!("processor {id}: returned from {tid}");

                CURRENT.with(|c| *c.borrow_mut() = None);
                *current_deadline.lock().unwrap() = None;
                deadline_cv.notify_all();

                match task.state {
                    TaskState::Ready => {
                        let prio = task.active_priority();
                        if task.current_cluster == cluster.id {
                            cluster.store_task(task);
                            cluster.enqueue_ready(tid, prio);
                        } else {
                            // `migrate()` changed the task's current
                            // cluster; hand it to the destination rather
                            // than re-enqueueing it here (spec §4.9).
                            let dest = crate::cluster::by_id(task.current_cluster).unwrap_or_else(|| {
                                fatal(format!("{tid} migrated to unknown cluster {}", task.current_cluster))
                            });
                            dest.store_task(task);
                            dest.enqueue_ready(tid, prio);
                        }
                    }
                    TaskState::Blocked => {
                        cluster.store_task(task);
                    }
                    TaskState::Halt => {
                        cluster.push_halted(task);
                    }
                    other => fatal(format!("{tid} returned control in unexpected state {other:?}")),
                }
            }
            None => {
                idle.store(true, AOrdering::Release);
                let deadline = cluster.time_queue().lock().next_deadline();
                cluster.wait_idle(deadline);
                expire_timers(&cluster);
            }
        }

        // A task may have called migrate(); pick up wherever it left us.
        cluster = this_processor_cluster_override(cluster);
    }

    cluster.deregister_processor();
}

/// Placeholder seam for processor migration: `migrate()` updates a task's
/// `current_cluster` and moves it between cluster tables directly rather
/// than redirecting a whole processor, so the owning processor simply keeps
/// running its own cluster's queue. Kept as a named function so the control
/// flow above reads the same way the teacher's dispatch loop does ("loop,
/// then re-derive what to run next") even though today it is the identity.
fn this_processor_cluster_override(cluster: Arc<Cluster>) -> Arc<Cluster> {
    cluster
}

fn expire_timers(cluster: &Arc<Cluster>) {
    let now = Instant::now();
    let expired = cluster.time_queue().lock().expired(now);
    for tid in expired {
        cluster.wake_task(tid);
    }
}

/// Trampoline written onto every freshly primed task stack (see
/// `context::Stack::prime`). Runs on the new task's own stack the first
/// time a processor switches into it.
pub(crate) unsafe extern "C" fn task_trampoline() -> ! {
    let (task_ptr, processor_ctx) =
        with_current(|cur| (cur.task, cur.processor_ctx));

    let entry = unsafe { (*task_ptr).entry.take() };
    if let Some(f) = entry {
        // A task's stack is primed by hand with no unwind tables of its
        // own; letting a panic unwind past this point would hand the
        // unwinder a frame it cannot walk. Catch it here, on the task's
        // own stack, before `switch_to` ever hands control back.
        if let Err(payload) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
            let id = unsafe { (*task_ptr).id };
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_string());
            log::error!("{id}: task panicked: {msg}");
        }
    }

    unsafe {
        (*task_ptr).state = TaskState::Halt;
        (*task_ptr).mailbox.discard();
        switch_to(&mut (*task_ptr).context as *mut Context, processor_ctx);
    }

    fatal("a halted task was resumed")
}

/// Voluntarily give up the processor; the scheduler will pick the next
/// ready task (spec §4.2/§4.3 "Running -> yield -> Ready").
pub fn yield_now() {
    poll();
    with_current(|cur| unsafe {
        (*cur.task).state = TaskState::Ready;
        switch_to(&mut (*cur.task).context as *mut Context, cur.processor_ctx);
    });
    poll();
}

/// Move the calling task to `target`: it keeps running on the current
/// processor until this call, then yields and is next dispatched by one of
/// `target`'s own processors (spec §4.9). After this call returns,
/// `this_cluster()` is `target` and no further instructions run on the
/// former cluster's processors.
pub fn migrate(target: &std::sync::Arc<crate::cluster::Cluster>) {
    poll();
    with_current(|cur| unsafe {
        (*cur.task).current_cluster = target.id;
        (*cur.task).state = TaskState::Ready;
        switch_to(&mut (*cur.task).context as *mut Context, cur.processor_ctx);
    });
    poll();
}

/// Block the current task with the given reason and release the
/// processor. The caller is responsible for having already recorded this
/// task's id wherever it will be woken from (an entry queue, a condition
/// variable, a semaphore's wait queue, ...).
pub fn block_current(reason: BlockReason) {
    with_current(|cur| unsafe {
        (*cur.task).state = TaskState::Blocked;
        (*cur.task).block_reason = Some(reason);
        switch_to(&mut (*cur.task).context as *mut Context, cur.processor_ctx);
    });
    poll();
}

/// The translator boundary's `poll()` call (spec §6): deliver any pending
/// asynchronous exception if the enable counter is zero, and act on a
/// pending preemption flag by yielding.
pub fn poll() {
    let should_yield = with_current(|cur| unsafe {
        let task = &mut *cur.task;
        if task.is_enabled() && task.mailbox.has_pending() {
            deliver_pending(task);
        }
        cur.preempt.take()
    });
    if should_yield {
        with_current(|cur| unsafe {
            (*cur.task).state = TaskState::Ready;
            switch_to(&mut (*cur.task).context as *mut Context, cur.processor_ctx);
        });
    }
}

/// Install (or clear, with `None`) the current task's asynchronous
/// exception handler (spec §4.8). Called by the translator boundary, not
/// by ordinary monitor code; a task with no handler installed treats a
/// delivered `Throw` as unhandled (spec §7).
pub fn set_exception_handler(handler: Option<Box<dyn Fn(&Envelope) + Send>>) {
    with_current(|cur| unsafe {
        (*cur.task).handler = handler;
    });
}

fn deliver_pending(task: &mut Task) {
    for (from, envelope) in task.mailbox.drain() {
        if let Some(handler) = task.handler.as_ref() {
            log::debug!("{}: delivering {envelope:?} from {from} to installed handler", task.id);
            handler(&envelope);
            continue;
        }
        match envelope {
            Envelope::Resume(_) => {
                log::debug!("{}: resumption exception delivered from {from}, no handler installed", task.id);
            }
            Envelope::Throw(_) => {
                // No handler-stack search is implemented here (the
                // translator boundary that would supply one is out of
                // scope); every delivered throw is treated as unhandled.
                log::warn!("{}: unhandled non-local throw from {from}", task.id);
                crate::runtime::mark_unrecovered();
            }
            Envelope::Cancel => {
                log::debug!("{}: cancellation delivered from {from}", task.id);
            }
        }
    }
}

/// Put the current task to sleep for `duration`, honoring the same
/// signalled/timeout race resolution as a timed semaphore `P` (spec §4.6).
pub fn sleep(duration: Duration) {
    let (cluster, tid) = with_current(|cur| (cur.cluster.clone(), unsafe { (*cur.task).id }));
    cluster.time_queue().lock().arm(tid, duration);
    block_current(BlockReason::Timed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::Cluster;
    use crate::ready_queue::FifoQueue;
    use crate::task::Priority;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc as StdArc;

    #[test]
    fn yielding_tasks_round_robin() {
        let cluster = Cluster::new("rr", Box::new(FifoQueue::new()));
        static TRACE: AtomicU32 = AtomicU32::new(0);

        cluster.spawn_task("a", Priority::NORMAL, Duration::ZERO, 64 * 1024, || {
            TRACE.fetch_add(1, Ordering::SeqCst);
            yield_now();
            TRACE.fetch_add(10, Ordering::SeqCst);
        });
        cluster.spawn_task("b", Priority::NORMAL, Duration::ZERO, 64 * 1024, || {
            TRACE.fetch_add(1, Ordering::SeqCst);
            yield_now();
            TRACE.fetch_add(10, Ordering::SeqCst);
        });

        let mut proc = Processor::spawn(1, cluster.clone());
        // Give the processor a moment to drain both tasks, then shut down.
        while cluster.task_count() > 0 || cluster.halted_count() < 2 {
            std::thread::sleep(Duration::from_millis(1));
        }
        proc.shutdown();
        proc.join();
        let _: StdArc<Cluster> = cluster;
        assert_eq!(TRACE.load(Ordering::SeqCst), 22);
    }
}
