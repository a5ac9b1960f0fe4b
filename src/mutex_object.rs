//! Mutex object and the accept protocol (spec §4.5) — the central hard
//! subsystem.
//!
//! A [`MutexObject`] is a user-level monitor: entry operations execute
//! under mutual exclusion, callers queue on an entry queue, and the current
//! owner may explicitly `accept` another operation instead of simply
//! exiting. All state is protected by a short internal spinlock
//! (`spin::Mutex`, following the teacher's use of `spin` throughout its
//! scheduler core) held only for queue manipulation, never across user
//! code or a context switch (spec §4.5 "Concurrency contract").

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
use std::sync::Arc;

use spin::Mutex as SpinMutex;
use std::time::Duration;

use crate::error::{KernelError, KernelResult};
use crate::processor::{self, block_current};
use crate::task::{BlockReason, InheritedContribution, Priority, TaskId};
use crate::timer::TimerHandle;

/// Sentinel stored in [`WaitingAcceptor::matched_op`] until `enter` fills in
/// the op id of whichever call actually satisfied the acceptor.
const NO_MATCH: u32 = u32::MAX;

static NEXT_OBJECT_ID: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(1);

/// One alternative of an `accept` clause: an operation id and whether its
/// `when` guard currently holds (spec §4.5 point 1 — all guards are
/// evaluated eagerly by the caller before `accept` is invoked, since the
/// set of acceptable operations is itself the clause's precondition).
#[derive(Debug, Clone, Copy)]
pub struct AcceptAlternative {
    pub op_id: u32,
    pub when: bool,
}

/// What an `accept` call resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptResult {
    /// A queued caller invoking this operation id was handed ownership and
    /// has since returned it; the clause's body may now run.
    Accepted(u32),
    /// No caller matched and an `else` clause was present.
    Else,
    /// No caller matched before `timeout` elapsed.
    TimedOut,
}

/// A pending call queued on the entry queue (or merged-in via `signal`).
struct EntryCall {
    task: TaskId,
    op_id: u32,
    priority: Priority,
}

/// An owner suspended inside `accept` with no caller match yet; new callers
/// check this at entry time and can satisfy it directly (spec §4.5 point 5).
struct WaitingAcceptor {
    task: TaskId,
    acceptable: Vec<u32>,
    timer: Option<TimerHandle>,
    /// Written by `enter`'s direct-handover path with the op id of the call
    /// that satisfied this acceptor, so `accept` can report the real id
    /// rather than guessing from the acceptable set.
    matched_op: Arc<AtomicU32>,
}

struct ConditionQueueState {
    waiters: VecDeque<(TaskId, Option<u64>)>,
}

struct MutexState {
    owner: Option<TaskId>,
    entry_queue: VecDeque<EntryCall>,
    /// LIFO of owners suspended inside a successful `accept` handover,
    /// resumed in reverse order as each accepted operation returns.
    acceptor_stack: Vec<TaskId>,
    waiting_acceptor: Option<WaitingAcceptor>,
    /// Takes priority over `entry_queue` on the next handover (spec §4.5
    /// "Condition variables": `signal` moves the head of `c` here).
    urgent: VecDeque<TaskId>,
    conditions: HashMap<u32, ConditionQueueState>,
    destroying: bool,
}

/// A user-level monitor (spec GLOSSARY "Mutex object").
pub struct MutexObject {
    pub id: u64,
    state: SpinMutex<MutexState>,
}

impl MutexObject {
    pub fn new() -> Self {
        let id = NEXT_OBJECT_ID.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        MutexObject {
            id,
            state: SpinMutex::new(MutexState {
                owner: None,
                entry_queue: VecDeque::new(),
                acceptor_stack: Vec::new(),
                waiting_acceptor: None,
                urgent: VecDeque::new(),
                conditions: HashMap::new(),
                destroying: false,
            }),
        }
    }

    /// Enter a mutex operation identified by `op_id`. Blocks the calling
    /// task if mutual exclusion cannot be acquired immediately. Returns
    /// [`KernelError::EntryFailure`] if the object is being destroyed.
    pub fn enter(&self, op_id: u32) -> KernelResult<()> {
        let me = processor::this_task().unwrap_or_else(|| crate::error::fatal("enter() outside a task"));
        let my_priority = current_priority();

        loop {
            let action = {
                let mut st = self.state.lock();
                if st.destroying {
                    return Err(KernelError::EntryFailure { object: self.id });
                }

                if st.owner.is_none() {
                    st.owner = Some(me);
                    EnterAction::Acquired
                } else if let Some(acceptor) = st.waiting_acceptor.take_if(|a| a.acceptable.contains(&op_id)) {
                    // Directly satisfy a waiting acceptor (spec §4.5 point 5).
                    acceptor.matched_op.store(op_id, AtomicOrdering::Release);
                    if let Some(timer) = &acceptor.timer {
                        // Mark the race resolved in our favour; a stale fire
                        // of the timer is then a documented no-op (the
                        // acceptor is no longer `Blocked` by the time it
                        // runs). See DESIGN.md.
                        let _ = timer.try_claim();
                    }
                    st.acceptor_stack.push(acceptor.task);
                    st.owner = Some(me);
                    EnterAction::HandedOverFrom(acceptor.task)
                } else {
                    st.entry_queue.push_back(EntryCall {
                        task: me,
                        op_id,
                        priority: my_priority,
                    });
                    inherit_priority(st.owner.unwrap(), my_priority, self.id);
                    EnterAction::Blocked
                }
            };

            match action {
                EnterAction::Acquired | EnterAction::HandedOverFrom(_) => return Ok(()),
                EnterAction::Blocked => {
                    block_current(BlockReason::EntryQueue);
                    // Re-check: we may have been woken as the new owner, or
                    // spuriously; loop re-evaluates `st.owner` either way.
                    let st = self.state.lock();
                    if st.owner == Some(me) {
                        return Ok(());
                    }
                    if st.destroying {
                        return Err(KernelError::EntryFailure { object: self.id });
                    }
                }
            }
        }
    }

    /// Release ownership. If an acceptor is suspended above us on the
    /// stack, resume it; otherwise pick the next caller from the urgent
    /// queue, then the entry queue (spec §4.5 "Handover").
    pub fn exit(&self) {
        let me = processor::this_task();
        let mut st = self.state.lock();
        debug_assert_eq!(st.owner, me);
        withdraw_priority(me, self.id);

        if let Some(resumed) = st.acceptor_stack.pop() {
            st.owner = Some(resumed);
            drop(st);
            wake(resumed);
            return;
        }

        if let Some(next) = pick_next_caller(&mut st) {
            st.owner = Some(next);
            drop(st);
            wake(next);
        } else {
            st.owner = None;
        }
    }

    /// Execute an `accept` clause. `alts` must have every guard already
    /// evaluated (spec §4.5 point 1). `has_else` and `timeout` implement
    /// the `else`/`timeout(d)` alternatives; per `SPEC_FULL.md` §12.2,
    /// `else` is checked before a zero-duration timeout is armed.
    pub fn accept(
        &self,
        alts: &[AcceptAlternative],
        has_else: bool,
        timeout: Option<Duration>,
    ) -> AcceptResult {
        let me = processor::this_task().unwrap_or_else(|| crate::error::fatal("accept() outside a task"));
        let acceptable: Vec<u32> = alts.iter().filter(|a| a.when).map(|a| a.op_id).collect();

        loop {
            let matched_op = Arc::new(AtomicU32::new(NO_MATCH));
            let action = {
                let mut st = self.state.lock();
                if let Some(idx) = st
                    .entry_queue
                    .iter()
                    .position(|c| acceptable.contains(&c.op_id))
                {
                    let call = st.entry_queue.remove(idx).unwrap();
                    let _ = call.priority;
                    withdraw_priority(Some(me), self.id);
                    st.acceptor_stack.push(me);
                    st.owner = Some(call.task);
                    AcceptAction::Handover(call.task, call.op_id)
                } else if has_else {
                    AcceptAction::Else
                } else if let Some(d) = timeout {
                    let cluster = processor::this_cluster()
                        .unwrap_or_else(|| crate::error::fatal("accept(timeout) outside a cluster"));
                    let (handle, _deadline) = cluster.time_queue().lock().arm(me, d);
                    st.waiting_acceptor = Some(WaitingAcceptor {
                        task: me,
                        acceptable: acceptable.clone(),
                        timer: Some(handle),
                        matched_op: matched_op.clone(),
                    });
                    AcceptAction::ParkTimed
                } else {
                    st.waiting_acceptor = Some(WaitingAcceptor {
                        task: me,
                        acceptable: acceptable.clone(),
                        timer: None,
                        matched_op: matched_op.clone(),
                    });
                    AcceptAction::Park
                }
            };

            let is_timed = matches!(action, AcceptAction::ParkTimed);

            match action {
                AcceptAction::Handover(_, op_id) => {
                    block_current(BlockReason::AcceptorSlot);
                    // Woken once the accepted call has exited or re-accepted
                    // nothing, resuming us as owner (spec §4.5 "Handover").
                    return AcceptResult::Accepted(op_id);
                }
                AcceptAction::Else => return AcceptResult::Else,
                AcceptAction::Park | AcceptAction::ParkTimed => loop {
                    block_current(BlockReason::AcceptorSlot);
                    let mut st = self.state.lock();
                    if st.owner == Some(me) {
                        // A caller satisfied us directly via `enter`.
                        if let Some(&top) = st.acceptor_stack.last() {
                            if top == me {
                                st.acceptor_stack.pop();
                            }
                        }
                        drop(st);
                        let op = matched_op.load(AtomicOrdering::Acquire);
                        debug_assert_ne!(op, NO_MATCH, "owner handed over without recording an op id");
                        return AcceptResult::Accepted(op);
                    }
                    let still_registered =
                        st.waiting_acceptor.as_ref().map(|a| a.task == me).unwrap_or(false);
                    if still_registered {
                        if is_timed {
                            st.waiting_acceptor = None;
                            return AcceptResult::TimedOut;
                        }
                        // No timeout was armed, so nothing could have ended
                        // this wait; a spurious wake just re-parks.
                        drop(st);
                        continue;
                    }
                    // `waiting_acceptor` was already cleared by a racing
                    // caller that then lost the handover to our timeout (or
                    // by the condition below on a previous loop); re-check
                    // from the top in case ownership changed in between.
                    drop(st);
                },
            }
        }
    }

    /// Destructor accept (spec §4.5): select this object's destructor as an
    /// acceptable operation, initiating shutdown. After this call no new
    /// `enter` succeeds; queued callers observe `EntryFailure`.
    pub fn accept_destructor(&self) {
        let mut st = self.state.lock();
        st.destroying = true;
        for call in st.entry_queue.drain(..) {
            drop(st);
            wake(call.task);
            st = self.state.lock();
        }
    }

    /// Convenience combining an ordinary return with re-enabling further
    /// accepts, for use in a constructor prolog or destructor epilog (spec
    /// §4.5 "accept-return").
    pub fn accept_return(&self) {
        self.exit();
    }

    // -- condition variables (spec §4.5 "Condition variables") --

    pub(crate) fn wait(&self, cond_id: u32, info: Option<u64>) {
        let me = processor::this_task().unwrap_or_else(|| crate::error::fatal("wait() outside a task"));
        {
            let mut st = self.state.lock();
            st.conditions
                .entry(cond_id)
                .or_insert_with(|| ConditionQueueState {
                    waiters: VecDeque::new(),
                })
                .waiters
                .push_back((me, info));
            withdraw_priority(Some(me), self.id);
            if let Some(resumed) = st.acceptor_stack.pop() {
                st.owner = Some(resumed);
                drop(st);
                wake(resumed);
            } else if let Some(next) = pick_next_caller(&mut st) {
                st.owner = Some(next);
                drop(st);
                wake(next);
            } else {
                st.owner = None;
            }
        }
        block_current(BlockReason::Condition);
    }

    pub(crate) fn signal(&self, cond_id: u32) {
        let mut st = self.state.lock();
        if let Some(q) = st.conditions.get_mut(&cond_id) {
            if let Some((task, _info)) = q.waiters.pop_front() {
                st.urgent.push_back(task);
            }
        }
    }

    /// Immediate-handover variant: transfers ownership to the signallee
    /// right away and places the signaller on the urgent queue (spec
    /// §4.5).
    pub(crate) fn signal_block(&self, cond_id: u32) {
        let me = processor::this_task().unwrap_or_else(|| crate::error::fatal("signalBlock() outside a task"));
        let target = {
            let mut st = self.state.lock();
            let target = st
                .conditions
                .get_mut(&cond_id)
                .and_then(|q| q.waiters.pop_front())
                .map(|(t, _)| t);
            if let Some(target) = target {
                st.urgent.push_back(me);
                st.owner = Some(target);
            }
            target
        };
        if let Some(target) = target {
            wake(target);
            block_current(BlockReason::EntryQueue);
        }
    }

    /// `signalAll`: moves at most one task to `Ready` immediately (onto the
    /// urgent queue); every other waiter becomes merely eligible and wakes
    /// only as ownership is later handed to it (spec §4.5).
    pub(crate) fn signal_all(&self, cond_id: u32) {
        let mut st = self.state.lock();
        if let Some(q) = st.conditions.get_mut(&cond_id) {
            let waiters: Vec<_> = q.waiters.drain(..).collect();
            for (task, _info) in waiters {
                st.urgent.push_back(task);
            }
        }
    }

    /// Inspect the head of a condition queue without removing it.
    pub(crate) fn front(&self, cond_id: u32) -> Option<u64> {
        let st = self.state.lock();
        st.conditions
            .get(&cond_id)
            .and_then(|q| q.waiters.front())
            .and_then(|(_, info)| *info)
    }
}

impl Default for MutexObject {
    fn default() -> Self {
        Self::new()
    }
}

enum EnterAction {
    Acquired,
    HandedOverFrom(TaskId),
    Blocked,
}

enum AcceptAction {
    Handover(TaskId, u32),
    Else,
    Park,
    ParkTimed,
}

fn pick_next_caller(st: &mut MutexState) -> Option<TaskId> {
    if let Some(task) = st.urgent.pop_front() {
        // Remove any stale entry_queue bookkeeping for this task, if it had
        // also queued directly (it shouldn't, but defends against double
        // accounting).
        st.entry_queue.retain(|c| c.task != task);
        return Some(task);
    }
    st.entry_queue.pop_front().map(|c| c.task)
}

fn wake(task: TaskId) {
    if let Some(cluster) = processor::this_cluster() {
        cluster.wake_task(task);
    } else {
        crate::error::fatal("wake() outside a cluster");
    }
}

/// The calling task's own active priority. Reads through the `CURRENT`
/// thread-local rather than `Cluster::with_task_mut`: the caller is by
/// definition the task currently running, and a running task is held
/// locally by its processor, not in `cluster.tasks` (see
/// `processor::active_priority`).
fn current_priority() -> Priority {
    processor::active_priority().unwrap_or(Priority::NORMAL)
}

fn inherit_priority(owner: TaskId, blocker_priority: Priority, object: u64) {
    if let Some(cluster) = processor::this_cluster() {
        cluster.with_task_mut(owner, |t| {
            t.mutex_frames.inherited.push(InheritedContribution {
                object,
                amount: blocker_priority,
            });
            t.raise_active_priority(blocker_priority);
        });
        cluster.reprioritize(owner);
    }
}

/// Withdraw every inherited-priority contribution attributable to `object`
/// from `task`'s histogram and recompute its active priority (spec §4.5:
/// "on release, the increment attributable to that blocker is withdrawn").
fn withdraw_priority(task: Option<TaskId>, object: u64) {
    let Some(task) = task else { return };
    if let Some(cluster) = processor::this_cluster() {
        cluster.with_task_mut(task, |t| {
            t.mutex_frames.inherited.retain(|c| c.object != object);
            t.recompute_active_priority();
        });
        cluster.reprioritize(task);
    }
}
