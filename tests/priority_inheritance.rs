//! Priority inheritance (spec §8 scenario 3).
//!
//! Low-priority L acquires a monitor, high-priority H then enters and
//! blocks on it, and medium-priority M_mid sits ready the whole time.
//! With a priority-aware ready queue, L's active priority is raised to
//! H's the moment H blocks, so L — not M_mid — is the next one
//! dispatched; L releases, which hands the monitor straight to the
//! waiting H, and only once H is done does M_mid finally get the
//! processor. Observed schedule: L (to release, boosted), H, M_mid.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use uexec::ready_queue::StaticPriorityQueue;
use uexec::{Cluster, MutexObject, Priority};

const OP: u32 = 1;
const PRIO_L: Priority = Priority(1);
const PRIO_MID: Priority = Priority(10);
const PRIO_H: Priority = Priority(20);

static L_HAS_MUTEX: AtomicBool = AtomicBool::new(false);
static SPAWN_DONE: AtomicBool = AtomicBool::new(false);
static OBSERVED_PRIORITY: AtomicI32 = AtomicI32::new(-1);

static TRACE: [AtomicUsize; 3] = [AtomicUsize::new(0), AtomicUsize::new(0), AtomicUsize::new(0)];
static NEXT_SLOT: AtomicUsize = AtomicUsize::new(0);

fn record(tag: usize) {
    let slot = NEXT_SLOT.fetch_add(1, Ordering::SeqCst);
    TRACE[slot].store(tag, Ordering::SeqCst);
}

#[test]
fn low_priority_holder_inherits_and_schedule_follows() {
    const L_START: usize = 1;
    const H_RUN: usize = 2;
    const MMID_RUN: usize = 3;

    let cluster = Cluster::new("priority-test", Box::new(StaticPriorityQueue::new()));
    let monitor = Arc::new(MutexObject::new());

    let l_monitor = monitor.clone();
    cluster.spawn_task("L", PRIO_L, Duration::ZERO, 64 * 1024, move || {
        l_monitor.enter(OP).expect("L enters");
        record(L_START);
        L_HAS_MUTEX.store(true, Ordering::SeqCst);

        // Spin (without yielding) until the host has spawned H and
        // M_mid, so both are already ready before we give up the
        // processor. Only one processor is in play, so nothing else
        // runs until this `yield_now` below.
        while !SPAWN_DONE.load(Ordering::SeqCst) {
            std::hint::spin_loop();
        }
        uexec::yield_now();

        // By the time we're redispatched, H (if it ran first) has
        // either not yet blocked on the monitor or already has; either
        // way we're the only one who can observe our own boosted
        // priority from inside our own execution.
        let observed = uexec::active_priority().expect("L is running");
        OBSERVED_PRIORITY.store(observed.0, Ordering::SeqCst);

        l_monitor.exit();
    });

    let h_monitor = monitor.clone();
    let mid_monitor = monitor.clone();

    // A single processor so scheduling order is observable rather than
    // merely likely.
    let processor = uexec::processor::Processor::spawn(0, cluster.clone());

    // Spawn H and M_mid only after L holds the monitor, so L is
    // necessarily the first to run.
    while !L_HAS_MUTEX.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(1));
    }
    cluster.spawn_task("H", PRIO_H, Duration::ZERO, 64 * 1024, move || {
        h_monitor.enter(OP).expect("H enters");
        record(H_RUN);
        h_monitor.exit();
    });
    cluster.spawn_task("M_mid", PRIO_MID, Duration::ZERO, 64 * 1024, move || {
        let _ = &mid_monitor;
        record(MMID_RUN);
    });
    SPAWN_DONE.store(true, Ordering::SeqCst);

    while cluster.task_count() > 0 {
        std::thread::sleep(Duration::from_millis(1));
    }
    processor.shutdown();
    let mut processor = processor;
    processor.join();

    assert_eq!(OBSERVED_PRIORITY.load(Ordering::SeqCst), PRIO_H.0);
    assert_eq!(NEXT_SLOT.load(Ordering::SeqCst), 3);
    assert_eq!(
        [
            TRACE[0].load(Ordering::SeqCst),
            TRACE[1].load(Ordering::SeqCst),
            TRACE[2].load(Ordering::SeqCst)
        ],
        [L_START, H_RUN, MMID_RUN]
    );
}
