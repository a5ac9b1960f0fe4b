//! Timed semaphore `P` (spec §8 scenario 4).
//!
//! A counter of zero with no matching `V` times out no sooner than the
//! requested duration and not excessively late; a `V` delivered before
//! the deadline wins the race and reports `Signalled` without touching
//! the counter.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use uexec::ready_queue::FifoQueue;
use uexec::sync::Semaphore;
use uexec::Cluster;

fn run_to_completion(cluster: &Arc<Cluster>, processor_count: usize) {
    let mut procs: Vec<_> = (0..processor_count)
        .map(|id| uexec::processor::Processor::spawn(id, cluster.clone()))
        .collect();
    while cluster.task_count() > 0 {
        std::thread::sleep(Duration::from_millis(1));
    }
    for p in &procs {
        p.shutdown();
    }
    for p in &mut procs {
        p.join();
    }
}

#[test]
fn pure_timeout_waits_at_least_the_requested_duration() {
    static ELAPSED_MILLIS: AtomicU64 = AtomicU64::new(0);
    static TIMED_OUT: AtomicBool = AtomicBool::new(false);

    let cluster = Cluster::new("timed-sem-timeout", Box::new(FifoQueue::new()));
    let sem = Arc::new(Semaphore::new(0));

    let waiter = sem.clone();
    cluster.spawn_task("waiter", Default::default(), Duration::ZERO, 64 * 1024, move || {
        let start = Instant::now();
        let outcome = waiter.p_timed(Duration::from_millis(100));
        let elapsed = start.elapsed();
        TIMED_OUT.store(outcome.is_timed_out(), Ordering::SeqCst);
        ELAPSED_MILLIS.store(elapsed.as_millis() as u64, Ordering::SeqCst);
    });

    run_to_completion(&cluster, 1);

    assert!(TIMED_OUT.load(Ordering::SeqCst));
    let elapsed = ELAPSED_MILLIS.load(Ordering::SeqCst);
    assert!(elapsed >= 100, "woke too early: {elapsed}ms");
    // One quantum of scheduling slack on top of the deadline itself.
    assert!(elapsed < 300, "woke suspiciously late: {elapsed}ms");
    assert_eq!(sem.counter(), 0);
}

#[test]
fn a_v_delivered_before_the_deadline_wins_the_race() {
    static SIGNALLED: AtomicBool = AtomicBool::new(false);

    let cluster = Cluster::new("timed-sem-race", Box::new(FifoQueue::new()));
    let sem = Arc::new(Semaphore::new(0));

    let waiter = sem.clone();
    cluster.spawn_task("waiter", Default::default(), Duration::ZERO, 64 * 1024, move || {
        let outcome = waiter.p_timed(Duration::from_millis(150));
        SIGNALLED.store(outcome.is_signalled(), Ordering::SeqCst);
    });

    let signaller = sem.clone();
    cluster.spawn_task("signaller", Default::default(), Duration::ZERO, 64 * 1024, move || {
        // Comfortably before the 150ms deadline, but long enough that the
        // waiter is certainly already parked.
        uexec::processor::sleep(Duration::from_millis(40));
        signaller.v();
    });

    run_to_completion(&cluster, 2);

    assert!(SIGNALLED.load(Ordering::SeqCst));
    assert_eq!(sem.counter(), 0);
}
