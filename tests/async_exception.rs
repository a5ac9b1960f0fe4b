//! Asynchronous exception delivery (spec §8 scenario 5).
//!
//! Task U installs a resumption handler, disables delivery, yields a few
//! times (the envelope may already be queued but must not fire while
//! disabled), then re-enables and keeps yielding until it observes its
//! handler has run. Task T sends `resume E at U` as soon as U is ready,
//! which may land well before U re-enables. The handler must run exactly
//! once, and only after U re-enables, after which U's own loop counter
//! keeps advancing normally.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use uexec::ready_queue::FifoQueue;
use uexec::{Cluster, Envelope};

static U_READY: AtomicBool = AtomicBool::new(false);
static HANDLER_RUNS: AtomicU32 = AtomicU32::new(0);
static HANDLER_RUNS_WHILE_DISABLED: AtomicU32 = AtomicU32::new(u32::MAX);
static LOOP_COUNTER: AtomicU32 = AtomicU32::new(0);
static FINAL_COUNTER: AtomicU32 = AtomicU32::new(0);

#[test]
fn resume_handler_runs_exactly_once_after_reenable() {
    let cluster = Cluster::new("async-exception-test", Box::new(FifoQueue::new()));

    let u_id = cluster.spawn_task("U", Default::default(), Duration::ZERO, 64 * 1024, move || {
        uexec::set_exception_handler(Some(Box::new(|envelope: &Envelope| {
            assert!(matches!(envelope, Envelope::Resume(_)));
            HANDLER_RUNS.fetch_add(1, Ordering::SeqCst);
        })));

        uexec::disable_exceptions();
        U_READY.store(true, Ordering::SeqCst);

        // T may already have sent the envelope by now; it must sit
        // queued, undelivered, through every yield in this loop.
        for _ in 0..5 {
            uexec::yield_now();
            LOOP_COUNTER.fetch_add(1, Ordering::SeqCst);
        }
        HANDLER_RUNS_WHILE_DISABLED.store(HANDLER_RUNS.load(Ordering::SeqCst), Ordering::SeqCst);

        uexec::enable_exceptions();
        while HANDLER_RUNS.load(Ordering::SeqCst) == 0 {
            uexec::yield_now();
            LOOP_COUNTER.fetch_add(1, Ordering::SeqCst);
        }
        // Keep looping a little further to show the counter resumes
        // advancing normally after delivery, not just up to it.
        for _ in 0..3 {
            uexec::yield_now();
            LOOP_COUNTER.fetch_add(1, Ordering::SeqCst);
        }
        FINAL_COUNTER.store(LOOP_COUNTER.load(Ordering::SeqCst), Ordering::SeqCst);
    });

    cluster.spawn_task("T", Default::default(), Duration::ZERO, 64 * 1024, move || {
        while !U_READY.load(Ordering::SeqCst) {
            uexec::yield_now();
        }
        let me = uexec::this_task().expect("T is running");
        let cluster = uexec::this_cluster().expect("T is in a cluster");
        cluster.send_envelope(u_id, me, Envelope::Resume(Box::new(())));
    });

    let mut procs: Vec<_> = (0..2)
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

    assert_eq!(HANDLER_RUNS_WHILE_DISABLED.load(Ordering::SeqCst), 0);
    assert_eq!(HANDLER_RUNS.load(Ordering::SeqCst), 1);
    assert!(FINAL_COUNTER.load(Ordering::SeqCst) >= 8);
}
