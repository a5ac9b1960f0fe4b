//! `signalBlock` immediate handover (spec §8 scenario 2).
//!
//! Task A enters the monitor and waits on condition C. Task B enters,
//! calls `signalBlock(C)` (which hands the monitor straight to A and
//! parks B until it is free again), then records "B-exit" once it
//! regains control. A, on waking, releases the monitor and immediately
//! re-enters to wait its turn behind B, so the trace is pinned to
//! `A-resumed, B-exit, A-final` regardless of scheduling noise — a
//! single processor with a FIFO ready queue makes the handover order
//! observable rather than merely probable.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use uexec::ready_queue::FifoQueue;
use uexec::{Cluster, MutexObject};

const OP_A: u32 = 1;
const COND: u32 = 1;

static TRACE: [AtomicUsize; 3] = [AtomicUsize::new(0), AtomicUsize::new(0), AtomicUsize::new(0)];
static NEXT_SLOT: AtomicUsize = AtomicUsize::new(0);

fn record(tag: usize) {
    let slot = NEXT_SLOT.fetch_add(1, Ordering::SeqCst);
    TRACE[slot].store(tag, Ordering::SeqCst);
}

#[test]
fn handover_order_is_a_resumed_b_exit_a_final() {
    const A_RESUMED: usize = 1;
    const B_EXIT: usize = 2;
    const A_FINAL: usize = 3;

    let cluster = Cluster::new("signal-block-test", Box::new(FifoQueue::new()));
    let monitor = Arc::new(MutexObject::new());

    let a_monitor = monitor.clone();
    cluster.spawn_task("A", Default::default(), Duration::ZERO, 64 * 1024, move || {
        a_monitor.enter(OP_A).expect("A enters");
        a_monitor.condition(COND).wait();
        record(A_RESUMED);
        a_monitor.exit();

        // Re-enter to queue behind B, so "A-final" cannot print until B
        // has released the monitor.
        a_monitor.enter(OP_A).expect("A re-enters");
        record(A_FINAL);
        a_monitor.exit();
    });

    let b_monitor = monitor.clone();
    cluster.spawn_task("B", Default::default(), Duration::ZERO, 64 * 1024, move || {
        b_monitor.enter(OP_A).expect("B enters");
        b_monitor.condition(COND).signal_block();
        record(B_EXIT);
        b_monitor.exit();
    });

    // A single processor plus a FIFO ready queue makes the handover
    // order deterministic rather than merely likely.
    let processor = uexec::processor::Processor::spawn(0, cluster.clone());
    while cluster.task_count() > 0 {
        std::thread::sleep(Duration::from_millis(1));
    }
    processor.shutdown();
    let mut processor = processor;
    processor.join();

    assert_eq!(NEXT_SLOT.load(Ordering::SeqCst), 3);
    assert_eq!(
        [
            TRACE[0].load(Ordering::SeqCst),
            TRACE[1].load(Ordering::SeqCst),
            TRACE[2].load(Ordering::SeqCst)
        ],
        [A_RESUMED, B_EXIT, A_FINAL]
    );
}
