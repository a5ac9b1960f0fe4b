//! Cluster migration (spec §8 scenario 6).
//!
//! Task T starts on cluster C1, calls `migrate(C2)`, and on return finds
//! itself running on C2 — the rest of its body executes entirely on a
//! processor bound to C2, never touching C1 again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use uexec::ready_queue::FifoQueue;
use uexec::Cluster;

static BEFORE_CLUSTER: AtomicU64 = AtomicU64::new(0);
static AFTER_CLUSTER: AtomicU64 = AtomicU64::new(0);

#[test]
fn migrate_moves_execution_to_the_target_cluster() {
    let c1 = Cluster::new("c1", Box::new(FifoQueue::new()));
    let c2 = Cluster::new("c2", Box::new(FifoQueue::new()));

    let c2_for_task = c2.clone();
    c1.spawn_task("T", Default::default(), Duration::ZERO, 64 * 1024, move || {
        let before = uexec::this_cluster().expect("T starts in a cluster");
        BEFORE_CLUSTER.store(before.id as u64, Ordering::SeqCst);

        uexec::migrate(&c2_for_task);

        let after = uexec::this_cluster().expect("T is still in a cluster post-migration");
        AFTER_CLUSTER.store(after.id as u64, Ordering::SeqCst);
    });

    // One processor per cluster: C1's processor hands T off to C2's ready
    // queue on migration; only C2's processor ever dispatches it again.
    let p1 = uexec::processor::Processor::spawn(0, c1.clone());
    let p2 = uexec::processor::Processor::spawn(0, c2.clone());

    while c1.task_count() > 0 || c2.task_count() > 0 {
        std::thread::sleep(Duration::from_millis(1));
    }
    p1.shutdown();
    p2.shutdown();
    let mut p1 = p1;
    let mut p2 = p2;
    p1.join();
    p2.join();

    assert_eq!(BEFORE_CLUSTER.load(Ordering::SeqCst), c1.id as u64);
    assert_eq!(AFTER_CLUSTER.load(Ordering::SeqCst), c2.id as u64);
    assert_ne!(
        BEFORE_CLUSTER.load(Ordering::SeqCst),
        AFTER_CLUSTER.load(Ordering::SeqCst)
    );
}
