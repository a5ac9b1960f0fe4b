//! Boot sequence (spec §6): `run` initializes the system cluster, a boot
//! task, a reaper task, and the system processors, then waits for shutdown
//! and returns the process exit code.

use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use crate::cluster::Cluster;
use crate::config::Config;
use crate::processor::Processor;
use crate::ready_queue;
use crate::task::Priority;

static EXIT_CODE: AtomicI32 = AtomicI32::new(0);

/// Set the process exit code `run` will return once the boot task
/// finishes. Call from anywhere inside the kernel; the last call before
/// shutdown wins (spec §6: "Exit code is the value of `main` return or a
/// user-set code").
pub fn set_exit_code(code: i32) {
    EXIT_CODE.store(code, Ordering::SeqCst);
}

/// Flag an unrecoverable condition (an unhandled asynchronous exception, an
/// internal assertion) by forcing a non-zero exit code, without otherwise
/// disturbing whatever is already running.
pub(crate) fn mark_unrecovered() {
    EXIT_CODE.compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst).ok();
}

/// Boot the system cluster with `config`, run `entry` as the boot task, and
/// block until every task has terminated and every processor has stopped.
/// Returns the process exit code.
pub fn run(config: Config, entry: impl FnOnce() + Send + 'static) -> i32 {
    log::info!(
        "uexec boot: {} processor(s), default quantum {:?}",
        config.processor_count,
        config.default_quantum
    );

    let cluster = Cluster::new("system", ready_queue::default_policy());

    let reaper_cluster = cluster.clone();
    cluster.spawn_task(
        "reaper",
        Priority::MIN,
        Duration::ZERO,
        64 * 1024,
        move || reaper_loop(reaper_cluster),
    );

    let boot_cluster = cluster.clone();
    cluster.spawn_task(
        "boot",
        Priority::NORMAL,
        config.default_quantum,
        config.default_stack_size,
        move || {
            entry();
            boot_cluster.begin_shutdown();
        },
    );

    let mut processors: Vec<Processor> = (0..config.processor_count)
        .map(|id| Processor::spawn(id, cluster.clone()))
        .collect();

    // This call runs on the host's own thread, outside the cluster: poll
    // for shutdown rather than parking on the idle condvar, which is
    // reserved for processor threads. Once shutdown begins and the reaper
    // has reclaimed everything but itself, it exits too, dropping the live
    // task count to zero (its own corpse is left for the process to
    // reclaim on exit, not a live task).
    while !cluster.is_shutting_down() || cluster.task_count() > 0 {
        std::thread::sleep(Duration::from_millis(1));
    }

    for p in &processors {
        p.shutdown();
    }
    for p in &mut processors {
        p.join();
    }

    log::info!("uexec shutdown complete, exit code {}", EXIT_CODE.load(Ordering::SeqCst));
    EXIT_CODE.load(Ordering::SeqCst)
}

/// Body of the reaper task: repeatedly reclaims `Halt` tasks (dropping
/// their stack) and exits once the cluster is shutting down and nothing
/// but the reaper itself remains.
fn reaper_loop(cluster: std::sync::Arc<Cluster>) {
    loop {
        match cluster.reap_one() {
            Some(task) => {
                log::debug!("reaper: reclaimed {}", task.id);
                drop(task);
            }
            None => {
                if cluster.is_shutting_down() && cluster.task_count() <= 1 {
                    return;
                }
                crate::processor::sleep(Duration::from_millis(1));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn run_executes_boot_task_and_shuts_down() {
        static RAN: AtomicBool = AtomicBool::new(false);
        let mut cfg = Config::default();
        cfg.processor_count = 1;
        cfg.default_quantum = Duration::from_millis(5);
        let code = run(cfg, move || {
            RAN.store(true, Ordering::SeqCst);
            set_exit_code(7);
        });
        assert!(RAN.load(Ordering::SeqCst));
        assert_eq!(code, 7);
    }
}
