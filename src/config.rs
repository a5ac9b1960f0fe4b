//! Environment-overridable runtime configuration.
//!
//! Mirrors the teacher's pattern of weak compiled-in defaults (see
//! `scheduler::types::{Priority, TimeSliceTicks}` consts) but makes them
//! overridable by the host process via `UEXEC_*` environment variables, as
//! required by spec.md §6.

use std::time::Duration;

use crate::error::{KernelError, KernelResult};

const DEFAULT_QUANTUM_MS: u64 = 10;
const DEFAULT_STACK_SIZE: usize = 256 * 1024;
const DEFAULT_AFFINITY_BASE: usize = 0;

/// Host-overridable defaults for the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Number of kernel threads (processors) in the system cluster.
    /// Default: the online CPU count.
    pub processor_count: usize,
    /// Default per-task quantum. Zero disables preemption for that task.
    pub default_quantum: Duration,
    /// Default stack size allocated for a new task.
    pub default_stack_size: usize,
    /// Executor-pool processor count (a cluster dedicated to actor-style
    /// request handlers, layered above the kernel but configured here since
    /// the knob is part of the boundary surface).
    pub executor_processor_count: usize,
    /// Executor-pool worker count.
    pub executor_worker_count: usize,
    /// Executor-pool request-queue depth.
    pub executor_request_queue: usize,
    /// Whether the executor pool runs on its own cluster rather than
    /// sharing the system cluster.
    pub executor_separate_cluster: bool,
    /// Base index used when assigning processor affinity hints.
    pub executor_affinity_base: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            processor_count: default_processor_count(),
            default_quantum: Duration::from_millis(DEFAULT_QUANTUM_MS),
            default_stack_size: DEFAULT_STACK_SIZE,
            executor_processor_count: default_processor_count(),
            executor_worker_count: default_processor_count() * 2,
            executor_request_queue: 1024,
            executor_separate_cluster: false,
            executor_affinity_base: DEFAULT_AFFINITY_BASE,
        }
    }
}

fn default_processor_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl Config {
    /// Build a [`Config`], starting from [`Config::default`] and applying
    /// any `UEXEC_*` environment overrides present.
    ///
    /// An override that fails to parse is an error, not a silent fallback —
    /// the host asked for a specific value and got something invalid.
    pub fn from_env() -> KernelResult<Config> {
        let mut cfg = Config::default();

        if let Some(v) = env_usize("UEXEC_PROCESSOR_COUNT")? {
            cfg.processor_count = v.max(1);
        }
        if let Some(v) = env_u64("UEXEC_DEFAULT_QUANTUM_MS")? {
            cfg.default_quantum = Duration::from_millis(v);
        }
        if let Some(v) = env_usize("UEXEC_DEFAULT_STACK_SIZE")? {
            cfg.default_stack_size = v;
        }
        if let Some(v) = env_usize("UEXEC_EXECUTOR_PROCESSOR_COUNT")? {
            cfg.executor_processor_count = v.max(1);
        }
        if let Some(v) = env_usize("UEXEC_EXECUTOR_WORKER_COUNT")? {
            cfg.executor_worker_count = v.max(1);
        }
        if let Some(v) = env_usize("UEXEC_EXECUTOR_REQUEST_QUEUE")? {
            cfg.executor_request_queue = v.max(1);
        }
        if let Some(v) = env_bool("UEXEC_EXECUTOR_SEPARATE_CLUSTER")? {
            cfg.executor_separate_cluster = v;
        }
        if let Some(v) = env_usize("UEXEC_EXECUTOR_AFFINITY_BASE")? {
            cfg.executor_affinity_base = v;
        }

        Ok(cfg)
    }
}

fn env_usize(key: &str) -> KernelResult<Option<usize>> {
    env_parse(key, |s| s.parse::<usize>().ok())
}

fn env_u64(key: &str) -> KernelResult<Option<u64>> {
    env_parse(key, |s| s.parse::<u64>().ok())
}

fn env_bool(key: &str) -> KernelResult<Option<bool>> {
    env_parse(key, |s| match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    })
}

fn env_parse<T>(key: &str, parse: impl Fn(&str) -> Option<T>) -> KernelResult<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => parse(&raw)
            .map(Some)
            .ok_or_else(|| KernelError::Fatal(format!("invalid value for {key}: {raw:?}"))),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => {
            Err(KernelError::Fatal(format!("{key} is not valid unicode")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_quantum_is_nonzero() {
        let cfg = Config::default();
        assert!(cfg.default_quantum.as_millis() > 0);
        assert!(cfg.processor_count >= 1);
    }

    #[test]
    fn env_bool_accepts_common_spellings() {
        assert_eq!(env_bool("UEXEC_TEST_NOT_SET").unwrap(), None);
    }
}
