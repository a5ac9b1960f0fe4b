//! Counting barrier (spec §4.6): `parties` tasks must all call
//! [`Barrier::wait`] before any of them proceed; the barrier then resets for
//! reuse.

use std::collections::VecDeque;

use spin::Mutex as SpinMutex;

use crate::processor::{self, block_current};
use crate::task::{BlockReason, TaskId};

struct State {
    parties: u32,
    arrived: u32,
    generation: u64,
    waiters: VecDeque<TaskId>,
}

pub struct Barrier {
    state: SpinMutex<State>,
}

impl Barrier {
    pub fn new(parties: u32) -> Self {
        assert!(parties > 0, "a barrier needs at least one party");
        Barrier {
            state: SpinMutex::new(State {
                parties,
                arrived: 0,
                generation: 0,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Block until `parties` tasks have all called `wait` for the current
    /// generation, then release them together and advance the generation.
    pub fn wait(&self) {
        let me = processor::this_task().unwrap_or_else(|| crate::error::fatal("wait() outside a task"));
        let mut st = self.state.lock();
        let my_generation = st.generation;
        st.arrived += 1;

        if st.arrived == st.parties {
            let released: Vec<_> = st.waiters.drain(..).collect();
            st.arrived = 0;
            st.generation += 1;
            drop(st);
            for task in released {
                wake(task);
            }
            return;
        }

        st.waiters.push_back(me);
        drop(st);
        block_current(BlockReason::Other);

        debug_assert!(
            self.state.lock().generation > my_generation,
            "barrier waiter woken before its generation released"
        );
    }

    pub fn parties(&self) -> u32 {
        self.state.lock().parties
    }
}

fn wake(task: TaskId) {
    if let Some(cluster) = processor::this_cluster() {
        cluster.wake_task(task);
    } else {
        crate::error::fatal("wake() outside a cluster");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_barrier_reports_parties() {
        let b = Barrier::new(3);
        assert_eq!(b.parties(), 3);
    }
}
