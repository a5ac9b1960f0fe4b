//! Static-priority ready-queue policy (spec §4.4).
//!
//! A bitmask indexes up to 64 priority bands; `drop` picks the non-empty
//! band of highest priority via find-first-set on the mask. Ties inside a
//! band are broken FIFO.

use std::collections::VecDeque;
use std::time::Duration;

use super::ReadyQueuePolicy;
use crate::task::{Priority, TaskId};

const BANDS: usize = 64;

pub struct StaticPriorityQueue {
    bands: Vec<VecDeque<TaskId>>,
    mask: u64,
}

impl StaticPriorityQueue {
    pub fn new() -> Self {
        StaticPriorityQueue {
            bands: (0..BANDS).map(|_| VecDeque::new()).collect(),
            mask: 0,
        }
    }

    /// Map a priority value onto one of the `BANDS` bands. Priorities below
    /// 0 collapse into band 0; priorities at or above `BANDS` collapse into
    /// the top band, so out-of-range priorities degrade gracefully rather
    /// than panicking.
    fn band_of(priority: Priority) -> usize {
        priority.0.clamp(0, BANDS as i32 - 1) as usize
    }
}

impl Default for StaticPriorityQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadyQueuePolicy for StaticPriorityQueue {
    fn add(&mut self, task: TaskId, priority: Priority, _deadline: Option<Duration>) {
        let band = Self::band_of(priority);
        self.bands[band].push_back(task);
        self.mask |= 1 << band;
    }

    fn drop_next(&mut self) -> Option<TaskId> {
        while self.mask != 0 {
            let band = 63 - self.mask.leading_zeros() as usize;
            if let Some(task) = self.bands[band].pop_front() {
                if self.bands[band].is_empty() {
                    self.mask &= !(1 << band);
                }
                return Some(task);
            }
            self.mask &= !(1 << band);
        }
        None
    }

    fn remove(&mut self, task: TaskId) {
        for (band, q) in self.bands.iter_mut().enumerate() {
            let before = q.len();
            q.retain(|&t| t != task);
            if q.len() != before && q.is_empty() {
                self.mask &= !(1 << band);
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.mask == 0
    }

    fn name(&self) -> &'static str {
        "static-priority"
    }
}
