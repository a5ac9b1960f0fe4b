//! LIFO ready-queue policy: `add` at tail, `drop` at tail (spec §4.4).

use std::collections::VecDeque;
use std::time::Duration;

use super::ReadyQueuePolicy;
use crate::task::{Priority, TaskId};

#[derive(Default)]
pub struct LifoQueue {
    queue: VecDeque<TaskId>,
}

impl LifoQueue {
    pub fn new() -> Self {
        LifoQueue {
            queue: VecDeque::new(),
        }
    }
}

impl ReadyQueuePolicy for LifoQueue {
    fn add(&mut self, task: TaskId, _priority: Priority, _deadline: Option<Duration>) {
        self.queue.push_back(task);
    }

    fn drop_next(&mut self) -> Option<TaskId> {
        self.queue.pop_back()
    }

    fn remove(&mut self, task: TaskId) {
        self.queue.retain(|&t| t != task);
    }

    fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn name(&self) -> &'static str {
        "LIFO"
    }
}
