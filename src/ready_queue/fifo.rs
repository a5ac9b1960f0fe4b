//! FIFO ready-queue policy: `add` at tail, `drop` at head (spec §4.4).

use std::collections::VecDeque;
use std::time::Duration;

use super::ReadyQueuePolicy;
use crate::task::{Priority, TaskId};

#[derive(Default)]
pub struct FifoQueue {
    queue: VecDeque<TaskId>,
}

impl FifoQueue {
    pub fn new() -> Self {
        FifoQueue {
            queue: VecDeque::new(),
        }
    }
}

impl ReadyQueuePolicy for FifoQueue {
    fn add(&mut self, task: TaskId, _priority: Priority, _deadline: Option<Duration>) {
        self.queue.push_back(task);
    }

    fn drop_next(&mut self) -> Option<TaskId> {
        self.queue.pop_front()
    }

    fn remove(&mut self, task: TaskId) {
        self.queue.retain(|&t| t != task);
    }

    fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn name(&self) -> &'static str {
        "FIFO"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let mut q = FifoQueue::new();
        q.add(TaskId(1), Priority::NORMAL, None);
        q.add(TaskId(2), Priority::NORMAL, None);
        q.add(TaskId(3), Priority::NORMAL, None);
        assert_eq!(q.drop_next(), Some(TaskId(1)));
        assert_eq!(q.drop_next(), Some(TaskId(2)));
        assert_eq!(q.drop_next(), Some(TaskId(3)));
        assert_eq!(q.drop_next(), None);
    }
}
