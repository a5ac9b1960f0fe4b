//! Deadline-monotonic ready-queue policy (spec §4.4): tasks sorted by
//! shorter relative deadline first, ties broken by registration order.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

use super::ReadyQueuePolicy;
use crate::task::{Priority, TaskId};

struct Entry {
    deadline: Duration,
    sequence: u64,
    task: TaskId,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.sequence == other.sequence
    }
}
impl Eq for Entry {}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; we want the shortest deadline (and, on
        // a tie, the earliest registration) to compare greatest.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub struct DeadlineMonotonicQueue {
    heap: BinaryHeap<Entry>,
    next_sequence: u64,
}

impl DeadlineMonotonicQueue {
    pub fn new() -> Self {
        DeadlineMonotonicQueue {
            heap: BinaryHeap::new(),
            next_sequence: 0,
        }
    }
}

impl Default for DeadlineMonotonicQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadyQueuePolicy for DeadlineMonotonicQueue {
    fn add(&mut self, task: TaskId, _priority: Priority, deadline: Option<Duration>) {
        let deadline = deadline.unwrap_or(Duration::MAX);
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(Entry {
            deadline,
            sequence,
            task,
        });
    }

    fn drop_next(&mut self) -> Option<TaskId> {
        self.heap.pop().map(|e| e.task)
    }

    fn remove(&mut self, task: TaskId) {
        if self.heap.iter().any(|e| e.task == task) {
            let remaining: Vec<Entry> = self
                .heap
                .drain()
                .filter(|e| e.task != task)
                .collect();
            self.heap.extend(remaining);
        }
    }

    fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    fn name(&self) -> &'static str {
        "deadline-monotonic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shorter_deadline_first_ties_by_registration() {
        let mut q = DeadlineMonotonicQueue::new();
        q.add(TaskId(1), Priority::NORMAL, Some(Duration::from_millis(50)));
        q.add(TaskId(2), Priority::NORMAL, Some(Duration::from_millis(10)));
        q.add(TaskId(3), Priority::NORMAL, Some(Duration::from_millis(10)));
        assert_eq!(q.drop_next(), Some(TaskId(2)));
        assert_eq!(q.drop_next(), Some(TaskId(3)));
        assert_eq!(q.drop_next(), Some(TaskId(1)));
    }
}
