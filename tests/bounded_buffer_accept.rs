//! Bounded buffer built on the accept protocol (spec §8 scenario 1).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use spin::Mutex as SpinMutex;

use uexec::ready_queue::FifoQueue;
use uexec::{AcceptAlternative, Cluster, MutexObject};

const OP_INSERT: u32 = 1;
const OP_REMOVE: u32 = 2;
const CAPACITY: usize = 2;

struct BoundedBuffer {
    mutex: MutexObject,
    items: SpinMutex<VecDeque<i32>>,
}

impl BoundedBuffer {
    fn new() -> Self {
        BoundedBuffer {
            mutex: MutexObject::new(),
            items: SpinMutex::new(VecDeque::new()),
        }
    }

    fn insert(&self, value: i32) {
        self.mutex.enter(OP_INSERT).expect("insert");
        while self.items.lock().len() == CAPACITY {
            self.mutex.accept(
                &[AcceptAlternative {
                    op_id: OP_REMOVE,
                    when: true,
                }],
                false,
                None,
            );
        }
        let len = {
            let mut items = self.items.lock();
            items.push_back(value);
            items.len()
        };
        assert!(len <= CAPACITY);
        self.mutex.exit();
    }

    fn remove(&self) -> i32 {
        self.mutex.enter(OP_REMOVE).expect("remove");
        while self.items.lock().is_empty() {
            self.mutex.accept(
                &[AcceptAlternative {
                    op_id: OP_INSERT,
                    when: true,
                }],
                false,
                None,
            );
        }
        let value = self.items.lock().pop_front().unwrap();
        self.mutex.exit();
        value
    }

    /// Stand-in for a monitor destructor's `accept` on its own shutdown
    /// operation: marks the object destroying and refuses further entries.
    fn close(&self) {
        self.mutex.accept_destructor();
    }
}

#[test]
fn removes_in_fifo_order_and_closes_exactly_once() {
    let cluster = Cluster::new("bb-test", Box::new(FifoQueue::new()));
    let bb = Arc::new(BoundedBuffer::new());
    static REMOVED: [AtomicU32; 3] = [AtomicU32::new(0), AtomicU32::new(0), AtomicU32::new(0)];
    static REMOVE_COUNT: AtomicU32 = AtomicU32::new(0);
    static CLOSE_COUNT: AtomicU32 = AtomicU32::new(0);

    let producer = bb.clone();
    cluster.spawn_task("producer", Default::default(), Duration::ZERO, 128 * 1024, move || {
        producer.insert(0);
        producer.insert(1);
        producer.insert(2);
    });

    let consumer = bb.clone();
    cluster.spawn_task("consumer", Default::default(), Duration::ZERO, 128 * 1024, move || {
        for _ in 0..3 {
            let v = consumer.remove();
            let idx = REMOVE_COUNT.fetch_add(1, Ordering::SeqCst) as usize;
            REMOVED[idx].store(v as u32, Ordering::SeqCst);
        }
    });

    let mut procs: Vec<_> = (0..2).map(|id| uexec::processor::Processor::spawn(id, cluster.clone())).collect();
    while cluster.task_count() > 0 {
        std::thread::sleep(Duration::from_millis(1));
    }
    for p in &procs {
        p.shutdown();
    }
    for p in &mut procs {
        p.join();
    }

    bb.close();
    CLOSE_COUNT.fetch_add(1, Ordering::SeqCst);

    assert_eq!(REMOVE_COUNT.load(Ordering::SeqCst), 3);
    assert_eq!(
        [
            REMOVED[0].load(Ordering::SeqCst),
            REMOVED[1].load(Ordering::SeqCst),
            REMOVED[2].load(Ordering::SeqCst)
        ],
        [0, 1, 2]
    );
    assert_eq!(CLOSE_COUNT.load(Ordering::SeqCst), 1);

    // Entering a destroying object fails; a task is required to call
    // `enter`, so spawn one more to observe it.
    static SAW_FAILURE: AtomicU32 = AtomicU32::new(0);
    let after_close = bb.clone();
    let mut procs: Vec<_> = (0..1).map(|id| uexec::processor::Processor::spawn(id, cluster.clone())).collect();
    cluster.spawn_task("late-caller", Default::default(), Duration::ZERO, 64 * 1024, move || {
        if after_close.mutex.enter(OP_INSERT).is_err() {
            SAW_FAILURE.fetch_add(1, Ordering::SeqCst);
        }
    });
    while cluster.task_count() > 0 {
        std::thread::sleep(Duration::from_millis(1));
    }
    for p in &procs {
        p.shutdown();
    }
    for p in &mut procs {
        p.join();
    }
    assert_eq!(SAW_FAILURE.load(Ordering::SeqCst), 1);
}
