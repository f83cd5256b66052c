//!
//! Unit tests
//!
use env_logger;
use std::sync::Once;

static INIT: Once = Once::new();

pub fn setup() {
    // Init setup
    INIT.call_once(|| {
        env_logger::init();
    });
}

use crate::config::PoolOptions;
use crate::pool::ThreadPool;
use crate::queue::{BatchHandler, BatchQueue, QueueHandler, TaskQueue};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub fn options(name: &str, num_threads: usize) -> PoolOptions {
    PoolOptions::new(name, num_threads).unwrap()
}

/// Poll until `cond` holds, panic after 5 seconds
pub fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// Handler recording processed items and counting finishes
pub struct Recorder {
    tag: &'static str,
    log: Arc<Mutex<Vec<String>>>,
    finished: Arc<AtomicUsize>,
}

impl Recorder {
    pub fn new(tag: &'static str, log: &Arc<Mutex<Vec<String>>>, finished: &Arc<AtomicUsize>) -> Self {
        Self {
            tag,
            log: log.clone(),
            finished: finished.clone(),
        }
    }
}

impl<T: fmt::Display + Send> QueueHandler<T> for Recorder {
    fn process(&self, item: &mut T) {
        self.log.lock().push(format!("{}:{}", self.tag, item));
    }
    fn process_finish(&self, _item: T) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }
}

/// Handler parking every item on a shared gate
pub struct Blocker {
    pub gate: Arc<(Mutex<bool>, Condvar)>,
    pub started: Arc<AtomicUsize>,
    pub finished: Arc<AtomicUsize>,
}

impl Blocker {
    pub fn new() -> Self {
        Self {
            gate: Arc::new((Mutex::new(false), Condvar::new())),
            started: Arc::new(AtomicUsize::new(0)),
            finished: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn open_gate(gate: &Arc<(Mutex<bool>, Condvar)>) {
        let (lock, cvar) = &**gate;
        *lock.lock() = true;
        cvar.notify_all();
    }
}

impl QueueHandler<u32> for Blocker {
    fn process(&self, _item: &mut u32) {
        self.started.fetch_add(1, Ordering::SeqCst);
        let (lock, cvar) = &*self.gate;
        let mut open = lock.lock();
        while !*open {
            cvar.wait(&mut open);
        }
    }
    fn process_finish(&self, _item: u32) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }
}

//
// Scenarios
//

#[test]
fn test_pool_processes_all_queues() {
    setup();

    let pool = ThreadPool::new(options("tp-all", 2), None);
    let log = Arc::new(Mutex::new(Vec::new()));
    let finished_a = Arc::new(AtomicUsize::new(0));
    let finished_b = Arc::new(AtomicUsize::new(0));

    let qa = TaskQueue::new(
        "a",
        Duration::ZERO,
        Duration::ZERO,
        &pool,
        Recorder::new("a", &log, &finished_a),
    );
    let qb = TaskQueue::new(
        "b",
        Duration::ZERO,
        Duration::ZERO,
        &pool,
        Recorder::new("b", &log, &finished_b),
    );

    for i in 1u32..=3 {
        qa.queue(i);
    }
    for s in ["x", "y"] {
        qb.queue(s);
    }

    pool.start();
    pool.drain(None);

    // Every item processed exactly once
    let mut seen = log.lock().clone();
    seen.sort();
    assert_eq!(seen, vec!["a:1", "a:2", "a:3", "b:x", "b:y"]);
    assert_eq!(finished_a.load(Ordering::SeqCst), 3);
    assert_eq!(finished_b.load(Ordering::SeqCst), 2);
    assert_eq!(qa.len(), 0);
    assert_eq!(qb.len(), 0);

    pool.stop(false);
}

#[test]
fn test_round_robin_order() {
    setup();

    // One worker: the dequeue order is fully deterministic and must
    // alternate between the queues, starting after the cursor.
    let pool = ThreadPool::new(options("tp-rr", 1), None);
    let log = Arc::new(Mutex::new(Vec::new()));
    let finished = Arc::new(AtomicUsize::new(0));

    let qa = TaskQueue::new(
        "a",
        Duration::ZERO,
        Duration::ZERO,
        &pool,
        Recorder::new("a", &log, &finished),
    );
    let qb = TaskQueue::new(
        "b",
        Duration::ZERO,
        Duration::ZERO,
        &pool,
        Recorder::new("b", &log, &finished),
    );

    for i in 1u32..=3 {
        qa.queue(i);
    }
    for s in ["x", "y"] {
        qb.queue(s);
    }

    pool.start();
    pool.drain(None);

    // Cursor starts at 0, so the first queue visited is index 1
    assert_eq!(
        *log.lock(),
        vec!["b:x", "a:1", "b:y", "a:2", "a:3"]
    );

    pool.stop(false);
}

#[test]
fn test_pause_waits_for_inflight_item() {
    setup();

    let pool = ThreadPool::new(options("tp-pause", 1), None);
    let blocker = Blocker::new();
    let gate = blocker.gate.clone();
    let started = blocker.started.clone();
    let finished = blocker.finished.clone();

    let q = TaskQueue::new("blk", Duration::ZERO, Duration::ZERO, &pool, blocker);

    q.queue(1);
    pool.start();
    wait_until("item to start", || started.load(Ordering::SeqCst) == 1);

    let pause_returned = Arc::new(AtomicUsize::new(0));
    let pauser = {
        let pool = pool.clone();
        let pause_returned = pause_returned.clone();
        std::thread::spawn(move || {
            pool.pause();
            pause_returned.fetch_add(1, Ordering::SeqCst);
        })
    };

    // The item is parked on the gate: pause must not return yet
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(pause_returned.load(Ordering::SeqCst), 0);

    Blocker::open_gate(&gate);
    pauser.join().unwrap();
    // pause returned only after the in-flight item finished
    assert_eq!(finished.load(Ordering::SeqCst), 1);

    // New items are not picked up while paused
    q.queue(2);
    q.queue(3);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(started.load(Ordering::SeqCst), 1);

    pool.unpause();
    pool.drain(None);
    assert_eq!(finished.load(Ordering::SeqCst), 3);

    pool.stop(false);
}

#[test]
fn test_pause_new_does_not_block() {
    setup();

    let pool = ThreadPool::new(options("tp-pausenew", 1), None);
    let blocker = Blocker::new();
    let gate = blocker.gate.clone();
    let started = blocker.started.clone();
    let finished = blocker.finished.clone();

    let q = TaskQueue::new("blk", Duration::ZERO, Duration::ZERO, &pool, blocker);

    q.queue(1);
    pool.start();
    wait_until("item to start", || started.load(Ordering::SeqCst) == 1);

    // Returns immediately even though an item is in flight
    pool.pause_new();

    Blocker::open_gate(&gate);
    wait_until("item to finish", || finished.load(Ordering::SeqCst) == 1);

    // Still paused: a new item must not start
    q.queue(2);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(started.load(Ordering::SeqCst), 1);

    pool.unpause();
    pool.drain(None);
    assert_eq!(finished.load(Ordering::SeqCst), 2);

    pool.stop(false);
}

#[test]
fn test_drain_single_queue() {
    setup();

    let pool = ThreadPool::new(options("tp-drainq", 2), None);
    let log = Arc::new(Mutex::new(Vec::new()));
    let finished = Arc::new(AtomicUsize::new(0));

    let q = TaskQueue::new(
        "only",
        Duration::ZERO,
        Duration::ZERO,
        &pool,
        Recorder::new("q", &log, &finished),
    );

    pool.start();
    for i in 0u32..16 {
        q.queue(i);
    }
    q.drain();

    assert_eq!(q.len(), 0);
    assert_eq!(finished.load(Ordering::SeqCst), 16);

    pool.stop(false);
}

#[test]
fn test_batch_queue_takes_pending_items() {
    setup();

    struct Batches {
        sizes: Arc<Mutex<Vec<usize>>>,
    }
    impl BatchHandler<u32> for Batches {
        fn process(&self, batch: &mut Vec<u32>) {
            self.sizes.lock().push(batch.len());
        }
    }

    let sizes = Arc::new(Mutex::new(Vec::new()));
    let pool = ThreadPool::new(options("tp-batch", 1), None);
    let q = BatchQueue::new(
        "batch",
        Duration::ZERO,
        Duration::ZERO,
        2,
        &pool,
        Batches { sizes: sizes.clone() },
    );

    for i in 0u32..5 {
        q.queue(i);
    }
    pool.start();
    pool.drain(None);

    // One worker, max_batch 2: batches of 2, 2 and 1
    assert_eq!(*sizes.lock(), vec![2, 2, 1]);

    pool.stop(false);
}
