//!
//! Worker thread pool
//!
//! Drives a set of registered work queues with a bounded number of
//! worker threads. Workers round robin between queues, taking one unit
//! of work at a time; the pool lock covers all queue inspection and
//! dequeueing but is never held across user processing hooks.
//!
use crate::config::{PoolOptions, PoolThreads};
use crate::observer::{ConfigObserver, ConfigRegistry};
use crate::queue::WorkQueue;
use parking_lot::{Condvar, Mutex};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Instant;

struct PoolState {
    stop: bool,
    started: bool,
    pause: u32,
    draining: u32,
    /// Workers currently between dequeue and process-finish
    processing: u32,
    queues: Vec<Arc<dyn WorkQueue>>,
    /// Round robin cursor over `queues`
    last_work_queue: usize,
    threads: HashMap<u64, JoinHandle<()>>,
    /// Retired workers awaiting join
    old_threads: Vec<JoinHandle<()>>,
    /// Target thread count
    num_threads: usize,
    next_worker_id: u64,
}

/// A pool of worker threads
///
/// Work queues registered with the pool remain registered until
/// explicitly removed. The pool must be stopped before it is dropped.
pub struct ThreadPool {
    name: String,
    options: PoolOptions,
    thread_count_key: Option<String>,
    weak_self: Weak<ThreadPool>,
    state: Mutex<PoolState>,
    /// Signaled on new work, shutdown, unpause and resize
    work_cond: Condvar,
    /// Signaled whenever `processing` drops or the pool goes idle
    wait_cond: Condvar,
}

fn same_queue(a: &Arc<dyn WorkQueue>, b: &Arc<dyn WorkQueue>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

impl ThreadPool {
    /// Create a new pool instance
    ///
    /// When `thread_count_key` is given, the pool resizes itself on
    /// configuration changes to that key once subscribed to a
    /// [`ConfigRegistry`].
    pub fn new(options: PoolOptions, thread_count_key: Option<&str>) -> Arc<Self> {
        let num_threads = options.num_threads();
        Arc::new_cyclic(|weak| Self {
            name: options.name.clone(),
            options,
            thread_count_key: thread_count_key.map(str::to_string),
            weak_self: weak.clone(),
            state: Mutex::new(PoolState {
                stop: false,
                started: false,
                pause: 0,
                draining: 0,
                processing: 0,
                queues: Vec::new(),
                last_work_queue: 0,
                threads: HashMap::new(),
                old_threads: Vec::new(),
                num_threads,
                next_worker_id: 0,
            }),
            work_cond: Condvar::new(),
            wait_cond: Condvar::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &PoolOptions {
        &self.options
    }

    /// Subscribe for dynamic thread count updates
    pub fn subscribe(self: &Arc<Self>, registry: &ConfigRegistry) {
        registry.register(self);
    }

    /// Assign a work queue to this pool
    pub fn add_work_queue(&self, wq: Arc<dyn WorkQueue>) {
        self.state.lock().queues.push(wq);
    }

    /// Remove a work queue from this pool
    ///
    /// The queue must be registered.
    pub fn remove_work_queue(&self, wq: &Arc<dyn WorkQueue>) {
        let mut state = self.state.lock();
        let before = state.queues.len();
        state.queues.retain(|q| !same_queue(q, wq));
        assert!(state.queues.len() < before, "queue was not registered");
    }

    /// Number of live worker threads
    pub fn num_threads(&self) -> usize {
        self.state.lock().threads.len()
    }

    /// Target thread count
    pub fn target_threads(&self) -> usize {
        self.state.lock().num_threads
    }

    pub(crate) fn stats_raw(&self) -> (usize, usize, usize) {
        let state = self.state.lock();
        (
            state.threads.len(),
            state.num_threads,
            state.processing as usize,
        )
    }

    /// Wake up workers
    pub fn wake(&self) {
        let _state = self.state.lock();
        self.work_cond.notify_all();
    }

    /// Spawn workers up to the target thread count
    pub fn start(&self) {
        log::debug!("Pool [{}]: starting", self.name);
        let mut state = self.state.lock();
        state.stop = false;
        state.started = true;
        self.start_threads(&mut state);
    }

    /// Stop the pool and join every worker
    ///
    /// With `clear`, items still queued after the join are discarded.
    pub fn stop(&self, clear: bool) {
        log::debug!("Pool [{}]: stopping", self.name);
        let mut state = self.state.lock();
        state.stop = true;
        state.started = false;
        self.work_cond.notify_all();
        Self::join_old_threads(&mut state);
        let handles: Vec<_> = state.threads.drain().map(|(_, handle)| handle).collect();
        drop(state);

        for handle in handles {
            let _ = handle.join();
        }

        let state = self.state.lock();
        if clear {
            for wq in state.queues.iter() {
                wq.clear();
            }
        }
        log::debug!("Pool [{}]: stopped", self.name);
    }

    /// Pause the pool; returns once no worker is processing
    ///
    /// Must be balanced with `unpause` 1:1 to resume.
    pub fn pause(&self) {
        log::debug!("Pool [{}]: pause", self.name);
        let mut state = self.state.lock();
        state.pause += 1;
        while state.processing > 0 {
            self.wait_cond.wait(&mut state);
        }
    }

    /// Pause initiation of new work; in-flight items complete
    pub fn pause_new(&self) {
        log::debug!("Pool [{}]: pause_new", self.name);
        self.state.lock().pause += 1;
    }

    /// Resume work. Must balance each `pause`/`pause_new` call.
    pub fn unpause(&self) {
        log::debug!("Pool [{}]: unpause", self.name);
        let mut state = self.state.lock();
        assert!(state.pause > 0, "unbalanced unpause");
        state.pause -= 1;
        self.work_cond.notify_all();
    }

    /// Wait for outstanding work to complete
    ///
    /// With a queue given, returns once that queue is empty and no
    /// worker is processing; otherwise once every registered queue is
    /// empty and no worker is processing.
    pub fn drain(&self, wq: Option<&Arc<dyn WorkQueue>>) {
        log::debug!("Pool [{}]: draining", self.name);
        let mut state = self.state.lock();
        state.draining += 1;
        loop {
            let busy = state.processing > 0
                || match wq {
                    Some(wq) => !wq.is_empty(),
                    None => state.queues.iter().any(|q| !q.is_empty()),
                };
            if !busy {
                break;
            }
            self.wait_cond.wait(&mut state);
        }
        state.draining -= 1;
        log::debug!("Pool [{}]: drained", self.name);
    }

    /// Change the target thread count
    ///
    /// Missing workers are spawned immediately; surplus workers retire
    /// at their next wakeup. No in-flight item is preempted.
    pub fn set_num_threads(&self, n: usize) {
        let mut state = self.state.lock();
        if n == state.num_threads {
            return;
        }
        log::info!(
            "Pool [{}]: resizing from {} to {} threads",
            self.name,
            state.num_threads,
            n
        );
        state.num_threads = n;
        if state.started && !state.stop {
            self.start_threads(&mut state);
        }
        self.work_cond.notify_all();
    }

    fn start_threads(&self, state: &mut PoolState) {
        while state.threads.len() < state.num_threads {
            let id = state.next_worker_id;
            state.next_worker_id += 1;
            let pool = self
                .weak_self
                .upgrade()
                .expect("pool vanished while starting threads");
            let handle = std::thread::Builder::new()
                .name(format!("{}-{}", self.name, id))
                .spawn(move || pool.worker(id))
                .expect("failed to spawn worker thread");
            state.threads.insert(id, handle);
        }
    }

    fn join_old_threads(state: &mut PoolState) {
        for handle in state.old_threads.drain(..) {
            let _ = handle.join();
        }
    }

    fn worker(self: Arc<Self>, id: u64) {
        log::trace!("Pool [{}]: worker {} start", self.name, id);
        let mut state = self.state.lock();
        loop {
            if state.stop {
                break;
            }

            if state.pause > 0 {
                // A pause or drain caller may be waiting for us to go idle
                self.wait_cond.notify_all();
                self.work_cond.wait(&mut state);
                continue;
            }

            Self::join_old_threads(&mut state);

            if state.threads.len() > state.num_threads {
                log::debug!("Pool [{}]: worker {} retiring", self.name, id);
                if let Some(handle) = state.threads.remove(&id) {
                    state.old_threads.push(handle);
                }
                return;
            }

            let queue_count = state.queues.len();
            let mut did = false;
            for _ in 0..queue_count {
                let index = (state.last_work_queue + 1) % queue_count;
                state.last_work_queue = index;
                let wq = state.queues[index].clone();
                // A non-null dequeue commits this worker to the item;
                // null means the queue raced empty, try the next one.
                if let Some(mut item) = wq.dequeue() {
                    state.processing += 1;
                    drop(state);

                    let started = Instant::now();
                    wq.process(&mut item);
                    wq.process_finish(item);

                    let elapsed = started.elapsed();
                    // Queues without their own intervals inherit the
                    // pool defaults; zero disables the report.
                    let timeout = match wq.timeout_interval() {
                        t if t.is_zero() => self.options.timeout(),
                        t => t,
                    };
                    let suicide = match wq.suicide_interval() {
                        t if t.is_zero() => self.options.suicide_timeout(),
                        t => t,
                    };
                    if !suicide.is_zero() && elapsed > suicide {
                        log::error!(
                            "Pool [{}]: queue [{}] item held worker {} for {:?}, past the suicide timeout {:?}",
                            self.name,
                            wq.name(),
                            id,
                            elapsed,
                            suicide
                        );
                    } else if !timeout.is_zero() && elapsed > timeout {
                        log::warn!(
                            "Pool [{}]: queue [{}] item held worker {} for {:?} (timeout {:?})",
                            self.name,
                            wq.name(),
                            id,
                            elapsed,
                            timeout
                        );
                    }

                    state = self.state.lock();
                    state.processing -= 1;
                    self.wait_cond.notify_all();
                    did = true;
                    break;
                }
            }
            if did {
                continue;
            }

            log::trace!("Pool [{}]: worker {} waiting", self.name, id);
            if state.draining > 0 {
                self.wait_cond.notify_all();
            }
            self.work_cond.wait(&mut state);
        }
        log::trace!("Pool [{}]: worker {} exit", self.name, id);
    }
}

impl ConfigObserver for ThreadPool {
    fn tracked_keys(&self) -> Vec<String> {
        self.thread_count_key.iter().cloned().collect()
    }

    fn handle_config_change(&self, values: &Value, changed: &HashSet<String>) {
        let Some(key) = self.thread_count_key.as_deref() else {
            return;
        };
        if !changed.contains(key) {
            return;
        }
        let Some(n) = values.get(key).and_then(Value::as_u64) else {
            log::warn!("Pool [{}]: non-integer value for {}", self.name, key);
            return;
        };
        match PoolThreads::try_from(n as usize) {
            Ok(threads) => self.set_num_threads(threads.as_usize()),
            Err(err) => log::warn!("Pool [{}]: {}", self.name, err),
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        assert!(
            state.threads.is_empty(),
            "thread pool [{}] dropped while running",
            self.name
        );
    }
}

// =======================
// Tests
// =======================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::WorkItem;
    use crate::tests::{options, setup, wait_until};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingQueue {
        name: String,
        cleared: AtomicUsize,
        items: Mutex<VecDeque<u32>>,
    }

    impl CountingQueue {
        fn new(name: &str, items: impl IntoIterator<Item = u32>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                cleared: AtomicUsize::new(0),
                items: Mutex::new(items.into_iter().collect()),
            })
        }
    }

    impl WorkQueue for CountingQueue {
        fn name(&self) -> &str {
            &self.name
        }
        fn timeout_interval(&self) -> Duration {
            Duration::ZERO
        }
        fn suicide_interval(&self) -> Duration {
            Duration::ZERO
        }
        fn clear(&self) {
            self.cleared.fetch_add(1, Ordering::SeqCst);
            self.items.lock().clear();
        }
        fn is_empty(&self) -> bool {
            self.items.lock().is_empty()
        }
        fn dequeue(&self) -> Option<WorkItem> {
            self.items.lock().pop_front().map(WorkItem::new)
        }
        fn process(&self, _item: &mut WorkItem) {}
        fn process_finish(&self, _item: WorkItem) {}
    }

    #[test]
    fn test_stop_idempotent() {
        setup();

        let pool = ThreadPool::new(options("tp-stop", 2), None);
        let q = CountingQueue::new("count", [1, 2, 3]);
        pool.add_work_queue(q.clone());

        // Not started: stop(true) joins nothing and clears once
        pool.stop(true);
        assert_eq!(q.cleared.load(Ordering::SeqCst), 1);
        assert!(q.is_empty());

        pool.stop(true);
        assert_eq!(q.cleared.load(Ordering::SeqCst), 2);

        // Start/stop cycle
        pool.start();
        assert_eq!(pool.num_threads(), 2);
        pool.stop(false);
        assert_eq!(pool.num_threads(), 0);
        pool.start();
        pool.stop(true);
        assert_eq!(pool.num_threads(), 0);
    }

    #[test]
    fn test_remove_work_queue() {
        setup();

        let pool = ThreadPool::new(options("tp-rm", 1), None);
        let q = CountingQueue::new("count", []);
        let wq: Arc<dyn WorkQueue> = q;
        pool.add_work_queue(wq.clone());
        pool.remove_work_queue(&wq);
    }

    #[test]
    #[should_panic(expected = "queue was not registered")]
    fn test_remove_unregistered_queue() {
        setup();

        let pool = ThreadPool::new(options("tp-rm2", 1), None);
        let wq: Arc<dyn WorkQueue> = CountingQueue::new("count", []);
        pool.remove_work_queue(&wq);
    }

    #[test]
    fn test_resize_from_config() {
        setup();

        let registry = ConfigRegistry::with_values(json!({ "tp_threads": 2 }));
        let pool = ThreadPool::new(options("tp-resize", 2), Some("tp_threads"));
        pool.subscribe(&registry);
        pool.start();
        assert_eq!(pool.num_threads(), 2);

        // Grow: workers are spawned from the change handler
        registry.apply(&json!({ "tp_threads": 4 }));
        assert_eq!(pool.target_threads(), 4);
        assert_eq!(pool.num_threads(), 4);

        // Shrink: surplus workers retire at their next wakeup
        registry.apply(&json!({ "tp_threads": 1 }));
        assert_eq!(pool.target_threads(), 1);
        wait_until("workers to retire", || pool.num_threads() == 1);

        // Same value again: no-op
        registry.apply(&json!({ "tp_threads": 1 }));
        assert_eq!(pool.target_threads(), 1);

        // Out of range or non-integer values are ignored
        registry.apply(&json!({ "tp_threads": 0 }));
        assert_eq!(pool.target_threads(), 1);
        registry.apply(&json!({ "tp_threads": "many" }));
        assert_eq!(pool.target_threads(), 1);

        pool.stop(false);
    }

    #[test]
    fn test_resize_before_start() {
        setup();

        let pool = ThreadPool::new(options("tp-early", 1), None);
        // No workers yet: only the target moves
        pool.set_num_threads(3);
        assert_eq!(pool.num_threads(), 0);
        assert_eq!(pool.target_threads(), 3);

        pool.start();
        assert_eq!(pool.num_threads(), 3);
        pool.stop(false);
    }
}
