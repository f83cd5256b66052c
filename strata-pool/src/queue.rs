//!
//! Work queues
//!
//! A work queue is a source of work items registered with a [`ThreadPool`].
//! The pool drives queues through the type erased [`WorkQueue`] trait; the
//! concrete queues box their items on dequeue and downcast them back inside
//! their processing hooks, so item types never leak into the pool.
//!
use parking_lot::Mutex;
use std::any::Any;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::pool::ThreadPool;

/// An opaque unit of work in flight between a queue and the pool
pub struct WorkItem(Box<dyn Any + Send>);

impl WorkItem {
    pub fn new<T: Send + 'static>(item: T) -> Self {
        WorkItem(Box::new(item))
    }

    pub fn downcast_mut<T: Send + 'static>(&mut self) -> Option<&mut T> {
        self.0.downcast_mut()
    }

    pub fn downcast<T: Send + 'static>(self) -> Option<T> {
        self.0.downcast().ok().map(|item| *item)
    }
}

/// Type erased queue interface driven by the pool
///
/// A worker takes one unit of work with `dequeue`, then runs `process`
/// followed by `process_finish` outside the pool lock.
pub trait WorkQueue: Send + Sync {
    fn name(&self) -> &str;

    /// Soft per-item timeout; an item holding a worker longer than this
    /// is reported in the log. Zero inherits the pool default.
    fn timeout_interval(&self) -> Duration;

    /// Hard per-item timeout; an item holding a worker longer than this
    /// means the process is wedged. Exposed for an external heartbeat,
    /// the pool itself never cancels work. Zero inherits the pool
    /// default.
    fn suicide_interval(&self) -> Duration;

    /// Discard all queued items
    fn clear(&self);

    fn is_empty(&self) -> bool;

    /// Take one unit of work
    ///
    /// `None` means there is nothing to do right now, even if `is_empty`
    /// returned false a moment ago: another consumer may have raced us.
    fn dequeue(&self) -> Option<WorkItem>;

    fn process(&self, item: &mut WorkItem);

    fn process_finish(&self, item: WorkItem);
}

/// Processing hooks for a [`TaskQueue`]
pub trait QueueHandler<T>: Send + Sync {
    fn process(&self, item: &mut T);
    fn process_finish(&self, _item: T) {}
}

/// Processing hooks for a [`BatchQueue`]
pub trait BatchHandler<T>: Send + Sync {
    fn process(&self, batch: &mut Vec<T>);
    fn process_finish(&self, _batch: Vec<T>) {}
}

/// Single item FIFO work queue
///
/// Owns its storage; `queue` pushes an item and wakes the pool.
pub struct TaskQueue<T, H> {
    name: String,
    timeout: Duration,
    suicide_timeout: Duration,
    pool: Weak<ThreadPool>,
    weak_self: Weak<Self>,
    items: Mutex<VecDeque<T>>,
    handler: H,
}

impl<T, H> TaskQueue<T, H>
where
    T: Send + 'static,
    H: QueueHandler<T> + 'static,
{
    /// Create the queue and register it with `pool`
    pub fn new(
        name: &str,
        timeout: Duration,
        suicide_timeout: Duration,
        pool: &Arc<ThreadPool>,
        handler: H,
    ) -> Arc<Self> {
        let queue = Arc::new_cyclic(|weak| Self {
            name: name.to_string(),
            timeout,
            suicide_timeout,
            pool: Arc::downgrade(pool),
            weak_self: weak.clone(),
            items: Mutex::new(VecDeque::new()),
            handler,
        });
        pool.add_work_queue(queue.clone());
        queue
    }

    /// Push an item and wake a worker
    pub fn queue(&self, item: T) {
        self.items.lock().push_back(item);
        if let Some(pool) = self.pool.upgrade() {
            pool.wake();
        }
    }

    /// Number of queued items
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Wait until this queue is empty and none of its items are processing
    pub fn drain(&self) {
        if let (Some(pool), Some(me)) = (self.pool.upgrade(), self.weak_self.upgrade()) {
            let me: Arc<dyn WorkQueue> = me;
            pool.drain(Some(&me));
        }
    }
}

impl<T, H> WorkQueue for TaskQueue<T, H>
where
    T: Send + 'static,
    H: QueueHandler<T> + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout_interval(&self) -> Duration {
        self.timeout
    }

    fn suicide_interval(&self) -> Duration {
        self.suicide_timeout
    }

    fn clear(&self) {
        self.items.lock().clear();
    }

    fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    fn dequeue(&self) -> Option<WorkItem> {
        self.items.lock().pop_front().map(WorkItem::new)
    }

    fn process(&self, item: &mut WorkItem) {
        let item = item.downcast_mut::<T>().expect("foreign work item");
        self.handler.process(item);
    }

    fn process_finish(&self, item: WorkItem) {
        let item = item.downcast::<T>().expect("foreign work item");
        self.handler.process_finish(item);
    }
}

/// Batching FIFO work queue
///
/// Dequeue hands a worker an owned, non empty batch of up to `max_batch`
/// items (0 takes everything pending). The pool owns the batch container
/// for the duration of processing.
pub struct BatchQueue<T, H> {
    name: String,
    timeout: Duration,
    suicide_timeout: Duration,
    max_batch: usize,
    pool: Weak<ThreadPool>,
    weak_self: Weak<Self>,
    items: Mutex<VecDeque<T>>,
    handler: H,
}

impl<T, H> BatchQueue<T, H>
where
    T: Send + 'static,
    H: BatchHandler<T> + 'static,
{
    /// Create the queue and register it with `pool`
    pub fn new(
        name: &str,
        timeout: Duration,
        suicide_timeout: Duration,
        max_batch: usize,
        pool: &Arc<ThreadPool>,
        handler: H,
    ) -> Arc<Self> {
        let queue = Arc::new_cyclic(|weak| Self {
            name: name.to_string(),
            timeout,
            suicide_timeout,
            max_batch,
            pool: Arc::downgrade(pool),
            weak_self: weak.clone(),
            items: Mutex::new(VecDeque::new()),
            handler,
        });
        pool.add_work_queue(queue.clone());
        queue
    }

    /// Push an item and wake a worker
    pub fn queue(&self, item: T) {
        self.items.lock().push_back(item);
        if let Some(pool) = self.pool.upgrade() {
            pool.wake();
        }
    }

    /// Number of queued items
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Wait until this queue is empty and none of its items are processing
    pub fn drain(&self) {
        if let (Some(pool), Some(me)) = (self.pool.upgrade(), self.weak_self.upgrade()) {
            let me: Arc<dyn WorkQueue> = me;
            pool.drain(Some(&me));
        }
    }
}

impl<T, H> WorkQueue for BatchQueue<T, H>
where
    T: Send + 'static,
    H: BatchHandler<T> + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout_interval(&self) -> Duration {
        self.timeout
    }

    fn suicide_interval(&self) -> Duration {
        self.suicide_timeout
    }

    fn clear(&self) {
        self.items.lock().clear();
    }

    fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    fn dequeue(&self) -> Option<WorkItem> {
        let mut items = self.items.lock();
        let take = if self.max_batch == 0 {
            items.len()
        } else {
            usize::min(self.max_batch, items.len())
        };
        let batch: Vec<T> = items.drain(..take).collect();
        // A racing consumer may have emptied the queue since the pool
        // looked at it; report the queue as idle for this round.
        if batch.is_empty() {
            None
        } else {
            Some(WorkItem::new(batch))
        }
    }

    fn process(&self, item: &mut WorkItem) {
        let batch = item.downcast_mut::<Vec<T>>().expect("foreign work item");
        self.handler.process(batch);
    }

    fn process_finish(&self, item: WorkItem) {
        let batch = item.downcast::<Vec<T>>().expect("foreign work item");
        self.handler.process_finish(batch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_work_item_downcast() {
        let mut item = WorkItem::new(41u32);
        *item.downcast_mut::<u32>().unwrap() += 1;
        assert_eq!(item.downcast::<u32>(), Some(42));
    }

    #[test]
    fn test_work_item_foreign_type() {
        let item = WorkItem::new("not a number");
        assert_eq!(item.downcast::<u32>(), None);
    }
}
