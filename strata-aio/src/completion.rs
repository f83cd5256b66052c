//!
//! Completion handles
//!
use parking_lot::Mutex;
use std::sync::Arc;

type Callback = Box<dyn FnOnce(i32) + Send>;

/// A reference counted, one shot completion.
///
/// The submitter and the store each hold a clone; the first `complete`
/// delivers the result, later calls are ignored. `release` drops the
/// callback without firing it.
#[derive(Clone)]
pub struct Completion {
    inner: Arc<Mutex<Option<Callback>>>,
}

impl Completion {
    pub fn new(callback: impl FnOnce(i32) + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(Box::new(callback)))),
        }
    }

    /// Deliver the result code
    pub fn complete(&self, r: i32) {
        let callback = self.inner.lock().take();
        if let Some(callback) = callback {
            callback(r);
        }
    }

    /// Drop the callback without delivering a result
    pub fn release(&self) {
        self.inner.lock().take();
    }

    /// True once the callback has been delivered or released
    pub fn is_consumed(&self) -> bool {
        self.inner.lock().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

    #[test]
    fn test_completion_fires_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let result = Arc::new(AtomicI32::new(0));
        let completion = {
            let calls = calls.clone();
            let result = result.clone();
            Completion::new(move |r| {
                calls.fetch_add(1, Ordering::SeqCst);
                result.store(r, Ordering::SeqCst);
            })
        };

        let clone = completion.clone();
        clone.complete(42);
        completion.complete(7);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.load(Ordering::SeqCst), 42);
        assert!(completion.is_consumed());
    }

    #[test]
    fn test_completion_release() {
        let calls = Arc::new(AtomicUsize::new(0));
        let completion = {
            let calls = calls.clone();
            Completion::new(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };
        completion.release();
        completion.complete(1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
