//!
//! Get stats for pool
//!
use crate::pool::ThreadPool;
use std::ops::Deref;
use std::time::{Instant, SystemTime};

pub struct Stats {
    threads: usize,
    target: usize,
    processing: usize,
    instant: Instant,
}

impl Stats {
    pub fn new<T: Deref<Target = ThreadPool>>(pool: T) -> Self {
        let stats = pool.stats_raw();
        Self {
            threads: stats.0,
            target: stats.1,
            processing: stats.2,
            instant: Instant::now(),
        }
    }

    /// Number of live worker threads
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Target thread count
    pub fn target_threads(&self) -> usize {
        self.target
    }

    /// Workers currently running a work item
    pub fn busy_workers(&self) -> usize {
        self.processing
    }

    /// Workers waiting for work
    pub fn idle_workers(&self) -> usize {
        self.threads.saturating_sub(self.processing)
    }

    /// Returns the measurement of worker activity as
    /// `busy / (busy + idle)`.
    pub fn activity(&self) -> Option<f64> {
        if self.threads > 0 {
            Some(self.processing as f64 / self.threads as f64)
        } else {
            None
        }
    }

    /// Return a system time timestamp relative
    /// to the instant of the measurement
    pub fn timestamp(&self) -> Option<SystemTime> {
        SystemTime::now().checked_sub(self.instant.elapsed())
    }
}
