use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::errors::Error;

#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
#[serde(try_from = "usize")]
pub(crate) struct BoundedUsize<const MIN: usize, const MAX: usize = { usize::MAX }>(usize);

impl<const MIN: usize, const MAX: usize> fmt::Display for BoundedUsize<MIN, MAX> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<const MIN: usize, const MAX: usize> TryFrom<usize> for BoundedUsize<MIN, MAX> {
    type Error = Error;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        if (MIN..=MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(Error::InvalidConfigValue(format!(
                "{} out of range {}..{}",
                value, MIN, MAX
            )))
        }
    }
}

impl<const MIN: usize, const MAX: usize> BoundedUsize<MIN, MAX> {
    pub fn as_usize(&self) -> usize {
        self.0
    }
}

const MAX_POOL_THREADS: usize = 256;
const DEFAULT_TIMEOUT_SEC: u64 = 30;
const DEFAULT_SUICIDE_TIMEOUT_SEC: u64 = 120;

pub(crate) type PoolThreads = BoundedUsize<1, MAX_POOL_THREADS>;

/// Thread pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolOptions {
    /// Name of the pool instance
    pub name: String,
    /// Number of worker threads
    pub(crate) num_threads: PoolThreads,
    /// Soft per-item timeout in seconds. A work item held longer
    /// than this is reported in the log.
    pub timeout: u64,
    /// Hard per-item timeout in seconds. An item held longer than
    /// this means the worker is wedged; the value is exposed to an
    /// external heartbeat which may abort the process.
    pub suicide_timeout: u64,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            name: "".to_string(),
            num_threads: BoundedUsize(1),
            timeout: DEFAULT_TIMEOUT_SEC,
            suicide_timeout: DEFAULT_SUICIDE_TIMEOUT_SEC,
        }
    }
}

impl PoolOptions {
    /// Create options with an explicit thread count
    pub fn new(name: &str, num_threads: usize) -> Result<Self, Error> {
        Ok(Self {
            name: name.to_string(),
            num_threads: num_threads.try_into()?,
            ..Default::default()
        })
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads.as_usize()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn suicide_timeout(&self) -> Duration {
        Duration::from_secs(self.suicide_timeout)
    }
}
