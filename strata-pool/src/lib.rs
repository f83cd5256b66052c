pub mod config;
pub mod errors;
pub mod observer;
pub mod pool;
pub mod queue;
pub mod stats;

pub(crate) mod utils;

// reexport
pub use config::PoolOptions;
pub use errors::{Error, Result};
pub use observer::{ConfigObserver, ConfigRegistry};
pub use pool::ThreadPool;
pub use queue::{BatchHandler, BatchQueue, QueueHandler, TaskQueue, WorkItem, WorkQueue};

#[cfg(test)]
mod tests;
