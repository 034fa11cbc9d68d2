//! Queue module: snapshot store, retry policy and the queue manager.

mod manager;
mod retry;
mod store;

pub use manager::{ItemFilter, MaintenanceSchedule, QueueManager};
pub use retry::RetryPolicy;
pub use store::{QueueStore, StoreLock};
