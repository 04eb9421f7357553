//! Publishing pipeline: the per-event task, the single-worker dispatch queue
//! and the counters they update.

pub mod dispatch;
pub mod stats;
pub mod task;

pub use dispatch::{DispatchQueue, PublishWorker, WorkerHandle};
pub use stats::{PublishStats, StatsSnapshot};
pub use task::{JSON_CONTENT_TYPE, PublishTask, compose_correlation_id};
