//! Queueing, sizing, and dispatch.
//!
//! - [`job`]: job records, priorities, statuses, and queue entries
//! - [`queue`]: thread-safe priority queue with lazy removal
//! - [`autoscaler`]: ratio-driven worker count decisions
//! - [`pool`]: the worker pool tying queue, workers, and autoscaler together

pub mod autoscaler;
pub mod job;
pub mod pool;
pub mod queue;
pub mod signal;

pub use autoscaler::{Autoscaler, ScaleDecision};
pub use job::{Job, JobPriority, JobProgress, JobStatus, QueueEntry};
pub use pool::WorkerPool;
pub use queue::{PriorityJobQueue, QueueSnapshot};
