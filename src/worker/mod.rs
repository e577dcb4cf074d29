//! Job execution slots.
//!
//! A [`WorkerNode`] holds at most one job at a time. It polls for an assigned
//! job, runs it through a [`JobExecutor`] step by step, and reports progress
//! and the final status through the pool's notifier:
//!
//! - **completed** when every step ran;
//! - **stopped** when the job's own token was cancelled;
//! - **failed** when the executor errored or the whole pool shut down.
//!
//! The default executor, [`SimulatedExecutor`], sleeps through a random
//! duration split into progress steps.

pub mod executor;
pub mod node;

pub use executor::{JobExecutor, SimulatedExecutor, Workload};
pub use node::WorkerNode;
