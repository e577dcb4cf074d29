use thiserror::Error;
use uuid::Uuid;

use crate::scheduler::JobStatus;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Queue is empty")]
    EmptyQueue,

    #[error("Worker {worker} is busy, cannot take job {job}")]
    AssignmentConflict { worker: String, job: Uuid },

    #[error("Notification failed: {0}")]
    Notification(String),

    #[error("Malformed queue backup: {0}")]
    RecoveryDeserialization(#[source] serde_json::Error),

    #[error("Job execution failed: {0}")]
    Execution(String),

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Job name must not be empty")]
    InvalidName,

    #[error("Job {job} cannot change state while {status}")]
    InvalidTransition { job: Uuid, status: JobStatus },

    #[error("Job store is full")]
    StoreFull,

    #[error("Transport channel closed")]
    TransportClosed,

    #[error("Transport channel full")]
    TransportFull,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PoolError>;
