//! Outbound events from the worker pool.
//!
//! Publishing is fire-and-forget from the scheduler's point of view: callers
//! log a failed publish and carry on. Implementations must not wait on the
//! receiving side.

use async_trait::async_trait;

use crate::error::{PoolError, Result};
use crate::scheduler::{JobProgress, JobStatus, QueueEntry};
use crate::transport::{FrameSender, PoolEvent, StopResult};

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Report a job's status and progress.
    async fn notify_progress(&self, progress: JobProgress) -> Result<()>;

    /// Hand a queue backup to the durable side.
    async fn publish_backup(&self, entries: Vec<QueueEntry>) -> Result<()>;

    /// Ask the owning service to re-submit interrupted work.
    async fn request_recovery(&self) -> Result<()>;

    /// Report what a stop request did.
    async fn report_stop(&self, result: StopResult) -> Result<()>;
}

/// Publishes every event over the pool's end of the service link. An event
/// that finds the link full is dropped and reported as a notification failure.
#[derive(Clone)]
pub struct LinkNotifier {
    events: FrameSender<PoolEvent>,
}

impl LinkNotifier {
    pub fn new(events: FrameSender<PoolEvent>) -> Self {
        Self { events }
    }

    fn publish(&self, event: PoolEvent) -> Result<()> {
        self.events
            .try_send(&event)
            .map_err(|e| PoolError::Notification(e.to_string()))
    }
}

#[async_trait]
impl Notifier for LinkNotifier {
    async fn notify_progress(&self, progress: JobProgress) -> Result<()> {
        self.publish(PoolEvent::JobProgress(progress))
    }

    async fn publish_backup(&self, entries: Vec<QueueEntry>) -> Result<()> {
        self.publish(PoolEvent::QueueBackup(entries))
    }

    async fn request_recovery(&self) -> Result<()> {
        self.publish(PoolEvent::RecoveryRequest)
    }

    async fn report_stop(&self, result: StopResult) -> Result<()> {
        self.publish(PoolEvent::StopResult(result))
    }
}

/// Publish a progress event, logging instead of failing.
pub(crate) async fn emit_progress(
    notifier: &dyn Notifier,
    job_id: uuid::Uuid,
    status: JobStatus,
    progress: u8,
) {
    if let Err(e) = notifier
        .notify_progress(JobProgress::new(job_id, status, progress))
        .await
    {
        tracing::error!(
            job_id = %job_id,
            status = %status,
            progress,
            error = %e,
            "Failed to send job progress notification"
        );
    }
}
