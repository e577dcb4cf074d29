use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{PoolError, Result};
use crate::notifier::{emit_progress, Notifier};
use crate::scheduler::signal::WorkSignal;
use crate::scheduler::{JobStatus, QueueEntry};
use crate::worker::executor::JobExecutor;

/// The job a worker currently holds.
struct ActiveJob {
    entry: QueueEntry,
    progress: u8,
    cancel: CancellationToken,
}

/// How an execution ended, before it is classified for reporting.
enum Execution {
    Completed,
    Cancelled,
}

/// A single execution slot: holds at most one job and runs it to an end
/// state.
pub struct WorkerNode {
    id: String,
    slot: Mutex<Option<ActiveJob>>,
    /// Shared pool-wide shutdown scope.
    pool_token: CancellationToken,
    /// Child of `pool_token`; cancelled alone when the worker is retired.
    node_token: CancellationToken,
    notifier: Arc<dyn Notifier>,
    executor: Arc<dyn JobExecutor>,
    freed: WorkSignal,
    poll_interval: Duration,
}

impl WorkerNode {
    pub fn new(
        pool_token: &CancellationToken,
        notifier: Arc<dyn Notifier>,
        executor: Arc<dyn JobExecutor>,
        freed: WorkSignal,
        poll_interval: Duration,
    ) -> Self {
        let id = format!("WORKER_{}", Uuid::new_v4());
        tracing::debug!(worker_id = %id, "Worker created");
        Self {
            id,
            slot: Mutex::new(None),
            pool_token: pool_token.clone(),
            node_token: pool_token.child_token(),
            notifier,
            executor,
            freed,
            poll_interval,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_idle(&self) -> bool {
        self.slot.lock().is_none()
    }

    pub fn current_job(&self) -> Option<Uuid> {
        self.slot.lock().as_ref().map(|active| active.entry.job_id)
    }

    /// Last progress reported for the held job.
    pub fn progress(&self) -> Option<u8> {
        self.slot.lock().as_ref().map(|active| active.progress)
    }

    pub fn is_retired(&self) -> bool {
        self.node_token.is_cancelled()
    }

    /// Hand a job to this worker. Fails if it already holds one.
    pub fn assign_job(&self, entry: QueueEntry) -> Result<()> {
        let mut slot = self.slot.lock();
        if let Some(active) = slot.as_ref() {
            tracing::warn!(
                worker_id = %self.id,
                job_id = %entry.job_id,
                current_job = %active.entry.job_id,
                "Worker already holds a job, rejecting assignment"
            );
            return Err(PoolError::AssignmentConflict {
                worker: self.id.clone(),
                job: entry.job_id,
            });
        }

        *slot = Some(ActiveJob {
            entry,
            progress: 0,
            cancel: self.node_token.child_token(),
        });
        tracing::debug!(worker_id = %self.id, job_id = %entry.job_id, "Job assigned");
        Ok(())
    }

    /// Cancel the held job. Returns false when the worker is idle.
    pub fn stop_job(&self) -> bool {
        match self.slot.lock().as_ref() {
            Some(active) => {
                active.cancel.cancel();
                tracing::debug!(worker_id = %self.id, job_id = %active.entry.job_id, "Stop requested");
                true
            }
            None => {
                tracing::warn!(worker_id = %self.id, "Stop requested but worker holds no job");
                false
            }
        }
    }

    /// Stop the worker's loop. Only called on idle workers.
    pub fn retire(&self) {
        tracing::debug!(worker_id = %self.id, "Worker retired");
        self.node_token.cancel();
    }

    /// Poll for an assigned job until the worker is retired or the pool
    /// shuts down.
    pub async fn run(self: Arc<Self>) {
        loop {
            tokio::select! {
                biased;
                _ = self.node_token.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            let assigned = self
                .slot
                .lock()
                .as_ref()
                .map(|active| (active.entry, active.cancel.clone()));

            if let Some((entry, cancel)) = assigned {
                self.process(entry, cancel).await;
            }
        }

        if let Some(job_id) = self.current_job() {
            // Assigned between polls and never started.
            emit_progress(&*self.notifier, job_id, JobStatus::Failed, 0).await;
            tracing::warn!(worker_id = %self.id, job_id = %job_id, "Worker stopped before starting its job");
        }
        tracing::debug!(worker_id = %self.id, "Worker loop stopped");
    }

    async fn process(&self, entry: QueueEntry, cancel: CancellationToken) {
        let job_id = entry.job_id;
        emit_progress(&*self.notifier, job_id, JobStatus::Running, 0).await;
        tracing::info!(worker_id = %self.id, job_id = %job_id, priority = %entry.priority, "Job started");

        let result = self.execute(&entry, &cancel).await;
        let progress = self.progress().unwrap_or(0);

        match result {
            Ok(Execution::Completed) => {
                emit_progress(&*self.notifier, job_id, JobStatus::Completed, 100).await;
                tracing::info!(worker_id = %self.id, job_id = %job_id, "Job completed");
            }
            Ok(Execution::Cancelled) if self.pool_token.is_cancelled() => {
                emit_progress(&*self.notifier, job_id, JobStatus::Failed, progress).await;
                tracing::warn!(worker_id = %self.id, job_id = %job_id, progress, "Job aborted by pool shutdown");
            }
            Ok(Execution::Cancelled) => {
                emit_progress(&*self.notifier, job_id, JobStatus::Stopped, progress).await;
                tracing::info!(worker_id = %self.id, job_id = %job_id, progress, "Job stopped");
            }
            Err(e) => {
                emit_progress(&*self.notifier, job_id, JobStatus::Failed, progress).await;
                tracing::error!(worker_id = %self.id, job_id = %job_id, progress, error = %e, "Job failed");
            }
        }

        // Dropping the entry releases the job-scoped token.
        self.slot.lock().take();
        self.freed.notify();
    }

    async fn execute(&self, entry: &QueueEntry, cancel: &CancellationToken) -> Result<Execution> {
        let workload = self.executor.prepare(entry)?;

        for step in 1..=workload.steps {
            if cancel.is_cancelled() {
                return Ok(Execution::Cancelled);
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(Execution::Cancelled),
                result = self.executor.run_step(entry, &workload, step) => result?,
            }

            let progress = workload.percent_after(step);
            if let Some(active) = self.slot.lock().as_mut() {
                active.progress = progress;
            }
            if step < workload.steps {
                emit_progress(&*self.notifier, entry.job_id, JobStatus::Running, progress).await;
            }
        }

        Ok(Execution::Completed)
    }
}
