//! The owning service: job records, lifecycle commands, and the handling of
//! everything the worker pool reports back.

use std::sync::Arc;

use tokio::sync::{Mutex, RwLock, RwLockWriteGuard};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{PoolError, Result};
use crate::recovery::RecoveryCoordinator;
use crate::scheduler::{Job, JobPriority, JobProgress, JobStatus};
use crate::store::{JobOrder, JobStore};
use crate::transport::{
    FrameReceiver, FrameSender, PoolCommand, PoolEvent, StopOutcome, StopRequest, StopResult,
};

pub struct JobService {
    store: Arc<RwLock<JobStore>>,
    commands: FrameSender<PoolCommand>,
    /// Orders file writes the same way as the store mutations they capture.
    persist_lock: Mutex<()>,
}

impl JobService {
    pub fn new(store: JobStore, commands: FrameSender<PoolCommand>) -> Self {
        Self {
            store: Arc::new(RwLock::new(store)),
            commands,
            persist_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> Arc<RwLock<JobStore>> {
        Arc::clone(&self.store)
    }

    /// Record a new job and hand it to the pool.
    pub async fn create_job(&self, name: &str, priority: JobPriority) -> Result<Job> {
        let name = name.trim();
        if name.is_empty() {
            return Err(PoolError::InvalidName);
        }

        let job = Job::new(name.to_string(), priority);
        {
            let mut store = self.store.write().await;
            if !store.add_job(job.clone()) {
                tracing::warn!(job_id = %job.id, "Job store at capacity, job rejected");
                return Err(PoolError::StoreFull);
            }
            self.persist(store).await;
        }

        self.commands
            .send(&PoolCommand::JobsReceived(vec![job.queue_entry()]))
            .await?;
        tracing::info!(job_id = %job.id, name = %job.name, priority = %job.priority, "Job created");
        Ok(job)
    }

    pub async fn get_job(&self, id: &Uuid) -> Option<Job> {
        self.store.read().await.get_job(id).cloned()
    }

    pub async fn list_jobs(&self, order: JobOrder, status: Option<JobStatus>) -> Vec<Job> {
        self.store
            .read()
            .await
            .all_jobs(order)
            .into_iter()
            .filter(|job| status.map_or(true, |s| job.status == s))
            .cloned()
            .collect()
    }

    /// Ask the pool to stop a queued or running job.
    pub async fn stop_job(&self, id: Uuid) -> Result<()> {
        let status = self.status_of(&id).await?;
        if !matches!(status, JobStatus::Running | JobStatus::InQueue) {
            return Err(PoolError::InvalidTransition { job: id, status });
        }

        self.commands
            .send(&PoolCommand::StopJob(StopRequest { job_id: id }))
            .await?;
        tracing::info!(job_id = %id, status = %status, "Stop requested");
        Ok(())
    }

    /// Re-submit a failed or stopped job.
    pub async fn restart_job(&self, id: Uuid) -> Result<()> {
        let entry = {
            let mut store = self.store.write().await;
            let job = store.get_job_mut(&id).ok_or(PoolError::JobNotFound(id))?;
            if !matches!(job.status, JobStatus::Failed | JobStatus::Stopped) {
                return Err(PoolError::InvalidTransition {
                    job: id,
                    status: job.status,
                });
            }
            job.mark_restarted();
            let entry = job.queue_entry();
            self.persist(store).await;
            entry
        };

        self.commands
            .send(&PoolCommand::JobsReceived(vec![entry]))
            .await?;
        tracing::info!(job_id = %id, "Job restarted");
        Ok(())
    }

    /// Remove a job record, stopping it first if the pool still has it.
    pub async fn delete_job(&self, id: Uuid) -> Result<Job> {
        let status = self.status_of(&id).await?;
        if matches!(status, JobStatus::Running | JobStatus::InQueue) {
            self.commands
                .send(&PoolCommand::StopJob(StopRequest { job_id: id }))
                .await?;
        }

        let mut store = self.store.write().await;
        let job = store.remove_job(&id).ok_or(PoolError::JobNotFound(id))?;
        self.persist(store).await;
        tracing::info!(job_id = %id, status = %status, "Job deleted");
        Ok(job)
    }

    pub async fn delete_jobs_by_status(&self, status: JobStatus) -> usize {
        let mut store = self.store.write().await;
        let removed = store.delete_jobs_by_status(status);
        if removed > 0 {
            self.persist(store).await;
        }
        tracing::info!(status = %status, removed, "Deleted jobs by status");
        removed
    }

    /// Send the pool every job that should be queued again.
    pub async fn recover(&self) -> Result<usize> {
        let plan = RecoveryCoordinator::plan(&*self.store.read().await);
        if plan.is_empty() {
            return Ok(0);
        }

        let count = plan.len();
        self.commands.send(&PoolCommand::JobsReceived(plan)).await?;
        tracing::info!(count, "Recovered jobs sent to worker pool");
        Ok(count)
    }

    pub async fn handle_event(&self, event: PoolEvent) {
        match event {
            PoolEvent::JobProgress(progress) => self.apply_progress(progress).await,
            PoolEvent::QueueBackup(entries) => {
                let mut store = self.store.write().await;
                let rows = store.replace_backup(entries);
                self.persist(store).await;
                tracing::debug!(rows, "Queue backup saved");
            }
            PoolEvent::StopResult(result) => self.apply_stop_result(result).await,
            PoolEvent::RecoveryRequest => {
                if let Err(e) = self.recover().await {
                    tracing::error!(error = %e, "Queue recovery failed");
                }
            }
        }
    }

    async fn apply_progress(&self, progress: JobProgress) {
        let mut store = self.store.write().await;
        let applied = store.apply_progress(progress);
        match applied {
            Ok(true) => {
                self.persist(store).await;
                tracing::debug!(
                    job_id = %progress.job_id,
                    status = %progress.status,
                    progress = progress.progress,
                    "Job status updated"
                );
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(job_id = %progress.job_id, error = %e, "Dropping progress for unknown job");
            }
        }
    }

    async fn apply_stop_result(&self, result: StopResult) {
        match result.outcome {
            StopOutcome::MarkedForRemoval => {
                // No worker will ever report this job.
                let mut store = self.store.write().await;
                let last_progress = store.get_job(&result.job_id).map(|job| job.progress);
                if let Some(progress) = last_progress {
                    let event = JobProgress::new(result.job_id, JobStatus::Stopped, progress);
                    if store.apply_progress(event).unwrap_or(false) {
                        self.persist(store).await;
                    }
                }
                tracing::info!(job_id = %result.job_id, "Queued job stopped");
            }
            StopOutcome::StoppedRunning => {
                tracing::debug!(job_id = %result.job_id, "Running job cancelled, awaiting worker report");
            }
            StopOutcome::NotFound => {
                tracing::warn!(job_id = %result.job_id, "Worker pool did not find job to stop");
            }
        }
    }

    /// Apply pool events until the link closes or `stop` is cancelled. On
    /// `stop`, events already buffered are still applied.
    pub async fn run_event_loop(
        self: Arc<Self>,
        mut events: FrameReceiver<PoolEvent>,
        stop: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
                _ = stop.cancelled() => {
                    while let Some(event) = events.try_recv() {
                        self.handle_event(event).await;
                    }
                    break;
                }
            }
        }
        tracing::debug!("Service event loop stopped");
    }

    /// Encode the store under its write guard, then write the file on the
    /// blocking pool once the guard is released.
    async fn persist(&self, store: RwLockWriteGuard<'_, JobStore>) {
        let encoded = match store.encode() {
            Ok(Some(encoded)) => encoded,
            Ok(None) => return,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode job store");
                return;
            }
        };
        let _writing = self.persist_lock.lock().await;
        drop(store);

        let (path, contents) = encoded;
        match tokio::task::spawn_blocking(move || JobStore::write_file(&path, &contents)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "Failed to persist job store"),
            Err(e) => tracing::error!(error = %e, "Job store write task panicked"),
        }
    }

    async fn status_of(&self, id: &Uuid) -> Result<JobStatus> {
        self.store
            .read()
            .await
            .get_job(id)
            .map(|job| job.status)
            .ok_or(PoolError::JobNotFound(*id))
    }
}
