use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::PoolConfig;
use crate::error::Result;
use crate::notifier::{emit_progress, Notifier};
use crate::scheduler::autoscaler::{Autoscaler, ScaleDecision};
use crate::scheduler::queue::PriorityJobQueue;
use crate::scheduler::signal::WorkSignal;
use crate::scheduler::{JobStatus, QueueEntry};
use crate::transport::{FrameReceiver, PoolCommand, StopOutcome, StopResult};
use crate::worker::{JobExecutor, WorkerNode};

struct WorkerHandle {
    node: Arc<WorkerNode>,
    task: JoinHandle<()>,
}

/// Owns the queue, the workers, and the loops that connect them.
///
/// Three background tasks run once [`WorkerPool::start`] is called:
/// - the assignment loop, woken by [`WorkSignal`], hands queued jobs to idle
///   workers and re-evaluates pool size on every wake;
/// - the backup loop publishes the queue contents whenever they changed;
/// - each worker's own polling loop.
///
/// Commands from the owning service are applied by
/// [`WorkerPool::run_command_loop`].
pub struct WorkerPool {
    config: PoolConfig,
    queue: PriorityJobQueue,
    workers: Mutex<Vec<WorkerHandle>>,
    autoscaler: Mutex<Autoscaler>,
    notifier: Arc<dyn Notifier>,
    executor: Arc<dyn JobExecutor>,
    signal: WorkSignal,
    shutdown: CancellationToken,
    /// Queue generation covered by the last successful backup.
    backed_up_generation: AtomicU64,
    /// Loop tasks and retired workers, joined by `wait_stopped`.
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl WorkerPool {
    /// Build a pool whose lifetime is bounded by `shutdown`.
    pub fn new(
        config: PoolConfig,
        notifier: Arc<dyn Notifier>,
        executor: Arc<dyn JobExecutor>,
        shutdown: &CancellationToken,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new(Self {
            autoscaler: Mutex::new(Autoscaler::new(&config)),
            config,
            queue: PriorityJobQueue::new(),
            workers: Mutex::new(Vec::new()),
            notifier,
            executor,
            signal: WorkSignal::new(),
            shutdown: shutdown.child_token(),
            backed_up_generation: AtomicU64::new(0),
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }))
    }

    /// Spawn the minimum workers and the background loops, then ask the
    /// owning service for recovery. Calling it twice is a no-op.
    pub async fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::warn!("Worker pool already started");
            return;
        }

        self.spawn_min_workers();
        {
            let mut tasks = self.tasks.lock();
            tasks.push(tokio::spawn(Arc::clone(self).assignment_loop()));
            tasks.push(tokio::spawn(Arc::clone(self).backup_loop()));
        }
        tracing::info!(
            min_workers = self.config.min_workers,
            max_workers = self.config.max_workers,
            threshold = self.config.jobs_per_worker_threshold,
            "Worker pool started"
        );

        if let Err(e) = self.notifier.request_recovery().await {
            tracing::warn!(error = %e, "Failed to request queue recovery");
        }
        // Jobs added before start need a wake-up of their own.
        if !self.queue.is_empty() {
            self.signal.notify();
        }
    }

    pub(crate) fn spawn_min_workers(&self) {
        let mut workers = self.workers.lock();
        while workers.len() < self.config.min_workers {
            workers.push(self.spawn_worker());
        }
    }

    fn spawn_worker(&self) -> WorkerHandle {
        let node = Arc::new(WorkerNode::new(
            &self.shutdown,
            Arc::clone(&self.notifier),
            Arc::clone(&self.executor),
            self.signal.clone(),
            self.config.worker_poll_interval,
        ));
        let task = tokio::spawn(Arc::clone(&node).run());
        WorkerHandle { node, task }
    }

    pub fn queue(&self) -> &PriorityJobQueue {
        &self.queue
    }

    pub fn pending_jobs(&self) -> usize {
        self.queue.count()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.lock().len()
    }

    pub fn idle_worker_count(&self) -> usize {
        self.workers
            .lock()
            .iter()
            .filter(|handle| handle.node.is_idle())
            .count()
    }

    /// Jobs currently held by a worker.
    pub fn running_jobs(&self) -> Vec<Uuid> {
        self.workers
            .lock()
            .iter()
            .filter_map(|handle| handle.node.current_job())
            .collect()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Queue a job and wake the assignment loop.
    ///
    /// The in-queue event is published before the entry becomes visible, so
    /// the owner never sees it after the job's first running event.
    pub async fn add_job(&self, entry: QueueEntry) {
        emit_progress(&*self.notifier, entry.job_id, JobStatus::InQueue, 0).await;
        self.queue.enqueue(entry);
        tracing::debug!(
            job_id = %entry.job_id,
            priority = %entry.priority,
            pending = self.queue.count(),
            "Job queued"
        );
        self.signal.notify();
    }

    pub async fn add_jobs(&self, entries: Vec<QueueEntry>) {
        for entry in entries {
            self.add_job(entry).await;
        }
    }

    /// Stop a job wherever it is: cancel it on its worker, or tombstone it
    /// in the queue.
    pub fn stop_job(&self, job_id: Uuid) -> StopOutcome {
        // Held across the queue check so the job cannot move from the queue
        // to a worker in between.
        let workers = self.workers.lock();

        if let Some(handle) = workers
            .iter()
            .find(|handle| handle.node.current_job() == Some(job_id))
        {
            if handle.node.stop_job() {
                tracing::info!(job_id = %job_id, worker_id = %handle.node.id(), "Stopping running job");
                return StopOutcome::StoppedRunning;
            }
        }

        if self.queue.contains(&job_id) && self.queue.mark_for_lazy_removal(job_id) {
            tracing::info!(job_id = %job_id, "Queued job marked for removal");
            return StopOutcome::MarkedForRemoval;
        }

        tracing::warn!(job_id = %job_id, "Job to stop not found in workers or queue");
        StopOutcome::NotFound
    }

    /// Replace the queue contents with recovered entries.
    pub async fn recover_queue(&self, entries: Vec<QueueEntry>) {
        for entry in &entries {
            emit_progress(&*self.notifier, entry.job_id, JobStatus::InQueue, 0).await;
        }
        let count = entries.len();
        self.queue.recover_queue(entries);
        tracing::info!(count, "Job queue recovered");
        self.signal.notify();
    }

    /// Dequeue at most one job per idle worker. Returns how many were handed
    /// out.
    pub(crate) fn assign_idle_workers(&self) -> usize {
        let workers = self.workers.lock();
        let mut assigned = 0;

        for handle in workers.iter().filter(|handle| handle.node.is_idle()) {
            let Some(entry) = self.queue.try_dequeue() else {
                break;
            };
            match handle.node.assign_job(entry) {
                Ok(()) => assigned += 1,
                Err(_) => {
                    // Lost a race with the worker; the conflict is already
                    // logged. Put the job back with its original stamp.
                    self.queue.enqueue(entry);
                }
            }
        }

        if assigned > 0 {
            tracing::debug!(assigned, pending = self.queue.count(), "Assigned jobs to idle workers");
        }
        assigned
    }

    /// Compare the jobs-per-worker ratio to the threshold and add or retire
    /// workers. Only idle workers are retired.
    pub(crate) fn evaluate_scaling(&self, now: Instant) -> ScaleDecision {
        let pending = self.queue.count();
        let mut workers = self.workers.lock();
        let mut autoscaler = self.autoscaler.lock();
        let current = workers.len();
        let decision = autoscaler.decide(pending, current, now);

        match decision {
            ScaleDecision::Up { target } => {
                while workers.len() < target {
                    workers.push(self.spawn_worker());
                }
                autoscaler.record_scale(now);
                tracing::info!(pending, from = current, to = target, "Scaled worker pool up");
            }
            ScaleDecision::Down { target } => {
                let surplus = current - target;
                let mut retired = Vec::with_capacity(surplus);
                // Newest workers go first.
                let mut index = workers.len();
                while index > 0 && retired.len() < surplus {
                    index -= 1;
                    if workers[index].node.is_idle() {
                        retired.push(workers.remove(index));
                    }
                }

                if retired.is_empty() {
                    tracing::debug!(pending, workers = current, "No idle workers to retire");
                } else {
                    autoscaler.record_scale(now);
                    tracing::info!(
                        pending,
                        from = current,
                        to = workers.len(),
                        "Scaled worker pool down"
                    );
                    let mut tasks = self.tasks.lock();
                    for handle in retired {
                        handle.node.retire();
                        tasks.push(handle.task);
                    }
                }
            }
            ScaleDecision::Cooldown | ScaleDecision::Hold => {}
        }

        decision
    }

    async fn assignment_loop(self: Arc<Self>) {
        'wake: loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = self.signal.wait() => {}
            }

            loop {
                if self.queue.is_empty() {
                    self.evaluate_scaling(Instant::now());
                    break;
                }

                self.assign_idle_workers();
                self.evaluate_scaling(Instant::now());

                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => break 'wake,
                    _ = tokio::time::sleep(self.config.assignment_scan_delay) => {}
                }
            }
        }
        tracing::debug!("Assignment loop stopped");
    }

    async fn backup_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.backup_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    self.backup_if_dirty().await;
                    break;
                }
                _ = ticker.tick() => {
                    self.backup_if_dirty().await;
                }
            }
        }
        tracing::debug!("Backup loop stopped");
    }

    /// Publish the queue contents if they changed since the last successful
    /// backup. Returns whether a backup was published.
    pub async fn backup_if_dirty(&self) -> bool {
        let snapshot = self.queue.snapshot();
        if snapshot.generation == self.backed_up_generation.load(Ordering::Acquire) {
            return false;
        }

        let count = snapshot.entries.len();
        match self.notifier.publish_backup(snapshot.entries).await {
            Ok(()) => {
                self.backed_up_generation
                    .fetch_max(snapshot.generation, Ordering::AcqRel);
                tracing::debug!(entries = count, generation = snapshot.generation, "Queue backed up");
                true
            }
            Err(e) => {
                tracing::error!(error = %e, entries = count, "Failed to publish queue backup");
                false
            }
        }
    }

    /// Apply one command from the owning service.
    pub async fn handle_command(&self, command: PoolCommand) {
        match command {
            PoolCommand::JobsReceived(entries) => {
                tracing::debug!(count = entries.len(), "Jobs received");
                self.add_jobs(entries).await;
            }
            PoolCommand::StopJob(request) => {
                let outcome = self.stop_job(request.job_id);
                let result = StopResult {
                    job_id: request.job_id,
                    outcome,
                };
                if let Err(e) = self.notifier.report_stop(result).await {
                    tracing::error!(job_id = %request.job_id, error = %e, "Failed to report stop result");
                }
            }
            PoolCommand::RecoverQueue(entries) => {
                self.recover_queue(entries).await;
            }
        }
    }

    /// Apply commands until shutdown or until the owning service hangs up.
    pub async fn run_command_loop(self: Arc<Self>, mut commands: FrameReceiver<PoolCommand>) {
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        tracing::info!("Command link closed");
                        break;
                    }
                },
            }
        }
        tracing::debug!("Command loop stopped");
    }

    /// Cancel the pool scope: loops exit, running jobs end as failed, and
    /// the queue is backed up one last time.
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            tracing::info!(pending = self.queue.count(), "Shutting down worker pool");
        }
        self.shutdown.cancel();
    }

    /// Wait for every worker and loop task to exit. Only returns once the
    /// pool scope is cancelled.
    pub async fn wait_stopped(&self) {
        self.shutdown.cancelled().await;

        loop {
            let mut handles: Vec<JoinHandle<()>> = self
                .workers
                .lock()
                .drain(..)
                .map(|handle| handle.task)
                .collect();
            handles.append(&mut self.tasks.lock());
            if handles.is_empty() {
                break;
            }

            for handle in handles {
                if let Err(e) = handle.await {
                    tracing::error!(error = %e, "Worker pool task panicked");
                }
            }
        }
        tracing::info!("Worker pool stopped");
    }
}
