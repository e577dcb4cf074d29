use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PoolError, Result};
use crate::recovery::decode_backup;
use crate::scheduler::job::now_millis;
use crate::scheduler::{Job, JobPriority, JobProgress, JobStatus, QueueEntry};

const DEFAULT_MAX_JOBS: usize = 10_000;

/// One row of the persisted queue backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    pub job_id: Uuid,
    pub priority: JobPriority,
    pub queuing_time: i64,
    pub backup_timestamp: i64,
}

impl BackupRecord {
    pub fn entry(&self) -> QueueEntry {
        QueueEntry::new(self.job_id, self.priority).with_queuing_time(self.queuing_time)
    }
}

/// Sort order for job listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JobOrder {
    /// Newest first.
    #[default]
    CreatedAt,
    Name,
    /// High priority first, then newest.
    Priority,
    Status,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreFile {
    #[serde(default)]
    jobs: Vec<Job>,
    #[serde(default)]
    queue_backup: serde_json::Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StoreFileRef<'a> {
    jobs: Vec<&'a Job>,
    queue_backup: &'a [BackupRecord],
}

/// Job records and the last queue backup, as kept by the owning service.
#[derive(Debug)]
pub struct JobStore {
    jobs: HashMap<Uuid, Job>,
    backup: Vec<BackupRecord>,
    max_jobs: usize,
    path: Option<PathBuf>,
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStore {
    /// In-memory store; nothing is persisted.
    pub fn new() -> Self {
        Self {
            jobs: HashMap::new(),
            backup: Vec::new(),
            max_jobs: DEFAULT_MAX_JOBS,
            path: None,
        }
    }

    /// Store persisted as JSON at `path`. A missing file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut store = Self::new();

        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                let file: StoreFile = serde_json::from_str(&contents)?;
                store.jobs = file.jobs.into_iter().map(|job| (job.id, job)).collect();
                store.backup = decode_backup(file.queue_backup);
                tracing::info!(
                    path = %path.display(),
                    jobs = store.jobs.len(),
                    backup_rows = store.backup.len(),
                    "Loaded job store"
                );
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No job store yet, starting empty");
            }
            Err(e) => return Err(e.into()),
        }

        store.path = Some(path);
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Write the store to its file, if it has one.
    pub fn flush(&self) -> Result<()> {
        match self.encode()? {
            Some((path, contents)) => Self::write_file(&path, &contents),
            None => Ok(()),
        }
    }

    /// File path and contents to persist, or `None` for an in-memory store.
    pub fn encode(&self) -> Result<Option<(PathBuf, String)>> {
        let Some(path) = &self.path else {
            return Ok(None);
        };

        let mut jobs: Vec<&Job> = self.jobs.values().collect();
        jobs.sort_by_key(|job| job.created_at);
        let contents = serde_json::to_string_pretty(&StoreFileRef {
            jobs,
            queue_backup: &self.backup,
        })?;
        Ok(Some((path.clone(), contents)))
    }

    /// Replace `path` with `contents` through a temporary sibling file.
    pub fn write_file(path: &Path, contents: &str) -> Result<()> {
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Add a job. Returns false if the store is at capacity.
    pub fn add_job(&mut self, job: Job) -> bool {
        if self.jobs.len() >= self.max_jobs {
            return false;
        }
        self.jobs.insert(job.id, job);
        true
    }

    pub fn get_job(&self, id: &Uuid) -> Option<&Job> {
        self.jobs.get(id)
    }

    pub fn get_job_mut(&mut self, id: &Uuid) -> Option<&mut Job> {
        self.jobs.get_mut(id)
    }

    pub fn remove_job(&mut self, id: &Uuid) -> Option<Job> {
        self.jobs.remove(id)
    }

    pub fn all_jobs(&self, order: JobOrder) -> Vec<&Job> {
        let mut jobs: Vec<&Job> = self.jobs.values().collect();
        match order {
            JobOrder::CreatedAt => jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
            JobOrder::Name => jobs.sort_by(|a, b| a.name.cmp(&b.name)),
            JobOrder::Priority => jobs.sort_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then_with(|| b.created_at.cmp(&a.created_at))
            }),
            JobOrder::Status => jobs.sort_by(|a, b| {
                a.status
                    .to_string()
                    .cmp(&b.status.to_string())
                    .then_with(|| b.created_at.cmp(&a.created_at))
            }),
        }
        jobs
    }

    pub fn jobs_with_status(&self, status: JobStatus) -> Vec<&Job> {
        let mut jobs: Vec<&Job> = self
            .jobs
            .values()
            .filter(|job| job.status == status)
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        jobs
    }

    /// Remove every job with `status`. Returns how many were removed.
    pub fn delete_jobs_by_status(&mut self, status: JobStatus) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|_, job| job.status != status);
        before - self.jobs.len()
    }

    /// Apply a progress event to the job's record. Returns whether the status
    /// changed.
    pub fn apply_progress(&mut self, event: JobProgress) -> Result<bool> {
        let job = self
            .jobs
            .get_mut(&event.job_id)
            .ok_or(PoolError::JobNotFound(event.job_id))?;

        if job.status == event.status {
            job.progress = event.progress;
            return Ok(false);
        }

        match event.status {
            JobStatus::Running => job.mark_started(event.progress),
            JobStatus::Completed => job.mark_completed(),
            JobStatus::Failed | JobStatus::Stopped => job.mark_ended(event.status, event.progress),
            JobStatus::InQueue | JobStatus::Pending => {
                job.status = event.status;
                job.progress = event.progress;
            }
        }
        Ok(true)
    }

    /// Replace the backup table with a fresh snapshot. Queued jobs pick up
    /// their queuing time from it.
    pub fn replace_backup(&mut self, entries: Vec<QueueEntry>) -> usize {
        let backup_timestamp = now_millis();
        self.backup = entries
            .into_iter()
            .map(|entry| {
                if let Some(job) = self.jobs.get_mut(&entry.job_id) {
                    job.queuing_time = entry.queuing_time;
                }
                BackupRecord {
                    job_id: entry.job_id,
                    priority: entry.priority,
                    queuing_time: entry.queuing_time,
                    backup_timestamp,
                }
            })
            .collect();
        self.backup.len()
    }

    pub fn backup(&self) -> &[BackupRecord] {
        &self.backup
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
