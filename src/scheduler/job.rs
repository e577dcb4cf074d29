use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Timestamp value meaning "not set".
pub const UNSET_TIME: i64 = 0;

/// Current wall-clock time as Unix epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Job priority. Declaration order is the dispatch order: `High` outranks `Regular`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum JobPriority {
    #[default]
    Regular,
    High,
}

impl std::fmt::Display for JobPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobPriority::Regular => write!(f, "regular"),
            JobPriority::High => write!(f, "high"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    InQueue,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl JobStatus {
    /// Terminal statuses are never re-enqueued by recovery.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Stopped
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::InQueue => write!(f, "in-queue"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// The dispatch subset of a job. Immutable once queued; a priority change
/// means enqueueing a new entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub job_id: Uuid,
    pub priority: JobPriority,
    #[serde(default)]
    pub queuing_time: i64,
}

impl QueueEntry {
    pub fn new(job_id: Uuid, priority: JobPriority) -> Self {
        Self {
            job_id,
            priority,
            queuing_time: UNSET_TIME,
        }
    }

    pub fn with_queuing_time(mut self, queuing_time: i64) -> Self {
        self.queuing_time = queuing_time;
        self
    }

    pub fn has_queuing_time(&self) -> bool {
        self.queuing_time != UNSET_TIME
    }
}

/// Progress/status report for a single job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub progress: u8,
}

impl JobProgress {
    pub fn new(job_id: Uuid, status: JobStatus, progress: u8) -> Self {
        Self {
            job_id,
            status,
            progress: progress.min(100),
        }
    }
}

/// A job record as kept by the owning service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: Uuid,
    pub name: String,
    pub priority: JobPriority,
    pub status: JobStatus,
    pub progress: u8,
    pub created_at: i64,
    pub started_at: i64,
    pub completed_at: i64,
    pub queuing_time: i64,
    #[serde(default)]
    pub error_message: String,
}

impl Job {
    pub fn new(name: String, priority: JobPriority) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            priority,
            status: JobStatus::Pending,
            progress: 0,
            created_at: now_millis(),
            started_at: UNSET_TIME,
            completed_at: UNSET_TIME,
            queuing_time: UNSET_TIME,
            error_message: String::new(),
        }
    }

    /// The entry that dispatches this job.
    pub fn queue_entry(&self) -> QueueEntry {
        QueueEntry {
            job_id: self.id,
            priority: self.priority,
            queuing_time: self.queuing_time,
        }
    }

    pub fn mark_started(&mut self, progress: u8) {
        self.started_at = now_millis();
        self.status = JobStatus::Running;
        self.progress = progress;
    }

    pub fn mark_completed(&mut self) {
        self.completed_at = now_millis();
        self.status = JobStatus::Completed;
        self.progress = 100;
    }

    /// Record a `Failed` or `Stopped` outcome.
    pub fn mark_ended(&mut self, status: JobStatus, progress: u8) {
        let now_secs = now_millis() / 1000;
        self.status = status;
        self.progress = progress;
        self.error_message = if status == JobStatus::Stopped {
            format!("Stop Time : {}", now_secs)
        } else {
            format!("Job Process Failed at : {}", now_secs)
        };
    }

    pub fn mark_restarted(&mut self) {
        self.status = JobStatus::Pending;
        self.started_at = UNSET_TIME;
        self.progress = 0;
        self.queuing_time = UNSET_TIME;
        self.error_message.clear();
    }
}
