//! Rebuilding the queue after a restart.
//!
//! Two sources are merged: the last queue backup the pool published, and
//! every job the store still records as `Running`. A running job without a
//! backup entry was interrupted mid-execution and goes back in the queue with
//! an unset queuing time.

use std::collections::HashSet;

use crate::error::PoolError;
use crate::scheduler::{JobStatus, QueueEntry};
use crate::store::{BackupRecord, JobStore};

/// Parse a persisted backup table. A malformed payload is logged and yields
/// no rows.
pub fn decode_backup(payload: serde_json::Value) -> Vec<BackupRecord> {
    if payload.is_null() {
        return Vec::new();
    }
    match serde_json::from_value(payload) {
        Ok(records) => records,
        Err(e) => {
            let err = PoolError::RecoveryDeserialization(e);
            tracing::error!(error = %err, "Discarding queue backup");
            Vec::new()
        }
    }
}

/// Merge backup entries with interrupted jobs: one entry per job id, the
/// backup's entry winning, ordered by priority then queuing time.
pub fn merge(backup: Vec<QueueEntry>, interrupted: Vec<QueueEntry>) -> Vec<QueueEntry> {
    let mut seen = HashSet::with_capacity(backup.len() + interrupted.len());
    let mut merged: Vec<QueueEntry> = backup
        .into_iter()
        .chain(interrupted)
        .filter(|entry| seen.insert(entry.job_id))
        .collect();

    // Stable, so equal keys keep backup order.
    merged.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.queuing_time.cmp(&b.queuing_time))
    });
    merged
}

/// Works out which jobs to re-submit from what the store remembers.
pub struct RecoveryCoordinator;

impl RecoveryCoordinator {
    pub fn plan(store: &JobStore) -> Vec<QueueEntry> {
        let mut dropped = 0usize;
        let backup: Vec<QueueEntry> = store
            .backup()
            .iter()
            .filter(|record| {
                let live = store
                    .get_job(&record.job_id)
                    .is_some_and(|job| !job.status.is_terminal());
                if !live {
                    dropped += 1;
                }
                live
            })
            .map(BackupRecord::entry)
            .collect();

        let interrupted: Vec<QueueEntry> = store
            .jobs_with_status(JobStatus::Running)
            .into_iter()
            .map(|job| QueueEntry::new(job.id, job.priority))
            .collect();

        let from_backup = backup.len();
        let running = interrupted.len();
        let plan = merge(backup, interrupted);

        tracing::info!(
            from_backup,
            running,
            dropped,
            total = plan.len(),
            "Planned queue recovery"
        );
        plan
    }
}
