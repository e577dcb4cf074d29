use std::path::PathBuf;
use std::time::Duration;

use crate::error::{PoolError, Result};

/// Shape of the stand-in workload run by each job.
///
/// Every job draws a random total duration in `[min_duration, max_duration]`
/// and reports progress `steps` times along the way.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub min_duration: Duration,
    pub max_duration: Duration,
    pub steps: u8,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            min_duration: Duration::from_secs(1),
            max_duration: Duration::from_secs(600),
            steps: 100,
        }
    }
}

/// Worker pool sizing and loop timing. Read once at startup.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub min_workers: usize,
    pub max_workers: usize,
    /// Minimum time between two scale actions.
    pub scale_cooldown: Duration,
    /// Jobs-per-worker ratio that triggers scaling.
    pub jobs_per_worker_threshold: usize,
    /// How often the queue is backed up (when it changed).
    pub backup_interval: Duration,
    /// How often an idle worker checks for an assigned job.
    pub worker_poll_interval: Duration,
    /// Pause between assignment scans while jobs remain queued.
    pub assignment_scan_delay: Duration,
    pub simulation: SimulationConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_workers: 10,
            max_workers: 100,
            scale_cooldown: Duration::from_secs(30),
            jobs_per_worker_threshold: 5,
            backup_interval: Duration::from_secs(10),
            worker_poll_interval: Duration::from_millis(100),
            assignment_scan_delay: Duration::from_millis(500),
            simulation: SimulationConfig::default(),
        }
    }
}

impl PoolConfig {
    pub fn with_workers(mut self, min_workers: usize, max_workers: usize) -> Self {
        self.min_workers = min_workers;
        self.max_workers = max_workers;
        self
    }

    pub fn with_scaling(mut self, threshold: usize, cooldown: Duration) -> Self {
        self.jobs_per_worker_threshold = threshold;
        self.scale_cooldown = cooldown;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(PoolError::InvalidConfig(
                "max_workers must be at least 1".to_string(),
            ));
        }
        if self.min_workers > self.max_workers {
            return Err(PoolError::InvalidConfig(format!(
                "min_workers ({}) exceeds max_workers ({})",
                self.min_workers, self.max_workers
            )));
        }
        if self.jobs_per_worker_threshold == 0 {
            return Err(PoolError::InvalidConfig(
                "jobs_per_worker_threshold must be at least 1".to_string(),
            ));
        }
        if self.simulation.steps == 0 {
            return Err(PoolError::InvalidConfig(
                "simulation steps must be at least 1".to_string(),
            ));
        }
        if self.simulation.min_duration > self.simulation.max_duration {
            return Err(PoolError::InvalidConfig(
                "simulation min_duration exceeds max_duration".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub pool: PoolConfig,
    /// Where job records and the last queue backup are persisted. `None`
    /// keeps everything in memory.
    pub store_path: Option<PathBuf>,
    /// Frames buffered per direction on the service link.
    pub link_capacity: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            store_path: None,
            link_capacity: 1024,
        }
    }
}

impl NodeConfig {
    pub fn new(pool: PoolConfig) -> Self {
        Self {
            pool,
            ..Default::default()
        }
    }

    pub fn with_store_path(mut self, path: PathBuf) -> Self {
        self.store_path = Some(path);
        self
    }
}
