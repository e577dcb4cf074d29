use std::time::{Duration, Instant};

use crate::config::PoolConfig;

/// Outcome of a scaling check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Grow the pool to `target` workers.
    Up { target: usize },
    /// Shrink the pool toward `target` workers, idle workers only.
    Down { target: usize },
    /// Cooldown has not elapsed since the last scale action.
    Cooldown,
    /// Ratio is in the dead zone or the relevant bound is already met.
    Hold,
}

/// Ratio-driven pool sizing with a cooldown between actions.
#[derive(Debug, Clone)]
pub struct Autoscaler {
    min_workers: usize,
    max_workers: usize,
    cooldown: Duration,
    threshold: usize,
    last_scale: Option<Instant>,
}

impl Autoscaler {
    pub fn new(config: &PoolConfig) -> Self {
        Self {
            min_workers: config.min_workers,
            max_workers: config.max_workers,
            cooldown: config.scale_cooldown,
            threshold: config.jobs_per_worker_threshold.max(1),
            last_scale: None,
        }
    }

    pub fn last_scale(&self) -> Option<Instant> {
        self.last_scale
    }

    /// Decide how the pool should change. Does not touch `last_scale`; call
    /// [`Autoscaler::record_scale`] once workers were actually added or removed.
    pub fn decide(&self, pending_jobs: usize, worker_count: usize, now: Instant) -> ScaleDecision {
        if let Some(last) = self.last_scale {
            if now.saturating_duration_since(last) < self.cooldown {
                return ScaleDecision::Cooldown;
            }
        }

        // ratio = pending / max(1, workers), compared exactly
        let capacity = self.threshold * worker_count.max(1);
        let wanted = pending_jobs.div_ceil(self.threshold);

        if pending_jobs > capacity && worker_count < self.max_workers {
            ScaleDecision::Up {
                target: wanted.min(self.max_workers),
            }
        } else if pending_jobs < capacity && worker_count > self.min_workers {
            let target = wanted.max(self.min_workers);
            if target < worker_count {
                ScaleDecision::Down { target }
            } else {
                ScaleDecision::Hold
            }
        } else {
            ScaleDecision::Hold
        }
    }

    pub fn record_scale(&mut self, now: Instant) {
        self.last_scale = Some(now);
    }
}
