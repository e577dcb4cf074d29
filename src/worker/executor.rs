use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::config::SimulationConfig;
use crate::error::{PoolError, Result};
use crate::scheduler::QueueEntry;

/// How a job is split into progress steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Workload {
    pub steps: u8,
    pub step_duration: Duration,
}

impl Workload {
    /// Percent complete after `step` of `steps`.
    pub fn percent_after(&self, step: u8) -> u8 {
        let steps = u32::from(self.steps.max(1));
        (u32::from(step) * 100 / steps).min(100) as u8
    }
}

/// The work a job performs. Opaque to the scheduler: a worker only sees a
/// sequence of steps it can cancel between.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Plan the job before its first step.
    fn prepare(&self, job: &QueueEntry) -> Result<Workload>;

    /// Run one step. Dropped mid-step when the job is cancelled.
    async fn run_step(&self, _job: &QueueEntry, workload: &Workload, _step: u8) -> Result<()> {
        tokio::time::sleep(workload.step_duration).await;
        Ok(())
    }
}

/// Stand-in workload: a pseudo-random total duration split into equal steps.
#[derive(Debug, Clone)]
pub struct SimulatedExecutor {
    config: SimulationConfig,
}

impl SimulatedExecutor {
    pub fn new(config: SimulationConfig) -> Self {
        Self { config }
    }
}

impl Default for SimulatedExecutor {
    fn default() -> Self {
        Self::new(SimulationConfig::default())
    }
}

#[async_trait]
impl JobExecutor for SimulatedExecutor {
    fn prepare(&self, job: &QueueEntry) -> Result<Workload> {
        if self.config.steps == 0 {
            return Err(PoolError::Execution("workload has no steps".to_string()));
        }
        let min_ms = self.config.min_duration.as_millis() as u64;
        let max_ms = (self.config.max_duration.as_millis() as u64).max(min_ms);
        let total_ms = rand::thread_rng().gen_range(min_ms..=max_ms);
        let step_duration = Duration::from_millis(total_ms / u64::from(self.config.steps));

        tracing::debug!(
            job_id = %job.job_id,
            total_ms,
            steps = self.config.steps,
            "Planned simulated workload"
        );

        Ok(Workload {
            steps: self.config.steps,
            step_duration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::JobPriority;
    use uuid::Uuid;

    fn job() -> QueueEntry {
        QueueEntry::new(Uuid::new_v4(), JobPriority::Regular)
    }

    #[test]
    fn default_simulation_plans_within_bounds() {
        let executor = SimulatedExecutor::default();
        for _ in 0..50 {
            let workload = executor.prepare(&job()).unwrap();
            assert_eq!(workload.steps, 100);
            assert!(workload.step_duration >= Duration::from_millis(10));
            assert!(workload.step_duration <= Duration::from_millis(6000));
        }
    }

    #[test]
    fn fixed_duration_gives_fixed_steps() {
        let executor = SimulatedExecutor::new(SimulationConfig {
            min_duration: Duration::from_millis(200),
            max_duration: Duration::from_millis(200),
            steps: 4,
        });
        let workload = executor.prepare(&job()).unwrap();
        assert_eq!(workload.step_duration, Duration::from_millis(50));
    }

    #[test]
    fn zero_steps_is_an_execution_error() {
        let executor = SimulatedExecutor::new(SimulationConfig {
            steps: 0,
            ..SimulationConfig::default()
        });
        assert!(matches!(
            executor.prepare(&job()),
            Err(PoolError::Execution(_))
        ));
    }

    #[test]
    fn percent_after_step() {
        let workload = Workload {
            steps: 3,
            step_duration: Duration::ZERO,
        };
        assert_eq!(workload.percent_after(1), 33);
        assert_eq!(workload.percent_after(2), 66);
        assert_eq!(workload.percent_after(3), 100);
    }

    #[tokio::test]
    async fn default_step_sleeps_for_step_duration() {
        let executor = SimulatedExecutor::default();
        let workload = Workload {
            steps: 1,
            step_duration: Duration::from_millis(20),
        };
        let start = std::time::Instant::now();
        executor.run_step(&job(), &workload, 1).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
