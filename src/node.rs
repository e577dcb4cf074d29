use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::NodeConfig;
use crate::error::Result;
use crate::notifier::LinkNotifier;
use crate::scheduler::WorkerPool;
use crate::service::JobService;
use crate::store::JobStore;
use crate::transport::{link, FrameReceiver, PoolCommand, PoolEvent};
use crate::worker::{JobExecutor, SimulatedExecutor};

/// Main node that wires the owning service to the worker pool.
pub struct Node {
    pub config: NodeConfig,
    pub pool: Arc<WorkerPool>,
    pub service: Arc<JobService>,
    events: FrameReceiver<PoolEvent>,
    commands: FrameReceiver<PoolCommand>,
    shutdown: CancellationToken,
}

impl Node {
    /// Node running the simulated workload.
    pub fn new(config: NodeConfig, shutdown: &CancellationToken) -> Result<Self> {
        let executor = Arc::new(SimulatedExecutor::new(config.pool.simulation.clone()));
        Self::with_executor(config, executor, shutdown)
    }

    pub fn with_executor(
        config: NodeConfig,
        executor: Arc<dyn JobExecutor>,
        shutdown: &CancellationToken,
    ) -> Result<Self> {
        let store = match &config.store_path {
            Some(path) => JobStore::open(path)?,
            None => JobStore::new(),
        };

        let (pool_end, service_end) = link(config.link_capacity);
        let notifier = Arc::new(LinkNotifier::new(pool_end.events));
        let pool = WorkerPool::new(config.pool.clone(), notifier, executor, shutdown)?;
        let service = Arc::new(JobService::new(store, service_end.commands));

        Ok(Self {
            config,
            pool,
            service,
            events: service_end.events,
            commands: pool_end.commands,
            shutdown: shutdown.clone(),
        })
    }

    /// Run the node until `shutdown` is cancelled.
    ///
    /// 1. Spawns the service's event loop and the pool's command loop
    /// 2. Starts the pool, which requests recovery of interrupted jobs
    /// 3. On shutdown, waits for the pool to stop, then lets the service
    ///    apply the final reports and backup before returning
    pub async fn run(self) -> Result<()> {
        let Node {
            config,
            pool,
            service,
            events,
            commands,
            shutdown,
        } = self;

        let drain = CancellationToken::new();
        let service_task = tokio::spawn(Arc::clone(&service).run_event_loop(events, drain.clone()));
        let command_task = tokio::spawn(Arc::clone(&pool).run_command_loop(commands));

        pool.start().await;
        tracing::info!(
            store = ?config.store_path,
            min_workers = config.pool.min_workers,
            max_workers = config.pool.max_workers,
            "Node running"
        );

        shutdown.cancelled().await;
        pool.shutdown();
        pool.wait_stopped().await;
        if let Err(e) = command_task.await {
            tracing::error!(error = %e, "Command loop panicked");
        }

        drain.cancel();
        if let Err(e) = service_task.await {
            tracing::error!(error = %e, "Service event loop panicked");
        }

        service.store().read().await.flush()?;
        tracing::info!("Node stopped");
        Ok(())
    }
}
