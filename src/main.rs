use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use jobpool::config::{NodeConfig, PoolConfig, SimulationConfig};
use jobpool::node::Node;
use jobpool::recovery::RecoveryCoordinator;
use jobpool::scheduler::{JobPriority, JobStatus};
use jobpool::shutdown::install_shutdown_handler;
use jobpool::store::{JobOrder, JobStore};

#[derive(Parser, Debug)]
#[command(name = "jobpool")]
#[command(version)]
#[command(about = "An autoscaling worker pool with a durable priority job queue")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the worker pool and its owning service
    Server(ServerArgs),

    /// List jobs recorded in a store file
    Jobs {
        #[command(flatten)]
        store: StoreArgs,

        /// Only show jobs with this status
        #[arg(long)]
        status: Option<StatusArg>,

        /// Sort order
        #[arg(long, default_value = "created")]
        order: OrderArg,
    },

    /// Show which jobs would be re-queued on the next start
    Plan {
        #[command(flatten)]
        store: StoreArgs,
    },
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Workers kept alive even when idle
    #[arg(long, default_value = "10")]
    min_workers: usize,

    /// Upper bound on workers
    #[arg(long, default_value = "100")]
    max_workers: usize,

    /// Seconds between two scale actions
    #[arg(long, default_value = "30")]
    cooldown_secs: u64,

    /// Jobs-per-worker ratio that triggers scaling
    #[arg(long, default_value = "5")]
    threshold: usize,

    /// Seconds between queue backups
    #[arg(long, default_value = "10")]
    backup_interval_secs: u64,

    /// Shortest simulated job, in seconds
    #[arg(long, default_value = "1")]
    min_job_secs: u64,

    /// Longest simulated job, in seconds
    #[arg(long, default_value = "600")]
    max_job_secs: u64,

    /// JSON file holding job records and the last queue backup
    #[arg(long)]
    store: Option<PathBuf>,

    /// Submit this many demo jobs on startup
    #[arg(long, default_value = "0")]
    demo_jobs: usize,

    /// Every Nth demo job is high priority (0 disables)
    #[arg(long, default_value = "4")]
    high_every: usize,
}

// =============================================================================
// Store Arguments (shared by offline commands)
// =============================================================================

#[derive(Parser, Debug)]
struct StoreArgs {
    /// Store file to read
    #[arg(long)]
    store: PathBuf,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StatusArg {
    Pending,
    InQueue,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl From<StatusArg> for JobStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Pending => JobStatus::Pending,
            StatusArg::InQueue => JobStatus::InQueue,
            StatusArg::Running => JobStatus::Running,
            StatusArg::Completed => JobStatus::Completed,
            StatusArg::Failed => JobStatus::Failed,
            StatusArg::Stopped => JobStatus::Stopped,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OrderArg {
    Created,
    Name,
    Priority,
    Status,
}

impl From<OrderArg> for JobOrder {
    fn from(arg: OrderArg) -> Self {
        match arg {
            OrderArg::Created => JobOrder::CreatedAt,
            OrderArg::Name => JobOrder::Name,
            OrderArg::Priority => JobOrder::Priority,
            OrderArg::Status => JobOrder::Status,
        }
    }
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct JobListItem {
    job_id: String,
    name: String,
    priority: String,
    status: String,
    progress: u8,
    created_at_ms: i64,
    error: String,
}

#[derive(Serialize)]
struct PlanItem {
    job_id: String,
    priority: String,
    queuing_time_ms: i64,
}

// =============================================================================
// Server Implementation
// =============================================================================

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let pool = PoolConfig {
        backup_interval: Duration::from_secs(args.backup_interval_secs),
        simulation: SimulationConfig {
            min_duration: Duration::from_secs(args.min_job_secs),
            max_duration: Duration::from_secs(args.max_job_secs),
            ..SimulationConfig::default()
        },
        ..PoolConfig::default()
    }
    .with_workers(args.min_workers, args.max_workers)
    .with_scaling(args.threshold, Duration::from_secs(args.cooldown_secs));

    let mut config = NodeConfig::new(pool);
    if let Some(path) = args.store {
        config = config.with_store_path(path);
    }

    let shutdown = CancellationToken::new();
    install_shutdown_handler(&shutdown);

    let node = Node::new(config, &shutdown)?;
    let service = node.service.clone();
    let run = tokio::spawn(node.run());

    for i in 0..args.demo_jobs {
        let priority = if args.high_every > 0 && (i + 1) % args.high_every == 0 {
            JobPriority::High
        } else {
            JobPriority::Regular
        };
        match service.create_job(&format!("demo-{}", i + 1), priority).await {
            Ok(job) => tracing::debug!(job_id = %job.id, "Demo job submitted"),
            Err(e) => tracing::warn!(error = %e, "Failed to submit demo job"),
        }
    }

    run.await??;
    Ok(())
}

// =============================================================================
// Offline Commands
// =============================================================================

fn handle_jobs(
    args: StoreArgs,
    status: Option<StatusArg>,
    order: OrderArg,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = JobStore::open(&args.store)?;
    let status = status.map(JobStatus::from);
    let jobs: Vec<_> = store
        .all_jobs(order.into())
        .into_iter()
        .filter(|job| status.map_or(true, |s| job.status == s))
        .collect();

    match args.output {
        OutputFormat::Json => {
            let items: Vec<JobListItem> = jobs
                .iter()
                .map(|job| JobListItem {
                    job_id: job.id.to_string(),
                    name: job.name.clone(),
                    priority: job.priority.to_string(),
                    status: job.status.to_string(),
                    progress: job.progress,
                    created_at_ms: job.created_at,
                    error: job.error_message.clone(),
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&items)?);
        }
        OutputFormat::Table => {
            if jobs.is_empty() {
                println!("No jobs found.");
                return Ok(());
            }
            println!(
                "{:<38} {:<10} {:<10} {:>4}  NAME",
                "JOB ID", "PRIORITY", "STATUS", "%"
            );
            println!("{}", "-".repeat(78));
            for job in jobs {
                println!(
                    "{:<38} {:<10} {:<10} {:>4}  {}",
                    job.id,
                    job.priority.to_string(),
                    job.status.to_string(),
                    job.progress,
                    job.name
                );
            }
        }
    }
    Ok(())
}

fn handle_plan(args: StoreArgs) -> Result<(), Box<dyn std::error::Error>> {
    let store = JobStore::open(&args.store)?;
    let plan = RecoveryCoordinator::plan(&store);

    match args.output {
        OutputFormat::Json => {
            let items: Vec<PlanItem> = plan
                .iter()
                .map(|entry| PlanItem {
                    job_id: entry.job_id.to_string(),
                    priority: entry.priority.to_string(),
                    queuing_time_ms: entry.queuing_time,
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&items)?);
        }
        OutputFormat::Table => {
            if plan.is_empty() {
                println!("Nothing to recover.");
                return Ok(());
            }
            println!("{:<38} {:<10} QUEUED AT (MS)", "JOB ID", "PRIORITY");
            println!("{}", "-".repeat(66));
            for entry in plan {
                let queued = if entry.has_queuing_time() {
                    entry.queuing_time.to_string()
                } else {
                    "-".to_string()
                };
                println!(
                    "{:<38} {:<10} {}",
                    entry.job_id,
                    entry.priority.to_string(),
                    queued
                );
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => {
            run_server(server_args).await?;
        }
        Commands::Jobs {
            store,
            status,
            order,
        } => {
            handle_jobs(store, status, order)?;
        }
        Commands::Plan { store } => {
            handle_plan(store)?;
        }
    }

    Ok(())
}
