//! `jobmon` CLI entry-point.
//!
//! Available sub-commands:
//! - `serve`        — start the state service's HTTP API and reaper.
//! - `swarm`        — run the orchestrator loop for one workflow run.
//! - `distributor`  — run the distributor loop for one workflow run.
//! - `worker`       — run a single task instance to completion.
//! - `migrate`      — run pending database migrations.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use jobmon_core::config::JobmonConfig;
use jobmon_core::plugin::multiprocess::{MultiprocessDistributor, MultiprocessWorkerNode};
use jobmon_core::plugin::sequential::{SequentialDistributor, SequentialWorkerNode};
use jobmon_core::plugin::{DistributorPlugin, WorkerNodePlugin};
use jobmon_core::Requester;
use jobmon_distributor::{run_forever, DistributorRuntimeConfig};
use jobmon_state::{AppState, Reaper};
use jobmon_worker::{run_task_instance, WorkerIdentity, WorkerRuntimeConfig};
use tracing::info;

#[derive(Parser)]
#[command(name = "jobmon", about = "Distributed workflow orchestration for batch scientific computing", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the state service's HTTP API and background reaper.
    Serve {
        #[arg(long, default_value = "0.0.0.0:8070")]
        bind: String,
    },
    /// Drive one workflow run's DAG to completion.
    Swarm {
        #[arg(long)]
        workflow_id: i64,
        #[arg(long)]
        workflow_run_id: i64,
        #[arg(long)]
        cluster_id: i64,
        #[arg(long, default_value = "sequential")]
        queue: String,
        #[arg(long, default_value_t = 1)]
        queue_id: i64,
        #[arg(long, default_value_t = 1)]
        task_resources_type_id: i64,
        #[arg(long, default_value = "http://localhost:8070/api/v3")]
        state_url: String,
        #[arg(long)]
        fail_fast: bool,
    },
    /// Pump QUEUED task instances to a cluster plugin and reconcile exits.
    Distributor {
        #[arg(long)]
        workflow_run_id: i64,
        #[arg(long, default_value = "sequential")]
        cluster: String,
        #[arg(long, default_value = "http://localhost:8070/api/v3")]
        state_url: String,
    },
    /// Run a single task instance to completion, reporting back via heartbeat.
    Worker {
        #[arg(long)]
        task_instance_id: Option<i64>,
        #[arg(long, default_value = "sequential")]
        cluster: String,
        #[arg(long, default_value = "http://localhost:8070/api/v3")]
        state_url: String,
        #[arg(long, default_value = "/tmp/jobmon/logs")]
        log_dir: std::path::PathBuf,
    },
    /// Run pending database migrations.
    Migrate {
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = std::env::var("JOBMON_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(env_filter))
        .init();

    let cli = Cli::parse();
    let config = JobmonConfig::load()?;

    match cli.command {
        Command::Serve { bind } => {
            info!("starting state service on {bind}");
            let state = AppState::connect(config.clone()).await?;
            let reaper_pool = state.pool.clone();
            let poll_interval = Duration::from_secs(config.get_int("reaper", "poll_interval_minutes")? as u64 * 60);
            let heartbeat_buffer = config.get_float("reaper", "heartbeat_buffer")?;
            tokio::spawn(async move {
                Reaper::new(reaper_pool, poll_interval, heartbeat_buffer).monitor_forever().await;
            });
            let listener = tokio::net::TcpListener::bind(&bind).await?;
            axum::serve(listener, jobmon_state::app(state)).await?;
        }

        Command::Swarm {
            workflow_id,
            workflow_run_id,
            cluster_id,
            queue,
            queue_id,
            task_resources_type_id,
            state_url,
            fail_fast,
        } => {
            let requester = Requester::new(state_url, Duration::from_secs(30));
            let gateway = jobmon_swarm::ServerGateway::new(requester);
            let mut state = jobmon_swarm::build_from_workflow_id(&gateway, workflow_id, workflow_run_id).await?;

            let mut queue_ids = HashMap::new();
            queue_ids.insert(queue, queue_id);

            let swarm_config = jobmon_swarm::OrchestratorConfig {
                workflow_id,
                workflow_run_id,
                cluster_id,
                task_resources_type_id,
                queue_ids,
                poll_interval: Duration::from_secs(config.get_int("swarm", "poll_interval_s")? as u64),
                wedged_workflow_sync_interval: Duration::from_secs(
                    config.get_int("swarm", "wedged_workflow_sync_interval_s")? as u64,
                ),
                per_tick_scheduling_timeout: Duration::from_secs(
                    config.get_int("swarm", "per_tick_scheduling_timeout_s")? as u64,
                ),
                triage_interval: Duration::from_secs(config.get_int("swarm", "poll_interval_s")? as u64),
                heartbeat_buffer: config.get_float("heartbeat", "buffer")?,
                fail_fast,
            };

            let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
            tokio::spawn(async move {
                let _ = tokio::signal::ctrl_c().await;
                let _ = shutdown_tx.send(true);
            });

            let result = jobmon_swarm::run(&gateway, &mut state, &swarm_config, shutdown_rx).await?;
            println!(
                "{}",
                serde_json::json!({
                    "final_status": result.final_status.to_string(),
                    "elapsed_seconds": result.elapsed_seconds,
                    "total_tasks": result.total_tasks,
                    "num_done": result.num_done,
                    "num_error_fatal": result.num_error_fatal,
                    "num_previously_complete": result.num_previously_complete,
                })
            );
        }

        Command::Distributor {
            workflow_run_id,
            cluster,
            state_url,
        } => {
            let requester = Requester::new(state_url, Duration::from_secs(30));
            let plugin = resolve_distributor_plugin(&cluster);
            let runtime_config = DistributorRuntimeConfig {
                poll_interval: Duration::from_secs(config.get_int("distributor", "poll_interval_s")? as u64),
                reconcile_interval: Duration::from_secs(
                    config.get_int("distributor", "reconcile_interval_s")? as u64,
                ),
                heartbeat_interval: Duration::from_secs(config.get_int("heartbeat", "workflow_run_interval_s")? as u64),
            };

            let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
            tokio::spawn(async move {
                let _ = tokio::signal::ctrl_c().await;
                let _ = shutdown_tx.send(true);
            });

            run_forever(&requester, plugin.as_ref(), workflow_run_id, &runtime_config, shutdown_rx).await?;
        }

        Command::Worker {
            task_instance_id,
            cluster,
            state_url,
            log_dir,
        } => {
            let requester = Requester::new(state_url, Duration::from_secs(30));
            let plugin = resolve_worker_plugin(&cluster);
            let identity = match task_instance_id {
                Some(id) => WorkerIdentity::Single { task_instance_id: id },
                None => WorkerIdentity::from_env(plugin.array_step_id())
                    .ok_or_else(|| anyhow::anyhow!("no JOBMON_TASK_INSTANCE_ID or JOBMON_ARRAY_ID in environment"))?,
            };
            let runtime_config = WorkerRuntimeConfig {
                log_dir,
                heartbeat_interval: Duration::from_secs(
                    config.get_int("heartbeat", "task_instance_interval_s")? as u64,
                ),
                heartbeat_buffer: config.get_float("heartbeat", "buffer")?,
                command_interrupt_timeout: Duration::from_secs(
                    config.get_int("swarm", "command_interrupt_timeout_s")? as u64,
                ),
            };
            run_task_instance(&requester, plugin.as_ref(), &identity, &runtime_config).await?;
        }

        Command::Migrate { database_url } => {
            info!("running migrations against {database_url}");
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(2)
                .connect(&database_url)
                .await?;
            sqlx::migrate!("../../migrations").run(&pool).await?;
            info!("migrations applied successfully");
        }
    }

    Ok(())
}

fn resolve_distributor_plugin(name: &str) -> Arc<dyn DistributorPlugin> {
    match name {
        "multiprocess" => Arc::new(MultiprocessDistributor::new()),
        _ => Arc::new(SequentialDistributor::new()),
    }
}

fn resolve_worker_plugin(name: &str) -> Box<dyn WorkerNodePlugin> {
    match name {
        "multiprocess" => Box::new(MultiprocessWorkerNode::from_env()),
        _ => Box::new(SequentialWorkerNode),
    }
}
