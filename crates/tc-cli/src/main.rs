mod agent_cmd;
mod backlog_cmd;
mod cli_output;
mod config;
mod config_cmd;
mod dnd_cmd;
mod pidfile;
mod project_cmd;
mod proposal_cmd;
mod report_cmd;
mod serve_cmd;
mod status_cmd;
mod task_cmd;
mod tui;

#[cfg(test)]
mod test_util;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast;

use tc_core::adapter::ClaudeCodeAdapter;
use tc_core::capacity::CapacityTracker;
use tc_core::circuit_breaker::CircuitBreaker;
use tc_core::completion_recorder::CompletionRecorder;
use tc_core::db_health::DbHealthMonitor;
use tc_core::dispatch::{DispatchConfig, DispatchLoop};
use tc_core::productivity_monitor::{ProductivityMonitor, ProductivityMonitorConfig};
use tc_core::session_manager::AgentSessionManager;
use tc_core::spend_monitor::SpendMonitor;
use tc_core::subagent_tracker::SubagentTracker;
use tc_db::pool;

use cli_output::CliOutput;
use config::TrafficControlConfig;

#[derive(Parser)]
#[command(name = "trafficcontrol", about = "Orchestrates AI coding-agent sessions across projects under capacity and spend limits")]
struct Cli {
    /// Database URL (overrides TC_DATABASE_URL env var and the config file)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the dispatch loop and HTTP dashboard in the foreground
    Start {
        /// Address to bind the HTTP dashboard to
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        /// Port to bind the HTTP dashboard to
        #[arg(long, default_value_t = 4280)]
        port: u16,
    },
    /// Stop a running `start` process via its pidfile
    Stop,
    /// Show project and task counts from the database
    Status,
    /// Task management
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },
    /// Project management
    Project {
        #[command(subcommand)]
        command: ProjectCommands,
    },
    /// Show spend and completion history over a rolling window
    Report {
        /// Window size in hours
        #[arg(long, default_value_t = 24)]
        window_hours: i64,
    },
    /// Config file inspection
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Agent capacity inspection
    Agent {
        #[command(subcommand)]
        command: AgentCommands,
    },
    /// Backlog summary across all projects
    Backlog {
        #[command(subcommand)]
        command: BacklogCommands,
    },
    /// Resource allocation proposals
    Proposal {
        #[command(subcommand)]
        command: ProposalCommands,
    },
    /// Do-not-disturb toggle for alert delivery
    Dnd {
        #[command(subcommand)]
        command: DndCommands,
    },
    /// Launch the interactive TUI dashboard
    Dashboard,
}

#[derive(Subcommand)]
enum TaskCommands {
    /// Add a task to a project
    Add {
        project_id: String,
        title: String,
        description: String,
        #[arg(long, default_value_t = 0)]
        priority: i32,
        /// low | medium | high
        #[arg(long, default_value = "medium")]
        complexity: String,
        #[arg(long)]
        blocked_by: Option<String>,
        #[arg(long)]
        tags: Vec<String>,
    },
    /// List tasks for a project
    List { project_id: String },
    /// Cancel a task
    Cancel { task_id: String },
    /// Update a task's priority
    Update {
        task_id: String,
        #[arg(long)]
        priority: i32,
    },
}

#[derive(Subcommand)]
enum ProjectCommands {
    /// List all projects with progress
    List,
    /// Create a project
    Create {
        name: String,
        #[arg(long, default_value_t = 0)]
        priority: i32,
        #[arg(long)]
        root_path: String,
    },
    /// Pause a project (no new sessions will be launched for it)
    Pause { project_id: String },
    /// Resume a paused project
    Resume { project_id: String },
    /// Set a project's priority
    SetPriority {
        project_id: String,
        #[arg(long)]
        priority: i32,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the fully resolved configuration
    Show,
    /// Validate the resolved configuration
    Validate,
}

#[derive(Subcommand)]
enum AgentCommands {
    /// List configured per-model capacity limits
    List,
    /// Show configured capacity alongside DB-observable load
    Capacity,
}

#[derive(Subcommand)]
enum BacklogCommands {
    /// Summarize queued/blocked tasks per project
    Summary,
}

#[derive(Subcommand)]
enum ProposalCommands {
    /// List proposed resource allocations, computed fresh from backlog state
    List,
    /// Acknowledge a proposal (log-only; nothing is persisted)
    Approve { project_id: String },
    /// Acknowledge a rejected proposal (log-only; nothing is persisted)
    Reject { project_id: String },
}

#[derive(Subcommand)]
enum DndCommands {
    /// Enable do-not-disturb
    On,
    /// Disable do-not-disturb
    Off,
    /// Show the current do-not-disturb state
    Status,
}

/// Bring up every long-lived collaborator the dispatch loop and dashboard
/// share, then run both until a shutdown signal arrives.
async fn cmd_start(cli_db_url: Option<&str>, bind: &str, port: u16) -> anyhow::Result<()> {
    let resolved = TrafficControlConfig::resolve(cli_db_url)?;

    pool::ensure_database_exists(&resolved.db_config).await?;
    let db_pool = pool::create_pool(&resolved.db_config).await?;
    pool::run_migrations(&db_pool, pool::default_migrations_path()).await?;

    pidfile::write_pidfile()?;

    let capacity = CapacityTracker::new(resolved.capacity_limits.clone());
    let subagents = SubagentTracker::new(resolved.max_subagent_depth);
    let harness = Arc::new(ClaudeCodeAdapter::with_binary(resolved.cli_path.clone()));
    let session_manager = AgentSessionManager::new(capacity.clone(), subagents, harness, db_pool.clone());

    let circuit_breaker = Arc::new(CircuitBreaker::new(resolved.circuit_breaker_config));
    let spend_monitor = Arc::new(SpendMonitor::new(resolved.spend_config));
    let db_health = Arc::new(DbHealthMonitor::new(db_pool.clone(), 5));
    let productivity = Arc::new(ProductivityMonitor::new(ProductivityMonitorConfig::default()));

    let completion_recorder = Arc::new(CompletionRecorder::new(
        db_pool.clone(),
        session_manager.clone(),
        spend_monitor.clone(),
        productivity.clone(),
        circuit_breaker.clone(),
    ));
    completion_recorder.spawn();

    let dispatch_config = DispatchConfig {
        tick_interval: std::time::Duration::from_secs(resolved.tick_interval_secs),
        ..DispatchConfig::default()
    };
    let dispatch_loop = DispatchLoop::new(
        db_pool.clone(),
        session_manager,
        capacity,
        circuit_breaker,
        spend_monitor,
        db_health,
        dispatch_config,
    );

    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);

    let dispatch_handle = tokio::spawn(async move {
        dispatch_loop.run().await;
    });
    let serve_handle = tokio::spawn(serve_cmd::run_serve(db_pool.clone(), bind.to_string(), port, shutdown_rx));

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received, stopping trafficcontrol");

    dispatch_handle.abort();
    let _ = shutdown_tx.send(());
    let _ = serve_handle.await;

    pidfile::remove_pidfile();
    db_pool.close().await;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let db_url = cli.database_url.as_deref();

    let result = run(cli.command, db_url).await;

    match result {
        Ok(output) => output.print_and_exit(),
        Err(e) => CliOutput::err(format!("{e:#}")).print_and_exit(),
    }
}

async fn run(command: Commands, db_url: Option<&str>) -> anyhow::Result<CliOutput> {
    match command {
        Commands::Start { bind, port } => {
            cmd_start(db_url, &bind, port).await?;
            Ok(CliOutput::ok("trafficcontrol stopped"))
        }
        Commands::Stop => {
            let pid = pidfile::stop_running()?;
            Ok(CliOutput::ok(format!("sent SIGTERM to process {pid}")))
        }
        Commands::Status => {
            let resolved = TrafficControlConfig::resolve(db_url)?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = status_cmd::run(&db_pool).await;
            db_pool.close().await;
            result
        }
        Commands::Task { command } => {
            let resolved = TrafficControlConfig::resolve(db_url)?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = match command {
                TaskCommands::Add { project_id, title, description, priority, complexity, blocked_by, tags } => {
                    task_cmd::add(&db_pool, &project_id, &title, &description, priority, &complexity, blocked_by.as_deref(), tags).await
                }
                TaskCommands::List { project_id } => task_cmd::list(&db_pool, &project_id).await,
                TaskCommands::Cancel { task_id } => task_cmd::cancel(&db_pool, &task_id).await,
                TaskCommands::Update { task_id, priority } => task_cmd::update(&db_pool, &task_id, priority).await,
            };
            db_pool.close().await;
            result
        }
        Commands::Project { command } => {
            let resolved = TrafficControlConfig::resolve(db_url)?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = match command {
                ProjectCommands::List => project_cmd::list(&db_pool).await,
                ProjectCommands::Create { name, priority, root_path } => project_cmd::create(&db_pool, &name, priority, &root_path).await,
                ProjectCommands::Pause { project_id } => project_cmd::pause(&db_pool, &project_id).await,
                ProjectCommands::Resume { project_id } => project_cmd::resume(&db_pool, &project_id).await,
                ProjectCommands::SetPriority { project_id, priority } => project_cmd::set_priority(&db_pool, &project_id, priority).await,
            };
            db_pool.close().await;
            result
        }
        Commands::Report { window_hours } => {
            let resolved = TrafficControlConfig::resolve(db_url)?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = report_cmd::run(&db_pool, window_hours).await;
            db_pool.close().await;
            result
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => config_cmd::show(db_url),
            ConfigCommands::Validate => config_cmd::validate(db_url),
        },
        Commands::Agent { command } => {
            let resolved = TrafficControlConfig::resolve(db_url)?;
            match command {
                AgentCommands::List => agent_cmd::list(&resolved).await,
                AgentCommands::Capacity => {
                    let db_pool = pool::create_pool(&resolved.db_config).await?;
                    let result = agent_cmd::capacity(&db_pool, &resolved).await;
                    db_pool.close().await;
                    result
                }
            }
        }
        Commands::Backlog { command } => {
            let resolved = TrafficControlConfig::resolve(db_url)?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = match command {
                BacklogCommands::Summary => backlog_cmd::summary(&db_pool).await,
            };
            db_pool.close().await;
            result
        }
        Commands::Proposal { command } => match command {
            ProposalCommands::List => {
                let resolved = TrafficControlConfig::resolve(db_url)?;
                let db_pool = pool::create_pool(&resolved.db_config).await?;
                let result = proposal_cmd::list(&db_pool).await;
                db_pool.close().await;
                result
            }
            ProposalCommands::Approve { project_id } => proposal_cmd::approve(&project_id).await,
            ProposalCommands::Reject { project_id } => proposal_cmd::reject(&project_id).await,
        },
        Commands::Dnd { command } => match command {
            DndCommands::On => dnd_cmd::on(),
            DndCommands::Off => dnd_cmd::off(),
            DndCommands::Status => dnd_cmd::status(),
        },
        Commands::Dashboard => {
            let resolved = TrafficControlConfig::resolve(db_url)?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = tui::run_dashboard(db_pool.clone()).await;
            db_pool.close().await;
            result?;
            Ok(CliOutput::ok("dashboard closed"))
        }
    }
}
