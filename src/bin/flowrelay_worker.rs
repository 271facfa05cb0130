//! # FlowRelay Worker
//!
//! Command-line entry point for the worker process.
//!
//! ## Usage
//!
//! ```bash
//! # Run one worker with config/worker.yaml
//! flowrelay-worker run
//!
//! # Run four worker processes under a supervisor
//! FLOWRELAY_ENV=production flowrelay-worker spawn --processes 4
//!
//! # Generate a channel key pair / validate configuration
//! flowrelay-worker keygen
//! flowrelay-worker check-config --config-dir ./config
//! ```

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::AsyncReadExt;
use tokio::signal;
use tracing::{error, info};

use flowrelay_worker::channel::generate_key_pair;
use flowrelay_worker::config::ConfigManager;
use flowrelay_worker::logging::init_structured_logging;
use flowrelay_worker::worker::{Supervisor, WorkerBootstrap};

#[derive(Parser)]
#[command(name = "flowrelay-worker")]
#[command(about = "Workflow execution worker")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration directory (default: $FLOWRELAY_CONFIG_DIR or ./config)
    #[arg(short, long, global = true)]
    config_dir: Option<PathBuf>,

    /// Environment selecting worker.<environment>.yaml
    #[arg(short, long, global = true, env = "FLOWRELAY_ENV")]
    environment: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single worker until SIGINT/SIGTERM
    Run {
        /// Override worker.id from configuration
        #[arg(long)]
        worker_id: Option<u32>,

        /// Also stop when stdin closes (set by the supervisor)
        #[arg(long, hide = true)]
        supervised: bool,
    },

    /// Run several worker processes under a supervisor
    Spawn {
        /// Override supervisor.processes from configuration
        #[arg(short, long)]
        processes: Option<u32>,
    },

    /// Generate a channel key pair
    Keygen {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Load and validate configuration, then print it with secrets masked
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Keygen { json } => keygen(json),
        Commands::CheckConfig => check_config(&cli.config_dir, &cli.environment),
        Commands::Run {
            worker_id,
            supervised,
        } => run(&cli.config_dir, &cli.environment, worker_id, supervised).await,
        Commands::Spawn { processes } => spawn(&cli.config_dir, &cli.environment, processes).await,
    }
}

fn load_config(
    config_dir: &Option<PathBuf>,
    environment: &Option<String>,
) -> anyhow::Result<Arc<ConfigManager>> {
    let environment = environment
        .clone()
        .unwrap_or_else(ConfigManager::detect_environment);
    ConfigManager::load_from_directory_with_env(config_dir.clone(), &environment)
        .context("Failed to load worker configuration")
}

fn keygen(json: bool) -> anyhow::Result<()> {
    let pair = generate_key_pair();
    if json {
        println!(
            "{}",
            serde_json::json!({
                "private_key": pair.private_key,
                "public_key": pair.public_key,
            })
        );
    } else {
        println!("private_key: {}", pair.private_key);
        println!("public_key:  {}", pair.public_key);
    }
    Ok(())
}

fn check_config(config_dir: &Option<PathBuf>, environment: &Option<String>) -> anyhow::Result<()> {
    let manager = load_config(config_dir, environment)?;
    println!("✅ Configuration valid (environment: {})", manager.environment());
    println!("{}", serde_json::to_string_pretty(&manager.debug_config())?);
    Ok(())
}

async fn run(
    config_dir: &Option<PathBuf>,
    environment: &Option<String>,
    worker_id: Option<u32>,
    supervised: bool,
) -> anyhow::Result<()> {
    let manager = load_config(config_dir, environment)?;
    let mut config = manager.config().clone();
    if let Some(worker_id) = worker_id {
        config.worker.id = worker_id;
    }
    init_structured_logging(config.logging.format, config.logging.level.as_deref());

    info!("🚀 Starting FlowRelay worker");
    info!("   Version: {}", env!("CARGO_PKG_VERSION"));
    info!("   Environment: {}", manager.environment());
    info!("   Identity: {}", config.worker.identity());

    let worker = WorkerBootstrap::from_config(&config)
        .await
        .context("Failed to bootstrap worker")?;

    let report = worker
        .run_until(async {
            if supervised {
                tokio::select! {
                    _ = shutdown_signal() => {},
                    _ = stdin_closed() => info!("Supervisor closed stdin"),
                }
            } else {
                shutdown_signal().await;
            }
        })
        .await;

    info!(
        drained = report.drained,
        aborted = report.aborted,
        workflows_executed = report.workflows_executed,
        "👋 Worker shutdown complete"
    );
    if worker.has_lost_inbound() {
        anyhow::bail!("{} lost its dispatcher connection", worker.identity());
    }
    Ok(())
}

async fn spawn(
    config_dir: &Option<PathBuf>,
    environment: &Option<String>,
    processes: Option<u32>,
) -> anyhow::Result<()> {
    let manager = load_config(config_dir, environment)?;
    let config = manager.config();
    init_structured_logging(config.logging.format, config.logging.level.as_deref());

    let processes = processes.unwrap_or(config.supervisor.processes).max(1);
    let base_args: Vec<OsString> = vec![
        "--config-dir".into(),
        manager.config_directory().as_os_str().to_os_string(),
        "--environment".into(),
        manager.environment().into(),
    ];

    let mut supervisor = Supervisor::for_current_exe(
        config.worker.id,
        processes,
        config.supervisor.kill_grace(),
        base_args,
    )?;
    supervisor.spawn_all().await?;
    info!(processes = processes, "🎉 Worker processes started; press Ctrl+C to stop");

    let signal = shutdown_signal();
    tokio::pin!(signal);
    loop {
        tokio::select! {
            _ = &mut signal => break,
            exited = supervisor.wait_any() => {
                if exited.is_none() || supervisor.running() == 0 {
                    error!("All worker processes have exited");
                    break;
                }
            }
        }
    }

    let report = supervisor.shutdown().await;
    info!(exited = report.exited, killed = report.killed, "👋 Supervisor shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        },
        _ = terminate => {
            info!("Received SIGTERM");
        },
    }
}

/// Resolves once stdin reaches EOF
async fn stdin_closed() {
    let mut stdin = tokio::io::stdin();
    let mut buffer = [0u8; 256];
    loop {
        match stdin.read(&mut buffer).await {
            Ok(0) | Err(_) => return,
            Ok(_) => continue,
        }
    }
}
