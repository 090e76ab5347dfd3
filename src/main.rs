//! vllm-fleet - Supervisor entry point

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use vllm_fleet::supervisor::InstanceState;
use vllm_fleet::{FleetConfig, Supervisor};

#[derive(Parser, Debug)]
#[command(name = "vllm-fleet")]
#[command(about = "Supervise per-GPU vLLM inference servers", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.json")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log format (json or pretty)
    #[arg(long, default_value = "json")]
    log_format: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Launch one GPU's server, or the whole fleet
    Start {
        /// GPU id (all configured GPUs if omitted)
        #[arg(long)]
        gpu: Option<String>,
    },

    /// Stop one GPU's server, or the whole fleet
    Stop {
        #[arg(long)]
        gpu: Option<String>,
    },

    /// Stop then relaunch one GPU's server, or the whole fleet
    Restart {
        #[arg(long)]
        gpu: Option<String>,
    },

    /// Report the state of every configured instance
    Status,

    /// Watch the fleet, warning on spontaneous exits
    Monitor {
        /// Check interval in seconds
        #[arg(long, default_value = "30")]
        interval: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.log_format.as_str() {
        "pretty" => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .json()
                .init();
        }
    }

    let config = FleetConfig::load(&cli.config)?;
    let supervisor = Arc::new(Supervisor::new(config, &cli.config));

    // Signal-driven termination always runs cleanup; shutdown() is
    // idempotent across the signal and fatal-error paths.
    tokio::select! {
        result = run(&cli.command, &supervisor) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Operation failed");
                supervisor.shutdown().await;
                std::process::exit(1);
            }
        }
        _ = shutdown_signal() => {
            supervisor.shutdown().await;
        }
    }

    Ok(())
}

async fn run(command: &Command, supervisor: &Supervisor) -> Result<()> {
    match command {
        Command::Start { gpu } => match gpu {
            Some(gpu_id) => {
                supervisor.start(gpu_id).await;
            }
            None => {
                supervisor.start_all(None).await;
            }
        },

        Command::Stop { gpu } => match gpu {
            Some(gpu_id) => {
                supervisor.stop(gpu_id).await;
            }
            None => {
                supervisor.stop_all().await;
            }
        },

        Command::Restart { gpu } => match gpu {
            Some(gpu_id) => {
                supervisor.restart(gpu_id).await;
            }
            None => {
                supervisor.restart_all().await;
            }
        },

        Command::Status => {
            print_status(supervisor).await;
        }

        Command::Monitor { interval } => {
            supervisor.monitor(Duration::from_secs(*interval)).await;
        }
    }

    Ok(())
}

async fn print_status(supervisor: &Supervisor) {
    println!("=== Fleet status ===");
    for report in supervisor.status().await {
        let state = match report.state {
            InstanceState::NotStarted => "not started",
            InstanceState::Running { .. } => "running",
            InstanceState::Stopped { .. } => "stopped",
        };

        println!("GPU {}: {}", report.gpu_id, state);
        println!("  model: {}", report.model);
        println!("  port: {}", report.port);
        if !report.description.is_empty() {
            println!("  description: {}", report.description);
        }
        match report.state {
            InstanceState::Running { pid } => println!("  pid: {pid}"),
            InstanceState::Stopped { exit_code: Some(code) } => println!("  exit code: {code}"),
            _ => {}
        }
        println!();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }
}
