//! fleet-client - Query and drive a running vLLM fleet

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use vllm_fleet::protocol::GenerationParams;
use vllm_fleet::ClientManager;

#[derive(Parser, Debug)]
#[command(name = "fleet-client")]
#[command(about = "Query and drive a running vLLM fleet", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.json")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List configured servers
    List,

    /// Check one server's health, or the whole fleet's
    Health {
        #[arg(long)]
        gpu: Option<String>,
    },

    /// Fetch one server's /info
    Info {
        #[arg(long)]
        gpu: String,
    },

    /// Generate text on a specific server or the best healthy one
    Generate {
        /// Prompt text
        #[arg(long)]
        prompt: String,

        /// Target GPU id (best healthy server if omitted)
        #[arg(long)]
        gpu: Option<String>,

        /// Ordered model-name preference terms
        #[arg(long, value_delimiter = ',')]
        model_preference: Option<Vec<String>>,

        #[arg(long, default_value = "2048")]
        max_tokens: u32,

        #[arg(long, default_value = "0.7")]
        temperature: f64,

        #[arg(long, default_value = "0.95")]
        top_p: f64,

        /// -1 disables top-k sampling
        #[arg(long, default_value = "-1", allow_hyphen_values = true)]
        top_k: i32,

        /// Stop sequences
        #[arg(long, value_delimiter = ',')]
        stop: Option<Vec<String>>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(&cli.log_level)
        .init();

    let manager = ClientManager::new(&cli.config)?;

    match cli.command {
        Command::List => {
            let servers = manager.list_servers()?;
            println!("{}", serde_json::to_string_pretty(&servers)?);
        }

        Command::Health { gpu } => {
            let health = manager.check_health(gpu.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&health)?);
        }

        Command::Info { gpu } => {
            let info = manager.server_info(&gpu).await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }

        Command::Generate {
            prompt,
            gpu,
            model_preference,
            max_tokens,
            temperature,
            top_p,
            top_k,
            stop,
        } => {
            let params = GenerationParams {
                max_tokens,
                temperature,
                top_p,
                top_k,
                stop,
            };

            let result = manager
                .generate(&prompt, gpu.as_deref(), model_preference.as_deref(), &params)
                .await?;

            println!("model: {}", result.model);
            println!("gpu: {}", result.gpu_id);
            println!("---");
            println!("{}", result.text);
        }
    }

    Ok(())
}
