mod agent;
mod config;
mod gateway;
mod providers;
mod storage;

use crate::config::{Config, StorageBackend};
use crate::gateway::AppState;
use crate::providers::OpenAiClient;
use crate::storage::{EventLog, MemoryStore, MessageStore, SqliteStore};
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// WeChat official-account webhook bridge to OpenAI chat completions.
#[derive(Parser, Debug)]
#[command(name = "wxbridge", version, about, long_about = None)]
struct Cli {
    /// TOML config file; the environment still overrides individual fields.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the webhook gateway.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
    }
}

async fn serve(config: Config) -> Result<()> {
    let (messages, events): (Arc<dyn MessageStore>, Arc<dyn EventLog>) = match config.storage {
        StorageBackend::Sqlite => {
            let store = Arc::new(SqliteStore::open(&config.database_path)?);
            (store.clone(), store)
        }
        StorageBackend::Memory => {
            tracing::warn!("memory storage selected; history and dedup state die with the process");
            let store = Arc::new(MemoryStore::new());
            (store.clone(), store)
        }
    };

    let provider = Arc::new(OpenAiClient::new(
        &config.api_base,
        &config.openai_key,
        &config.model,
        config.max_token,
        Duration::from_secs(config.request_timeout_secs),
    )?);

    let bind = config.bind.clone();
    let state = AppState::new(Arc::new(config), messages, events, provider);
    gateway::serve(state, &bind).await
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}
