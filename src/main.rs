//! Hint Unlocks Server
//!
//! Serves hint purchases over HTTP

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use hint_unlocks::{Config, MemoryStandings, Storage, UnlockTransactor};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "unlocks-server")]
#[command(version)]
#[command(about = "Hint Unlocks - HTTP server", long_about = None)]
struct Args {
    /// Path to config.toml (embedded defaults when missing)
    #[arg(short, long, env = "UNLOCKS_CONFIG", default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = Config::load_from(&args.config)?;

    info!("Starting Hint Unlocks Server ({:?} mode)", config.competition.mode);

    let storage = Arc::new(
        Storage::open(&config.database.path, config.database.busy_timeout())
            .context("Failed to initialize storage")?,
    );
    info!("SQLite storage initialized at {}", config.database.path.display());

    let standings = Arc::new(MemoryStandings::new());
    let transactor = Arc::new(UnlockTransactor::from_config(&config, storage, standings)?);

    hint_unlocks::server::run_server(
        &config.server.host,
        config.server.port,
        transactor,
        config.competition.clone(),
    )
    .await?;

    Ok(())
}
