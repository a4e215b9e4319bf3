//! # Outpost Main Entry Point

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use outpost::{
    config::ConfigLoader,
    db::{health_check, init_pool},
    migration::{Migrator, MigratorTrait},
    platform::{Platform, PlatformParts},
    server::run_server,
    telemetry::init_tracing,
};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "outpost", version, about = "Multi-tenant messaging and commerce backend")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Migrate the global store and serve the API (default)
    Serve,
    /// Migrate the global store and exit
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration from layered env files and variables
    let config = ConfigLoader::new().load()?;
    init_tracing(&config)?;

    info!(profile = %config.profile, "Configuration loaded");
    if let Ok(redacted_json) = config.redacted_json() {
        tracing::debug!(config = %redacted_json, "Effective configuration");
    }

    let db = Arc::new(init_pool(&config).await?);
    health_check(db.as_ref()).await?;
    Migrator::up(db.as_ref(), None)
        .await
        .context("Failed to migrate global store")?;
    info!("Global store migrated");

    match cli.command.unwrap_or(Command::Serve) {
        Command::Migrate => Ok(()),
        Command::Serve => {
            let parts = PlatformParts::from_config(&config, Arc::clone(&db))?;
            let platform = Platform::new(&config, parts)?;
            run_server(Arc::new(config), platform).await
        }
    }
}
