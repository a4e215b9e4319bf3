//! Database connection management.
//!
//! Two kinds of stores exist: the shared global store (registry and membership
//! tables) reached through [`init_pool`], and the embedded per-actor SQLite
//! stores opened by [`open_embedded_store`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use migration::MigratorTrait;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection};
use tokio::time::sleep;

use crate::config::{AppConfig, IN_MEMORY_DATA_DIR};
use crate::error::DomainError;

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Failed to connect to database: {source}")]
    ConnectionFailed {
        #[from]
        source: sea_orm::DbErr,
    },
    #[error("Database connection timeout after {timeout_ms}ms")]
    ConnectionTimeout { timeout_ms: u64 },
    #[error("Invalid database configuration: {message}")]
    InvalidConfiguration { message: String },
}

/// Idle and lifetime limit for pools that must never recycle their connection.
const PINNED_CONNECTION_LIFETIME: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Initializes the global store connection pool.
///
/// Retries transient connection failures with exponential backoff. An
/// in-memory SQLite URL is pinned to a single connection so every caller
/// sees the same database.
pub async fn init_pool(cfg: &AppConfig) -> Result<DatabaseConnection> {
    if cfg.database_url.is_empty() {
        return Err(DatabaseError::InvalidConfiguration {
            message: "Database URL cannot be empty".to_string(),
        }
        .into());
    }

    let in_memory = cfg.database_url.contains(":memory:");
    let (max_connections, idle_timeout, max_lifetime) = if in_memory {
        (1, PINNED_CONNECTION_LIFETIME, PINNED_CONNECTION_LIFETIME)
    } else {
        (
            cfg.db_max_connections,
            Duration::from_secs(600),  // 10 minutes
            Duration::from_secs(1800), // 30 minutes
        )
    };

    let mut opt = ConnectOptions::new(&cfg.database_url);
    opt.max_connections(max_connections)
        .acquire_timeout(Duration::from_millis(cfg.db_acquire_timeout_ms))
        .idle_timeout(idle_timeout)
        .max_lifetime(max_lifetime)
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);

    let max_retries = 5;
    let mut retry_delay = Duration::from_millis(100);

    for attempt in 1..=max_retries {
        match Database::connect(opt.clone()).await {
            Ok(conn) => {
                log::info!("Successfully connected to global store (attempt {})", attempt);
                return Ok(conn);
            }
            Err(e) => {
                if attempt == max_retries {
                    log::error!(
                        "Failed to connect to global store after {} attempts: {}",
                        max_retries,
                        e
                    );
                    return Err(DatabaseError::ConnectionFailed { source: e }.into());
                }

                log::warn!(
                    "Global store connection attempt {} failed: {}, retrying in {:?}",
                    attempt,
                    e,
                    retry_delay
                );

                sleep(retry_delay).await;
                retry_delay *= 2;
            }
        }
    }

    Err(DatabaseError::ConnectionTimeout {
        timeout_ms: cfg.db_acquire_timeout_ms,
    }
    .into())
}

/// Where an actor's embedded store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    InMemory,
    File(PathBuf),
}

impl StoreLocation {
    /// Resolves `relative` under `data_dir`, or in memory when `data_dir` is `memory`.
    pub fn resolve(data_dir: &str, relative: impl AsRef<Path>) -> Self {
        if data_dir == IN_MEMORY_DATA_DIR {
            StoreLocation::InMemory
        } else {
            StoreLocation::File(Path::new(data_dir).join(relative))
        }
    }

    /// Whether the store outlives its connection.
    pub fn is_durable(&self) -> bool {
        matches!(self, StoreLocation::File(_))
    }

    fn url(&self) -> String {
        match self {
            StoreLocation::InMemory => "sqlite::memory:".to_string(),
            StoreLocation::File(path) => format!("sqlite://{}?mode=rwc", path.display()),
        }
    }
}

/// Opens an actor's embedded store and prepares its schema with migrator `M`.
///
/// Embedded stores are only ever touched by their owning actor, so a single
/// connection is enough.
pub async fn open_embedded_store<M: MigratorTrait>(
    location: &StoreLocation,
) -> Result<DatabaseConnection, DomainError> {
    if let StoreLocation::File(path) = location
        && let Some(parent) = path.parent()
    {
        tokio::fs::create_dir_all(parent).await.map_err(|err| {
            tracing::error!(path = %parent.display(), error = %err, "Failed to create store directory");
            DomainError::TransientStore(format!("cannot create store directory: {err}"))
        })?;
    }

    let db = Database::connect(embedded_options(location)).await?;
    M::up(&db, None).await?;

    Ok(db)
}

fn embedded_options(location: &StoreLocation) -> ConnectOptions {
    let mut opt = ConnectOptions::new(location.url());
    opt.max_connections(1)
        .min_connections(1)
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Trace);
    if !location.is_durable() {
        // An in-memory database dies with its connection
        opt.idle_timeout(PINNED_CONNECTION_LIFETIME)
            .max_lifetime(PINNED_CONNECTION_LIFETIME);
    }
    opt
}

/// Health check for the database connection.
pub async fn health_check(db: &DatabaseConnection) -> Result<()> {
    use sea_orm::Statement;

    let stmt = Statement::from_string(db.get_database_backend(), "SELECT 1".to_string());

    db.query_one(stmt)
        .await
        .context("Database health check failed")?;

    Ok(())
}
