//! Configuration loading for the Outpost service.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `OUTPOST_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, net::SocketAddr, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Literal `data_dir` value that keeps every actor store in memory.
pub const IN_MEMORY_DATA_DIR: &str = "memory";

/// Application configuration derived from `OUTPOST_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operator_tokens: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crypto_key: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storefront_webhook_secret: Option<String>,
    #[serde(default = "default_email_from")]
    pub email_from: String,
    #[serde(default)]
    pub actors: ActorConfig,
    #[serde(default)]
    pub launch: LaunchConfig,
    #[serde(default)]
    pub messaging: MessagingConfig,
}

/// Mailbox and call settings shared by every keyed actor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ActorConfig {
    /// Bounded mailbox size per actor (default: 256)
    ///
    /// Environment variable: `OUTPOST_ACTOR_MAILBOX_CAPACITY`
    #[serde(default = "default_actor_mailbox_capacity")]
    pub mailbox_capacity: usize,

    /// How long a caller waits for an actor reply before reporting an unknown outcome
    ///
    /// Environment variable: `OUTPOST_ACTOR_CALL_TIMEOUT_MS`
    #[serde(default = "default_actor_call_timeout_ms")]
    pub call_timeout_ms: u64,

    /// Quiet period after which an actor with a durable store is stopped; 0 keeps actors forever
    ///
    /// Environment variable: `OUTPOST_ACTOR_IDLE_TIMEOUT_MS`
    #[serde(default = "default_actor_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

impl ActorConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_ms > 0).then(|| Duration::from_millis(self.idle_timeout_ms))
    }

    /// Validate actor configuration bounds
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mailbox_capacity == 0 || self.mailbox_capacity > 10_000 {
            return Err(ConfigError::InvalidMailboxCapacity {
                value: self.mailbox_capacity,
            });
        }

        if self.call_timeout_ms < 100 || self.call_timeout_ms > 120_000 {
            return Err(ConfigError::InvalidCallTimeout {
                value: self.call_timeout_ms,
            });
        }

        if self.idle_timeout_ms != 0 && !(1_000..=86_400_000).contains(&self.idle_timeout_ms) {
            return Err(ConfigError::InvalidIdleTimeout {
                value: self.idle_timeout_ms,
            });
        }

        Ok(())
    }
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: default_actor_mailbox_capacity(),
            call_timeout_ms: default_actor_call_timeout_ms(),
            idle_timeout_ms: default_actor_idle_timeout_ms(),
        }
    }
}

/// Campaign launch fan-out configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct LaunchConfig {
    /// Maximum number of customers processed concurrently (default: 8)
    ///
    /// Environment variable: `OUTPOST_LAUNCH_CONCURRENCY`
    #[serde(default = "default_launch_concurrency")]
    pub concurrency: usize,
}

impl LaunchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 || self.concurrency > 64 {
            return Err(ConfigError::InvalidLaunchConcurrency {
                value: self.concurrency,
            });
        }
        Ok(())
    }
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_launch_concurrency(),
        }
    }
}

/// Outbound messaging provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct MessagingConfig {
    /// Base URL of the provider API. When unset, outbound sends are logged only.
    ///
    /// Environment variable: `OUTPOST_MESSAGING_PROVIDER_URL`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_url: Option<String>,

    /// Bearer token presented to the provider
    ///
    /// Environment variable: `OUTPOST_MESSAGING_PROVIDER_TOKEN`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_token: Option<String>,

    /// Sender identity (phone number or sender id) used as `from`
    ///
    /// Environment variable: `OUTPOST_MESSAGING_SENDER_ID`
    #[serde(default = "default_messaging_sender_id")]
    pub sender_id: String,

    /// Request timeout for provider calls
    ///
    /// Environment variable: `OUTPOST_MESSAGING_TIMEOUT_MS`
    #[serde(default = "default_messaging_timeout_ms")]
    pub timeout_ms: u64,
}

impl MessagingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(ref provider_url) = self.provider_url
            && let Err(err) = url::Url::parse(provider_url)
        {
            return Err(ConfigError::InvalidProviderUrl {
                value: provider_url.clone(),
                error: err.to_string(),
            });
        }

        if self.timeout_ms == 0 {
            return Err(ConfigError::InvalidMessagingTimeout {
                value: self.timeout_ms,
            });
        }

        Ok(())
    }
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            provider_url: None,
            provider_token: None,
            sender_id: default_messaging_sender_id(),
            timeout_ms: default_messaging_timeout_ms(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            api_bind_addr: default_api_bind_addr(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            data_dir: default_data_dir(),
            operator_tokens: Vec::new(),
            crypto_key: None,
            storefront_webhook_secret: None,
            email_from: default_email_from(),
            actors: ActorConfig::default(),
            launch: LaunchConfig::default(),
            messaging: MessagingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Returns the configured bind address as a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.api_bind_addr.parse()
    }

    /// Whether actor stores live in memory rather than on disk.
    pub fn in_memory_stores(&self) -> bool {
        self.data_dir == IN_MEMORY_DATA_DIR
    }

    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if !config.operator_tokens.is_empty() {
            config.operator_tokens = vec!["[REDACTED]".to_string()];
        }
        if config.crypto_key.is_some() {
            config.crypto_key = Some(b"[REDACTED]".to_vec());
        }
        if config.storefront_webhook_secret.is_some() {
            config.storefront_webhook_secret = Some("[REDACTED]".to_string());
        }
        if config.messaging.provider_token.is_some() {
            config.messaging.provider_token = Some("[REDACTED]".to_string());
        }
        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration, returning an error if required settings are missing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(ref key) = self.crypto_key {
            if key.len() != 32 {
                return Err(ConfigError::InvalidCryptoKeyLength { length: key.len() });
            }
        } else {
            return Err(ConfigError::MissingCryptoKey);
        }

        if self.operator_tokens.is_empty() {
            return Err(ConfigError::MissingOperatorTokens);
        }

        // Production profiles must be able to verify uninstall notifications
        if !matches!(self.profile.as_str(), "local" | "test")
            && self.storefront_webhook_secret.is_none()
        {
            return Err(ConfigError::MissingStorefrontWebhookSecret);
        }

        if self.data_dir.trim().is_empty() {
            return Err(ConfigError::MissingDataDir);
        }

        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            return Err(ConfigError::InvalidLogFormat {
                value: self.log_format.clone(),
            });
        }

        self.actors.validate()?;
        self.launch.validate()?;
        self.messaging.validate()?;

        Ok(())
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_api_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "sqlite://outpost.sqlite?mode=rwc".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_email_from() -> String {
    "no-reply@outpost.local".to_string()
}

fn default_actor_mailbox_capacity() -> usize {
    256
}

fn default_actor_call_timeout_ms() -> u64 {
    10_000 // 10 seconds
}

fn default_actor_idle_timeout_ms() -> u64 {
    300_000 // 5 minutes
}

fn default_launch_concurrency() -> usize {
    8
}

fn default_messaging_sender_id() -> String {
    "outpost".to_string()
}

fn default_messaging_timeout_ms() -> u64 {
    5000
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid api bind address '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("no operator tokens configured; set OUTPOST_OPERATOR_TOKEN or OUTPOST_OPERATOR_TOKENS")]
    MissingOperatorTokens,
    #[error("crypto key is missing; set OUTPOST_CRYPTO_KEY environment variable")]
    MissingCryptoKey,
    #[error("crypto key is invalid base64: {error}")]
    InvalidCryptoKeyBase64 { error: String },
    #[error("crypto key must decode to exactly 32 bytes, got {length} bytes")]
    InvalidCryptoKeyLength { length: usize },
    #[error(
        "storefront webhook secret is missing; set OUTPOST_STOREFRONT_WEBHOOK_SECRET environment variable"
    )]
    MissingStorefrontWebhookSecret,
    #[error("data directory is empty; set OUTPOST_DATA_DIR or use 'memory'")]
    MissingDataDir,
    #[error("log format must be 'json' or 'pretty', got '{value}'")]
    InvalidLogFormat { value: String },
    #[error("actor mailbox capacity must be between 1 and 10000, got {value}")]
    InvalidMailboxCapacity { value: usize },
    #[error("actor call timeout must be between 100 and 120000 ms, got {value}")]
    InvalidCallTimeout { value: u64 },
    #[error("actor idle timeout must be 0 or between 1000 and 86400000 ms, got {value}")]
    InvalidIdleTimeout { value: u64 },
    #[error("launch concurrency must be between 1 and 64, got {value}")]
    InvalidLaunchConcurrency { value: usize },
    #[error("messaging provider url '{value}' is invalid: {error}")]
    InvalidProviderUrl { value: String, error: String },
    #[error("messaging timeout must be positive, got {value}")]
    InvalidMessagingTimeout { value: u64 },
}

/// Loads configuration using layered `.env` files and `OUTPOST_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads and validates the layered configuration.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix("OUTPOST_") {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = layered
            .remove("PROFILE")
            .filter(|v| !v.is_empty())
            .unwrap_or(profile_hint);
        let api_bind_addr = layered
            .remove("API_BIND_ADDR")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_api_bind_addr);
        let log_level = layered
            .remove("LOG_LEVEL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_log_level);
        let log_format = layered
            .remove("LOG_FORMAT")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_log_format);
        let database_url = layered
            .remove("DATABASE_URL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_database_url);
        let db_max_connections = layered
            .remove("DB_MAX_CONNECTIONS")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_db_max_connections);
        let db_acquire_timeout_ms = layered
            .remove("DB_ACQUIRE_TIMEOUT_MS")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_db_acquire_timeout_ms);
        let data_dir = layered
            .remove("DATA_DIR")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_data_dir);

        // Handle operator tokens - support both single token and comma-separated list
        let operator_tokens = if let Some(tokens) = layered.remove("OPERATOR_TOKENS") {
            tokens
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        } else if let Some(token) = layered.remove("OPERATOR_TOKEN") {
            vec![token]
        } else {
            Vec::new()
        };

        let crypto_key = match layered.remove("CRYPTO_KEY") {
            Some(key_str) => {
                use base64::{Engine as _, engine::general_purpose};
                Some(general_purpose::STANDARD.decode(key_str.trim()).map_err(|e| {
                    ConfigError::InvalidCryptoKeyBase64 {
                        error: e.to_string(),
                    }
                })?)
            }
            None => None,
        };

        let storefront_webhook_secret = layered
            .remove("STOREFRONT_WEBHOOK_SECRET")
            .filter(|v| !v.trim().is_empty());
        let email_from = layered
            .remove("EMAIL_FROM")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_email_from);

        let actors = ActorConfig {
            mailbox_capacity: layered
                .remove("ACTOR_MAILBOX_CAPACITY")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_actor_mailbox_capacity),
            call_timeout_ms: layered
                .remove("ACTOR_CALL_TIMEOUT_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_actor_call_timeout_ms),
            idle_timeout_ms: layered
                .remove("ACTOR_IDLE_TIMEOUT_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_actor_idle_timeout_ms),
        };

        let launch = LaunchConfig {
            concurrency: layered
                .remove("LAUNCH_CONCURRENCY")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_launch_concurrency),
        };

        let messaging = MessagingConfig {
            provider_url: layered
                .remove("MESSAGING_PROVIDER_URL")
                .filter(|v| !v.trim().is_empty()),
            provider_token: layered
                .remove("MESSAGING_PROVIDER_TOKEN")
                .filter(|v| !v.trim().is_empty()),
            sender_id: layered
                .remove("MESSAGING_SENDER_ID")
                .filter(|v| !v.is_empty())
                .unwrap_or_else(default_messaging_sender_id),
            timeout_ms: layered
                .remove("MESSAGING_TIMEOUT_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_messaging_timeout_ms),
        };

        let config = AppConfig {
            profile,
            api_bind_addr,
            log_level,
            log_format,
            database_url,
            db_max_connections,
            db_acquire_timeout_ms,
            data_dir,
            operator_tokens,
            crypto_key,
            storefront_webhook_secret,
            email_from,
            actors,
            launch,
            messaging,
        };

        config.validate()?;

        match config.bind_addr() {
            Ok(_) => Ok(config),
            Err(source) => Err(ConfigError::InvalidBindAddr {
                value: config.api_bind_addr.clone(),
                source,
            }),
        }
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var("OUTPOST_PROFILE")
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix("OUTPOST_") {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
