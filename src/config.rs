//! Configuration for the notification subsystem.

use std::{fmt, time::Duration};

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use pawpost_delivery::{cipher::KEY_SIZE, ClientConfig, DispatchConfig, RetryPolicy};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "config.toml";

/// Subsystem configuration with defaults, file, and environment overrides.
///
/// Configuration is loaded in priority order:
/// 1. Environment variables (highest priority)
/// 2. Configuration file (`config.toml`)
/// 3. Built-in defaults (lowest priority)
///
/// Only the encryption key has no usable default; loading fails without it.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    // Secrets
    /// Symmetric key for subscriber secrets, exactly 32 bytes.
    ///
    /// Environment variable: `CRYPTO_KEY` (or `ENCRYPTION_KEY`)
    #[serde(default)]
    pub encryption_key: String,

    // Database
    /// PostgreSQL connection URL.
    ///
    /// Environment variable: `DATABASE_CONNECTION_STRING` (or `DATABASE_URL`)
    #[serde(default = "default_database_url")]
    pub database_url: String,
    /// Maximum number of database connections in the pool.
    ///
    /// Environment variable: `DATABASE_MAX_CONNECTIONS`
    #[serde(default = "default_max_connections")]
    pub database_max_connections: u32,
    /// Database connection acquire timeout in seconds.
    ///
    /// Environment variable: `DATABASE_CONNECTION_TIMEOUT`
    #[serde(default = "default_acquire_timeout")]
    pub database_connection_timeout: u64,

    // Delivery
    /// HTTP timeout for one delivery attempt in seconds.
    ///
    /// Environment variable: `DELIVERY_TIMEOUT_SECONDS`
    #[serde(default = "default_delivery_timeout")]
    pub delivery_timeout_seconds: u64,
    /// Attempts per subscriber, including the first.
    ///
    /// Environment variable: `MAX_DELIVERY_ATTEMPTS`
    #[serde(default = "default_delivery_attempts")]
    pub max_delivery_attempts: u32,
    /// Fixed pause between attempts in milliseconds.
    ///
    /// Environment variable: `RETRY_DELAY_MS`
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Whether 4xx responses are retried.
    ///
    /// Environment variable: `RETRY_CLIENT_ERRORS`
    #[serde(default = "default_retry_client_errors")]
    pub retry_client_errors: bool,
    /// Subscriber pipelines allowed to run at once.
    ///
    /// Environment variable: `MAX_CONCURRENT_DELIVERIES`
    #[serde(default = "default_max_concurrent_deliveries")]
    pub max_concurrent_deliveries: usize,
    /// Time given to in-flight deliveries on shutdown, in seconds.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT_SECONDS`
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_seconds: u64,

    // Logging
    /// Log level configuration.
    ///
    /// Environment variable: `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub rust_log: String,
}

impl Config {
    /// Load configuration from defaults, config file, and environment variable
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns error if a source cannot be parsed or validation fails.
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(""))
            .merge(Env::raw().only(&["DATABASE_CONNECTION_STRING"]).map(|_| "database_url".into()))
            .merge(Env::raw().only(&["CRYPTO_KEY"]).map(|_| "encryption_key".into()));

        let config: Self = figment.extract().context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Convert to client configuration.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            timeout: Duration::from_secs(self.delivery_timeout_seconds),
            ..ClientConfig::default()
        }
    }

    /// Convert to retry policy.
    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_delivery_attempts,
            delay: Duration::from_millis(self.retry_delay_ms),
            retry_client_errors: self.retry_client_errors,
        }
    }

    /// Convert to dispatcher configuration.
    pub fn to_dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            retry_policy: self.to_retry_policy(),
            max_concurrent_deliveries: self.max_concurrent_deliveries,
        }
    }

    /// Grace period for in-flight deliveries on shutdown.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }

    /// Get database URL with password masked for logging.
    pub fn database_url_masked(&self) -> String {
        if let Some(at_pos) = self.database_url.find('@') {
            if let Some(colon_pos) = self.database_url[..at_pos].rfind(':') {
                let mut masked = self.database_url.clone();
                masked.replace_range(colon_pos + 1..at_pos, "***");
                return masked;
            }
        }
        self.database_url.clone()
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns error describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.encryption_key.is_empty() {
            anyhow::bail!("encryption key is not configured (set CRYPTO_KEY)");
        }

        if self.encryption_key.len() != KEY_SIZE {
            anyhow::bail!(
                "encryption key must be exactly {KEY_SIZE} bytes, got {}",
                self.encryption_key.len()
            );
        }

        if self.database_max_connections == 0 {
            anyhow::bail!("database max_connections must be greater than 0");
        }

        if self.max_delivery_attempts == 0 {
            anyhow::bail!("max_delivery_attempts must be greater than 0");
        }

        if self.max_concurrent_deliveries == 0 {
            anyhow::bail!("max_concurrent_deliveries must be greater than 0");
        }

        if self.delivery_timeout_seconds == 0 {
            anyhow::bail!("delivery_timeout_seconds must be greater than 0");
        }

        Ok(())
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("encryption_key", &"[REDACTED]")
            .field("database_url", &self.database_url_masked())
            .field("database_max_connections", &self.database_max_connections)
            .field("database_connection_timeout", &self.database_connection_timeout)
            .field("delivery_timeout_seconds", &self.delivery_timeout_seconds)
            .field("max_delivery_attempts", &self.max_delivery_attempts)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("retry_client_errors", &self.retry_client_errors)
            .field("max_concurrent_deliveries", &self.max_concurrent_deliveries)
            .field("shutdown_timeout_seconds", &self.shutdown_timeout_seconds)
            .field("rust_log", &self.rust_log)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            encryption_key: String::new(),
            database_url: default_database_url(),
            database_max_connections: default_max_connections(),
            database_connection_timeout: default_acquire_timeout(),
            delivery_timeout_seconds: default_delivery_timeout(),
            max_delivery_attempts: default_delivery_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            retry_client_errors: default_retry_client_errors(),
            max_concurrent_deliveries: default_max_concurrent_deliveries(),
            shutdown_timeout_seconds: default_shutdown_timeout(),
            rust_log: default_log_level(),
        }
    }
}

fn default_database_url() -> String {
    "postgresql://localhost/pawpost".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_acquire_timeout() -> u64 {
    10
}

fn default_delivery_timeout() -> u64 {
    pawpost_delivery::DEFAULT_TIMEOUT_SECONDS
}

fn default_delivery_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    2000
}

fn default_retry_client_errors() -> bool {
    true
}

fn default_max_concurrent_deliveries() -> usize {
    pawpost_delivery::DEFAULT_MAX_CONCURRENT_DELIVERIES
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}
