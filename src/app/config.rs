//! Application configuration loading and validation.
//!
//! Configuration is loaded from a TOML file. No secret values are
//! currently required by this crate, but the override mechanism
//! mirrors upstream practice: environment variables always win over
//! the file, should a future field need one.

use serde::Deserialize;
use std::path::Path;

use crate::error::{Error, Result};

/// Upstream venue endpoints and chain selection.
#[derive(Debug, Clone, Deserialize)]
pub struct PolymarketConfig {
    #[serde(default = "default_clob_host")]
    pub clob_host: String,
    #[serde(default = "default_gamma_host")]
    pub gamma_host: String,
    #[serde(default = "default_data_host")]
    pub data_host: String,
    #[serde(default = "default_ws_host")]
    pub ws_host: String,
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
}

fn default_clob_host() -> String {
    "https://clob.polymarket.com".into()
}

fn default_gamma_host() -> String {
    "https://gamma-api.polymarket.com".into()
}

fn default_data_host() -> String {
    "https://data-api.polymarket.com".into()
}

fn default_ws_host() -> String {
    "wss://ws-subscriptions-clob.polymarket.com".into()
}

fn default_chain_id() -> u64 {
    137
}

impl Default for PolymarketConfig {
    fn default() -> Self {
        Self {
            clob_host: default_clob_host(),
            gamma_host: default_gamma_host(),
            data_host: default_data_host(),
            ws_host: default_ws_host(),
            chain_id: default_chain_id(),
        }
    }
}

/// Store connection-pool configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_min_pool_size")]
    pub min_pool_size: u32,
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: u32,
    #[serde(default = "default_max_inactive_connection_lifetime_sec")]
    pub max_inactive_connection_lifetime_sec: u64,
    #[serde(default = "default_command_timeout_sec")]
    pub command_timeout_sec: u64,
}

fn default_database_url() -> String {
    "postgres://localhost/marketwatch".into()
}

fn default_min_pool_size() -> u32 {
    2
}

fn default_max_pool_size() -> u32 {
    10
}

fn default_max_inactive_connection_lifetime_sec() -> u64 {
    300
}

fn default_command_timeout_sec() -> u64 {
    60
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            min_pool_size: default_min_pool_size(),
            max_pool_size: default_max_pool_size(),
            max_inactive_connection_lifetime_sec: default_max_inactive_connection_lifetime_sec(),
            command_timeout_sec: default_command_timeout_sec(),
        }
    }
}

/// Collector cadences and buffer sizes.
#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    #[serde(default = "default_price_interval_sec")]
    pub price_interval_sec: u64,
    #[serde(default = "default_orderbook_interval_sec")]
    pub orderbook_interval_sec: u64,
    #[serde(default = "default_metadata_interval_sec")]
    pub metadata_interval_sec: u64,
    #[serde(default = "default_resolution_check_interval_sec")]
    pub resolution_check_interval_sec: u64,
    #[serde(default = "default_trade_buffer_size")]
    pub trade_buffer_size: usize,
    #[serde(default = "default_max_markets")]
    pub max_markets: usize,
    #[serde(default = "default_ws_ping_interval_sec")]
    pub ws_ping_interval_sec: u64,
    #[serde(default = "default_ws_max_instruments_per_conn")]
    pub ws_max_instruments_per_conn: usize,
    #[serde(default = "default_trade_batch_drain_timeout_sec")]
    pub trade_batch_drain_timeout_sec: f64,
}

fn default_price_interval_sec() -> u64 {
    60
}

fn default_orderbook_interval_sec() -> u64 {
    300
}

fn default_metadata_interval_sec() -> u64 {
    300
}

fn default_resolution_check_interval_sec() -> u64 {
    300
}

fn default_trade_buffer_size() -> usize {
    1000
}

fn default_max_markets() -> usize {
    10_000
}

fn default_ws_ping_interval_sec() -> u64 {
    10
}

fn default_ws_max_instruments_per_conn() -> usize {
    500
}

fn default_trade_batch_drain_timeout_sec() -> f64 {
    5.0
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            price_interval_sec: default_price_interval_sec(),
            orderbook_interval_sec: default_orderbook_interval_sec(),
            metadata_interval_sec: default_metadata_interval_sec(),
            resolution_check_interval_sec: default_resolution_check_interval_sec(),
            trade_buffer_size: default_trade_buffer_size(),
            max_markets: default_max_markets(),
            ws_ping_interval_sec: default_ws_ping_interval_sec(),
            ws_max_instruments_per_conn: default_ws_max_instruments_per_conn(),
            trade_batch_drain_timeout_sec: default_trade_batch_drain_timeout_sec(),
        }
    }
}

/// Logging sink configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u64,
    #[serde(default = "default_backup_count")]
    pub backup_count: u32,
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

fn default_max_size_mb() -> u64 {
    100
}

fn default_backup_count() -> u32 {
    5
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
            max_size_mb: default_max_size_mb(),
            backup_count: default_backup_count(),
        }
    }
}

/// Top-level configuration, deserialised from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub polymarket: PolymarketConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            polymarket: PolymarketConfig::default(),
            database: DatabaseConfig::default(),
            collector: CollectorConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, falling back to defaults
    /// for any field the file omits.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.polymarket.ws_host.is_empty() {
            return Err(Error::Config("polymarket.ws_host must not be empty".into()));
        }
        if self.polymarket.gamma_host.is_empty() {
            return Err(Error::Config(
                "polymarket.gamma_host must not be empty".into(),
            ));
        }
        if self.database.url.is_empty() {
            return Err(Error::Config("database.url must not be empty".into()));
        }
        if self.database.max_pool_size == 0 {
            return Err(Error::Config(
                "database.max_pool_size must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Initialise the global `tracing` subscriber from this config's
    /// logging section. `RUST_LOG` takes precedence over
    /// `logging.level` when set.
    pub fn init_logging(&self) {
        use tracing_subscriber::{fmt, EnvFilter};

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.logging.level));

        match self.logging.format.as_str() {
            "json" => {
                fmt().json().with_env_filter(filter).init();
            }
            _ => {
                fmt().with_env_filter(filter).init();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn load_parses_partial_toml_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[database]\nurl = \"postgres://x/y\"\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.database.url, "postgres://x/y");
        assert_eq!(config.collector.price_interval_sec, 60);
        assert_eq!(config.polymarket.chain_id, 137);
    }

    #[test]
    fn rejects_empty_database_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[database]\nurl = \"\"\n").unwrap();

        assert!(Config::load(&path).is_err());
    }
}
