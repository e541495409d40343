//! Application layer - configuration and top-level orchestration.

mod config;
mod orchestrator;

pub use config::{CollectorConfig, Config, DatabaseConfig, LoggingConfig, PolymarketConfig};
pub use orchestrator::App;
