//! App orchestration module.
//!
//! Wires a `Config` into a connection pool, a `Store`, and a running
//! `Supervisor` (C10), which owns the collector fleet for the life of
//! the process.

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use tracing::info;

use crate::app::config::Config;
use crate::core::store::Store;
use crate::core::supervisor::Supervisor;
use crate::error::Result;

/// Entry point for the `collect` subcommand.
pub struct App;

impl App {
    /// Build the store, run migrations, and drive the supervisor to
    /// completion (i.e. until a shutdown signal is observed).
    pub async fn run(config: Config) -> Result<()> {
        let pool = PgPoolOptions::new()
            .min_connections(config.database.min_pool_size)
            .max_connections(config.database.max_pool_size)
            .idle_timeout(Duration::from_secs(
                config.database.max_inactive_connection_lifetime_sec,
            ))
            .acquire_timeout(Duration::from_secs(config.database.command_timeout_sec))
            .connect(&config.database.url)
            .await?;

        let store = Arc::new(Store::new(pool));
        store.run_migrations().await?;
        info!("database ready");

        let supervisor = Supervisor::new(store, config);
        supervisor.run().await
    }
}
