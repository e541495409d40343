//! Handler for the `collect` command.

use std::path::Path;

use crate::app::{App, Config};
use crate::cli::{banner, CollectArgs};
use crate::error::Result;
use tracing::info;

/// Execute the collect command.
pub async fn execute(config_path: &Path, log_level: Option<&str>, args: &CollectArgs) -> Result<()> {
    let mut config = Config::load(config_path)?;

    if let Some(level) = log_level {
        config.logging.level = level.to_string();
    }

    if args.json_logs {
        config.logging.format = "json".to_string();
    }
    if let Some(ref url) = args.database_url {
        config.database.url = url.clone();
    }
    if let Some(max_markets) = args.max_markets {
        config.collector.max_markets = max_markets;
    }

    config.init_logging();

    if !args.no_banner {
        banner::print_banner();
    }

    info!(
        gamma_host = %config.polymarket.gamma_host,
        ws_host = %config.polymarket.ws_host,
        "marketwatch starting"
    );

    App::run(config).await?;

    info!("marketwatch stopped");
    Ok(())
}
