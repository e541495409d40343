//! Command-line interface definitions.

pub mod banner;
pub mod logs;
pub mod run;
pub mod status;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Prediction-market data collector and analytics daemon.
#[derive(Parser, Debug)]
#[command(name = "marketwatch")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Override log level (debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the collector daemon (foreground)
    Collect(CollectArgs),

    /// Show service status
    Status,

    /// Tail service logs
    Logs(LogsArgs),
}

/// Arguments for the `collect` subcommand.
#[derive(Parser, Debug)]
pub struct CollectArgs {
    /// Skip the startup banner
    #[arg(long)]
    pub no_banner: bool,

    /// Use JSON log format instead of pretty
    #[arg(long)]
    pub json_logs: bool,

    /// Override the database connection URL
    #[arg(long)]
    pub database_url: Option<String>,

    /// Override the maximum number of markets tracked per poll cycle
    #[arg(long)]
    pub max_markets: Option<usize>,
}

/// Arguments for the `logs` subcommand.
#[derive(Parser, Debug)]
pub struct LogsArgs {
    /// Number of lines to show
    #[arg(short = 'n', long, default_value = "50")]
    pub lines: u32,

    /// Follow log output (like tail -f)
    #[arg(short, long)]
    pub follow: bool,
}
