//! Canonical test configuration.
//!
//! Single source of truth for the `Config` used across tests. Avoids
//! each test module defining its own slightly-different defaults.

use crate::app::{CollectorConfig, Config};

/// A config with every collector cadence collapsed to a few
/// milliseconds, so tests don't wait out real poll intervals.
pub fn fast_config() -> Config {
    Config {
        collector: CollectorConfig {
            price_interval_sec: 0,
            orderbook_interval_sec: 0,
            metadata_interval_sec: 0,
            resolution_check_interval_sec: 0,
            trade_buffer_size: 10,
            max_markets: 100,
            ws_ping_interval_sec: 1,
            ws_max_instruments_per_conn: 10,
            trade_batch_drain_timeout_sec: 0.1,
        },
        ..Config::default()
    }
}
