//! Daemon supervisor (C10): runs the four polling collectors and the
//! trade listener as supervised tasks, restarting a crashed slot with
//! exponential backoff, logging aggregate health periodically, and
//! shutting every task down cleanly on SIGINT/SIGTERM.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::app::Config;
use crate::core::client::UpstreamClient;
use crate::core::collectors::metadata::MetadataCollector;
use crate::core::collectors::orderbook::OrderbookCollector;
use crate::core::collectors::prices::PriceCollector;
use crate::core::collectors::resolution::ResolutionCollector;
use crate::core::collectors::trades::TradeListener;
use crate::core::store::Store;
use crate::error::Result;

const RESTART_BASE_DELAY: Duration = Duration::from_secs(5);
const RESTART_MAX_DELAY: Duration = Duration::from_secs(60);
const MAX_RESTARTS: u32 = 5;
const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// Named, independently-restarted polling loops.
const POLL_SLOTS: &[&str] = &["metadata", "prices", "orderbooks", "resolutions"];

/// Per-collector counters tracked by the supervisor itself (as opposed
/// to a collector's own internal health, which only the trade listener
/// exposes). Updated after every `collect_once()` cycle and on every
/// slot crash/restart.
#[derive(Default)]
pub struct CollectorStats {
    total_items: AtomicU64,
    last_collect_ts: AtomicI64,
    error_count: AtomicU32,
    last_error: Mutex<Option<String>>,
}

impl CollectorStats {
    fn record_cycle(&self, items: usize) {
        self.total_items.fetch_add(items as u64, Ordering::Relaxed);
        self.last_collect_ts.store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    fn record_error(&self, message: String) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
        *self.last_error.lock() = Some(message);
    }

    fn snapshot(&self) -> CollectorStatsSnapshot {
        let millis = self.last_collect_ts.load(Ordering::Relaxed);
        CollectorStatsSnapshot {
            total_items: self.total_items.load(Ordering::Relaxed),
            last_collect_ts: if millis > 0 { Utc.timestamp_millis_opt(millis).single() } else { None },
            error_count: self.error_count.load(Ordering::Relaxed),
            last_error: self.last_error.lock().clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CollectorStatsSnapshot {
    pub total_items: u64,
    pub last_collect_ts: Option<DateTime<Utc>>,
    pub error_count: u32,
    pub last_error: Option<String>,
}

pub struct Supervisor {
    store: Arc<Store>,
    client: Arc<UpstreamClient>,
    config: Config,
}

impl Supervisor {
    pub fn new(store: Arc<Store>, config: Config) -> Self {
        let client = Arc::new(UpstreamClient::new(
            config.polymarket.gamma_host.clone(),
            config.polymarket.ws_host.clone(),
        ));
        Self { store, client, config }
    }

    /// Start every collector and block until a shutdown signal is
    /// observed, then stop everything cleanly.
    pub async fn run(&self) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let collector_stats: HashMap<&'static str, Arc<CollectorStats>> =
            POLL_SLOTS.iter().map(|&slot| (slot, Arc::new(CollectorStats::default()))).collect();

        let mut handles = Vec::new();
        for &slot in POLL_SLOTS {
            let store = self.store.clone();
            let client = self.client.clone();
            let config = self.config.clone();
            let stats = collector_stats[slot].clone();
            let mut shutdown_rx = shutdown_rx.clone();
            handles.push(tokio::spawn(async move {
                supervise_poll_slot(slot, store, client, config, stats, &mut shutdown_rx).await;
            }));
        }

        let trade_listener = TradeListener::new(
            self.store.clone(),
            self.client.clone(),
            self.config.collector.ws_max_instruments_per_conn,
            self.config.collector.trade_buffer_size,
            self.config.collector.trade_batch_drain_timeout_sec,
            self.config.collector.ws_ping_interval_sec,
        );
        let trade_health = trade_listener.health.clone();
        let mut trade_shutdown_rx = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            trade_listener
                .run(async move {
                    let _ = trade_shutdown_rx.changed().await;
                })
                .await;
        }));

        let mut health_shutdown_rx = shutdown_rx.clone();
        let health_collector_stats = collector_stats.clone();
        handles.push(tokio::spawn(async move {
            health_log_loop(trade_health, health_collector_stats, &mut health_shutdown_rx).await;
        }));

        info!(slots = POLL_SLOTS.len() + 1, "supervisor started");

        wait_for_shutdown_signal().await;
        info!("shutdown signal received, stopping collectors");
        let _ = shutdown_tx.send(true);

        for handle in handles {
            let _ = handle.await;
        }
        info!("supervisor stopped");
        Ok(())
    }
}

async fn supervise_poll_slot(
    name: &str,
    store: Arc<Store>,
    client: Arc<UpstreamClient>,
    config: Config,
    stats: Arc<CollectorStats>,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    let restarts = AtomicU32::new(0);
    loop {
        if *shutdown_rx.borrow() {
            return;
        }

        let result = run_poll_slot(name, store.clone(), client.clone(), &config, &stats, shutdown_rx).await;

        if *shutdown_rx.borrow() {
            return;
        }

        match result {
            Ok(()) => return,
            Err(e) => {
                let attempt = restarts.fetch_add(1, Ordering::SeqCst) + 1;
                error!(slot = name, attempt, error = %e, "collector slot crashed");
                stats.record_error(e.to_string());
                if attempt >= MAX_RESTARTS {
                    error!(slot = name, "exceeded max restarts, giving up on this slot");
                    return;
                }
                let delay = restart_delay(attempt);
                warn!(slot = name, delay_secs = delay.as_secs(), "restarting slot after backoff");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown_rx.changed() => return,
                }
            }
        }
    }
}

fn restart_delay(attempt: u32) -> Duration {
    let scaled = RESTART_BASE_DELAY.as_secs().saturating_mul(1u64 << attempt.min(10).saturating_sub(1));
    Duration::from_secs(scaled.min(RESTART_MAX_DELAY.as_secs()))
}

async fn run_poll_slot(
    name: &str,
    store: Arc<Store>,
    client: Arc<UpstreamClient>,
    config: &Config,
    stats: &CollectorStats,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Result<()> {
    let interval = Duration::from_secs(match name {
        "metadata" => config.collector.metadata_interval_sec,
        "prices" => config.collector.price_interval_sec,
        "orderbooks" => config.collector.orderbook_interval_sec,
        "resolutions" => config.collector.resolution_check_interval_sec,
        other => unreachable!("unknown poll slot {other}"),
    });

    let metadata = MetadataCollector::new(store.clone(), client.clone(), config.collector.max_markets);
    let prices = PriceCollector::new(store.clone(), client.clone(), config.collector.max_markets);
    let orderbooks = OrderbookCollector::new(store.clone(), client.clone());
    let resolutions = ResolutionCollector::new(store.clone(), client.clone());

    loop {
        let count = match name {
            "metadata" => metadata.collect_once().await,
            "prices" => prices.collect_once().await,
            "orderbooks" => orderbooks.collect_once().await,
            "resolutions" => resolutions.collect_once().await,
            other => unreachable!("unknown poll slot {other}"),
        };
        stats.record_cycle(count);
        info!(slot = name, count, "collection cycle complete");

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown_rx.changed() => return Ok(()),
        }
    }
}

async fn health_log_loop(
    trade_health: Arc<crate::core::collectors::trades::TradeListenerHealth>,
    collector_stats: HashMap<&'static str, Arc<CollectorStats>>,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(HEALTH_LOG_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for &slot in POLL_SLOTS {
                    let snapshot = collector_stats[slot].snapshot();
                    info!(
                        slot,
                        total_items = snapshot.total_items,
                        last_collect_ts = ?snapshot.last_collect_ts,
                        error_count = snapshot.error_count,
                        last_error = ?snapshot.last_error,
                        "health check"
                    );
                }
                let trades = trade_health.get_health();
                info!(
                    slot = "trades",
                    trades_received = trades.trades_received,
                    trades_inserted = trades.trades_inserted,
                    batches_inserted = trades.batches_inserted,
                    connections_active = trades.connections_active,
                    reconnections = trades.reconnections,
                    queue_depth = trades.queue_depth,
                    last_trade_ts = ?trades.last_trade_ts,
                    last_insert_ts = ?trades.last_insert_ts,
                    last_reconnect_ts = ?trades.last_reconnect_ts,
                    "health check"
                );
            }
            _ = shutdown_rx.changed() => return,
        }
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restart_delay_follows_documented_backoff_sequence() {
        let delays: Vec<u64> = (1..=7).map(|a| restart_delay(a).as_secs()).collect();
        assert_eq!(delays, vec![5, 10, 20, 40, 60, 60, 60]);
    }
}
