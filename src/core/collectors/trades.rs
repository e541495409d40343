//! WebSocket trade listener (C9): subscribes to the CLOB market
//! channel across a pool of connections (chunked by
//! `ws_max_instruments_per_conn`), decouples receipt from the DB via a
//! bounded `mpsc` channel, and drains it into batched `COPY` inserts.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use futures_util::StreamExt;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::core::client::{send_app_ping, send_subscription, UpstreamClient};
use crate::core::domain::{Trade, TradeSide};
use crate::core::store::Store;

const QUEUE_CAPACITY: usize = 10_000;

/// A point-in-time read of [`TradeListenerHealth`]'s counters, with
/// the queue depth filled in.
#[derive(Debug, Clone, Serialize)]
pub struct TradeListenerHealthSnapshot {
    pub trades_received: u64,
    pub trades_inserted: u64,
    pub batches_inserted: u64,
    pub connections_active: i64,
    pub reconnections: u64,
    pub last_trade_ts: Option<DateTime<Utc>>,
    pub last_insert_ts: Option<DateTime<Utc>>,
    pub last_reconnect_ts: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
    pub queue_depth: i64,
}

/// Observable counters, updated in place by the listener's internal
/// tasks and snapshotted on demand by the supervisor's health log.
pub struct TradeListenerHealth {
    pub trades_received: AtomicU64,
    pub trades_inserted: AtomicU64,
    pub batches_inserted: AtomicU64,
    pub connections_active: AtomicI64,
    pub reconnections: AtomicU64,
    pub last_trade_ts: AtomicI64,
    pub last_insert_ts: AtomicI64,
    pub last_reconnect_ts: AtomicI64,
    pub started_at: AtomicI64,
    pub queue_depth: AtomicI64,
}

impl TradeListenerHealth {
    fn new() -> Self {
        Self {
            trades_received: AtomicU64::new(0),
            trades_inserted: AtomicU64::new(0),
            batches_inserted: AtomicU64::new(0),
            connections_active: AtomicI64::new(0),
            reconnections: AtomicU64::new(0),
            last_trade_ts: AtomicI64::new(0),
            last_insert_ts: AtomicI64::new(0),
            last_reconnect_ts: AtomicI64::new(0),
            started_at: AtomicI64::new(Utc::now().timestamp_millis()),
            queue_depth: AtomicI64::new(0),
        }
    }

    /// A snapshot of every counter, with absent-timestamp fields (never
    /// set) reported as `None`.
    pub fn get_health(&self) -> TradeListenerHealthSnapshot {
        TradeListenerHealthSnapshot {
            trades_received: self.trades_received.load(Ordering::Relaxed),
            trades_inserted: self.trades_inserted.load(Ordering::Relaxed),
            batches_inserted: self.batches_inserted.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            reconnections: self.reconnections.load(Ordering::Relaxed),
            last_trade_ts: millis_to_ts(self.last_trade_ts.load(Ordering::Relaxed)),
            last_insert_ts: millis_to_ts(self.last_insert_ts.load(Ordering::Relaxed)),
            last_reconnect_ts: millis_to_ts(self.last_reconnect_ts.load(Ordering::Relaxed)),
            started_at: millis_to_ts(self.started_at.load(Ordering::Relaxed))
                .unwrap_or_else(Utc::now),
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
        }
    }
}

fn millis_to_ts(millis: i64) -> Option<DateTime<Utc>> {
    if millis <= 0 {
        return None;
    }
    Utc.timestamp_millis_opt(millis).single()
}

pub struct TradeListener {
    store: Arc<Store>,
    client: Arc<UpstreamClient>,
    ws_max_instruments_per_conn: usize,
    trade_buffer_size: usize,
    trade_batch_drain_timeout: Duration,
    ws_ping_interval: Duration,
    pub health: Arc<TradeListenerHealth>,
}

impl TradeListener {
    pub fn new(
        store: Arc<Store>,
        client: Arc<UpstreamClient>,
        ws_max_instruments_per_conn: usize,
        trade_buffer_size: usize,
        trade_batch_drain_timeout_sec: f64,
        ws_ping_interval_sec: u64,
    ) -> Self {
        Self {
            store,
            client,
            ws_max_instruments_per_conn,
            trade_buffer_size,
            trade_batch_drain_timeout: Duration::from_secs_f64(trade_batch_drain_timeout_sec),
            ws_ping_interval: Duration::from_secs(ws_ping_interval_sec),
            health: Arc::new(TradeListenerHealth::new()),
        }
    }

    /// Run until `shutdown` resolves. Fetches the current active token
    /// set, opens one connection per chunk plus a shared drain task,
    /// then flushes any trades still queued when every task exits.
    pub async fn run(&self, shutdown: impl std::future::Future<Output = ()>) {
        let token_ids = match self.store.get_active_markets().await {
            Ok(markets) => {
                let mut set = HashSet::new();
                for m in markets {
                    set.extend(m.outcome_tokens);
                }
                set.into_iter().collect::<Vec<_>>()
            }
            Err(e) => {
                warn!(error = %e, "trade listener: failed to load active tokens");
                Vec::new()
            }
        };
        if token_ids.is_empty() {
            warn!("no active tokens found, trade listener not starting");
            return;
        }

        let (tx, rx) = mpsc::channel::<Trade>(QUEUE_CAPACITY);

        let chunks: Vec<Vec<String>> = token_ids
            .chunks(self.ws_max_instruments_per_conn)
            .map(|c| c.to_vec())
            .collect();
        info!(connections = chunks.len(), tokens = token_ids.len(), "starting trade listener");

        let mut listener_handles: Vec<JoinHandle<()>> = Vec::new();
        for chunk in chunks {
            let client = self.client.clone();
            let tx = tx.clone();
            let health = self.health.clone();
            let ping_interval = self.ws_ping_interval;
            listener_handles.push(tokio::spawn(async move {
                listen_single(client, chunk, tx, health, ping_interval).await;
            }));
        }
        drop(tx);

        let store = self.store.clone();
        let health = self.health.clone();
        let batch_size = self.trade_buffer_size;
        let drain_timeout = self.trade_batch_drain_timeout;
        let drain_handle = tokio::spawn(async move {
            drain_loop(store, rx, health, batch_size, drain_timeout).await;
        });

        shutdown.await;
        info!("trade listener shutting down");
        for h in listener_handles {
            h.abort();
        }
        let _ = drain_handle.await;
    }
}

async fn listen_single(
    client: Arc<UpstreamClient>,
    token_ids: Vec<String>,
    tx: mpsc::Sender<Trade>,
    health: Arc<TradeListenerHealth>,
    ping_interval: Duration,
) {
    let mut first_connect = true;
    loop {
        let mut socket = match client.connect_market_socket().await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "trade listener: connect failed, retrying in 5s");
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }
        };

        if send_subscription(&mut socket, &token_ids).await.is_err() {
            tokio::time::sleep(Duration::from_secs(5)).await;
            continue;
        }
        health.connections_active.fetch_add(1, Ordering::Relaxed);
        if !first_connect {
            health.reconnections.fetch_add(1, Ordering::Relaxed);
            health.last_reconnect_ts.store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        }
        first_connect = false;

        let mut ping_tick = tokio::time::interval(ping_interval);
        loop {
            tokio::select! {
                _ = ping_tick.tick() => {
                    if send_app_ping(&mut socket).await.is_err() {
                        break;
                    }
                }
                msg = socket.next() => {
                    match msg {
                        Some(Ok(tokio_tungstenite::tungstenite::Message::Text(raw))) => {
                            for event in parse_events(&raw) {
                                if let Some(trade) = parse_trade_event(&event) {
                                    health.trades_received.fetch_add(1, Ordering::Relaxed);
                                    health.last_trade_ts.store(Utc::now().timestamp_millis(), Ordering::Relaxed);
                                    if tx.try_send(trade).is_ok() {
                                        health.queue_depth.fetch_add(1, Ordering::Relaxed);
                                    } else {
                                        warn!("trade queue full, dropping event");
                                    }
                                }
                            }
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(error = %e, "trade listener: socket error, reconnecting");
                            break;
                        }
                        None => {
                            warn!("trade listener: socket closed, reconnecting");
                            break;
                        }
                    }
                }
            }
        }
        health.connections_active.fetch_add(-1, Ordering::Relaxed);
    }
}

fn parse_events(raw: &str) -> Vec<Value> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(items)) => items,
        Ok(other) => vec![other],
        Err(_) => Vec::new(),
    }
}

/// Parse one market-channel event into a trade tuple. Only
/// `"last_trade_price"` events carry a trade; everything else yields
/// `None`. `trade_id` is always absent — the websocket payload doesn't
/// carry one.
fn parse_trade_event(event: &Value) -> Option<Trade> {
    if event.get("event_type").and_then(Value::as_str) != Some("last_trade_price") {
        return None;
    }
    let obj = event.as_object()?;
    let timestamp_ms: i64 = obj
        .get("timestamp")
        .and_then(|v| v.as_str().and_then(|s| s.parse().ok()).or_else(|| v.as_i64()))?;
    let timestamp: DateTime<Utc> = Utc.timestamp_millis_opt(timestamp_ms).single()?;
    let token_id = obj.get("asset_id").and_then(Value::as_str)?.to_string();
    let side = TradeSide::parse(obj.get("side").and_then(Value::as_str)?)?;
    let price: f64 = obj.get("price").and_then(value_as_f64)?;
    let size: f64 = obj.get("size").and_then(value_as_f64)?;

    Some(Trade {
        timestamp,
        token_id,
        side,
        price,
        size,
        trade_id: None,
    })
}

fn value_as_f64(v: &Value) -> Option<f64> {
    v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}

async fn drain_loop(
    store: Arc<Store>,
    mut rx: mpsc::Receiver<Trade>,
    health: Arc<TradeListenerHealth>,
    batch_size: usize,
    drain_timeout: Duration,
) {
    loop {
        let first = match tokio::time::timeout(drain_timeout, rx.recv()).await {
            Ok(Some(trade)) => trade,
            Ok(None) => break,
            Err(_) => continue,
        };

        let mut batch = vec![first];
        while batch.len() < batch_size {
            match rx.try_recv() {
                Ok(trade) => batch.push(trade),
                Err(_) => break,
            }
        }

        let len = batch.len();
        health.queue_depth.fetch_sub(len as i64, Ordering::Relaxed);
        match store.insert_trades(&batch).await {
            Ok(n) => {
                health.trades_inserted.fetch_add(n as u64, Ordering::Relaxed);
                health.batches_inserted.fetch_add(1, Ordering::Relaxed);
                health.last_insert_ts.store(Utc::now().timestamp_millis(), Ordering::Relaxed);
                info!(trades = n, "inserted trade batch");
            }
            Err(e) => warn!(error = %e, batch_size = len, "failed to insert trade batch"),
        }
    }

    // Flush anything still buffered after the channel closes.
    let mut remaining = Vec::new();
    while let Ok(trade) = rx.try_recv() {
        remaining.push(trade);
    }
    if !remaining.is_empty() {
        let n = remaining.len();
        health.queue_depth.fetch_sub(n as i64, Ordering::Relaxed);
        match store.insert_trades(&remaining).await {
            Ok(_) => {
                health.last_insert_ts.store(Utc::now().timestamp_millis(), Ordering::Relaxed);
                info!(trades = n, "flushed remaining trades on shutdown");
            }
            Err(e) => warn!(error = %e, trades = n, "failed to flush remaining trades"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_last_trade_price_event() {
        let event = serde_json::json!({
            "event_type": "last_trade_price",
            "timestamp": "1700000000000",
            "asset_id": "t1",
            "side": "BUY",
            "price": "0.55",
            "size": "10",
        });
        let trade = parse_trade_event(&event).unwrap();
        assert_eq!(trade.token_id, "t1");
        assert_eq!(trade.side, TradeSide::Buy);
        assert_eq!(trade.price, 0.55);
        assert!(trade.trade_id.is_none());
    }

    #[test]
    fn ignores_non_trade_events() {
        let event = serde_json::json!({"event_type": "book"});
        assert!(parse_trade_event(&event).is_none());
    }

    #[test]
    fn parse_events_handles_single_and_array_payloads() {
        assert_eq!(parse_events("{\"a\":1}").len(), 1);
        assert_eq!(parse_events("[{\"a\":1},{\"b\":2}]").len(), 2);
        assert_eq!(parse_events("not json").len(), 0);
    }
}
