//! Order-book snapshot collector (C7): batch-fetches depth for every
//! active token from the CLOB in chunks, derives spread/midpoint, and
//! inserts JSONB snapshots.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::core::client::UpstreamClient;
use crate::core::domain::{OrderbookSnapshot, PriceLevel};
use crate::core::ratelimit::RateLimiter;
use crate::core::store::Store;

/// Per Polymarket CLOB batch-request limits: keep each `/books` call
/// to a conservative size rather than one giant request.
const CHUNK_SIZE: usize = 20;

pub struct OrderbookCollector {
    store: Arc<Store>,
    client: Arc<UpstreamClient>,
    limiter: RateLimiter,
}

impl OrderbookCollector {
    pub fn new(store: Arc<Store>, client: Arc<UpstreamClient>) -> Self {
        Self {
            store,
            client,
            limiter: RateLimiter::clob_read(),
        }
    }

    pub async fn collect_once(&self) -> usize {
        let markets = match self.store.get_active_markets().await {
            Ok(m) => m,
            Err(e) => {
                error!(error = %e, "orderbook collection: failed to load active markets");
                return 0;
            }
        };

        let mut all_token_ids: Vec<String> = Vec::new();
        for market in &markets {
            all_token_ids.extend(market.outcome_tokens.iter().cloned());
        }
        if all_token_ids.is_empty() {
            info!("no active markets, skipping orderbook collection");
            return 0;
        }

        let ts = Utc::now();
        let mut snapshots = Vec::new();
        for chunk in all_token_ids.chunks(CHUNK_SIZE) {
            self.limiter.acquire().await;
            let books = match self.client.get_orderbooks(chunk).await {
                Ok(b) => b,
                Err(e) => {
                    warn!(error = %e, tokens = chunk.len(), "failed to fetch orderbook chunk");
                    continue;
                }
            };
            for (token_id, book) in chunk.iter().zip(books.iter()) {
                snapshots.push(extract_orderbook_snapshot(token_id.clone(), book, ts));
            }
        }

        match self.store.insert_orderbook_snapshots(&snapshots).await {
            Ok(n) => {
                info!(snapshots = n, tokens = all_token_ids.len(), "inserted orderbook snapshots");
                n
            }
            Err(e) => {
                error!(error = %e, "failed to insert orderbook snapshots");
                0
            }
        }
    }
}

fn extract_orderbook_snapshot(token_id: String, book: &Value, ts: chrono::DateTime<Utc>) -> OrderbookSnapshot {
    let bids = levels_from(book.get("bids"));
    let asks = levels_from(book.get("asks"));
    OrderbookSnapshot::derive(ts, token_id, bids, asks)
}

fn levels_from(value: Option<&Value>) -> Vec<PriceLevel> {
    let Some(array) = value.and_then(Value::as_array) else {
        return Vec::new();
    };
    array
        .iter()
        .filter_map(|level| {
            let price = level.get("price").and_then(value_as_f64)?;
            let size = level.get("size").and_then(value_as_f64)?;
            Some(PriceLevel { price, size })
        })
        .collect()
}

fn value_as_f64(v: &Value) -> Option<f64> {
    v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_spread_and_midpoint_from_top_of_book() {
        let ts = Utc::now();
        let book = serde_json::json!({
            "bids": [{"price": "0.25", "size": "100"}],
            "asks": [{"price": "0.5", "size": "50"}],
        });
        let snap = extract_orderbook_snapshot("t1".to_string(), &book, ts);
        assert_eq!(snap.spread, Some(0.25));
        assert_eq!(snap.midpoint, Some(0.375));
    }

    #[test]
    fn one_sided_book_has_no_spread() {
        let ts = Utc::now();
        let book = serde_json::json!({"bids": [{"price": "0.4", "size": "1"}], "asks": []});
        let snap = extract_orderbook_snapshot("t1".to_string(), &book, ts);
        assert!(snap.spread.is_none());
        assert!(snap.midpoint.is_none());
    }
}
