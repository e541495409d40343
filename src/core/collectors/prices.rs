//! Price snapshot collector (C6): the highest-volume collector, one
//! row per outcome token every cycle, bulk-loaded via `COPY`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::core::client::UpstreamClient;
use crate::core::domain::PriceSnapshot;
use crate::core::ratelimit::RateLimiter;
use crate::core::store::Store;

pub struct PriceCollector {
    store: Arc<Store>,
    client: Arc<UpstreamClient>,
    limiter: RateLimiter,
    max_markets: usize,
}

impl PriceCollector {
    pub fn new(store: Arc<Store>, client: Arc<UpstreamClient>, max_markets: usize) -> Self {
        Self {
            store,
            client,
            limiter: RateLimiter::metadata(),
            max_markets,
        }
    }

    pub async fn collect_once(&self) -> usize {
        let ts = Utc::now();
        self.limiter.acquire().await;
        let events = self.client.get_all_active_markets(self.max_markets).await;
        let snapshots = extract_price_snapshots(&events, ts);

        if snapshots.is_empty() {
            info!(events = events.len(), "no price snapshots extracted");
            return 0;
        }

        match self.store.insert_price_snapshots(&snapshots).await {
            Ok(n) => {
                info!(snapshots = n, events = events.len(), "inserted price snapshots");
                n
            }
            Err(e) => {
                error!(error = %e, "price snapshot collection failed");
                0
            }
        }
    }
}

fn extract_price_snapshots(events: &[Value], ts: DateTime<Utc>) -> Vec<PriceSnapshot> {
    let mut snapshots = Vec::new();
    for event in events {
        let Some(markets) = event.get("markets").and_then(Value::as_array) else {
            continue;
        };
        for market in markets {
            let Some(token_ids) = market
                .get("clobTokenIds")
                .and_then(Value::as_str)
                .and_then(|s| serde_json::from_str::<Value>(s).ok())
                .and_then(|v| v.as_array().cloned())
            else {
                warn!("skipping market: malformed clobTokenIds");
                continue;
            };
            let Some(prices) = market
                .get("outcomePrices")
                .and_then(Value::as_str)
                .and_then(|s| serde_json::from_str::<Value>(s).ok())
                .and_then(|v| v.as_array().cloned())
            else {
                warn!("skipping market: malformed outcomePrices");
                continue;
            };

            let volume_24h = market
                .get("volume24hr")
                .and_then(Value::as_f64)
                .unwrap_or(0.0);

            for (token_id, price) in token_ids.iter().zip(prices.iter()) {
                let token_id = match token_id {
                    Value::String(s) if !s.is_empty() => s.clone(),
                    Value::String(_) => continue,
                    other => other.to_string(),
                };
                let price = match price.as_str().and_then(|s| s.parse::<f64>().ok()).or_else(|| price.as_f64()) {
                    Some(p) => p,
                    None => continue,
                };
                snapshots.push(PriceSnapshot {
                    timestamp: ts,
                    token_id,
                    price,
                    volume_24h,
                });
            }
        }
    }
    snapshots
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_one_snapshot_per_token() {
        let ts = Utc::now();
        let events = vec![serde_json::json!({
            "markets": [{
                "clobTokenIds": "[\"t1\",\"t2\"]",
                "outcomePrices": "[\"0.6\",\"0.4\"]",
                "volume24hr": 1000,
            }]
        })];
        let snapshots = extract_price_snapshots(&events, ts);
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].token_id, "t1");
        assert_eq!(snapshots[0].price, 0.6);
        assert_eq!(snapshots[1].price, 0.4);
        assert_eq!(snapshots[0].volume_24h, 1000.0);
    }

    #[test]
    fn skips_market_with_malformed_fields() {
        let ts = Utc::now();
        let events = vec![serde_json::json!({
            "markets": [{"clobTokenIds": "not json", "outcomePrices": "[]"}]
        })];
        assert!(extract_price_snapshots(&events, ts).is_empty());
    }
}
