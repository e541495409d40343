//! Feature extraction (C11): per-token statistics computed directly
//! in SQL via TimescaleDB window functions and aggregates. Every
//! function here is total — a query failure or missing data is logged
//! and folded into the empty/default result rather than propagated,
//! so a caller building a feature vector across many tokens never has
//! to special-case one bad token.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::Row;
use tracing::warn;

use crate::core::domain::PriceLevel;
use crate::core::store::Store;

#[derive(Debug, Clone, Serialize, Default)]
pub struct VolumeProfile {
    pub buy_volume: f64,
    pub sell_volume: f64,
    pub trade_count: i64,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct TokenFeatures {
    pub price_returns: Vec<(DateTime<Utc>, f64)>,
    pub volatility: Option<f64>,
    pub spread_history: Vec<(DateTime<Utc>, Option<f64>, Option<f64>)>,
    pub orderbook_imbalance: Option<f64>,
    pub volume_profile: VolumeProfile,
}

pub struct Features {
    store: Arc<Store>,
}

impl Features {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Percentage returns between consecutive `interval`-bucketed price
    /// observations (e.g. `"1 hour"`, `"15 minutes"`), over the
    /// trailing `lookback_hours` measured from the token's own most
    /// recent snapshot.
    pub async fn price_returns(
        &self,
        token_id: &str,
        interval: &str,
        lookback_hours: i64,
    ) -> Vec<(DateTime<Utc>, f64)> {
        let result = sqlx::query(
            r#"
            WITH latest AS (
                SELECT MAX(ts) AS max_ts FROM price_snapshots WHERE token_id = $1
            ),
            bucketed AS (
                SELECT
                    time_bucket($3::interval, ts) AS bucket,
                    last(price, ts) AS price
                FROM price_snapshots, latest
                WHERE token_id = $1
                  AND ts >= latest.max_ts - make_interval(hours => $2::int)
                GROUP BY bucket
                ORDER BY bucket
            )
            SELECT
                bucket,
                (price - LAG(price) OVER (ORDER BY bucket))
                    / NULLIF(LAG(price) OVER (ORDER BY bucket), 0) * 100.0
                    AS return_pct
            FROM bucketed
            "#,
        )
        .bind(token_id)
        .bind(lookback_hours as i32)
        .bind(interval)
        .fetch_all(self.store.pool())
        .await;

        match result {
            Ok(rows) => rows
                .into_iter()
                .filter_map(|row| {
                    let bucket: DateTime<Utc> = row.get("bucket");
                    let return_pct: Option<f64> = row.get("return_pct");
                    return_pct.map(|r| (bucket, r))
                })
                .collect(),
            Err(e) => {
                warn!(error = %e, token_id, interval, "price_returns failed");
                Vec::new()
            }
        }
    }

    /// Standard deviation of 1-minute returns over the trailing
    /// `window_hours`, or `None` on error or insufficient data.
    pub async fn rolling_volatility(&self, token_id: &str, window_hours: i64) -> Option<f64> {
        let result = sqlx::query(
            r#"
            WITH latest AS (
                SELECT MAX(ts) AS max_ts FROM price_snapshots WHERE token_id = $1
            ),
            minute_prices AS (
                SELECT
                    time_bucket(INTERVAL '1 minute', ts) AS bucket,
                    last(price, ts) AS price
                FROM price_snapshots, latest
                WHERE token_id = $1
                  AND ts >= latest.max_ts - make_interval(hours => $2::int)
                GROUP BY bucket
                ORDER BY bucket
            ),
            returns AS (
                SELECT
                    (price - LAG(price) OVER (ORDER BY bucket))
                        / NULLIF(LAG(price) OVER (ORDER BY bucket), 0) * 100.0
                        AS return_pct
                FROM minute_prices
            )
            SELECT stddev(return_pct) AS volatility FROM returns WHERE return_pct IS NOT NULL
            "#,
        )
        .bind(token_id)
        .bind(window_hours as i32)
        .fetch_optional(self.store.pool())
        .await;

        match result {
            Ok(Some(row)) => row.get("volatility"),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, token_id, "rolling_volatility failed");
                None
            }
        }
    }

    /// Spread/midpoint history from `orderbook_snapshots`, oldest
    /// first, over the trailing `lookback_hours`.
    pub async fn spread_history(
        &self,
        token_id: &str,
        lookback_hours: i64,
    ) -> Vec<(DateTime<Utc>, Option<f64>, Option<f64>)> {
        let result = sqlx::query(
            r#"
            WITH latest AS (
                SELECT MAX(ts) AS max_ts FROM orderbook_snapshots WHERE token_id = $1
            )
            SELECT os.ts, os.spread, os.midpoint
            FROM orderbook_snapshots os, latest
            WHERE os.token_id = $1
              AND os.ts >= latest.max_ts - make_interval(hours => $2::int)
            ORDER BY os.ts ASC
            "#,
        )
        .bind(token_id)
        .bind(lookback_hours as i32)
        .fetch_all(self.store.pool())
        .await;

        match result {
            Ok(rows) => rows
                .into_iter()
                .map(|row| (row.get("ts"), row.get("spread"), row.get("midpoint")))
                .collect(),
            Err(e) => {
                warn!(error = %e, token_id, "spread_history failed");
                Vec::new()
            }
        }
    }

    /// `(bid_volume - ask_volume) / (bid_volume + ask_volume)` from
    /// the most recent order-book snapshot; `None` if there is no
    /// snapshot or total depth is zero.
    pub async fn orderbook_imbalance(&self, token_id: &str) -> Option<f64> {
        let result = sqlx::query(
            "SELECT bids, asks FROM orderbook_snapshots WHERE token_id = $1 ORDER BY ts DESC LIMIT 1",
        )
        .bind(token_id)
        .fetch_optional(self.store.pool())
        .await;

        let row = match result {
            Ok(Some(row)) => row,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, token_id, "orderbook_imbalance failed");
                return None;
            }
        };

        let bids: sqlx::types::Json<Vec<PriceLevel>> = row.get("bids");
        let asks: sqlx::types::Json<Vec<PriceLevel>> = row.get("asks");
        let bid_vol: f64 = bids.0.iter().map(|l| l.size).sum();
        let ask_vol: f64 = asks.0.iter().map(|l| l.size).sum();
        let total = bid_vol + ask_vol;
        if total == 0.0 {
            return None;
        }
        Some((bid_vol - ask_vol) / total)
    }

    /// Buy/sell volume and trade count over the trailing
    /// `lookback_hours`, defaulting to zeros on error.
    pub async fn trade_volume_profile(&self, token_id: &str, lookback_hours: i64) -> VolumeProfile {
        let result = sqlx::query(
            r#"
            WITH latest AS (
                SELECT MAX(ts) AS max_ts FROM trades WHERE token_id = $1
            )
            SELECT
                COALESCE(SUM(CASE WHEN side = 'BUY'  THEN size ELSE 0 END), 0) AS buy_volume,
                COALESCE(SUM(CASE WHEN side = 'SELL' THEN size ELSE 0 END), 0) AS sell_volume,
                COUNT(*) AS trade_count
            FROM trades, latest
            WHERE token_id = $1
              AND ts >= latest.max_ts - make_interval(hours => $2::int)
            "#,
        )
        .bind(token_id)
        .bind(lookback_hours as i32)
        .fetch_optional(self.store.pool())
        .await;

        match result {
            Ok(Some(row)) => VolumeProfile {
                buy_volume: row.get("buy_volume"),
                sell_volume: row.get("sell_volume"),
                trade_count: row.get("trade_count"),
            },
            Ok(None) => VolumeProfile::default(),
            Err(e) => {
                warn!(error = %e, token_id, "trade_volume_profile failed");
                VolumeProfile::default()
            }
        }
    }

    /// All features for every outcome token of one market. Empty if
    /// the market doesn't exist or on error.
    pub async fn market_features(&self, condition_id: &str) -> HashMap<String, TokenFeatures> {
        let market = match self.store.get_market(condition_id).await {
            Ok(Some(m)) => m,
            Ok(None) => return HashMap::new(),
            Err(e) => {
                warn!(error = %e, condition_id, "market_features failed");
                return HashMap::new();
            }
        };

        let mut result = HashMap::new();
        for token_id in &market.outcome_tokens {
            let features = TokenFeatures {
                price_returns: self.price_returns(token_id, "1 hour", 24).await,
                volatility: self.rolling_volatility(token_id, 24).await,
                spread_history: self.spread_history(token_id, 24).await,
                orderbook_imbalance: self.orderbook_imbalance(token_id).await,
                volume_profile: self.trade_volume_profile(token_id, 24).await,
            };
            result.insert(token_id.clone(), features);
        }
        result
    }
}
