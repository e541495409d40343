//! Cross-market analytics (C12): same-event grouping, price
//! correlation, sum-to-one mispricing detection, and the three signal
//! generators built on top of them.
//!
//! Like [`crate::core::features`], every public function here is
//! total: a query failure collapses to the empty result rather than
//! propagating, so one bad market or token cannot abort a sweep over
//! many.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::Row;
use tracing::warn;

use crate::core::store::Store;

#[derive(Debug, Clone, PartialEq)]
pub struct MarketGroup {
    pub slug_prefix: String,
    pub condition_ids: Vec<String>,
    pub token_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mispricing {
    pub condition_ids: Vec<String>,
    pub yes_sum: f64,
    pub deviation: f64,
    pub underpriced_token_ids: Vec<String>,
    pub overpriced_token_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    SameEvent,
    MeanReversion,
    Spread,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarketSignal {
    pub market_id: String,
    pub signal_type: SignalType,
    pub direction: Direction,
    pub strength: f64,
    pub edge_pct: f64,
    pub token_id: String,
    pub timestamp: DateTime<Utc>,
}

pub struct Analysis {
    store: Arc<Store>,
}

impl Analysis {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Group active markets sharing a slug prefix (the event slug
    /// before a trailing `-<digits>` per-outcome suffix). Groups of
    /// fewer than two markets can't exhibit a sum-to-one constraint
    /// and are excluded.
    pub async fn find_same_event_markets(&self) -> Vec<MarketGroup> {
        let rows = sqlx::query(
            "SELECT condition_id, slug, clob_token_ids FROM markets
             WHERE active = TRUE AND closed = FALSE
               AND slug IS NOT NULL AND array_length(clob_token_ids, 1) > 0
             ORDER BY slug",
        )
        .fetch_all(self.store.pool())
        .await;

        let rows = match rows {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "find_same_event_markets failed");
                return Vec::new();
            }
        };

        let mut groups: HashMap<String, MarketGroup> = HashMap::new();
        for row in rows {
            let slug: String = row.get("slug");
            let condition_id: String = row.get("condition_id");
            let token_ids: Vec<String> = row.get("clob_token_ids");

            let prefix = slug_prefix(&slug);
            let group = groups.entry(prefix.clone()).or_insert_with(|| MarketGroup {
                slug_prefix: prefix,
                condition_ids: Vec::new(),
                token_ids: Vec::new(),
            });
            group.condition_ids.push(condition_id);
            group.token_ids.extend(token_ids);
        }

        groups.into_values().filter(|g| g.condition_ids.len() >= 2).collect()
    }

    /// Pearson correlation between two tokens' prices, aligned to
    /// 1-hour buckets, over `lookback_hours` measured back from the
    /// later of either token's latest snapshot. `None` if there are
    /// fewer than 2 aligned points or a query error.
    pub async fn compute_price_correlation(
        &self,
        token_id_a: &str,
        token_id_b: &str,
        lookback_hours: i64,
    ) -> Option<f64> {
        let result = sqlx::query(
            r#"
            WITH ref AS (
                SELECT GREATEST(
                    (SELECT MAX(ts) FROM price_snapshots WHERE token_id = $1),
                    (SELECT MAX(ts) FROM price_snapshots WHERE token_id = $2)
                ) AS max_ts
            ),
            a AS (
                SELECT time_bucket(INTERVAL '1 hour', ts) AS bucket, last(price, ts) AS price
                FROM price_snapshots, ref
                WHERE token_id = $1 AND ts >= ref.max_ts - make_interval(hours => $3::int)
                GROUP BY bucket
            ),
            b AS (
                SELECT time_bucket(INTERVAL '1 hour', ts) AS bucket, last(price, ts) AS price
                FROM price_snapshots, ref
                WHERE token_id = $2 AND ts >= ref.max_ts - make_interval(hours => $3::int)
                GROUP BY bucket
            ),
            aligned AS (
                SELECT a.price AS pa, b.price AS pb FROM a JOIN b ON a.bucket = b.bucket
            )
            SELECT corr(pa, pb) AS correlation FROM aligned
            "#,
        )
        .bind(token_id_a)
        .bind(token_id_b)
        .bind(lookback_hours as i32)
        .fetch_optional(self.store.pool())
        .await;

        match result {
            Ok(Some(row)) => row.get("correlation"),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, token_id_a, token_id_b, "compute_price_correlation failed");
                None
            }
        }
    }

    /// Pairwise-correlate the tokens with data in the lookback window,
    /// capped to the `max_tokens` tokens with the most recent activity
    /// (a full pairwise scan over every live token is quadratic and
    /// unbounded), returning pairs meeting `min_correlation`, ranked by
    /// |correlation| descending.
    pub async fn find_correlated_pairs(
        &self,
        min_correlation: f64,
        lookback_hours: i64,
        max_tokens: usize,
    ) -> Vec<(String, String, f64)> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT token_id
            FROM price_snapshots ps
            WHERE ts >= (SELECT MAX(ts) FROM price_snapshots WHERE token_id = ps.token_id)
                  - make_interval(hours => $1::int)
            "#,
        )
        .bind(lookback_hours as i32)
        .fetch_all(self.store.pool())
        .await;

        let mut token_ids: Vec<String> = match rows {
            Ok(rows) => rows.into_iter().map(|r| r.get("token_id")).collect(),
            Err(e) => {
                warn!(error = %e, "find_correlated_pairs failed");
                return Vec::new();
            }
        };

        if token_ids.len() < 2 {
            return Vec::new();
        }
        token_ids.truncate(max_tokens);

        let mut results = Vec::new();
        for i in 0..token_ids.len() {
            for j in (i + 1)..token_ids.len() {
                if let Some(corr) = self
                    .compute_price_correlation(&token_ids[i], &token_ids[j], lookback_hours)
                    .await
                {
                    if corr.abs() >= min_correlation {
                        results.push((token_ids[i].clone(), token_ids[j].clone(), corr));
                    }
                }
            }
        }
        results.sort_by(|a, b| b.2.abs().partial_cmp(&a.2.abs()).unwrap_or(std::cmp::Ordering::Equal));
        results
    }

    /// Detect a sum-to-one violation across a same-event group's
    /// YES-outcome (index 0 of each market's token list) prices. Every
    /// token in the group is classified identically by the sign of
    /// the aggregate deviation — if the group under-prices as a
    /// whole, every member is "underpriced"; if it over-prices, every
    /// member is "overpriced". Empty if the group balances within
    /// `tolerance` or has no price data.
    pub async fn detect_mispricing(&self, group: &MarketGroup, tolerance: f64) -> Vec<Mispricing> {
        let markets = match self.store.get_markets_by_ids(&group.condition_ids).await {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, group = %group.slug_prefix, "detect_mispricing failed");
                return Vec::new();
            }
        };
        if markets.is_empty() {
            return Vec::new();
        }

        let mut yes_token_prices: HashMap<String, f64> = HashMap::new();
        for market in &markets {
            let Some(yes_token) = market.outcome_tokens.first() else {
                continue;
            };
            let row = sqlx::query("SELECT price FROM price_snapshots WHERE token_id = $1 ORDER BY ts DESC LIMIT 1")
                .bind(yes_token)
                .fetch_optional(self.store.pool())
                .await;
            if let Ok(Some(row)) = row {
                yes_token_prices.insert(yes_token.clone(), row.get("price"));
            }
        }

        if yes_token_prices.is_empty() {
            return Vec::new();
        }

        let yes_sum: f64 = yes_token_prices.values().sum();
        let deviation = yes_sum - 1.0;
        if deviation.abs() <= tolerance {
            return Vec::new();
        }

        let all_tokens: Vec<String> = yes_token_prices.keys().cloned().collect();
        let (underpriced, overpriced) = if deviation < 0.0 {
            (all_tokens, Vec::new())
        } else {
            (Vec::new(), all_tokens)
        };

        vec![Mispricing {
            condition_ids: group.condition_ids.clone(),
            yes_sum,
            deviation,
            underpriced_token_ids: underpriced,
            overpriced_token_ids: overpriced,
        }]
    }

    async fn condition_id_for_token(&self, token_id: &str) -> String {
        sqlx::query("SELECT condition_id FROM markets WHERE $1 = ANY(clob_token_ids) LIMIT 1")
            .bind(token_id)
            .fetch_optional(self.store.pool())
            .await
            .ok()
            .flatten()
            .map(|row| row.get("condition_id"))
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// Generate a buy/sell signal per token in every out-of-balance
    /// same-event group, with strength proportional to deviation
    /// magnitude (capped at 1.0).
    pub async fn generate_same_event_signals(&self) -> Vec<MarketSignal> {
        let mut signals = Vec::new();
        for group in self.find_same_event_markets().await {
            for mispricing in self.detect_mispricing(&group, 0.02).await {
                let abs_dev = mispricing.deviation.abs();
                let strength = (abs_dev * 10.0).min(1.0);
                let edge_pct = abs_dev * 100.0;

                let (tokens, direction) = if mispricing.deviation < 0.0 {
                    (mispricing.underpriced_token_ids, Direction::Buy)
                } else {
                    (mispricing.overpriced_token_ids, Direction::Sell)
                };

                for token_id in tokens {
                    let market_id = self.condition_id_for_token(&token_id).await;
                    signals.push(MarketSignal {
                        market_id,
                        signal_type: SignalType::SameEvent,
                        direction,
                        strength,
                        edge_pct,
                        token_id,
                        timestamp: Utc::now(),
                    });
                }
            }
        }
        signals
    }

    /// Generate a mean-reversion signal for every token whose latest
    /// price is more than `z_threshold` standard deviations from its
    /// rolling mean over `lookback_hours`.
    pub async fn generate_mean_reversion_signals(&self, z_threshold: f64, lookback_hours: i64) -> Vec<MarketSignal> {
        let rows = sqlx::query(
            r#"
            WITH per_token_latest AS (
                SELECT token_id, MAX(ts) AS max_ts FROM price_snapshots GROUP BY token_id
            ),
            stats AS (
                SELECT
                    ps.token_id,
                    avg(ps.price) AS mean_price,
                    stddev(ps.price) AS std_price,
                    last(ps.price, ps.ts) AS latest_price
                FROM price_snapshots ps
                JOIN per_token_latest ptl ON ps.token_id = ptl.token_id
                WHERE ps.ts >= ptl.max_ts - make_interval(hours => $1::int)
                GROUP BY ps.token_id
                HAVING count(*) >= 5
            )
            SELECT
                token_id, latest_price, mean_price, std_price,
                CASE WHEN std_price > 0 THEN (latest_price - mean_price) / std_price ELSE 0 END AS z_score
            FROM stats
            "#,
        )
        .bind(lookback_hours as i32)
        .fetch_all(self.store.pool())
        .await;

        let rows = match rows {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "generate_mean_reversion_signals failed");
                return Vec::new();
            }
        };

        let mut signals = Vec::new();
        for row in rows {
            let z: f64 = row.try_get::<Option<f64>, _>("z_score").ok().flatten().unwrap_or(0.0);
            if z.abs() <= z_threshold {
                continue;
            }
            let token_id: String = row.get("token_id");
            let std_price: f64 = row.try_get::<Option<f64>, _>("std_price").ok().flatten().unwrap_or(0.0);

            let direction = if z > 0.0 { Direction::Sell } else { Direction::Buy };
            let strength = (z.abs() / (z_threshold * 2.0)).min(1.0);
            let edge_pct = (z.abs() - z_threshold) * std_price * 100.0;
            let market_id = self.condition_id_for_token(&token_id).await;

            signals.push(MarketSignal {
                market_id,
                signal_type: SignalType::MeanReversion,
                direction,
                strength,
                edge_pct,
                token_id,
                timestamp: Utc::now(),
            });
        }
        signals
    }

    /// Generate a buy signal for every token whose most recent
    /// bid-ask spread, as a percentage of midpoint, exceeds
    /// `min_edge_pct`.
    pub async fn generate_spread_signals(&self, min_edge_pct: f64) -> Vec<MarketSignal> {
        let rows = sqlx::query(
            "SELECT DISTINCT ON (token_id) token_id, spread, midpoint
             FROM orderbook_snapshots
             WHERE spread IS NOT NULL AND midpoint IS NOT NULL AND midpoint > 0
             ORDER BY token_id, ts DESC",
        )
        .fetch_all(self.store.pool())
        .await;

        let rows = match rows {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "generate_spread_signals failed");
                return Vec::new();
            }
        };

        let mut signals = Vec::new();
        for row in rows {
            let spread: f64 = row.get("spread");
            let midpoint: f64 = row.get("midpoint");
            let edge_pct = (spread / midpoint) * 100.0;
            if edge_pct < min_edge_pct {
                continue;
            }
            let token_id: String = row.get("token_id");
            let strength = ((edge_pct - min_edge_pct) / min_edge_pct).min(1.0);
            let market_id = self.condition_id_for_token(&token_id).await;

            signals.push(MarketSignal {
                market_id,
                signal_type: SignalType::Spread,
                direction: Direction::Buy,
                strength,
                edge_pct,
                token_id,
                timestamp: Utc::now(),
            });
        }
        signals
    }

    /// Run every generator, then deduplicate by `(token_id,
    /// signal_type)` keeping the highest-strength signal, ranked by
    /// strength descending.
    pub async fn get_all_signals(&self) -> Vec<MarketSignal> {
        let mut raw = self.generate_same_event_signals().await;
        raw.extend(self.generate_mean_reversion_signals(2.0, 24).await);
        raw.extend(self.generate_spread_signals(2.0).await);

        let mut best: HashMap<(String, SignalType), MarketSignal> = HashMap::new();
        for signal in raw {
            let key = (signal.token_id.clone(), signal.signal_type);
            match best.get(&key) {
                Some(existing) if existing.strength >= signal.strength => {}
                _ => {
                    best.insert(key, signal);
                }
            }
        }

        let mut signals: Vec<MarketSignal> = best.into_values().collect();
        signals.sort_by(|a, b| b.strength.partial_cmp(&a.strength).unwrap_or(std::cmp::Ordering::Equal));
        signals
    }
}

fn slug_prefix(slug: &str) -> String {
    match slug.rsplit_once('-') {
        Some((prefix, suffix)) if !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()) => {
            prefix.to_string()
        }
        _ => slug.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_prefix_strips_trailing_numeric_suffix() {
        assert_eq!(slug_prefix("us-election-2024-winner-2"), "us-election-2024-winner");
    }

    #[test]
    fn slug_prefix_keeps_slug_without_numeric_suffix() {
        assert_eq!(slug_prefix("bitcoin-price-jan"), "bitcoin-price-jan");
    }
}
