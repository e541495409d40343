//! Persistence layer (C1): a thin wrapper over a `sqlx::PgPool` plus
//! the migration runner.
//!
//! There is no trait indirection here — a single concrete backend
//! (TimescaleDB) is in scope, so `Store` is a struct, not a port with
//! one implementation behind it.

mod migrations;

use std::collections::HashSet;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::core::domain::{Market, OrderbookSnapshot, PriceLevel, PriceSnapshot, Resolution, Trade, TradeSide};
use crate::error::Result;

pub struct Store {
    pool: PgPool,
}

impl Store {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(&self) -> Result<()> {
        migrations::run(&self.pool).await
    }

    /// Direct pool access for the analytics layer (C11/C12), which
    /// runs aggregate SQL that doesn't warrant a typed wrapper here.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // -- markets (C1 / original_source markets.py) -----------------

    pub async fn upsert_market(&self, market: &Market) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO markets (condition_id, question, slug, market_type, outcomes,
                                  clob_token_ids, active, closed, end_date_iso, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW())
            ON CONFLICT (condition_id) DO UPDATE SET
                question = EXCLUDED.question,
                slug = EXCLUDED.slug,
                market_type = EXCLUDED.market_type,
                outcomes = EXCLUDED.outcomes,
                clob_token_ids = EXCLUDED.clob_token_ids,
                active = EXCLUDED.active,
                closed = EXCLUDED.closed,
                end_date_iso = EXCLUDED.end_date_iso,
                updated_at = NOW()
            "#,
        )
        .bind(&market.condition_id)
        .bind(&market.question)
        .bind(&market.slug)
        .bind(&market.market_type)
        .bind(&market.outcomes)
        .bind(&market.outcome_tokens)
        .bind(market.active)
        .bind(market.closed)
        .bind(&market.end_date)
        .bind(market.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_markets(&self, markets: &[Market]) -> Result<usize> {
        for market in markets {
            self.upsert_market(market).await?;
        }
        Ok(markets.len())
    }

    pub async fn get_market(&self, condition_id: &str) -> Result<Option<Market>> {
        let row = sqlx::query(
            "SELECT condition_id, question, slug, market_type, outcomes, clob_token_ids,
                    active, closed, end_date_iso, created_at, updated_at
             FROM markets WHERE condition_id = $1",
        )
        .bind(condition_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(row_to_market))
    }

    pub async fn get_active_markets(&self) -> Result<Vec<Market>> {
        let rows = sqlx::query(
            "SELECT condition_id, question, slug, market_type, outcomes, clob_token_ids,
                    active, closed, end_date_iso, created_at, updated_at
             FROM markets WHERE active = TRUE AND closed = FALSE",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(row_to_market).collect())
    }

    pub async fn get_markets_by_ids(&self, condition_ids: &[String]) -> Result<Vec<Market>> {
        let rows = sqlx::query(
            "SELECT condition_id, question, slug, market_type, outcomes, clob_token_ids,
                    active, closed, end_date_iso, created_at, updated_at
             FROM markets WHERE condition_id = ANY($1)",
        )
        .bind(condition_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(row_to_market).collect())
    }

    // -- price snapshots (original_source prices.py) ----------------

    /// Bulk-load via `COPY ... FROM STDIN`. Returns the number of rows
    /// in `snapshots` (the caller cares about records processed, not a
    /// server-reported row count).
    pub async fn insert_price_snapshots(&self, snapshots: &[PriceSnapshot]) -> Result<usize> {
        if snapshots.is_empty() {
            return Ok(0);
        }
        let mut conn = self.pool.acquire().await?;
        let mut copy = conn
            .copy_in_raw("COPY price_snapshots (ts, token_id, price, volume_24h) FROM STDIN WITH (FORMAT csv)")
            .await?;
        let mut buf = String::new();
        for s in snapshots {
            writeln!(
                buf,
                "{},{},{},{}",
                s.timestamp.to_rfc3339(),
                csv_escape(&s.token_id),
                s.price,
                s.volume_24h
            )
            .expect("writing to a String cannot fail");
        }
        copy.send(buf.into_bytes()).await?;
        copy.finish().await?;
        Ok(snapshots.len())
    }

    pub async fn get_latest_prices(&self, token_ids: &[String]) -> Result<Vec<PriceSnapshot>> {
        let rows = sqlx::query(
            "SELECT DISTINCT ON (token_id) ts, token_id, price, volume_24h
             FROM price_snapshots WHERE token_id = ANY($1)
             ORDER BY token_id, ts DESC",
        )
        .bind(token_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| PriceSnapshot {
                timestamp: r.get("ts"),
                token_id: r.get("token_id"),
                price: r.get("price"),
                volume_24h: r.get("volume_24h"),
            })
            .collect())
    }

    pub async fn get_price_history(
        &self,
        token_id: &str,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PriceSnapshot>> {
        let rows = sqlx::query(
            "SELECT ts, token_id, price, volume_24h FROM price_snapshots
             WHERE token_id = $1 AND ts >= $2 ORDER BY ts DESC LIMIT $3",
        )
        .bind(token_id)
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| PriceSnapshot {
                timestamp: r.get("ts"),
                token_id: r.get("token_id"),
                price: r.get("price"),
                volume_24h: r.get("volume_24h"),
            })
            .collect())
    }

    pub async fn get_price_count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT count(*) AS n FROM price_snapshots")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    // -- orderbook snapshots (original_source orderbooks.py) --------

    /// One `INSERT ... $3::jsonb, $4::jsonb` per snapshot — asyncpg's
    /// COPY can't encode dicts to JSONB and neither can sqlx's, so
    /// this stays row-at-a-time.
    pub async fn insert_orderbook_snapshots(&self, snapshots: &[OrderbookSnapshot]) -> Result<usize> {
        for s in snapshots {
            sqlx::query(
                "INSERT INTO orderbook_snapshots (ts, token_id, bids, asks, spread, midpoint)
                 VALUES ($1, $2, $3::jsonb, $4::jsonb, $5, $6)",
            )
            .bind(s.timestamp)
            .bind(&s.token_id)
            .bind(sqlx::types::Json(&s.bids))
            .bind(sqlx::types::Json(&s.asks))
            .bind(s.spread)
            .bind(s.midpoint)
            .execute(&self.pool)
            .await?;
        }
        Ok(snapshots.len())
    }

    pub async fn get_latest_orderbook(&self, token_id: &str) -> Result<Option<OrderbookSnapshot>> {
        let row = sqlx::query(
            "SELECT ts, token_id, bids, asks, spread, midpoint FROM orderbook_snapshots
             WHERE token_id = $1 ORDER BY ts DESC LIMIT 1",
        )
        .bind(token_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(row_to_orderbook))
    }

    pub async fn get_orderbook_history(
        &self,
        token_id: &str,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<OrderbookSnapshot>> {
        let rows = sqlx::query(
            "SELECT ts, token_id, bids, asks, spread, midpoint FROM orderbook_snapshots
             WHERE token_id = $1 AND ts >= $2 ORDER BY ts ASC LIMIT $3",
        )
        .bind(token_id)
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(row_to_orderbook).collect())
    }

    // -- trades (original_source trades.py) --------------------------

    /// Bulk-load via `COPY`. On a unique-violation (duplicate
    /// `trade_id`s in the batch, e.g. re-delivered websocket frames)
    /// falls back to a per-row `ON CONFLICT DO NOTHING` insert. Either
    /// path returns `trades.len()` — the caller cares about records
    /// processed, not rows actually written.
    pub async fn insert_trades(&self, trades: &[Trade]) -> Result<usize> {
        if trades.is_empty() {
            return Ok(0);
        }
        let copy_result = self.copy_trades(trades).await;
        match copy_result {
            Ok(()) => Ok(trades.len()),
            Err(Error::Database(sqlx::Error::Database(ref db_err))) if db_err.is_unique_violation() => {
                for t in trades {
                    sqlx::query(
                        "INSERT INTO trades (ts, token_id, side, price, size, trade_id)
                         VALUES ($1, $2, $3, $4, $5, $6)
                         ON CONFLICT (trade_id, ts) WHERE trade_id IS NOT NULL DO NOTHING",
                    )
                    .bind(t.timestamp)
                    .bind(&t.token_id)
                    .bind(t.side.as_str())
                    .bind(t.price)
                    .bind(t.size)
                    .bind(&t.trade_id)
                    .execute(&self.pool)
                    .await?;
                }
                Ok(trades.len())
            }
            Err(e) => Err(e),
        }
    }

    async fn copy_trades(&self, trades: &[Trade]) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        let mut copy = conn
            .copy_in_raw("COPY trades (ts, token_id, side, price, size, trade_id) FROM STDIN WITH (FORMAT csv)")
            .await?;
        let mut buf = String::new();
        for t in trades {
            writeln!(
                buf,
                "{},{},{},{},{},{}",
                t.timestamp.to_rfc3339(),
                csv_escape(&t.token_id),
                t.side.as_str(),
                t.price,
                t.size,
                t.trade_id.as_deref().map(csv_escape).unwrap_or_default()
            )
            .expect("writing to a String cannot fail");
        }
        copy.send(buf.into_bytes()).await?;
        copy.finish().await?;
        Ok(())
    }

    pub async fn get_recent_trades(
        &self,
        token_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Trade>> {
        let rows = match token_id {
            Some(id) => {
                sqlx::query(
                    "SELECT ts, token_id, side, price, size, trade_id FROM trades
                     WHERE token_id = $1 ORDER BY ts DESC LIMIT $2",
                )
                .bind(id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT ts, token_id, side, price, size, trade_id FROM trades
                     ORDER BY ts DESC LIMIT $1",
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows.into_iter().map(row_to_trade).collect())
    }

    pub async fn get_trade_count(&self, token_id: Option<&str>) -> Result<i64> {
        let row = match token_id {
            Some(id) => {
                sqlx::query("SELECT count(*) AS n FROM trades WHERE token_id = $1")
                    .bind(id)
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT count(*) AS n FROM trades")
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(row.get("n"))
    }

    // -- resolutions --------------------------------------------------

    pub async fn upsert_resolution(&self, resolution: &Resolution) -> Result<()> {
        sqlx::query(
            "INSERT INTO resolutions (condition_id, outcome, winner_token_id, resolved_at,
                                       payout_price, detection_method)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (condition_id) DO UPDATE SET
                outcome = EXCLUDED.outcome,
                winner_token_id = EXCLUDED.winner_token_id,
                resolved_at = EXCLUDED.resolved_at,
                payout_price = EXCLUDED.payout_price,
                detection_method = EXCLUDED.detection_method",
        )
        .bind(&resolution.condition_id)
        .bind(&resolution.outcome)
        .bind(&resolution.winner_token_id)
        .bind(resolution.resolved_at)
        .bind(resolution.payout_price)
        .bind(&resolution.detection_method)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_resolution(&self, condition_id: &str) -> Result<Option<Resolution>> {
        let row = sqlx::query(
            "SELECT condition_id, outcome, winner_token_id, payout_price, detection_method, resolved_at
             FROM resolutions WHERE condition_id = $1",
        )
        .bind(condition_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(row_to_resolution))
    }

    pub async fn get_unresolved_markets(&self) -> Result<Vec<Market>> {
        let rows = sqlx::query(
            "SELECT m.condition_id, m.question, m.slug, m.market_type, m.outcomes, m.clob_token_ids,
                    m.active, m.closed, m.end_date_iso, m.created_at, m.updated_at
             FROM markets m
             LEFT JOIN resolutions r ON r.condition_id = m.condition_id
             WHERE r.condition_id IS NULL AND m.closed = TRUE",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(row_to_market).collect())
    }

    /// Of `condition_ids`, the subset that already has a resolution row.
    pub async fn get_resolved_condition_ids(&self, condition_ids: &[String]) -> Result<HashSet<String>> {
        if condition_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let rows = sqlx::query("SELECT condition_id FROM resolutions WHERE condition_id = ANY($1)")
            .bind(condition_ids)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|row| row.get("condition_id")).collect())
    }

    /// Sync the `closed` flag for every market in `condition_ids` that
    /// isn't already marked closed. Returns the number of rows updated.
    pub async fn mark_markets_closed(&self, condition_ids: &[String]) -> Result<u64> {
        if condition_ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "UPDATE markets SET closed = TRUE, updated_at = NOW()
             WHERE condition_id = ANY($1) AND closed = FALSE",
        )
        .bind(condition_ids)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

fn row_to_market(row: sqlx::postgres::PgRow) -> Market {
    Market {
        condition_id: row.get("condition_id"),
        question: row.get("question"),
        slug: row.get::<Option<String>, _>("slug").unwrap_or_default(),
        market_type: row.get::<Option<String>, _>("market_type").unwrap_or_default(),
        outcomes: row.get("outcomes"),
        outcome_tokens: row.get("clob_token_ids"),
        active: row.get("active"),
        closed: row.get("closed"),
        end_date: row.get("end_date_iso"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_orderbook(row: sqlx::postgres::PgRow) -> OrderbookSnapshot {
    let bids: sqlx::types::Json<Vec<PriceLevel>> = row.get("bids");
    let asks: sqlx::types::Json<Vec<PriceLevel>> = row.get("asks");
    OrderbookSnapshot {
        timestamp: row.get("ts"),
        token_id: row.get("token_id"),
        bids: bids.0,
        asks: asks.0,
        spread: row.get("spread"),
        midpoint: row.get("midpoint"),
    }
}

fn row_to_trade(row: sqlx::postgres::PgRow) -> Trade {
    let side: String = row.get("side");
    Trade {
        timestamp: row.get("ts"),
        token_id: row.get("token_id"),
        side: TradeSide::parse(&side).unwrap_or(TradeSide::Buy),
        price: row.get("price"),
        size: row.get("size"),
        trade_id: row.get("trade_id"),
    }
}

fn row_to_resolution(row: sqlx::postgres::PgRow) -> Resolution {
    Resolution {
        condition_id: row.get("condition_id"),
        outcome: row.get::<Option<String>, _>("outcome").unwrap_or_default(),
        winner_token_id: row.get::<Option<String>, _>("winner_token_id").unwrap_or_default(),
        payout_price: row.get::<Option<f64>, _>("payout_price").unwrap_or_default(),
        detection_method: row.get::<Option<String>, _>("detection_method").unwrap_or_default(),
        resolved_at: row
            .get::<Option<DateTime<Utc>>, _>("resolved_at")
            .unwrap_or_else(Utc::now),
    }
}

/// Minimal CSV-field escaping for the `COPY ... WITH (FORMAT csv)`
/// text stream: wrap in quotes and double any embedded quote if the
/// field contains a comma, quote, or newline.
fn csv_escape(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

use crate::error::Error;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_escape_passes_through_plain_tokens() {
        assert_eq!(csv_escape("0xabc123"), "0xabc123");
    }

    #[test]
    fn csv_escape_quotes_fields_with_commas() {
        assert_eq!(csv_escape("a,b"), "\"a,b\"");
    }

    #[test]
    fn csv_escape_doubles_embedded_quotes() {
        assert_eq!(csv_escape("a\"b"), "\"a\"\"b\"");
    }
}
