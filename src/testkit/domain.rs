//! Builders for domain primitives used across tests.
//!
//! Provides concise factory functions for [`Market`], [`PriceSnapshot`],
//! [`OrderbookSnapshot`], [`Trade`], and [`Resolution`] so tests focus
//! on assertions rather than construction boilerplate.

use chrono::{DateTime, Utc};

use crate::core::domain::{Market, OrderbookSnapshot, PriceLevel, PriceSnapshot, Resolution, Trade, TradeSide};

/// A market with `n` outcome tokens named `{condition_id}-token-0`, etc.
pub fn make_market(condition_id: &str, slug: &str, n_outcomes: usize) -> Market {
    let outcomes: Vec<String> = (0..n_outcomes).map(|i| format!("outcome-{i}")).collect();
    let outcome_tokens: Vec<String> = (0..n_outcomes).map(|i| format!("{condition_id}-token-{i}")).collect();
    let now = Utc::now();
    Market {
        condition_id: condition_id.to_string(),
        question: format!("question for {condition_id}"),
        slug: slug.to_string(),
        market_type: "normal".to_string(),
        outcomes,
        outcome_tokens,
        active: true,
        closed: false,
        end_date: None,
        created_at: now,
        updated_at: now,
    }
}

/// A single price observation for `token_id` at `timestamp`.
pub fn make_price_snapshot(token_id: &str, price: f64, timestamp: DateTime<Utc>) -> PriceSnapshot {
    PriceSnapshot {
        timestamp,
        token_id: token_id.to_string(),
        price,
        volume_24h: 0.0,
    }
}

/// An order-book snapshot built from `(price, size)` tuples for each side.
pub fn make_orderbook(
    token_id: &str,
    timestamp: DateTime<Utc>,
    bids: &[(f64, f64)],
    asks: &[(f64, f64)],
) -> OrderbookSnapshot {
    let bids = bids.iter().map(|&(price, size)| PriceLevel { price, size }).collect();
    let asks = asks.iter().map(|&(price, size)| PriceLevel { price, size }).collect();
    OrderbookSnapshot::derive(timestamp, token_id.to_string(), bids, asks)
}

/// A single trade, with no upstream `trade_id` (as websocket trades have).
pub fn make_trade(token_id: &str, side: TradeSide, price: f64, size: f64, timestamp: DateTime<Utc>) -> Trade {
    Trade {
        timestamp,
        token_id: token_id.to_string(),
        side,
        price,
        size,
        trade_id: None,
    }
}

/// A resolution naming `winner_token_id` as the payout outcome.
pub fn make_resolution(condition_id: &str, winner_token_id: &str, outcome: &str) -> Resolution {
    Resolution {
        condition_id: condition_id.to_string(),
        outcome: outcome.to_string(),
        winner_token_id: winner_token_id.to_string(),
        payout_price: 1.0,
        detection_method: "polling".to_string(),
        resolved_at: Utc::now(),
    }
}
