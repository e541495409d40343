//! Shared data-model types persisted by the store and passed between
//! collectors and the analytics layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A prediction market, keyed by its upstream `condition_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct Market {
    pub condition_id: String,
    pub question: String,
    pub slug: String,
    pub market_type: String,
    pub outcomes: Vec<String>,
    pub outcome_tokens: Vec<String>,
    pub active: bool,
    pub closed: bool,
    pub end_date: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One outcome price observation for one token at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSnapshot {
    pub timestamp: DateTime<Utc>,
    pub token_id: String,
    pub price: f64,
    pub volume_24h: f64,
}

/// One resting price/size level of an order book.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: f64,
    pub size: f64,
}

/// A snapshot of one token's order book at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderbookSnapshot {
    pub timestamp: DateTime<Utc>,
    pub token_id: String,
    /// Ordered descending by price.
    pub bids: Vec<PriceLevel>,
    /// Ordered ascending by price.
    pub asks: Vec<PriceLevel>,
    pub spread: Option<f64>,
    pub midpoint: Option<f64>,
}

impl OrderbookSnapshot {
    /// Derive `spread`/`midpoint` from the top of book. Absent unless
    /// both sides have at least one level.
    pub fn derive(
        timestamp: DateTime<Utc>,
        token_id: String,
        bids: Vec<PriceLevel>,
        asks: Vec<PriceLevel>,
    ) -> Self {
        let (spread, midpoint) = match (bids.first(), asks.first()) {
            (Some(bid), Some(ask)) => {
                let spread = ask.price - bid.price;
                let midpoint = (ask.price + bid.price) / 2.0;
                (Some(spread), Some(midpoint))
            }
            _ => (None, None),
        };
        Self {
            timestamp,
            token_id,
            bids,
            asks,
            spread,
            midpoint,
        }
    }
}

/// Side of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Some(TradeSide::Buy),
            "SELL" => Some(TradeSide::Sell),
            _ => None,
        }
    }
}

/// A single executed trade, either polled or received off the
/// WebSocket stream (in which case `trade_id` is always absent).
#[derive(Debug, Clone, PartialEq)]
pub struct Trade {
    pub timestamp: DateTime<Utc>,
    pub token_id: String,
    pub side: TradeSide,
    pub price: f64,
    pub size: f64,
    pub trade_id: Option<String>,
}

/// A resolved market's winning outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub condition_id: String,
    pub outcome: String,
    pub winner_token_id: String,
    pub payout_price: f64,
    pub detection_method: String,
    pub resolved_at: DateTime<Utc>,
}
