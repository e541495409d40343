//! Market metadata collector (C5): paginate Gamma API events and
//! upsert market rows. First collector in the pipeline, and the one
//! that establishes the pattern every other collector follows.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{error, info};

use crate::core::client::{field_either, parse_json_list_field, UpstreamClient};
use crate::core::domain::Market;
use crate::core::ratelimit::RateLimiter;
use crate::core::store::Store;

pub struct MetadataCollector {
    store: Arc<Store>,
    client: Arc<UpstreamClient>,
    limiter: RateLimiter,
    max_markets: usize,
}

impl MetadataCollector {
    pub fn new(store: Arc<Store>, client: Arc<UpstreamClient>, max_markets: usize) -> Self {
        Self {
            store,
            client,
            limiter: RateLimiter::metadata(),
            max_markets,
        }
    }

    /// Run one collection cycle. Returns the number of markets
    /// upserted, or 0 on error — this never propagates a failure up to
    /// the supervisor.
    pub async fn collect_once(&self) -> usize {
        self.limiter.acquire().await;
        let events = self.client.get_all_active_markets(self.max_markets).await;
        let markets = extract_markets_from_events(&events);

        match self.store.upsert_markets(&markets).await {
            Ok(n) => {
                info!(markets = n, events = events.len(), "upserted markets");
                n
            }
            Err(e) => {
                error!(error = %e, "market metadata collection failed");
                0
            }
        }
    }
}

fn extract_markets_from_events(events: &[Value]) -> Vec<Market> {
    let mut markets = Vec::new();
    for event in events {
        let Some(raw_markets) = event.get("markets").and_then(Value::as_array) else {
            continue;
        };
        for raw in raw_markets {
            if let Some(market) = extract_market(raw) {
                markets.push(market);
            }
        }
    }
    markets
}

fn extract_market(raw: &Value) -> Option<Market> {
    let obj = raw.as_object()?;

    let condition_id = field_either(obj, "conditionId", "condition_id")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    if condition_id.is_empty() {
        return None;
    }

    let clob_token_ids = obj
        .get("clobTokenIds")
        .and_then(parse_json_list_field)
        .map(|v| strings_from(&v))
        .unwrap_or_default();

    let outcomes = obj
        .get("outcomes")
        .and_then(parse_json_list_field)
        .map(|v| strings_from(&v))
        .unwrap_or_default();

    let end_date = field_either(obj, "endDateIso", "end_date_iso")
        .and_then(Value::as_str)
        .map(str::to_string);

    let market_type = field_either(obj, "marketType", "market_type")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    let now = Utc::now();
    Some(Market {
        condition_id,
        question: obj.get("question").and_then(Value::as_str).unwrap_or("").to_string(),
        slug: obj.get("slug").and_then(Value::as_str).unwrap_or("").to_string(),
        market_type,
        outcomes,
        outcome_tokens: clob_token_ids,
        active: obj.get("active").and_then(Value::as_bool).unwrap_or(true),
        closed: obj.get("closed").and_then(Value::as_bool).unwrap_or(false),
        end_date,
        created_at: now,
        updated_at: now,
    })
}

fn strings_from(values: &[Value]) -> Vec<String> {
    values
        .iter()
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_market_with_camel_case_fields() {
        let raw = serde_json::json!({
            "conditionId": "0xabc",
            "question": "Will it rain?",
            "slug": "will-it-rain",
            "clobTokenIds": "[\"t1\",\"t2\"]",
            "outcomes": "[\"Yes\",\"No\"]",
            "active": true,
            "closed": false,
        });
        let market = extract_market(&raw).unwrap();
        assert_eq!(market.condition_id, "0xabc");
        assert_eq!(market.outcome_tokens, vec!["t1", "t2"]);
        assert_eq!(market.outcomes, vec!["Yes", "No"]);
    }

    #[test]
    fn skips_market_without_condition_id() {
        let raw = serde_json::json!({"question": "no id"});
        assert!(extract_market(&raw).is_none());
    }

    #[test]
    fn extract_markets_from_events_flattens_and_skips_bad() {
        let events = vec![serde_json::json!({
            "markets": [
                {"conditionId": "0x1", "clobTokenIds": "[]", "outcomes": "[]"},
                {"question": "missing id"},
            ]
        })];
        let markets = extract_markets_from_events(&events);
        assert_eq!(markets.len(), 1);
    }
}
