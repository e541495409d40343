//! Resolution tracker (C8): infer resolved markets from Gamma API
//! `outcomePrices` and record the winner.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, error, info};

use crate::core::client::{field_either, parse_json_list_field, UpstreamClient};
use crate::core::domain::Resolution;
use crate::core::ratelimit::RateLimiter;
use crate::core::store::Store;

const PAGE_LIMIT: u32 = 100;
const MAX_PAGES: u32 = 3;

pub struct ResolutionCollector {
    store: Arc<Store>,
    client: Arc<UpstreamClient>,
    limiter: RateLimiter,
}

impl ResolutionCollector {
    pub fn new(store: Arc<Store>, client: Arc<UpstreamClient>) -> Self {
        Self {
            store,
            client,
            limiter: RateLimiter::metadata(),
        }
    }

    /// Scan up to `MAX_PAGES` pages of closed events for a winning
    /// outcome, upsert every newly inferred resolution, and sync the
    /// `closed` flag on every market seen. Returns the number of
    /// resolutions upserted.
    pub async fn collect_once(&self) -> usize {
        let mut markets_by_condition_id: HashMap<String, Value> = HashMap::new();
        let mut offset = 0u32;
        for _ in 0..MAX_PAGES {
            self.limiter.acquire().await;
            let events = match self.client.get_closed_events(PAGE_LIMIT, offset).await {
                Ok(events) => events,
                Err(e) => {
                    error!(error = %e, "resolution tracker: failed to fetch closed events page");
                    break;
                }
            };
            let page_len = events.len();
            for event in &events {
                let Some(raw_markets) = event.get("markets").and_then(Value::as_array) else {
                    continue;
                };
                for raw in raw_markets {
                    let Some(obj) = raw.as_object() else { continue };
                    let condition_id = field_either(obj, "conditionId", "condition_id")
                        .and_then(Value::as_str)
                        .unwrap_or("");
                    if !condition_id.is_empty() {
                        markets_by_condition_id.insert(condition_id.to_string(), raw.clone());
                    }
                }
            }
            if page_len < PAGE_LIMIT as usize {
                break;
            }
            offset += PAGE_LIMIT;
        }

        if markets_by_condition_id.is_empty() {
            return 0;
        }

        let condition_ids: Vec<String> = markets_by_condition_id.keys().cloned().collect();
        let already_resolved = match self.store.get_resolved_condition_ids(&condition_ids).await {
            Ok(set) => set,
            Err(e) => {
                error!(error = %e, "resolution tracker: failed to load already-resolved condition ids");
                HashSet::new()
            }
        };

        let mut count = 0;
        for (condition_id, raw) in &markets_by_condition_id {
            if already_resolved.contains(condition_id) {
                continue;
            }
            if let Some(resolution) = infer_winner(raw) {
                match self.store.upsert_resolution(&resolution).await {
                    Ok(()) => count += 1,
                    Err(e) => error!(error = %e, condition_id = %resolution.condition_id, "failed to upsert resolution"),
                }
            }
        }

        if let Err(e) = self.store.mark_markets_closed(&condition_ids).await {
            error!(error = %e, "resolution tracker: failed to sync closed flag");
        }

        info!(resolved = count, seen = condition_ids.len(), "resolution tracker cycle complete");
        count
    }
}

/// Inspect `outcomePrices` for the first value exactly `1.0`; the same
/// index into `outcomes`/`clobTokenIds` names the winner. Returns
/// `None` (never an error) if the market is not resolved or its
/// fields are malformed — one bad market must not stop the scan.
pub fn infer_winner(raw_market: &Value) -> Option<Resolution> {
    let obj = raw_market.as_object()?;

    let condition_id = field_either(obj, "conditionId", "condition_id")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    let outcome_prices = obj.get("outcomePrices").and_then(parse_json_list_field)?;
    if outcome_prices.is_empty() {
        return None;
    }
    let outcomes = obj
        .get("outcomes")
        .and_then(parse_json_list_field)
        .unwrap_or_default();
    let clob_token_ids = obj
        .get("clobTokenIds")
        .and_then(parse_json_list_field)
        .unwrap_or_default();

    let winner_idx = outcome_prices.iter().position(|p| {
        let value = p.as_f64().or_else(|| p.as_str().and_then(|s| s.parse().ok()));
        value == Some(1.0)
    })?;

    let outcome = outcomes
        .get(winner_idx)
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let winner_token_id = clob_token_ids
        .get(winner_idx)
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    debug!(condition_id = %condition_id, winner_idx, "inferred market winner");

    Some(Resolution {
        condition_id,
        outcome,
        winner_token_id,
        payout_price: 1.0,
        detection_method: "polling".to_string(),
        resolved_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_winner_three_outcome_market() {
        let raw = serde_json::json!({
            "conditionId": "0xabc",
            "outcomes": "[\"A\",\"B\",\"C\"]",
            "clobTokenIds": "[\"t1\",\"t2\",\"t3\"]",
            "outcomePrices": "[\"0\",\"1.0\",\"0\"]",
        });
        let resolution = infer_winner(&raw).unwrap();
        assert_eq!(resolution.outcome, "B");
        assert_eq!(resolution.winner_token_id, "t2");
        assert_eq!(resolution.payout_price, 1.0);
        assert_eq!(resolution.detection_method, "polling");
    }

    #[test]
    fn returns_none_when_no_outcome_reaches_one() {
        let raw = serde_json::json!({
            "conditionId": "0xabc",
            "outcomes": "[\"A\",\"B\"]",
            "clobTokenIds": "[\"t1\",\"t2\"]",
            "outcomePrices": "[\"0.4\",\"0.6\"]",
        });
        assert!(infer_winner(&raw).is_none());
    }

    #[test]
    fn returns_none_on_missing_outcome_prices() {
        let raw = serde_json::json!({"conditionId": "0xabc"});
        assert!(infer_winner(&raw).is_none());
    }
}
