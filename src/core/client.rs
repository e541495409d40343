//! Upstream adapter (C4): REST pagination over the gamma/data APIs and
//! a WebSocket connector for the trade stream, plus the defensive
//! stringified-JSON parsing every collector needs.

use std::time::Duration;

use reqwest::StatusCode;
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::warn;

use crate::core::retry::Classification;
use crate::error::{Error, Result};

const PAGE_LIMIT: u32 = 100;
const INTER_PAGE_PAUSE: Duration = Duration::from_millis(100);

/// A connected market-data websocket.
pub type MarketSocket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Typed adapter over the upstream REST + WebSocket surface. Order
/// placement / authentication endpoints are out of scope and are not
/// modelled here.
pub struct UpstreamClient {
    http: reqwest::Client,
    gamma_host: String,
    ws_host: String,
}

impl UpstreamClient {
    pub fn new(gamma_host: impl Into<String>, ws_host: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client builds with static config");
        Self {
            http,
            gamma_host: gamma_host.into(),
            ws_host: ws_host.into(),
        }
    }

    /// `GET /events?active=<bool>&limit=&offset=&order=volume&ascending=false`.
    /// Accepts either a bare JSON array or a `{data: [...]}` envelope.
    pub async fn get_events(&self, active: bool, limit: u32, offset: u32) -> Result<Vec<Value>> {
        let url = format!(
            "{}/events?active={}&limit={}&offset={}&order=volume&ascending=false",
            self.gamma_host, active, limit, offset
        );
        self.fetch_event_page(&url).await
    }

    /// `GET /events?closed=true&limit=&offset=`.
    pub async fn get_closed_events(&self, limit: u32, offset: u32) -> Result<Vec<Value>> {
        let url = format!(
            "{}/events?closed=true&limit={}&offset={}",
            self.gamma_host, limit, offset
        );
        self.fetch_event_page(&url).await
    }

    async fn fetch_event_page(&self, url: &str) -> Result<Vec<Value>> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Http(response.error_for_status().unwrap_err()));
        }
        let body: Value = response.json().await?;
        Ok(match body {
            Value::Array(items) => items,
            Value::Object(mut map) => map
                .remove("data")
                .and_then(|v| v.as_array().cloned())
                .unwrap_or_default(),
            _ => Vec::new(),
        })
    }

    /// Paginate `get_events(active=true, ...)` at `limit=100` with a
    /// 100ms inter-page pause, stopping on a short page or once
    /// `max_events` have been collected.
    pub async fn get_all_active_markets(&self, max_events: usize) -> Vec<Value> {
        let mut events = Vec::new();
        let mut offset = 0u32;
        loop {
            let page = match self.get_events(true, PAGE_LIMIT, offset).await {
                Ok(page) => page,
                Err(e) => {
                    warn!(error = %e, "get_all_active_markets: page fetch failed");
                    break;
                }
            };
            let page_len = page.len();
            events.extend(page);
            if events.len() >= max_events || page_len < PAGE_LIMIT as usize {
                break;
            }
            offset += PAGE_LIMIT;
            tokio::time::sleep(INTER_PAGE_PAUSE).await;
        }
        events.truncate(max_events);
        events
    }

    /// Batch order-book fetch for up to `CHUNK_SIZE` token ids per
    /// call (chunking itself is the caller's responsibility, see C7).
    pub async fn get_orderbooks(&self, token_ids: &[String]) -> Result<Vec<Value>> {
        let url = format!("{}/books", self.gamma_host);
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!(token_ids
                .iter()
                .map(|t| serde_json::json!({ "token_id": t }))
                .collect::<Vec<_>>()))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::Http(response.error_for_status().unwrap_err()));
        }
        let body: Value = response.json().await?;
        Ok(body.as_array().cloned().unwrap_or_default())
    }

    /// Open a connection to the market-data websocket.
    pub async fn connect_market_socket(&self) -> Result<MarketSocket> {
        let url = format!("{}/ws/market", self.ws_host);
        let (socket, _response) = connect_async(&url).await?;
        Ok(socket)
    }
}

/// Send the subscription frame for a chunk of token ids.
pub async fn send_subscription(socket: &mut MarketSocket, token_ids: &[String]) -> Result<()> {
    use futures_util::SinkExt;
    let msg = serde_json::json!({ "assets_ids": token_ids, "type": "market" });
    socket.send(Message::Text(msg.to_string())).await?;
    Ok(())
}

/// Send the application-level `"PING"` heartbeat (distinct from
/// transport-level ping frames).
pub async fn send_app_ping(socket: &mut MarketSocket) -> Result<()> {
    use futures_util::SinkExt;
    socket.send(Message::Text("PING".to_string())).await?;
    Ok(())
}

/// Classify a `reqwest::Error` for [`crate::core::retry::retry`].
pub fn classify_http_error(error: &reqwest::Error) -> Classification {
    if error.is_timeout() || error.is_connect() {
        return Classification::RetryableTransport;
    }
    if let Some(status) = error.status() {
        if is_retryable_status(status) {
            return Classification::RetryableStatus {
                retry_after_secs: None,
            };
        }
    }
    Classification::Fatal
}

fn is_retryable_status(status: StatusCode) -> bool {
    crate::core::retry::RETRYABLE_STATUS_CODES.contains(&status.as_u16())
}

/// Accept either a native JSON array or a JSON string that itself
/// encodes an array (Polymarket's `clobTokenIds`/`outcomePrices`/
/// `outcomes` fields arrive both ways across API revisions). Returns
/// `None` rather than erroring on any other shape.
pub fn parse_json_list_field(value: &Value) -> Option<Vec<Value>> {
    match value {
        Value::Array(items) => Some(items.clone()),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Array(items)) => Some(items),
            _ => None,
        },
        _ => None,
    }
}

/// Read a field trying `camelCase` first, then `snake_case`.
pub fn field_either<'a>(object: &'a serde_json::Map<String, Value>, camel: &str, snake: &str) -> Option<&'a Value> {
    object.get(camel).or_else(|| object.get(snake))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_native_array() {
        let v = serde_json::json!(["a", "b"]);
        assert_eq!(parse_json_list_field(&v).unwrap().len(), 2);
    }

    #[test]
    fn parses_stringified_array() {
        let v = Value::String("[\"a\",\"b\",\"c\"]".to_string());
        assert_eq!(parse_json_list_field(&v).unwrap().len(), 3);
    }

    #[test]
    fn rejects_malformed_string() {
        let v = Value::String("not json".to_string());
        assert!(parse_json_list_field(&v).is_none());
    }

    #[test]
    fn rejects_non_array_shapes() {
        assert!(parse_json_list_field(&Value::Null).is_none());
        assert!(parse_json_list_field(&serde_json::json!({"a": 1})).is_none());
    }

    #[test]
    fn field_either_prefers_camel_case() {
        let obj = serde_json::json!({"clobTokenIds": "camel", "clob_token_ids": "snake"});
        let map = obj.as_object().unwrap();
        assert_eq!(
            field_either(map, "clobTokenIds", "clob_token_ids").unwrap(),
            "camel"
        );
    }

    #[test]
    fn field_either_falls_back_to_snake_case() {
        let obj = serde_json::json!({"clob_token_ids": "snake"});
        let map = obj.as_object().unwrap();
        assert_eq!(
            field_either(map, "clobTokenIds", "clob_token_ids").unwrap(),
            "snake"
        );
    }
}
