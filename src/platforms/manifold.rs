//! Manifold Markets client.
//!
//! All bets are in Mana (play currency).
//!
//! API docs: https://docs.manifold.markets/api
//! Base URL: https://api.manifold.markets/v0/
//! Auth: Not required for reads; `Authorization: Key {key}` for writes.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::MarketPlatform;
use crate::types::{BetReceipt, BotError, Comment, Direction, Market, MarketBet, Pool};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

pub const BASE_URL: &str = "https://api.manifold.markets/v0";
const PLATFORM_NAME: &str = "manifold";

/// Attempts per request.
const MAX_ATTEMPTS: u32 = 3;

/// Base delay for backoff (ms).
const RETRY_DELAY_MS: u64 = 1000;

/// Whether a request may be re-sent after a transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    /// Reads: safe to repeat.
    Retry,
    /// Bets: the server may have acted on a request whose reply was lost.
    /// Only an explicit 429 is retried.
    AtMostOnce,
}

// ---------------------------------------------------------------------------
// API response types (Manifold JSON → Rust)
// ---------------------------------------------------------------------------

/// Manifold market as returned by `/v0/markets` and `/v0/market/{id}`.
/// Only the fields we need.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifoldMarket {
    id: String,
    question: String,
    #[serde(default)]
    url: String,

    /// "BINARY", "MULTIPLE_CHOICE", etc.
    #[serde(default)]
    outcome_type: String,

    #[serde(default)]
    probability: Option<f64>,

    /// Pool shares: { "YES": f64, "NO": f64 }
    #[serde(default)]
    pool: Option<serde_json::Value>,

    #[serde(default)]
    volume: f64,

    #[serde(default)]
    unique_bettor_count: u32,

    #[serde(default)]
    is_resolved: bool,

    /// "YES", "NO", "MKT" or "CANCEL".
    #[serde(default)]
    resolution: Option<String>,

    /// Close timestamp (ms since epoch).
    #[serde(default)]
    close_time: Option<i64>,

    #[serde(default)]
    creator_username: Option<String>,

    /// Plain-text description. Only on the full market endpoint.
    #[serde(default)]
    text_description: Option<String>,

    /// Rich-text or plain description.
    #[serde(default)]
    description: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifoldBet {
    #[serde(default)]
    amount: f64,
    #[serde(default)]
    outcome: Option<String>,
    #[serde(default)]
    prob_after: Option<f64>,
    #[serde(default)]
    created_time: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifoldComment {
    #[serde(default)]
    text: Option<String>,
    /// Rich-text document; used when `text` is absent.
    #[serde(default)]
    content: Option<serde_json::Value>,
}

/// Response from `/v0/bet` POST.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifoldBetResponse {
    #[serde(default)]
    bet_id: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    amount: Option<f64>,
    #[serde(default)]
    prob_after: Option<f64>,
    #[serde(default)]
    created_time: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ManifoldUser {
    id: String,
    #[serde(default)]
    balance: f64,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Manifold Markets platform client.
pub struct ManifoldClient {
    http: Client,
    base_url: String,
    /// Needed for placing bets only.
    api_key: Option<SecretString>,
}

impl ManifoldClient {
    pub fn new(api_key: Option<SecretString>) -> Result<Self> {
        Self::with_base_url(BASE_URL, api_key)
    }

    pub fn with_base_url(base_url: &str, api_key: Option<SecretString>) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent(concat!("manifold-ensemble/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client for Manifold")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    // -- Internal helpers ------------------------------------------------

    /// Send a request built by `build`, retrying rate limits with
    /// exponential backoff. Transport errors are retried after a fixed delay
    /// only for `Delivery::Retry`.
    async fn send_json<T, F>(&self, what: &str, delivery: Delivery, build: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: Fn() -> RequestBuilder,
    {
        let mut last_error = None;

        for attempt in 0..MAX_ATTEMPTS {
            match build().send().await {
                Ok(resp) if resp.status().is_success() => {
                    return resp
                        .json()
                        .await
                        .with_context(|| format!("Failed to parse Manifold {what} response"));
                }
                Ok(resp) if resp.status() == StatusCode::TOO_MANY_REQUESTS => {
                    let wait = RETRY_DELAY_MS * 2u64.pow(attempt);
                    warn!(what, attempt, wait_ms = wait, "Manifold rate limit hit, backing off");
                    last_error = Some(format!("HTTP {}", StatusCode::TOO_MANY_REQUESTS));
                    tokio::time::sleep(std::time::Duration::from_millis(wait)).await;
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    return Err(BotError::Platform(format!("Manifold {what} failed {status}: {body}")).into());
                }
                Err(e) if delivery == Delivery::AtMostOnce => {
                    warn!(what, error = %e, "Manifold request failed, not re-sending");
                    return Err(BotError::Platform(format!(
                        "Manifold {what} outcome unknown, request not re-sent: {e}"
                    ))
                    .into());
                }
                Err(e) => {
                    warn!(what, attempt, error = %e, "Manifold request failed");
                    last_error = Some(e.to_string());
                    if attempt + 1 < MAX_ATTEMPTS {
                        tokio::time::sleep(std::time::Duration::from_millis(RETRY_DELAY_MS)).await;
                    }
                }
            }
        }

        Err(BotError::Platform(format!(
            "Manifold {what} failed after {MAX_ATTEMPTS} attempts: {}",
            last_error.unwrap_or_default()
        ))
        .into())
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.http.request(Method::GET, format!("{}{path}", self.base_url))
    }

    async fn user(&self, username: &str) -> Result<ManifoldUser> {
        let path = format!("/user/{}", urlencoding::encode(username));
        self.send_json("user", Delivery::Retry, || self.get(&path))
            .await
            .with_context(|| format!("Failed to look up Manifold user {username}"))
    }

    /// Convert a Manifold API timestamp (ms since epoch) to `DateTime<Utc>`.
    fn ms_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(ms).single()
    }

    fn to_market(m: ManifoldMarket) -> Market {
        let pool = match &m.pool {
            Some(serde_json::Value::Object(map)) => Pool {
                yes: map.get("YES").and_then(|v| v.as_f64()).unwrap_or(0.0),
                no: map.get("NO").and_then(|v| v.as_f64()).unwrap_or(0.0),
            },
            _ => Pool::default(),
        };

        let description = m
            .text_description
            .filter(|t| !t.trim().is_empty())
            .or_else(|| m.description.as_ref().map(flatten_text))
            .unwrap_or_default();

        Market {
            id: m.id,
            question: m.question,
            description,
            url: m.url,
            probability: m.probability.unwrap_or(0.5).clamp(0.0, 1.0),
            volume: m.volume,
            unique_bettor_count: m.unique_bettor_count,
            pool,
            close_time: m.close_time.and_then(Self::ms_to_datetime),
            is_resolved: m.is_resolved,
            resolution: m.resolution,
            creator_username: m.creator_username,
        }
    }

    fn to_bet(b: ManifoldBet) -> MarketBet {
        MarketBet {
            amount: b.amount,
            outcome: b.outcome.and_then(|o| o.parse().ok()),
            prob_after: b.prob_after,
            created_time: b.created_time.and_then(Self::ms_to_datetime),
        }
    }

    fn to_comment(c: ManifoldComment) -> Comment {
        let text = c
            .text
            .filter(|t| !t.trim().is_empty())
            .or_else(|| c.content.as_ref().map(flatten_text))
            .unwrap_or_default();
        Comment { text }
    }
}

/// Concatenate every `text` leaf of a rich-text document. A plain string is
/// returned as is.
fn flatten_text(doc: &serde_json::Value) -> String {
    fn walk(node: &serde_json::Value, out: &mut Vec<String>) {
        match node {
            serde_json::Value::String(s) => out.push(s.clone()),
            serde_json::Value::Object(map) => {
                if let Some(serde_json::Value::String(text)) = map.get("text") {
                    out.push(text.clone());
                }
                if let Some(children) = map.get("content") {
                    walk(children, out);
                }
            }
            serde_json::Value::Array(items) => items.iter().for_each(|item| walk(item, out)),
            _ => {}
        }
    }

    let mut parts = Vec::new();
    walk(doc, &mut parts);
    parts.join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

// ---------------------------------------------------------------------------
// MarketPlatform trait implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl MarketPlatform for ManifoldClient {
    async fn markets_by_user(&self, username: &str, limit: u32) -> Result<Vec<Market>> {
        let user = self.user(username).await?;
        let query = [
            ("userId", user.id.clone()),
            ("limit", limit.to_string()),
            ("sort", "created-time".to_string()),
            ("order", "desc".to_string()),
        ];

        let raw: Vec<ManifoldMarket> = self
            .send_json("markets", Delivery::Retry, || self.get("/markets").query(&query))
            .await?;

        let total = raw.len();
        let markets: Vec<Market> = raw
            .into_iter()
            .filter(|m| m.outcome_type == "BINARY")
            .map(Self::to_market)
            .collect();

        debug!(username, total, binary = markets.len(), "Fetched markets by user");
        Ok(markets)
    }

    async fn market(&self, market_id: &str) -> Result<Market> {
        let path = format!("/market/{}", urlencoding::encode(market_id));
        let raw: ManifoldMarket = self.send_json("market", Delivery::Retry, || self.get(&path)).await?;
        Ok(Self::to_market(raw))
    }

    async fn bets(&self, market_id: &str, limit: u32) -> Result<Vec<MarketBet>> {
        let query = [
            ("contractId", market_id.to_string()),
            ("limit", limit.to_string()),
            ("order", "desc".to_string()),
        ];
        let raw: Vec<ManifoldBet> = self
            .send_json("bets", Delivery::Retry, || self.get("/bets").query(&query))
            .await?;
        Ok(raw.into_iter().map(Self::to_bet).collect())
    }

    async fn comments(&self, market_id: &str, limit: u32) -> Result<Vec<Comment>> {
        let query = [("contractId", market_id.to_string()), ("limit", limit.to_string())];
        let raw: Vec<ManifoldComment> = self
            .send_json("comments", Delivery::Retry, || self.get("/comments").query(&query))
            .await?;
        // The API lists newest first.
        let mut comments: Vec<Comment> = raw.into_iter().map(Self::to_comment).collect();
        comments.reverse();
        Ok(comments)
    }

    /// Place a play-money bet. Requires an API key. Amount is in Mana.
    async fn place_bet(&self, market_id: &str, direction: Direction, amount: f64) -> Result<BetReceipt> {
        let api_key = self
            .api_key
            .as_ref()
            .context("Manifold API key required for placing bets")?;

        let body = serde_json::json!({
            "amount": amount,
            "outcome": direction.to_string(),
            "contractId": market_id,
        });

        let bet: ManifoldBetResponse = self
            .send_json("bet", Delivery::AtMostOnce, || {
                self.http
                    .post(format!("{}/bet", self.base_url))
                    .header("Authorization", format!("Key {}", api_key.expose_secret()))
                    .json(&body)
            })
            .await?;

        let bet_id = bet
            .bet_id
            .or(bet.id)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let timestamp = bet
            .created_time
            .and_then(Self::ms_to_datetime)
            .unwrap_or_else(Utc::now);

        info!(
            bet_id = %bet_id,
            market_id = %market_id,
            direction = %direction,
            amount,
            prob_after = ?bet.prob_after,
            "Manifold bet placed"
        );

        Ok(BetReceipt {
            bet_id,
            market_id: market_id.to_string(),
            direction,
            amount: bet.amount.unwrap_or(amount),
            prob_after: bet.prob_after,
            timestamp,
        })
    }

    async fn balance(&self, username: &str) -> Result<f64> {
        Ok(self.user(username).await?.balance)
    }

    fn name(&self) -> &str {
        PLATFORM_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    fn market_json() -> serde_json::Value {
        serde_json::json!({
            "id": "abc123",
            "question": "Will it rain tomorrow?",
            "url": "https://manifold.markets/u/will-it-rain",
            "outcomeType": "BINARY",
            "mechanism": "cpmm-1",
            "probability": 0.42,
            "pool": {"YES": 120.5, "NO": 80.0},
            "volume": 2500.0,
            "uniqueBettorCount": 17,
            "isResolved": false,
            "closeTime": 1_900_000_000_000i64,
            "creatorUsername": "alice",
            "textDescription": "Resolves YES if it rains."
        })
    }

    #[test]
    fn test_to_market_fields() {
        let raw: ManifoldMarket = serde_json::from_value(market_json()).unwrap();
        let m = ManifoldClient::to_market(raw);

        assert_eq!(m.id, "abc123");
        assert!((m.probability - 0.42).abs() < 1e-12);
        assert!((m.pool.yes - 120.5).abs() < 1e-12);
        assert!((m.total_liquidity() - 200.5).abs() < 1e-12);
        assert_eq!(m.unique_bettor_count, 17);
        assert_eq!(m.description, "Resolves YES if it rains.");
        assert_eq!(m.creator_username.as_deref(), Some("alice"));
        assert_eq!(m.close_time.unwrap().year(), 2030);
    }

    #[test]
    fn test_to_market_missing_optional_fields() {
        let raw: ManifoldMarket = serde_json::from_value(serde_json::json!({
            "id": "x",
            "question": "q",
        }))
        .unwrap();
        let m = ManifoldClient::to_market(raw);
        assert_eq!(m.probability, 0.5);
        assert_eq!(m.total_liquidity(), 0.0);
        assert!(m.close_time.is_none());
        assert!(m.description.is_empty());
    }

    #[test]
    fn test_to_market_probability_clamped_and_resolution() {
        let mut json = market_json();
        json["probability"] = serde_json::json!(1.5);
        json["isResolved"] = serde_json::json!(true);
        json["resolution"] = serde_json::json!("NO");
        let m = ManifoldClient::to_market(serde_json::from_value(json).unwrap());
        assert_eq!(m.probability, 1.0);
        assert_eq!(m.resolved_direction(), Some(Direction::No));
    }

    #[test]
    fn test_rich_description_flattened() {
        let mut json = market_json();
        json.as_object_mut().unwrap().remove("textDescription");
        json["description"] = serde_json::json!({
            "type": "doc",
            "content": [
                {"type": "paragraph", "content": [{"type": "text", "text": "Resolves"}, {"type": "text", "text": "YES  if"}]},
                {"type": "paragraph", "content": [{"type": "text", "text": "it rains."}]}
            ]
        });
        let m = ManifoldClient::to_market(serde_json::from_value(json).unwrap());
        assert_eq!(m.description, "Resolves YES if it rains.");
    }

    #[test]
    fn test_to_bet() {
        let raw: ManifoldBet = serde_json::from_value(serde_json::json!({
            "amount": 25.0,
            "outcome": "YES",
            "probAfter": 0.61,
            "createdTime": 1_700_000_000_000i64
        }))
        .unwrap();
        let bet = ManifoldClient::to_bet(raw);
        assert_eq!(bet.outcome, Some(Direction::Yes));
        assert_eq!(bet.prob_after, Some(0.61));
        assert_eq!(bet.created_time.unwrap().year(), 2023);

        let raw: ManifoldBet = serde_json::from_value(serde_json::json!({"amount": 5.0, "outcome": "2"})).unwrap();
        assert_eq!(ManifoldClient::to_bet(raw).outcome, None);
    }

    #[test]
    fn test_to_comment_prefers_text() {
        let plain: ManifoldComment =
            serde_json::from_value(serde_json::json!({"text": "Definitely yes"})).unwrap();
        assert_eq!(ManifoldClient::to_comment(plain).text, "Definitely yes");

        let rich: ManifoldComment = serde_json::from_value(serde_json::json!({
            "content": {"type": "doc", "content": [{"type": "paragraph", "content": [{"type": "text", "text": "No way"}]}]}
        }))
        .unwrap();
        assert_eq!(ManifoldClient::to_comment(rich).text, "No way");
    }

    #[test]
    fn test_ms_to_datetime() {
        assert_eq!(ManifoldClient::ms_to_datetime(1_700_000_000_000).unwrap().year(), 2023);
        assert_eq!(ManifoldClient::ms_to_datetime(0).unwrap().year(), 1970);
    }

    #[test]
    fn test_new_client() {
        let client = ManifoldClient::new(None).unwrap();
        assert!(!client.has_api_key());
        assert_eq!(client.name(), "manifold");

        let client = ManifoldClient::with_base_url("http://localhost:9/v0/", Some(SecretString::new("k".into()))).unwrap();
        assert!(client.has_api_key());
        assert_eq!(client.base_url, "http://localhost:9/v0");
    }

    /// Accepts connections on a local port, reads each request and hangs up
    /// without replying. Returns the base URL and a counter of requests seen.
    async fn dropping_server() -> (String, std::sync::Arc<std::sync::atomic::AtomicUsize>) {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use tokio::io::AsyncReadExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = std::sync::Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else { break };
                let mut buf = [0u8; 4096];
                if matches!(socket.read(&mut buf).await, Ok(n) if n > 0) {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
                drop(socket);
            }
        });
        (format!("http://{addr}/v0"), seen)
    }

    #[tokio::test]
    async fn test_bet_not_resent_after_lost_reply() {
        use std::sync::atomic::Ordering;

        let (base_url, seen) = dropping_server().await;
        let client = ManifoldClient::with_base_url(&base_url, Some(SecretString::new("k".into()))).unwrap();

        let result = client.place_bet("abc", Direction::Yes, 10.0).await;
        assert!(result.is_err());
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reads_retry_after_lost_reply() {
        use std::sync::atomic::Ordering;

        let (base_url, seen) = dropping_server().await;
        let client = ManifoldClient::with_base_url(&base_url, None).unwrap();

        assert!(client.market("abc").await.is_err());
        assert_eq!(seen.load(Ordering::SeqCst), MAX_ATTEMPTS as usize);
    }

    #[tokio::test]
    async fn test_place_bet_without_key_fails() {
        let client = ManifoldClient::new(None).unwrap();
        let err = client.place_bet("abc", Direction::Yes, 10.0).await.unwrap_err();
        assert!(err.to_string().contains("API key"));
    }
}
