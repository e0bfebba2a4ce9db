//! LLM estimator backed by the Anthropic Messages API.
//!
//! Prompts Claude with the market question and current price and parses a
//! line-oriented answer (PROBABILITY / CONFIDENCE / DIRECTION / REASONING /
//! STRENGTH) into a signal. Rate limits and server errors are retried with
//! exponential backoff. A rejected API key switches the estimator off for the
//! rest of the process.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, info, warn};

use super::Estimator;
use crate::analysis;
use crate::strategy::signal::Signal;
use crate::types::{BotError, Direction, EstimatorId, Market, MarketContext};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Maximum retries on rate limit / server errors.
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff (ms).
const BASE_BACKOFF_MS: u64 = 1000;

/// Description characters included in the prompt.
const DESCRIPTION_LIMIT: usize = 500;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub enabled: bool,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 1000,
            temperature: 0.7,
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            timeout_secs: 120,
        }
    }
}

impl LlmConfig {
    pub fn validate(&self) -> Result<(), BotError> {
        if self.model.trim().is_empty() {
            return Err(BotError::Config("llm model must not be empty".into()));
        }
        if self.max_tokens == 0 {
            return Err(BotError::Config("llm max_tokens must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(BotError::Config(format!(
                "llm temperature must be within [0, 1], got {}",
                self.temperature
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// API types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f64,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

/// Fields read from a model answer, before they become a [`Signal`].
#[derive(Debug, Clone, PartialEq)]
pub struct LlmReading {
    pub probability: f64,
    pub confidence: f64,
    pub direction: Direction,
    pub reasoning: String,
    pub strength: Option<f64>,
}

impl LlmReading {
    /// Parse the line-oriented answer. REASONING may continue over several
    /// lines until the next labelled line.
    pub fn parse(text: &str) -> Result<Self, BotError> {
        let mut probability = None;
        let mut confidence = None;
        let mut direction = None;
        let mut strength = None;
        let mut reasoning: Option<Vec<String>> = None;
        let mut in_reasoning = false;

        for raw in text.lines() {
            let line = raw.trim();
            match split_label(line) {
                Some((label, value)) => {
                    in_reasoning = false;
                    match label.as_str() {
                        "PROBABILITY" => probability = extract_any_float(value),
                        "CONFIDENCE" => confidence = extract_any_float(value),
                        "STRENGTH" => strength = extract_any_float(value),
                        "DIRECTION" => {
                            direction = value
                                .split_whitespace()
                                .next()
                                .and_then(|word| word.trim_matches(|c: char| !c.is_alphabetic()).parse().ok())
                        }
                        "REASONING" => {
                            in_reasoning = true;
                            reasoning = Some(vec![value.trim().to_string()]);
                        }
                        _ => {}
                    }
                }
                None if in_reasoning && !line.is_empty() => {
                    if let Some(parts) = reasoning.as_mut() {
                        parts.push(line.to_string());
                    }
                }
                None => {}
            }
        }

        let missing = |field: &str| BotError::Llm {
            model: "anthropic".to_string(),
            message: format!("response missing {field}"),
        };

        Ok(Self {
            probability: probability.ok_or_else(|| missing("PROBABILITY"))?,
            confidence: confidence.ok_or_else(|| missing("CONFIDENCE"))?,
            direction: direction.ok_or_else(|| missing("DIRECTION"))?,
            reasoning: reasoning
                .map(|parts| parts.into_iter().filter(|p| !p.is_empty()).collect::<Vec<_>>().join(" "))
                .ok_or_else(|| missing("REASONING"))?,
            strength,
        })
    }

    /// Build the signal. A missing strength is derived from the gap to the
    /// market price scaled by confidence.
    pub fn into_signal(self, market_probability: f64) -> Result<Signal, BotError> {
        let strength = self.strength.unwrap_or_else(|| {
            ((self.probability - market_probability).abs() * self.confidence * 2.0).min(1.0)
        });
        Signal::new(self.probability, self.confidence, self.direction, strength, self.reasoning)
    }
}

/// Split `LABEL: value`, tolerating markdown emphasis around the label.
fn split_label(line: &str) -> Option<(String, &str)> {
    let (label, value) = line.split_once(':')?;
    let label = label.trim().trim_matches(|c: char| c == '*' || c == '#').trim().to_uppercase();
    const KNOWN: [&str; 5] = ["PROBABILITY", "CONFIDENCE", "DIRECTION", "REASONING", "STRENGTH"];
    KNOWN
        .contains(&label.as_str())
        .then(|| (label, value.trim().trim_start_matches('*').trim()))
}

/// First number in `text` as a fraction. `65%` and bare `65` read as 0.65.
fn extract_any_float(text: &str) -> Option<f64> {
    let start = text.find(|c: char| c.is_ascii_digit() || c == '.')?;
    let rest = &text[start..];
    let end = rest
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(rest.len());
    let value: f64 = rest[..end].trim_end_matches('.').parse().ok()?;
    let is_percent = rest[end..].starts_with('%');

    if is_percent || (value > 1.0 && value <= 100.0) {
        Some(value / 100.0)
    } else if (0.0..=1.0).contains(&value) {
        Some(value)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Estimator
// ---------------------------------------------------------------------------

pub struct LlmEstimator {
    http: Client,
    api_key: SecretString,
    api_url: String,
    config: LlmConfig,
    /// Set after the API rejects the key.
    disabled: AtomicBool,
    total_calls: AtomicU64,
}

impl LlmEstimator {
    pub fn new(config: LlmConfig, api_key: SecretString) -> Result<Self> {
        config.validate()?;
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build Anthropic HTTP client")?;

        Ok(Self {
            http,
            api_key,
            api_url: ANTHROPIC_API_URL.to_string(),
            config,
            disabled: AtomicBool::new(false),
            total_calls: AtomicU64::new(0),
        })
    }

    /// Build from the key in `config.api_key_env`. `None` when the estimator
    /// is switched off in config or the key is not set.
    pub fn from_env(config: LlmConfig) -> Result<Option<Self>> {
        if !config.enabled {
            info!("LLM estimator disabled in config");
            return Ok(None);
        }
        match std::env::var(&config.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(Some(Self::new(config, SecretString::new(key))?)),
            _ => {
                warn!(env = %config.api_key_env, "No Anthropic API key set, LLM estimator disabled");
                Ok(None)
            }
        }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Relaxed)
    }

    pub fn total_calls(&self) -> u64 {
        self.total_calls.load(Ordering::Relaxed)
    }

    /// Build the user prompt for one market.
    pub fn build_prompt(market: &Market) -> String {
        let description = if market.description.trim().is_empty() {
            "No description provided".to_string()
        } else {
            market.description.chars().take(DESCRIPTION_LIMIT).collect()
        };
        let horizon = match analysis::hours_to_close(market, Utc::now()) {
            Some(hours) if hours >= 48.0 => format!("{:.0} days", hours / 24.0),
            Some(hours) => format!("{hours:.0} hours"),
            None => "no close date".to_string(),
        };

        format!(
            "You are an expert prediction market analyst. Analyze this prediction market question \
             and provide your assessment.\n\n\
             QUESTION: {question}\n\n\
             DESCRIPTION: {description}\n\n\
             CURRENT MARKET PROBABILITY: {prob:.1}%\n\
             TIME UNTIL CLOSE: {horizon}\n\n\
             Estimate the TRUE probability of this event occurring. Consider:\n\
             1. Base rates and historical precedents\n\
             2. The specific resolution criteria\n\
             3. Time horizon until resolution\n\
             4. Any logical or statistical reasoning\n\
             5. Potential biases in the current market price\n\n\
             Respond in this exact format:\n\n\
             PROBABILITY: [your probability estimate as a number between 0 and 1]\n\
             CONFIDENCE: [your confidence in this estimate, 0 to 1]\n\
             DIRECTION: [YES or NO - which direction you'd bet]\n\
             REASONING: [2-3 sentences explaining your estimate]\n\
             STRENGTH: [signal strength 0 to 1, how strongly you feel about this trade]\n",
            question = market.question,
            prob = market.probability * 100.0,
        )
    }

    /// Send a messages request with retry + backoff.
    async fn call_api(&self, prompt: &str) -> Result<String> {
        let request = MessagesRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        let mut last_error = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = BASE_BACKOFF_MS * 2u64.pow(attempt - 1);
                debug!(attempt, delay_ms = delay, "Retrying Anthropic API call");
                tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            }

            let resp = self
                .http
                .post(&self.api_url)
                .header("x-api-key", self.api_key.expose_secret())
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&request)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    self.total_calls.fetch_add(1, Ordering::Relaxed);

                    if status.is_success() {
                        let body: MessagesResponse =
                            response.json().await.context("Failed to parse Anthropic response")?;
                        return Ok(body
                            .content
                            .iter()
                            .filter_map(|b| b.text.as_deref())
                            .collect::<Vec<_>>()
                            .join(""));
                    }

                    if status == StatusCode::UNAUTHORIZED {
                        self.disabled.store(true, Ordering::Relaxed);
                        warn!("Anthropic rejected the API key, LLM estimator disabled");
                        return Err(BotError::Llm {
                            model: self.config.model.clone(),
                            message: "authentication failed".into(),
                        }
                        .into());
                    }

                    // Retryable errors: 429 (rate limit), 500+, 529 (overloaded)
                    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                        let error_text = response.text().await.unwrap_or_default();
                        warn!(status = %status, attempt, error = %error_text, "Retryable Anthropic API error");
                        last_error = Some(format!("HTTP {status}: {error_text}"));
                        continue;
                    }

                    let error_text = response.text().await.unwrap_or_default();
                    anyhow::bail!("Anthropic API error {status}: {error_text}");
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Anthropic request failed");
                    last_error = Some(format!("Request error: {e}"));
                }
            }
        }

        anyhow::bail!(
            "Anthropic API failed after {} retries: {}",
            MAX_RETRIES,
            last_error.unwrap_or_default()
        )
    }
}

#[async_trait]
impl Estimator for LlmEstimator {
    fn id(&self) -> EstimatorId {
        EstimatorId::Llm
    }

    async fn analyze(&self, market: &Market, _context: &MarketContext) -> Result<Option<Signal>> {
        if self.is_disabled() {
            return Ok(None);
        }

        debug!(market_id = %market.id, model = %self.config.model, "Requesting LLM estimate");
        let text = self.call_api(&Self::build_prompt(market)).await?;
        let reading = LlmReading::parse(&text).inspect_err(|_| {
            debug!(response = %text, "Unparseable LLM response");
        })?;
        Ok(Some(reading.into_signal(market.probability)?))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
