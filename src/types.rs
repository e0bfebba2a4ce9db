//! Shared types for the trading bot.
//!
//! Market snapshots as seen through the Manifold API, the per-market context
//! handed to estimators, trade/position records and the crate error type.
//! Platform, estimator and strategy modules all depend on these, never on
//! each other's internals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Market
// ---------------------------------------------------------------------------

/// A binary prediction market snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub id: String,
    pub question: String,
    pub description: String,
    pub url: String,
    /// Current implied YES probability (0.0–1.0).
    pub probability: f64,
    /// Lifetime volume in mana.
    pub volume: f64,
    pub unique_bettor_count: u32,
    pub pool: Pool,
    pub close_time: Option<DateTime<Utc>>,
    pub is_resolved: bool,
    /// Raw resolution string ("YES", "NO", "MKT", "CANCEL") once resolved.
    pub resolution: Option<String>,
    pub creator_username: Option<String>,
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (P={:.1}% | vol={:.0}M | traders={})",
            self.question,
            self.probability * 100.0,
            self.volume,
            self.unique_bettor_count,
        )
    }
}

impl Market {
    /// Whether the market still accepts bets at `now`.
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        if self.is_resolved {
            return false;
        }
        match self.close_time {
            Some(close) => close > now,
            None => true,
        }
    }

    /// Total mana in the YES + NO pools.
    pub fn total_liquidity(&self) -> f64 {
        self.pool.total()
    }

    /// The resolved side, if the market resolved cleanly to YES or NO.
    pub fn resolved_direction(&self) -> Option<Direction> {
        if !self.is_resolved {
            return None;
        }
        self.resolution.as_deref().and_then(|r| r.parse().ok())
    }

    /// Helper to build a test market with sensible defaults.
    #[cfg(test)]
    pub fn sample() -> Self {
        Market {
            id: "test-001".to_string(),
            question: "Will the test suite pass?".to_string(),
            description: "Resolves YES if every test passes.".to_string(),
            url: "https://manifold.markets/test/test-001".to_string(),
            probability: 0.50,
            volume: 1000.0,
            unique_bettor_count: 10,
            pool: Pool { yes: 150.0, no: 150.0 },
            close_time: Some(Utc::now() + chrono::Duration::days(30)),
            is_resolved: false,
            resolution: None,
            creator_username: Some("tester".to_string()),
        }
    }
}

/// CPMM liquidity pool shares.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Pool {
    pub yes: f64,
    pub no: f64,
}

impl Pool {
    pub fn total(&self) -> f64 {
        self.yes + self.no
    }
}

// ---------------------------------------------------------------------------
// Estimator context
// ---------------------------------------------------------------------------

/// One point of a market's probability history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProbabilityPoint {
    pub timestamp: DateTime<Utc>,
    pub probability: f64,
}

/// A market comment, reduced to plain text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub text: String,
}

/// A bet placed by any user on a market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketBet {
    pub amount: f64,
    /// `None` for outcomes other than YES/NO.
    pub outcome: Option<Direction>,
    pub prob_after: Option<f64>,
    pub created_time: Option<DateTime<Utc>>,
}

/// Extra data fetched for a market before it is analysed.
#[derive(Debug, Clone, Default)]
pub struct MarketContext {
    /// Oldest first.
    pub probability_history: Vec<ProbabilityPoint>,
    /// Oldest first.
    pub comments: Vec<Comment>,
    /// Most recent first.
    pub bets: Vec<MarketBet>,
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Bet direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Yes,
    No,
}

impl Direction {
    /// Price paid per share on this side when YES trades at `yes_probability`.
    pub fn price(&self, yes_probability: f64) -> f64 {
        match self {
            Direction::Yes => yes_probability,
            Direction::No => 1.0 - yes_probability,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Yes => write!(f, "YES"),
            Direction::No => write!(f, "NO"),
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = BotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "YES" => Ok(Direction::Yes),
            "NO" => Ok(Direction::No),
            other => Err(BotError::InvalidSignal(format!("unknown direction: {other}"))),
        }
    }
}

/// Identity of a pluggable estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EstimatorId {
    Llm,
    Momentum,
    Contrarian,
    Value,
    Sentiment,
}

impl EstimatorId {
    pub const ALL: &'static [EstimatorId] = &[
        EstimatorId::Llm,
        EstimatorId::Momentum,
        EstimatorId::Contrarian,
        EstimatorId::Value,
        EstimatorId::Sentiment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EstimatorId::Llm => "llm",
            EstimatorId::Momentum => "momentum",
            EstimatorId::Contrarian => "contrarian",
            EstimatorId::Value => "value",
            EstimatorId::Sentiment => "sentiment",
        }
    }
}

impl fmt::Display for EstimatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EstimatorId {
    type Err = BotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EstimatorId::ALL
            .iter()
            .copied()
            .find(|id| id.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| BotError::Config(format!("unknown estimator: {s}")))
    }
}

// ---------------------------------------------------------------------------
// Performance
// ---------------------------------------------------------------------------

/// Realized track record of one estimator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_trades: u64,
    pub wins: u64,
    /// Sum of per-unit returns over resolved trades.
    pub total_return: f64,
}

impl PerformanceMetrics {
    /// Fraction of resolved trades won. 0.0 with no history.
    pub fn win_rate(&self) -> f64 {
        if self.total_trades == 0 {
            0.0
        } else {
            self.wins as f64 / self.total_trades as f64
        }
    }

    /// Average per-unit return. 0.0 with no history.
    pub fn average_return(&self) -> f64 {
        if self.total_trades == 0 {
            0.0
        } else {
            self.total_return / self.total_trades as f64
        }
    }

    pub fn record(&mut self, won: bool, unit_return: f64) {
        self.total_trades += 1;
        if won {
            self.wins += 1;
        }
        self.total_return += unit_return;
    }
}

impl fmt::Display for PerformanceMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "trades={} win_rate={:.1}% avg_return={:+.3}",
            self.total_trades,
            self.win_rate() * 100.0,
            self.average_return(),
        )
    }
}

// ---------------------------------------------------------------------------
// Execution records
// ---------------------------------------------------------------------------

/// Receipt returned by the platform after a bet is placed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetReceipt {
    pub bet_id: String,
    pub market_id: String,
    pub direction: Direction,
    pub amount: f64,
    pub prob_after: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for BetReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:.2}M on {} [{}]",
            self.direction, self.amount, self.market_id, self.bet_id,
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid signal: {0}")]
    InvalidSignal(String),

    #[error("Platform error: {0}")]
    Platform(String),

    #[error("LLM error ({model}): {message}")]
    Llm { model: String, message: String },

    #[error("Storage error: {0}")]
    Storage(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
