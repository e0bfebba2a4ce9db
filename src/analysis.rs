//! Market analysis helpers.
//!
//! Cheap descriptive statistics over a market snapshot and its probability
//! history. Used for cycle diagnostics and the LLM prompt.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{Market, ProbabilityPoint};

/// Standard deviation of absolute step changes in probability.
pub fn volatility(history: &[ProbabilityPoint]) -> f64 {
    if history.len() < 2 {
        return 0.0;
    }
    let changes: Vec<f64> = history
        .windows(2)
        .map(|pair| (pair[1].probability - pair[0].probability).abs())
        .collect();
    let n = changes.len() as f64;
    let mean = changes.iter().sum::<f64>() / n;
    let variance = changes.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}

/// Pool, volume and trader count blended into a 0–1 score.
pub fn liquidity_score(market: &Market) -> f64 {
    let pool = (market.total_liquidity() / 1000.0).min(1.0);
    let volume = (market.volume / 5000.0).min(1.0);
    let traders = (market.unique_bettor_count as f64 / 50.0).min(1.0);
    pool * 0.4 + volume * 0.3 + traders * 0.3
}

/// How well-priced a market is likely to be: busy and stable markets score
/// high. In [0, 1].
pub fn market_efficiency(market: &Market, history: &[ProbabilityPoint]) -> f64 {
    let traders = (market.unique_bettor_count as f64 / 30.0).min(1.0);
    let volume = (market.volume / 3000.0).min(1.0);
    let stability = (1.0 - volatility(history) * 5.0).max(0.0);
    (traders * 0.4 + volume * 0.3 + stability * 0.3).clamp(0.0, 1.0)
}

/// Hours until close, floored at zero. `None` when the market has no close time.
pub fn hours_to_close(market: &Market, now: DateTime<Utc>) -> Option<f64> {
    market
        .close_time
        .map(|close| ((close - now).num_seconds() as f64 / 3600.0).max(0.0))
}

/// `"{activity}-activity-{certainty}"`, e.g. `"medium-activity-likely"`.
pub fn categorize(market: &Market) -> String {
    let traders = market.unique_bettor_count;
    let activity = if traders < 5 && market.volume < 500.0 {
        "low"
    } else if traders < 20 && market.volume < 2000.0 {
        "medium"
    } else {
        "high"
    };

    let certainty = match market.probability {
        p if p < 0.3 => "unlikely",
        p if p < 0.7 => "uncertain",
        _ => "likely",
    };

    format!("{activity}-activity-{certainty}")
}

/// Snapshot of the derived features for one market.
#[derive(Debug, Clone, Serialize)]
pub struct MarketFeatures {
    pub id: String,
    pub question: String,
    pub probability: f64,
    pub volume: f64,
    pub liquidity: f64,
    pub num_traders: u32,
    pub volatility: f64,
    pub efficiency: f64,
    pub hours_to_close: Option<f64>,
    pub category: String,
}

impl MarketFeatures {
    pub fn extract(market: &Market, history: &[ProbabilityPoint], now: DateTime<Utc>) -> Self {
        Self {
            id: market.id.clone(),
            question: market.question.clone(),
            probability: market.probability,
            volume: market.volume,
            liquidity: liquidity_score(market),
            num_traders: market.unique_bettor_count,
            volatility: volatility(history),
            efficiency: market_efficiency(market, history),
            hours_to_close: hours_to_close(market, now),
            category: categorize(market),
        }
    }
}
