//! Contrarian estimator: fades extreme probabilities toward a reversion target.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

use super::{pct, Estimator};
use crate::strategy::signal::Signal;
use crate::types::{BotError, Direction, EstimatorId, Market, MarketContext};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContrarianConfig {
    pub extreme_high: f64,
    pub extreme_low: f64,
    pub reversion_target: f64,
    /// Fraction of the distance to the target expected to revert.
    pub reversion_strength: f64,
    pub min_traders: u32,
}

impl Default for ContrarianConfig {
    fn default() -> Self {
        Self {
            extreme_high: 0.85,
            extreme_low: 0.15,
            reversion_target: 0.5,
            reversion_strength: 0.3,
            min_traders: 3,
        }
    }
}

impl ContrarianConfig {
    pub fn validate(&self) -> Result<(), BotError> {
        if !(0.0 < self.extreme_low && self.extreme_low < self.extreme_high && self.extreme_high < 1.0) {
            return Err(BotError::Config(format!(
                "contrarian thresholds must satisfy 0 < extreme_low ({}) < extreme_high ({}) < 1",
                self.extreme_low, self.extreme_high
            )));
        }
        for (name, value) in [
            ("reversion_target", self.reversion_target),
            ("reversion_strength", self.reversion_strength),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(BotError::Config(format!("contrarian {name} must be within [0, 1], got {value}")));
            }
        }
        Ok(())
    }
}

pub struct ContrarianEstimator {
    config: ContrarianConfig,
}

impl ContrarianEstimator {
    pub fn new(config: ContrarianConfig) -> Result<Self, BotError> {
        config.validate()?;
        Ok(Self { config })
    }

    fn reversion(&self, current: f64) -> f64 {
        let target = current + (self.config.reversion_target - current) * self.config.reversion_strength;
        target.clamp(0.05, 0.95)
    }

    /// Blend of how extreme the price is, how many traders are in, and how
    /// little volume there is to push against. Clamped to [0.2, 0.8].
    fn confidence(&self, extremeness: f64, market: &Market) -> f64 {
        let participation = (market.unique_bettor_count as f64 / 10.0).min(1.0);
        let volume = (1.0 - (market.volume / 10_000.0).min(1.0)).max(0.3);
        (extremeness.clamp(0.0, 1.0) * 0.5 + participation * 0.3 + volume * 0.2).clamp(0.2, 0.8)
    }
}

#[async_trait]
impl Estimator for ContrarianEstimator {
    fn id(&self) -> EstimatorId {
        EstimatorId::Contrarian
    }

    async fn analyze(&self, market: &Market, _context: &MarketContext) -> Result<Option<Signal>> {
        if market.unique_bettor_count < self.config.min_traders {
            return Ok(None);
        }

        let current = market.probability;
        let (high, low) = (self.config.extreme_high, self.config.extreme_low);

        let (direction, overshoot, extremeness, mood) = if current >= high {
            (Direction::No, current - high, (current - high) / (1.0 - high), "overconfident")
        } else if current <= low {
            (Direction::Yes, low - current, (low - current) / low, "overly pessimistic")
        } else {
            return Ok(None);
        };

        let estimate = self.reversion(current);
        let confidence = self.confidence(extremeness, market);
        let reasoning = format!(
            "Market at extreme probability ({}). Expect mean reversion. {} traders may be {mood}. \
             Reversion toward {}.",
            pct(current),
            market.unique_bettor_count,
            pct(estimate),
        );

        Ok(Some(Signal::new(
            estimate,
            confidence,
            direction,
            (overshoot * confidence).min(1.0),
            reasoning,
        )?))
    }
}
