//! Value estimator.
//!
//! Thinly traded markets tend to be overconfident, so their fundamental value
//! is shrunk toward 50%. Well-traded markets are trusted and left alone.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{pct, Estimator};
use crate::strategy::signal::Signal;
use crate::types::{BotError, Direction, EstimatorId, Market, MarketContext};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValueConfig {
    /// Minimum YES + NO pool, in mana.
    pub min_liquidity: f64,
    pub min_traders: u32,
    pub value_threshold: f64,
    /// Below this many traders the price is regressed toward 50%.
    pub thin_market_traders: u32,
    /// Fraction of the price's distance from 50% that is kept.
    pub shrinkage: f64,
}

impl Default for ValueConfig {
    fn default() -> Self {
        Self {
            min_liquidity: 100.0,
            min_traders: 5,
            value_threshold: 0.10,
            thin_market_traders: 10,
            shrinkage: 0.7,
        }
    }
}

impl ValueConfig {
    pub fn validate(&self) -> Result<(), BotError> {
        if !self.min_liquidity.is_finite() || self.min_liquidity < 0.0 {
            return Err(BotError::Config(format!(
                "value min_liquidity must be non-negative, got {}",
                self.min_liquidity
            )));
        }
        for (name, value) in [("value_threshold", self.value_threshold), ("shrinkage", self.shrinkage)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(BotError::Config(format!("value {name} must be within [0, 1], got {value}")));
            }
        }
        Ok(())
    }
}

pub struct ValueEstimator {
    config: ValueConfig,
}

impl ValueEstimator {
    pub fn new(config: ValueConfig) -> Result<Self, BotError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// `None` when there is no independent view of the market's value.
    fn fundamental_value(&self, market: &Market) -> Option<f64> {
        if market.unique_bettor_count < self.config.thin_market_traders {
            Some(0.5 + (market.probability - 0.5) * self.config.shrinkage)
        } else {
            None
        }
    }

    fn confidence(liquidity: f64, traders: u32, gap: f64) -> f64 {
        let liquidity = (1.0 - (liquidity / 1000.0).min(1.0)).max(0.3);
        let traders = (traders as f64 / 20.0).min(1.0);
        let gap = (gap * 2.0).min(1.0);
        (liquidity * 0.3 + traders * 0.3 + gap * 0.4).clamp(0.2, 0.9)
    }
}

#[async_trait]
impl Estimator for ValueEstimator {
    fn id(&self) -> EstimatorId {
        EstimatorId::Value
    }

    async fn analyze(&self, market: &Market, _context: &MarketContext) -> Result<Option<Signal>> {
        let liquidity = market.total_liquidity();
        let traders = market.unique_bettor_count;
        if liquidity < self.config.min_liquidity || traders < self.config.min_traders {
            debug!(market_id = %market.id, liquidity, traders, "Insufficient liquidity or traders");
            return Ok(None);
        }

        let Some(value) = self.fundamental_value(market) else {
            return Ok(None);
        };

        let current = market.probability;
        let gap = (value - current).abs();
        if gap < self.config.value_threshold {
            return Ok(None);
        }

        let direction = if value > current { Direction::Yes } else { Direction::No };
        let reasoning = format!(
            "Fundamental value estimate {} vs market {}. Value gap of {}. Liquidity: {liquidity:.0}, Traders: {traders}.",
            pct(value),
            pct(current),
            pct(gap),
        );

        Ok(Some(Signal::new(
            value,
            Self::confidence(liquidity, traders, gap),
            direction,
            (gap * 2.0).min(1.0),
            reasoning,
        )?))
    }
}
