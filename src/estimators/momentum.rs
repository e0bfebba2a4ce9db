//! Momentum estimator.
//!
//! Follows probability trends: a multi-horizon momentum score gated by RSI,
//! with confidence taken from how well a straight line fits the history.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{pct, Estimator};
use crate::strategy::signal::Signal;
use crate::types::{BotError, Direction, EstimatorId, Market, MarketContext, ProbabilityPoint};

const OVERBOUGHT: f64 = 70.0;
const OVERSOLD: f64 = 30.0;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MomentumConfig {
    /// Horizons, in history points, shortest first.
    pub lookback_periods: Vec<usize>,
    pub rsi_period: usize,
    pub momentum_threshold: f64,
}

impl Default for MomentumConfig {
    fn default() -> Self {
        Self {
            lookback_periods: vec![5, 10, 20],
            rsi_period: 14,
            momentum_threshold: 0.05,
        }
    }
}

impl MomentumConfig {
    pub fn validate(&self) -> Result<(), BotError> {
        if self.lookback_periods.is_empty() || self.lookback_periods.contains(&0) {
            return Err(BotError::Config("momentum lookback_periods must be non-empty and positive".into()));
        }
        if self.rsi_period == 0 {
            return Err(BotError::Config("momentum rsi_period must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.momentum_threshold) {
            return Err(BotError::Config(format!(
                "momentum_threshold must be within [0, 1], got {}",
                self.momentum_threshold
            )));
        }
        Ok(())
    }

    fn required_history(&self) -> usize {
        self.lookback_periods.iter().copied().max().unwrap_or(0)
    }
}

pub struct MomentumEstimator {
    config: MomentumConfig,
}

impl MomentumEstimator {
    pub fn new(config: MomentumConfig) -> Result<Self, BotError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Weighted mean of per-point drift over each horizon, shorter horizons
    /// weighted 1, 1/2, 1/3, ...
    fn momentum(&self, history: &[ProbabilityPoint]) -> f64 {
        let Some(last) = history.last() else {
            return 0.0;
        };
        let current = last.probability;

        let scores: Vec<f64> = self
            .config
            .lookback_periods
            .iter()
            .filter(|period| history.len() >= **period)
            .map(|period| {
                let past = history[history.len() - period].probability;
                (current - past) / *period as f64
            })
            .collect();

        if scores.is_empty() {
            return 0.0;
        }
        let weights: Vec<f64> = (0..scores.len()).map(|i| 1.0 / (i + 1) as f64).collect();
        let weighted: f64 = scores.iter().zip(&weights).map(|(s, w)| s * w).sum();
        weighted / weights.iter().sum::<f64>()
    }

    /// RSI over the last `rsi_period` changes. 50 when there is not enough
    /// history, 100 when nothing fell.
    fn rsi(&self, history: &[ProbabilityPoint]) -> f64 {
        let period = self.config.rsi_period;
        if history.len() < period + 1 {
            return 50.0;
        }

        let window = &history[history.len() - period - 1..];
        let (gains, losses) = window.windows(2).fold((0.0, 0.0), |(g, l), pair| {
            let change = pair[1].probability - pair[0].probability;
            if change > 0.0 {
                (g + change, l)
            } else {
                (g, l - change)
            }
        });

        let avg_gain = gains / period as f64;
        let avg_loss = losses / period as f64;
        if avg_loss == 0.0 {
            return 100.0;
        }
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    }
}

/// R² of a least-squares line through the history, in [0, 1].
fn trend_strength(history: &[ProbabilityPoint]) -> f64 {
    let n = history.len();
    if n < 2 {
        return 0.0;
    }
    let y: Vec<f64> = history.iter().map(|p| p.probability).collect();
    let x_mean = (n - 1) as f64 / 2.0;
    let y_mean = y.iter().sum::<f64>() / n as f64;

    let (num, den) = y.iter().enumerate().fold((0.0, 0.0), |(num, den), (i, yi)| {
        let dx = i as f64 - x_mean;
        (num + dx * (yi - y_mean), den + dx * dx)
    });
    if den == 0.0 {
        return 0.0;
    }
    let slope = num / den;

    let (ss_res, ss_tot) = y.iter().enumerate().fold((0.0, 0.0), |(res, tot), (i, yi)| {
        let predicted = y_mean + slope * (i as f64 - x_mean);
        (res + (yi - predicted).powi(2), tot + (yi - y_mean).powi(2))
    });
    if ss_tot == 0.0 {
        return 0.0;
    }
    (1.0 - ss_res / ss_tot).clamp(0.0, 1.0)
}

#[async_trait]
impl Estimator for MomentumEstimator {
    fn id(&self) -> EstimatorId {
        EstimatorId::Momentum
    }

    async fn analyze(&self, market: &Market, context: &MarketContext) -> Result<Option<Signal>> {
        let history = &context.probability_history;
        if history.len() < self.config.required_history() {
            debug!(market_id = %market.id, points = history.len(), "Insufficient history for momentum");
            return Ok(None);
        }

        let current = market.probability;
        let momentum = self.momentum(history);
        let rsi = self.rsi(history);
        let trend = trend_strength(history);
        let threshold = self.config.momentum_threshold;

        let (direction, probability, label, outlook) = if momentum > threshold && rsi < OVERBOUGHT {
            (Direction::Yes, (current + momentum).min(0.95), "upward", "room for growth")
        } else if momentum < -threshold && rsi > OVERSOLD {
            (Direction::No, (current + momentum).max(0.05), "downward", "further decline possible")
        } else {
            return Ok(None);
        };

        let reasoning = format!(
            "Strong {label} momentum detected ({}). RSI at {rsi:.1} indicates {outlook}. Trend strength: {trend:.2}.",
            pct(momentum),
        );

        Ok(Some(Signal::new(
            probability,
            (trend * 0.8).min(1.0),
            direction,
            (momentum.abs() * trend).min(1.0),
            reasoning,
        )?))
    }
}
