//! The opinion contract shared by every estimator and by the ensemble.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{BotError, Direction};

/// A probability/confidence/direction opinion on one binary market.
///
/// Bounds: finite values outside [0, 1] are clamped into range, non-finite
/// values are rejected. Every estimator builds its signals through
/// [`Signal::new`], so the policy is the same everywhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    probability: f64,
    confidence: f64,
    direction: Direction,
    strength: f64,
    reasoning: String,
}

impl Signal {
    pub fn new(
        probability: f64,
        confidence: f64,
        direction: Direction,
        strength: f64,
        reasoning: impl Into<String>,
    ) -> Result<Self, BotError> {
        Ok(Self {
            probability: unit_interval("probability", probability)?,
            confidence: unit_interval("confidence", confidence)?,
            direction,
            strength: unit_interval("strength", strength)?,
            reasoning: reasoning.into(),
        })
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn strength(&self) -> f64 {
        self.strength
    }

    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    /// `probability × confidence`, always derived.
    pub fn weighted_probability(&self) -> f64 {
        self.probability * self.confidence
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} @ {:.1}% (confidence: {:.1}%, strength: {:.2})",
            self.direction,
            self.probability * 100.0,
            self.confidence * 100.0,
            self.strength,
        )
    }
}

fn unit_interval(field: &str, value: f64) -> Result<f64, BotError> {
    if !value.is_finite() {
        return Err(BotError::InvalidSignal(format!("{field} is not finite: {value}")));
    }
    Ok(value.clamp(0.0, 1.0))
}
