//! Risk manager.
//!
//! Turns a consensus signal into a stake: minimum-edge gate, fractional
//! Kelly scaled by confidence, absolute bet bounds and a portfolio exposure
//! ceiling. Owns the position ledger it sizes against.

use rust_decimal::prelude::*;
use serde::Deserialize;
use tracing::{debug, info};

use super::kelly::DirectionalEdge;
use super::ledger::{OpenPosition, PortfolioMetrics, PositionLedger};
use super::signal::Signal;
use crate::types::BotError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Smallest directional edge worth betting on.
    pub minimum_edge: f64,
    /// Fractional Kelly multiplier (0.25 = quarter-Kelly).
    pub kelly_fraction: f64,
    /// Ceiling on total open exposure as a fraction of bankroll.
    pub max_portfolio_risk: f64,
    /// Smallest bet in mana.
    pub min_bet: f64,
    /// Largest bet in mana.
    pub max_bet: f64,
    /// Open-position count at which new orders stop.
    pub max_positions: usize,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            minimum_edge: 0.05,
            kelly_fraction: 0.25,
            max_portfolio_risk: 0.30,
            min_bet: 10.0,
            max_bet: 100.0,
            max_positions: 20,
        }
    }
}

impl RiskConfig {
    pub fn validate(&self) -> Result<(), BotError> {
        let fractions = [
            ("minimum_edge", self.minimum_edge),
            ("kelly_fraction", self.kelly_fraction),
            ("max_portfolio_risk", self.max_portfolio_risk),
        ];
        for (name, value) in fractions {
            if !(0.0..=1.0).contains(&value) {
                return Err(BotError::Config(format!("{name} must be within [0, 1], got {value}")));
            }
        }
        for (name, value) in [("min_bet", self.min_bet), ("max_bet", self.max_bet)] {
            if !value.is_finite() || value < 0.0 {
                return Err(BotError::Config(format!("{name} must be a non-negative amount, got {value}")));
            }
        }
        if self.min_bet > self.max_bet {
            return Err(BotError::Config(format!(
                "min_bet ({}) exceeds max_bet ({})",
                self.min_bet, self.max_bet
            )));
        }
        if self.max_positions == 0 {
            return Err(BotError::Config("max_positions must be at least 1".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sizing outcome
// ---------------------------------------------------------------------------

/// Why a signal was not sized into a bet.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Rejection {
    #[error("invalid sizing input: {0}")]
    InvalidInput(String),

    #[error("edge {edge:.3} below minimum {minimum:.3}")]
    InsufficientEdge { edge: f64, minimum: f64 },

    #[error("non-positive Kelly fraction {kelly:.4}")]
    NonPositiveKelly { kelly: f64 },

    #[error("amount {amount:.2} below minimum bet {min_bet:.2} after portfolio limit")]
    BelowMinimum { amount: f64, min_bet: f64 },
}

/// An accepted bet size with the numbers that produced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sizing {
    pub amount: f64,
    pub edge: f64,
    pub kelly: f64,
    /// Whether the portfolio ceiling reduced the amount.
    pub shrunk: bool,
}

// ---------------------------------------------------------------------------
// Risk manager
// ---------------------------------------------------------------------------

/// Sizes bets and tracks open exposure.
///
/// All mutation goes through `&mut self` from the single trading task. Sizing
/// reads exposure and the caller later records the position, so analysing
/// markets in parallel would need a lock around the whole read-size-record
/// sequence.
#[derive(Debug)]
pub struct RiskManager {
    config: RiskConfig,
    ledger: PositionLedger,
}

impl RiskManager {
    pub fn new(config: RiskConfig) -> Result<Self, BotError> {
        Self::with_ledger(config, PositionLedger::new())
    }

    /// Build over a ledger restored from storage.
    pub fn with_ledger(config: RiskConfig, ledger: PositionLedger) -> Result<Self, BotError> {
        config.validate()?;
        Ok(Self { config, ledger })
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn ledger(&self) -> &PositionLedger {
        &self.ledger
    }

    /// Size a bet against explicit bankroll and exposure.
    pub fn evaluate(
        &self,
        signal: &Signal,
        market_probability: f64,
        bankroll: f64,
        open_exposure: f64,
    ) -> Result<Sizing, Rejection> {
        if !(bankroll.is_finite() && bankroll > 0.0) {
            return Err(Rejection::InvalidInput(format!("bankroll {bankroll}")));
        }
        if !(open_exposure.is_finite() && open_exposure >= 0.0) {
            return Err(Rejection::InvalidInput(format!("open exposure {open_exposure}")));
        }
        let edge = DirectionalEdge::compute(signal, market_probability).ok_or_else(|| {
            Rejection::InvalidInput(format!("market probability {market_probability}"))
        })?;

        if edge.edge < self.config.minimum_edge {
            return Err(Rejection::InsufficientEdge {
                edge: edge.edge,
                minimum: self.config.minimum_edge,
            });
        }

        // Can still be non-positive past the edge gate: the odds are nonlinear.
        let kelly = edge.kelly();
        if kelly <= 0.0 {
            return Err(Rejection::NonPositiveKelly { kelly });
        }

        let raw = kelly * self.config.kelly_fraction * bankroll * signal.confidence();
        let mut amount = raw.clamp(self.config.min_bet, self.config.max_bet);

        let ceiling = self.config.max_portfolio_risk * bankroll;
        let shrunk = open_exposure + amount > ceiling;
        if shrunk {
            amount = (ceiling - open_exposure).max(0.0);
        }

        if amount < self.config.min_bet {
            return Err(Rejection::BelowMinimum {
                amount,
                min_bet: self.config.min_bet,
            });
        }

        Ok(Sizing {
            amount: round_cents(amount),
            edge: edge.edge,
            kelly,
            shrunk,
        })
    }

    /// `evaluate` with the rejection reason dropped.
    pub fn size(
        &self,
        signal: &Signal,
        market_probability: f64,
        bankroll: f64,
        open_exposure: f64,
    ) -> Option<f64> {
        self.evaluate(signal, market_probability, bankroll, open_exposure)
            .map(|s| s.amount)
            .ok()
    }

    /// Size against the ledger's current exposure, logging the outcome.
    pub fn size_bet(&self, signal: &Signal, market_probability: f64, bankroll: f64) -> Option<f64> {
        match self.evaluate(signal, market_probability, bankroll, self.ledger.total_exposure()) {
            Ok(sizing) => {
                info!(
                    amount = format!("{:.2}M", sizing.amount),
                    kelly = format!("{:.1}%", sizing.kelly * 100.0),
                    edge = format!("{:.1}%", sizing.edge * 100.0),
                    confidence = format!("{:.1}%", signal.confidence() * 100.0),
                    shrunk = sizing.shrunk,
                    "Calculated bet size"
                );
                Some(sizing.amount)
            }
            Err(reason) => {
                debug!(reason = %reason, "Sizing rejected");
                None
            }
        }
    }

    /// Cheap per-cycle pre-filter: stop opening positions when over the
    /// exposure ceiling or at the position cap.
    pub fn should_limit_orders(&self, bankroll: f64) -> bool {
        let metrics = self.ledger.metrics(bankroll);
        metrics.exposure_ratio > self.config.max_portfolio_risk
            || metrics.num_positions >= self.config.max_positions
    }

    pub fn record_position(&mut self, position: OpenPosition) {
        self.ledger.add(position);
    }

    pub fn close_position(&mut self, market_id: &str) -> Vec<OpenPosition> {
        self.ledger.remove(market_id)
    }

    pub fn metrics(&self, bankroll: f64) -> PortfolioMetrics {
        self.ledger.metrics(bankroll)
    }
}

/// Round half away from zero to two decimals.
fn round_cents(amount: f64) -> f64 {
    Decimal::from_f64(amount)
        .map(|d| d.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|d| d.to_f64())
        .unwrap_or(amount)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Direction;

    fn signal(p: f64, confidence: f64, direction: Direction) -> Signal {
        Signal::new(p, confidence, direction, 0.75, "test").unwrap()
    }

    fn manager() -> RiskManager {
        RiskManager::new(RiskConfig::default()).unwrap()
    }

    #[test]
    fn test_reference_scenario() {
        let rm = manager();
        let amount = rm.size(&signal(0.70, 0.80, Direction::Yes), 0.50, 1000.0, 0.0);
        assert_eq!(amount, Some(80.0));
    }

    #[test]
    fn test_min_bet_boundary_is_inclusive() {
        let rm = manager();
        let amount = rm.size(&signal(0.70, 0.10, Direction::Yes), 0.50, 1000.0, 0.0);
        assert_eq!(amount, Some(10.0));
    }

    #[test]
    fn test_portfolio_ceiling_shrinks() {
        let rm = manager();
        let sizing = rm
            .evaluate(&signal(0.70, 0.80, Direction::Yes), 0.50, 1000.0, 280.0)
            .unwrap();
        assert_eq!(sizing.amount, 20.0);
        assert!(sizing.shrunk);
    }

    #[test]
    fn test_portfolio_ceiling_below_floor_rejects() {
        let rm = manager();
        let result = rm.evaluate(&signal(0.70, 0.80, Direction::Yes), 0.50, 1000.0, 295.0);
        assert!(matches!(result, Err(Rejection::BelowMinimum { .. })));
    }

    #[test]
    fn test_exposure_over_ceiling_rejects() {
        let rm = manager();
        assert!(rm.size(&signal(0.70, 0.80, Direction::Yes), 0.50, 1000.0, 400.0).is_none());
    }

    #[test]
    fn test_no_bet_sized() {
        let rm = manager();
        let amount = rm.size(&signal(0.30, 0.80, Direction::No), 0.50, 1000.0, 0.0).unwrap();
        assert!(amount >= 10.0 && amount <= 100.0);
        assert_eq!(amount, 80.0);
    }

    #[test]
    fn test_insufficient_edge_rejected_regardless_of_confidence() {
        let rm = manager();
        for confidence in [0.1, 0.5, 1.0] {
            let result = rm.evaluate(&signal(0.51, confidence, Direction::Yes), 0.50, 1000.0, 0.0);
            assert!(matches!(result, Err(Rejection::InsufficientEdge { .. })));
        }
    }

    #[test]
    fn test_wrong_direction_has_negative_edge() {
        let rm = manager();
        // Believes 0.70 but signals NO: edge = 0.50 - 0.70 < 0.
        assert!(rm.size(&signal(0.70, 0.9, Direction::No), 0.50, 1000.0, 0.0).is_none());
    }

    #[test]
    fn test_non_positive_kelly_rejected() {
        let config = RiskConfig {
            minimum_edge: 0.0,
            ..RiskConfig::default()
        };
        let rm = RiskManager::new(config).unwrap();
        // Zero edge passes a zero threshold but has zero Kelly.
        let result = rm.evaluate(&signal(0.50, 0.9, Direction::Yes), 0.50, 1000.0, 0.0);
        assert!(matches!(result, Err(Rejection::NonPositiveKelly { .. })));
    }

    #[test]
    fn test_monotonic_in_confidence() {
        let rm = manager();
        let mut last = 0.0;
        for step in 1..=20 {
            let confidence = step as f64 / 20.0;
            let amount = rm
                .size(&signal(0.72, confidence, Direction::Yes), 0.45, 1000.0, 0.0)
                .unwrap();
            assert!(amount >= last, "confidence {confidence} gave {amount} < {last}");
            last = amount;
        }
    }

    #[test]
    fn test_output_within_bounds() {
        let rm = manager();
        for (p, q, c) in [(0.99, 0.10, 1.0), (0.60, 0.50, 0.05), (0.20, 0.80, 0.7), (0.9, 0.5, 0.3)] {
            let direction = if p > q { Direction::Yes } else { Direction::No };
            if let Some(amount) = rm.size(&signal(p, c, direction), q, 5000.0, 0.0) {
                assert!((10.0..=100.0).contains(&amount), "{amount} out of bounds");
            }
        }
    }

    #[test]
    fn test_degenerate_inputs_rejected() {
        let rm = manager();
        let s = signal(0.70, 0.8, Direction::Yes);
        assert!(rm.size(&s, 0.0, 1000.0, 0.0).is_none());
        assert!(rm.size(&s, 1.0, 1000.0, 0.0).is_none());
        assert!(rm.size(&s, 0.5, 0.0, 0.0).is_none());
        assert!(rm.size(&s, 0.5, -10.0, 0.0).is_none());
        assert!(rm.size(&s, 0.5, 1000.0, f64::NAN).is_none());
    }

    #[test]
    fn test_amount_rounded_to_cents() {
        let rm = manager();
        let amount = rm.size(&signal(0.67, 0.33, Direction::Yes), 0.52, 1000.0, 0.0).unwrap();
        assert_eq!(amount, (amount * 100.0).round() / 100.0);
    }

    #[test]
    fn test_size_bet_uses_ledger_exposure() {
        let mut rm = manager();
        rm.record_position(OpenPosition::new("a", 280.0, Direction::Yes));
        let amount = rm.size_bet(&signal(0.70, 0.80, Direction::Yes), 0.50, 1000.0);
        assert_eq!(amount, Some(20.0));
    }

    #[test]
    fn test_should_limit_at_exposure_ceiling() {
        let mut rm = manager();
        rm.record_position(OpenPosition::new("market1", 200.0, Direction::Yes));
        rm.record_position(OpenPosition::new("market2", 100.0, Direction::Yes));
        // Exactly at 30% is not over the ceiling.
        assert!(!rm.should_limit_orders(1000.0));
        rm.record_position(OpenPosition::new("market3", 1.0, Direction::Yes));
        assert!(rm.should_limit_orders(1000.0));
    }

    #[test]
    fn test_should_limit_at_position_cap() {
        let mut rm = manager();
        for i in 0..20 {
            rm.record_position(OpenPosition::new(format!("m{i}"), 1.0, Direction::Yes));
        }
        // 20 / 100_000 exposure is nowhere near the ceiling.
        assert!(rm.should_limit_orders(100_000.0));
        rm.close_position("m0");
        assert!(!rm.should_limit_orders(100_000.0));
    }

    #[test]
    fn test_config_validation() {
        assert!(RiskConfig::default().validate().is_ok());

        let bad_bounds = RiskConfig { min_bet: 200.0, ..RiskConfig::default() };
        assert!(matches!(RiskManager::new(bad_bounds), Err(BotError::Config(_))));

        let negative = RiskConfig { min_bet: -1.0, ..RiskConfig::default() };
        assert!(negative.validate().is_err());

        let bad_fraction = RiskConfig { kelly_fraction: 1.5, ..RiskConfig::default() };
        assert!(bad_fraction.validate().is_err());

        let no_positions = RiskConfig { max_positions: 0, ..RiskConfig::default() };
        assert!(no_positions.validate().is_err());
    }

    #[test]
    fn test_round_cents() {
        assert_eq!(round_cents(79.999999999), 80.0);
        assert_eq!(round_cents(12.345), 12.35);
        assert_eq!(round_cents(10.0), 10.0);
    }
}
