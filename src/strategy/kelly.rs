//! Kelly criterion arithmetic.
//!
//! Edge, win probability and payout odds for the side a signal points at,
//! and the full Kelly fraction for those odds. Scaling, caps and portfolio
//! limits live in the risk manager.

use super::signal::Signal;
use crate::types::Direction;

/// Edge of a signal against the quoted market probability, on its own side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionalEdge {
    pub direction: Direction,
    /// Believed probability minus quoted probability, for the bet side.
    pub edge: f64,
    /// Probability that the bet side wins.
    pub win_prob: f64,
    /// Net payout per unit staked if the bet side wins.
    pub payout_odds: f64,
}

impl DirectionalEdge {
    /// `None` when the market probability is not strictly inside (0, 1),
    /// where the payout odds are undefined.
    pub fn compute(signal: &Signal, market_probability: f64) -> Option<Self> {
        if !(market_probability > 0.0 && market_probability < 1.0) {
            return None;
        }

        let p = signal.probability();
        let q = market_probability;

        let edge = match signal.direction() {
            Direction::Yes => Self {
                direction: Direction::Yes,
                edge: p - q,
                win_prob: p,
                payout_odds: (1.0 - q) / q,
            },
            Direction::No => Self {
                direction: Direction::No,
                edge: q - p,
                win_prob: 1.0 - p,
                payout_odds: q / (1.0 - q),
            },
        };
        Some(edge)
    }

    pub fn kelly(&self) -> f64 {
        kelly_fraction(self.win_prob, self.payout_odds)
    }
}

/// Full Kelly: f* = (b·p − q) / b, with b the net odds and q = 1 − p.
pub fn kelly_fraction(win_prob: f64, payout_odds: f64) -> f64 {
    if payout_odds <= 0.0 {
        return 0.0;
    }
    (win_prob * payout_odds - (1.0 - win_prob)) / payout_odds
}
