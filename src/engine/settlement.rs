//! Settlement of resolved positions into per-estimator outcomes.

use crate::strategy::ledger::OpenPosition;
use crate::types::{Direction, EstimatorId};

/// How one estimator's vote on a resolved position turned out.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoteOutcome {
    pub estimator: EstimatorId,
    pub won: bool,
    /// Return per unit staked on the voted side at the entry price.
    pub unit_return: f64,
}

/// Score every vote on `position` against the resolved side.
///
/// A winning vote bought its side at price `q` and returns `(1 − q) / q`;
/// a losing vote returns −1. Votes whose entry price is degenerate are
/// skipped.
pub fn settle(position: &OpenPosition, outcome: Direction) -> Vec<VoteOutcome> {
    position
        .votes
        .iter()
        .filter_map(|(&estimator, &vote)| {
            let price = vote.price(position.entry_probability);
            if !(price > 0.0 && price < 1.0) {
                return None;
            }
            let won = vote == outcome;
            let unit_return = if won { (1.0 - price) / price } else { -1.0 };
            Some(VoteOutcome {
                estimator,
                won,
                unit_return,
            })
        })
        .collect()
}
