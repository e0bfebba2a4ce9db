//! In-memory record of open exposure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{Direction, EstimatorId};

/// An executed bet that has not been closed yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenPosition {
    pub market_id: String,
    pub amount: f64,
    pub direction: Direction,
    /// Market YES probability when the bet was placed.
    pub entry_probability: f64,
    pub opened_at: DateTime<Utc>,
    /// Direction each contributing estimator voted for.
    #[serde(default)]
    pub votes: BTreeMap<EstimatorId, Direction>,
}

impl OpenPosition {
    pub fn new(market_id: impl Into<String>, amount: f64, direction: Direction) -> Self {
        Self {
            market_id: market_id.into(),
            amount,
            direction,
            entry_probability: 0.5,
            opened_at: Utc::now(),
            votes: BTreeMap::new(),
        }
    }
}

/// Derived portfolio view. Never cached.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PortfolioMetrics {
    pub total_exposure: f64,
    pub exposure_ratio: f64,
    pub num_positions: usize,
    pub avg_position_size: f64,
    pub available_capital: f64,
}

/// Sole owner of open positions.
///
/// At most one position per market by convention; `remove` drops every entry
/// for the market either way.
#[derive(Debug, Default)]
pub struct PositionLedger {
    positions: Vec<OpenPosition>,
}

impl PositionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_positions(positions: Vec<OpenPosition>) -> Self {
        Self { positions }
    }

    pub fn add(&mut self, position: OpenPosition) {
        self.positions.push(position);
    }

    /// Remove and return every position on `market_id`.
    pub fn remove(&mut self, market_id: &str) -> Vec<OpenPosition> {
        let (removed, kept) = std::mem::take(&mut self.positions)
            .into_iter()
            .partition(|p| p.market_id == market_id);
        self.positions = kept;
        removed
    }

    pub fn total_exposure(&self) -> f64 {
        self.positions.iter().map(|p| p.amount).sum()
    }

    pub fn metrics(&self, bankroll: f64) -> PortfolioMetrics {
        let total_exposure = self.total_exposure();
        let num_positions = self.positions.len();
        PortfolioMetrics {
            total_exposure,
            exposure_ratio: if bankroll > 0.0 { total_exposure / bankroll } else { 0.0 },
            num_positions,
            avg_position_size: if num_positions > 0 {
                total_exposure / num_positions as f64
            } else {
                0.0
            },
            available_capital: bankroll - total_exposure,
        }
    }

    pub fn positions(&self) -> &[OpenPosition] {
        &self.positions
    }

    pub fn contains(&self, market_id: &str) -> bool {
        self.positions.iter().any(|p| p.market_id == market_id)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}
