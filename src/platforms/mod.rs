//! Platform integrations.
//!
//! Defines the `MarketPlatform` trait the trading loop talks to, and the
//! Manifold Markets implementation.

pub mod manifold;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{BetReceipt, Comment, Direction, Market, MarketBet, ProbabilityPoint};

pub use manifold::ManifoldClient;

/// Bets fetched to rebuild a probability history.
pub const HISTORY_BET_LIMIT: u32 = 1000;

/// Abstraction over a binary prediction market venue.
#[async_trait]
pub trait MarketPlatform: Send + Sync {
    /// Binary markets created by `username`, newest first.
    async fn markets_by_user(&self, username: &str, limit: u32) -> Result<Vec<Market>>;

    /// Fresh snapshot of one market.
    async fn market(&self, market_id: &str) -> Result<Market>;

    /// Bets on a market, most recent first.
    async fn bets(&self, market_id: &str, limit: u32) -> Result<Vec<MarketBet>>;

    /// Comments on a market, oldest first.
    async fn comments(&self, market_id: &str, limit: u32) -> Result<Vec<Comment>>;

    /// Probability over time, oldest first, rebuilt from each bet's
    /// post-trade probability.
    async fn probability_history(&self, market_id: &str) -> Result<Vec<ProbabilityPoint>> {
        let bets = self.bets(market_id, HISTORY_BET_LIMIT).await?;
        Ok(history_from_bets(&bets))
    }

    async fn place_bet(&self, market_id: &str, direction: Direction, amount: f64) -> Result<BetReceipt>;

    /// Current mana balance of `username`.
    async fn balance(&self, username: &str) -> Result<f64>;

    /// Platform name for logging.
    fn name(&self) -> &str;
}

/// Points from bets that carry both a timestamp and a post-trade probability,
/// sorted by time.
pub fn history_from_bets(bets: &[MarketBet]) -> Vec<ProbabilityPoint> {
    let mut points: Vec<ProbabilityPoint> = bets
        .iter()
        .filter_map(|bet| {
            Some(ProbabilityPoint {
                timestamp: bet.created_time?,
                probability: bet.prob_after?,
            })
        })
        .collect();
    points.sort_by_key(|p| p.timestamp);
    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn test_history_from_bets_sorted_and_filtered() {
        let now = Utc::now();
        let bet = |minutes: i64, prob: Option<f64>| MarketBet {
            amount: 10.0,
            outcome: Some(Direction::Yes),
            prob_after: prob,
            created_time: Some(now - Duration::minutes(minutes)),
        };
        // Most recent first, as the API returns them.
        let bets = vec![
            bet(1, Some(0.62)),
            bet(5, None),
            bet(10, Some(0.55)),
            MarketBet { created_time: None, ..bet(20, Some(0.4)) },
        ];

        let history = history_from_bets(&bets);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].probability, 0.55);
        assert_eq!(history[1].probability, 0.62);
        assert!(history[0].timestamp < history[1].timestamp);
    }
}
