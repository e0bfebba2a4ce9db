//! Mock platform for integration testing.
//!
//! Provides a deterministic `MarketPlatform` implementation that serves
//! known markets, accepts bets and tracks the balance, all in-memory.
//! Clones share state, so a test can keep a handle after giving one to
//! the bot.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use manifold_ensemble::platforms::MarketPlatform;
use manifold_ensemble::types::*;

#[derive(Clone)]
pub struct MockPlatform {
    markets: Arc<Mutex<Vec<Market>>>,
    balance: Arc<Mutex<f64>>,
    receipts: Arc<Mutex<Vec<BetReceipt>>>,
    /// Fail balance lookups.
    balance_error: Arc<Mutex<bool>>,
    /// Fail bet placement.
    bet_error: Arc<Mutex<bool>>,
}

impl MockPlatform {
    pub fn with_markets(balance: f64, markets: Vec<Market>) -> Self {
        Self {
            markets: Arc::new(Mutex::new(markets)),
            balance: Arc::new(Mutex::new(balance)),
            receipts: Arc::new(Mutex::new(Vec::new())),
            balance_error: Arc::new(Mutex::new(false)),
            bet_error: Arc::new(Mutex::new(false)),
        }
    }

    pub fn set_balance_error(&self, fail: bool) {
        *self.balance_error.lock().unwrap() = fail;
    }

    pub fn set_bet_error(&self, fail: bool) {
        *self.bet_error.lock().unwrap() = fail;
    }

    pub fn receipts(&self) -> Vec<BetReceipt> {
        self.receipts.lock().unwrap().clone()
    }

    pub fn balance_now(&self) -> f64 {
        *self.balance.lock().unwrap()
    }

    /// Resolve a market to `resolution` ("YES", "NO", "CANCEL", ...).
    pub fn resolve(&self, market_id: &str, resolution: &str) {
        let mut markets = self.markets.lock().unwrap();
        if let Some(m) = markets.iter_mut().find(|m| m.id == market_id) {
            m.is_resolved = true;
            m.resolution = Some(resolution.to_string());
        }
    }

    /// Move a market's close time into the past without resolving it.
    pub fn close(&self, market_id: &str) {
        let mut markets = self.markets.lock().unwrap();
        if let Some(m) = markets.iter_mut().find(|m| m.id == market_id) {
            m.close_time = Some(Utc::now() - Duration::hours(1));
        }
    }
}

/// An open binary market created by `MikhailTal`, closing in two weeks.
pub fn binary_market(id: &str, probability: f64, traders: u32, volume: f64) -> Market {
    Market {
        id: id.to_string(),
        question: format!("Mock question {id}?"),
        description: "Mock market".to_string(),
        url: format!("https://manifold.markets/mock/{id}"),
        probability,
        volume,
        unique_bettor_count: traders,
        pool: Pool { yes: 200.0, no: 200.0 },
        close_time: Some(Utc::now() + Duration::days(14)),
        is_resolved: false,
        resolution: None,
        creator_username: Some("MikhailTal".to_string()),
    }
}

#[async_trait]
impl MarketPlatform for MockPlatform {
    async fn markets_by_user(&self, username: &str, limit: u32) -> Result<Vec<Market>> {
        Ok(self
            .markets
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.creator_username.as_deref() == Some(username))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn market(&self, market_id: &str) -> Result<Market> {
        self.markets
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.id == market_id)
            .cloned()
            .ok_or_else(|| anyhow!("Market not found: {market_id}"))
    }

    async fn bets(&self, _market_id: &str, _limit: u32) -> Result<Vec<MarketBet>> {
        Ok(Vec::new())
    }

    async fn comments(&self, _market_id: &str, _limit: u32) -> Result<Vec<Comment>> {
        Ok(Vec::new())
    }

    async fn place_bet(&self, market_id: &str, direction: Direction, amount: f64) -> Result<BetReceipt> {
        if *self.bet_error.lock().unwrap() {
            return Err(anyhow!("simulated bet rejection"));
        }
        let market = self.market(market_id).await?;

        let mut balance = self.balance.lock().unwrap();
        if *balance < amount {
            return Err(anyhow!("Insufficient balance: need {amount:.2}, have {:.2}", *balance));
        }
        *balance -= amount;

        let receipt = BetReceipt {
            bet_id: format!("MOCK-{}", Uuid::new_v4()),
            market_id: market_id.to_string(),
            direction,
            amount,
            prob_after: Some(market.probability),
            timestamp: Utc::now(),
        };
        self.receipts.lock().unwrap().push(receipt.clone());
        Ok(receipt)
    }

    async fn balance(&self, _username: &str) -> Result<f64> {
        if *self.balance_error.lock().unwrap() {
            return Err(anyhow!("simulated balance outage"));
        }
        Ok(*self.balance.lock().unwrap())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[tokio::test]
async fn test_mock_filters_by_creator() {
    let mut other = binary_market("B", 0.5, 5, 100.0);
    other.creator_username = Some("someone-else".to_string());
    let platform = MockPlatform::with_markets(100.0, vec![binary_market("A", 0.5, 5, 100.0), other]);

    let markets = platform.markets_by_user("MikhailTal", 10).await.unwrap();
    assert_eq!(markets.len(), 1);
    assert_eq!(markets[0].id, "A");
}

#[tokio::test]
async fn test_mock_place_bet_debits_balance() {
    let platform = MockPlatform::with_markets(100.0, vec![binary_market("A", 0.5, 5, 100.0)]);
    let receipt = platform.place_bet("A", Direction::Yes, 30.0).await.unwrap();
    assert_eq!(receipt.amount, 30.0);
    assert!((platform.balance_now() - 70.0).abs() < 1e-10);

    assert!(platform.place_bet("A", Direction::No, 500.0).await.is_err());
    assert!(platform.place_bet("missing", Direction::No, 1.0).await.is_err());
    assert_eq!(platform.receipts().len(), 1);
}

#[tokio::test]
async fn test_mock_resolve() {
    let platform = MockPlatform::with_markets(100.0, vec![binary_market("A", 0.5, 5, 100.0)]);
    platform.resolve("A", "NO");
    let m = platform.market("A").await.unwrap();
    assert_eq!(m.resolved_direction(), Some(Direction::No));
}
