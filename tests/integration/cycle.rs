//! End-to-end trading cycles against the mock platform.

use manifold_ensemble::config::BotConfig;
use manifold_ensemble::engine::TradingBot;
use manifold_ensemble::estimators::{ContrarianConfig, ContrarianEstimator, Estimator};
use manifold_ensemble::storage::Store;
use manifold_ensemble::strategy::ledger::OpenPosition;
use manifold_ensemble::strategy::{Ensemble, RiskConfig};
use manifold_ensemble::types::{Direction, EstimatorId};

use crate::mock_platform::{binary_market, MockPlatform};

/// Contrarian at 0.95 with 10 traders and 1000 volume: estimate 0.815,
/// confidence 0.8, Kelly 2.7/19, so quarter-Kelly on 1000 mana is 28.42.
const EXPECTED_BET: f64 = 28.42;

fn temp_store() -> Store {
    let mut p = std::env::temp_dir();
    p.push(format!("manifold_ensemble_it_{}", uuid::Uuid::new_v4()));
    Store::new(p)
}

fn cleanup(store: &Store) {
    let _ = std::fs::remove_dir_all(store.dir());
}

fn contrarian_ensemble() -> Ensemble {
    let estimators: Vec<Box<dyn Estimator>> =
        vec![Box::new(ContrarianEstimator::new(ContrarianConfig::default()).unwrap())];
    Ensemble::uniform(estimators).unwrap()
}

fn platform() -> MockPlatform {
    MockPlatform::with_markets(
        1000.0,
        vec![
            binary_market("EXTREME", 0.95, 10, 1000.0),
            binary_market("CALM", 0.50, 10, 1000.0),
        ],
    )
}

fn bot(platform: &MockPlatform, store: &Store, dry_run: bool) -> TradingBot {
    TradingBot::new(
        Box::new(platform.clone()),
        contrarian_ensemble(),
        RiskConfig::default(),
        store.clone(),
        BotConfig::default(),
        dry_run,
    )
    .unwrap()
}

#[tokio::test]
async fn test_cycle_places_contrarian_bet() {
    let store = temp_store();
    let platform = platform();
    let mut bot = bot(&platform, &store, false);

    let report = bot.run_once().await.unwrap();
    assert_eq!(report.cycle_number, 1);
    assert_eq!(report.markets_found, 2);
    assert_eq!(report.markets_open, 2);
    assert_eq!(report.signals, 1);
    assert_eq!(report.bets_placed, 1);
    assert!(!report.limited);
    assert!((report.total_committed - EXPECTED_BET).abs() < 0.01);

    let receipts = platform.receipts();
    assert_eq!(receipts.len(), 1);
    assert_eq!(receipts[0].market_id, "EXTREME");
    assert_eq!(receipts[0].direction, Direction::No);

    let ledger = bot.risk().ledger();
    assert_eq!(ledger.len(), 1);
    let position = &ledger.positions()[0];
    assert_eq!(position.entry_probability, 0.95);
    assert_eq!(position.votes.get(&EstimatorId::Contrarian), Some(&Direction::No));

    // Everything persisted.
    assert_eq!(store.load_positions().unwrap().len(), 1);
    let trades = store.load_trades().unwrap();
    assert_eq!(trades.len(), 1);
    assert!(!trades[0].dry_run);
    assert!(trades[0].bet_id.is_some());
    assert_eq!(store.load_performance().unwrap().unwrap().total_trades, 1);
    cleanup(&store);
}

#[tokio::test]
async fn test_open_position_not_doubled() {
    let store = temp_store();
    let platform = platform();
    let mut bot = bot(&platform, &store, false);

    bot.run_once().await.unwrap();
    let second = bot.run_once().await.unwrap();
    assert_eq!(second.cycle_number, 2);
    assert_eq!(second.bets_placed, 0);
    assert_eq!(platform.receipts().len(), 1);
    assert_eq!(bot.risk().ledger().len(), 1);
    cleanup(&store);
}

#[tokio::test]
async fn test_dry_run_records_without_betting() {
    let store = temp_store();
    let platform = platform();
    let mut bot = bot(&platform, &store, true);
    assert!(bot.is_dry_run());

    let report = bot.run_once().await.unwrap();
    assert_eq!(report.bets_placed, 1);
    assert!(platform.receipts().is_empty());
    assert!((platform.balance_now() - 1000.0).abs() < 1e-10);
    assert!(bot.risk().ledger().is_empty());

    let trades = store.load_trades().unwrap();
    assert_eq!(trades.len(), 1);
    assert!(trades[0].dry_run);
    assert!(trades[0].bet_id.is_none());
    cleanup(&store);
}

#[tokio::test]
async fn test_resolution_credits_voters() {
    let store = temp_store();
    let platform = platform();
    let mut bot = bot(&platform, &store, false);

    bot.run_once().await.unwrap();
    platform.resolve("EXTREME", "NO");

    let report = bot.run_once().await.unwrap();
    assert_eq!(report.positions_closed, 1);
    assert_eq!(report.markets_open, 1);
    assert!(bot.risk().ledger().is_empty());

    let performance = bot.ensemble().performance();
    let contrarian = performance[&EstimatorId::Contrarian];
    assert_eq!(contrarian.total_trades, 1);
    assert_eq!(contrarian.wins, 1);
    // NO bought at 0.05 pays 19 per unit.
    assert!((contrarian.total_return - 19.0).abs() < 1e-9);

    let saved = store.load_performance().unwrap().unwrap();
    assert_eq!(saved.estimators[&EstimatorId::Contrarian].wins, 1);
    cleanup(&store);
}

#[tokio::test]
async fn test_cancelled_market_closes_without_credit() {
    let store = temp_store();
    let platform = platform();
    let mut bot = bot(&platform, &store, false);

    bot.run_once().await.unwrap();
    platform.resolve("EXTREME", "CANCEL");

    let report = bot.run_once().await.unwrap();
    assert_eq!(report.positions_closed, 1);
    assert!(bot.risk().ledger().is_empty());
    assert_eq!(bot.ensemble().performance()[&EstimatorId::Contrarian].total_trades, 0);
    cleanup(&store);
}

#[tokio::test]
async fn test_closed_market_keeps_position_until_resolved() {
    let store = temp_store();
    let platform = platform();
    let mut bot = bot(&platform, &store, false);

    bot.run_once().await.unwrap();
    platform.close("EXTREME");

    // Closed but unresolved: the stake is still locked.
    let report = bot.run_once().await.unwrap();
    assert_eq!(report.positions_closed, 0);
    assert_eq!(report.markets_open, 1);
    assert_eq!(bot.risk().ledger().len(), 1);
    assert!((bot.risk().ledger().total_exposure() - EXPECTED_BET).abs() < 0.01);
    assert_eq!(store.load_positions().unwrap().len(), 1);
    assert_eq!(bot.ensemble().performance()[&EstimatorId::Contrarian].total_trades, 0);

    platform.resolve("EXTREME", "NO");
    let report = bot.run_once().await.unwrap();
    assert_eq!(report.positions_closed, 1);
    assert!(bot.risk().ledger().is_empty());

    let contrarian = bot.ensemble().performance()[&EstimatorId::Contrarian];
    assert_eq!(contrarian.total_trades, 1);
    assert_eq!(contrarian.wins, 1);
    cleanup(&store);
}

#[tokio::test]
async fn test_balance_failure_aborts_cycle() {
    let store = temp_store();
    let platform = platform();
    platform.set_balance_error(true);
    let mut bot = bot(&platform, &store, false);

    assert!(bot.run_once().await.is_err());
    assert!(platform.receipts().is_empty());

    platform.set_balance_error(false);
    let report = bot.run_once().await.unwrap();
    assert_eq!(report.cycle_number, 2);
    assert_eq!(report.bets_placed, 1);
    cleanup(&store);
}

#[tokio::test]
async fn test_failed_bet_is_counted_and_not_recorded() {
    let store = temp_store();
    let platform = platform();
    platform.set_bet_error(true);
    let mut bot = bot(&platform, &store, false);

    let report = bot.run_once().await.unwrap();
    assert_eq!(report.bets_placed, 0);
    assert_eq!(report.bets_failed, 1);
    assert!(bot.risk().ledger().is_empty());
    assert!(store.load_trades().unwrap().is_empty());
    cleanup(&store);
}

#[tokio::test]
async fn test_position_cap_limits_orders() {
    let store = temp_store();
    let held: Vec<OpenPosition> = (0..20)
        .map(|i| OpenPosition::new(format!("held-{i}"), 1.0, Direction::Yes))
        .collect();
    store.save_positions(&held).unwrap();

    let platform = platform();
    let mut bot = bot(&platform, &store, false);
    assert_eq!(bot.risk().ledger().len(), 20);

    let report = bot.run_once().await.unwrap();
    assert!(report.limited);
    assert_eq!(report.bets_placed, 0);
    assert!(platform.receipts().is_empty());
    // Unknown markets cannot be refreshed, so the positions stay.
    assert_eq!(bot.risk().ledger().len(), 20);
    cleanup(&store);
}

#[tokio::test]
async fn test_restart_restores_state() {
    let store = temp_store();
    let platform = platform();
    {
        let mut first = bot(&platform, &store, false);
        first.run_once().await.unwrap();
        platform.resolve("EXTREME", "NO");
        first.run_once().await.unwrap();
    }

    let restarted = bot(&platform, &store, false);
    assert!(restarted.risk().ledger().is_empty());
    assert_eq!(restarted.ensemble().performance()[&EstimatorId::Contrarian].wins, 1);
    assert_eq!(restarted.cycle_count(), 0);
    cleanup(&store);
}
