//! Core engine: the reconcile → scan → analyze → size → bet cycle.
//!
//! `TradingBot` owns every mutable piece of state (ensemble weights, the
//! position ledger) and runs markets strictly one after another.

pub mod settlement;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use tracing::{debug, error, info, warn};

use crate::analysis::MarketFeatures;
use crate::config::BotConfig;
use crate::platforms::MarketPlatform;
use crate::storage::{PerformanceSnapshot, Store, TradeRecord};
use crate::strategy::ensemble::{Consensus, Ensemble};
use crate::strategy::ledger::{OpenPosition, PositionLedger};
use crate::strategy::risk::{RiskConfig, RiskManager};
use crate::types::{Market, MarketContext};

use settlement::settle;

// ---------------------------------------------------------------------------
// Cycle report
// ---------------------------------------------------------------------------

/// Summary of one trading cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub cycle_number: u64,
    pub timestamp: DateTime<Utc>,
    pub markets_found: usize,
    pub markets_open: usize,
    pub signals: usize,
    pub bets_placed: usize,
    pub bets_failed: usize,
    pub total_committed: f64,
    pub positions_closed: usize,
    pub balance: f64,
    /// True when portfolio limits stopped new orders this cycle.
    pub limited: bool,
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Cycle #{}: markets={}/{} signals={} bets={} failed={} committed={:.2}M closed={} balance={:.0}M",
            self.cycle_number,
            self.markets_open,
            self.markets_found,
            self.signals,
            self.bets_placed,
            self.bets_failed,
            self.total_committed,
            self.positions_closed,
            self.balance,
        )
    }
}

/// What happened to one market.
#[derive(Debug, Clone, Copy, PartialEq)]
enum MarketOutcome {
    NoSignal,
    Declined,
    Placed(f64),
    Failed,
}

// ---------------------------------------------------------------------------
// Trading bot
// ---------------------------------------------------------------------------

pub struct TradingBot {
    platform: Box<dyn MarketPlatform>,
    ensemble: Ensemble,
    risk: RiskManager,
    store: Store,
    settings: BotConfig,
    dry_run: bool,
    cycle_count: u64,
    trades_recorded: u64,
}

impl TradingBot {
    /// Assemble the bot and restore open positions and estimator track
    /// records from `store`.
    pub fn new(
        platform: Box<dyn MarketPlatform>,
        mut ensemble: Ensemble,
        risk_config: RiskConfig,
        store: Store,
        settings: BotConfig,
        dry_run: bool,
    ) -> Result<Self> {
        let positions = store.load_positions()?;
        let risk = RiskManager::with_ledger(risk_config, PositionLedger::from_positions(positions))?;

        if let Some(snapshot) = store.load_performance()? {
            ensemble.restore_performance(&snapshot.estimators);
            ensemble.reweight(&snapshot.estimators);
        }
        let trades_recorded = store.load_trades()?.len() as u64;

        info!(
            platform = platform.name(),
            target = %settings.target_user,
            dry_run,
            estimators = ensemble.active_count(),
            open_positions = risk.ledger().len(),
            "Trading bot initialised"
        );

        Ok(Self {
            platform,
            ensemble,
            risk,
            store,
            settings,
            dry_run,
            cycle_count: 0,
            trades_recorded,
        })
    }

    pub fn ensemble(&self) -> &Ensemble {
        &self.ensemble
    }

    pub fn ensemble_mut(&mut self) -> &mut Ensemble {
        &mut self.ensemble
    }

    pub fn risk(&self) -> &RiskManager {
        &self.risk
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    /// Run one full cycle.
    ///
    /// Fails only when the market list or the balance cannot be fetched.
    /// Per-market failures are logged and skipped.
    pub async fn run_once(&mut self) -> Result<CycleReport> {
        self.cycle_count += 1;
        let mut report = CycleReport {
            cycle_number: self.cycle_count,
            timestamp: Utc::now(),
            ..CycleReport::default()
        };
        info!(cycle = self.cycle_count, "Starting trading cycle");

        report.positions_closed = self.reconcile().await;

        let markets = self
            .platform
            .markets_by_user(&self.settings.target_user, self.settings.market_limit)
            .await
            .with_context(|| format!("Failed to fetch markets by {}", self.settings.target_user))?;
        report.markets_found = markets.len();

        let now = Utc::now();
        let open: Vec<Market> = markets.into_iter().filter(|m| m.is_open(now)).collect();
        report.markets_open = open.len();
        info!(
            found = report.markets_found,
            open = report.markets_open,
            target = %self.settings.target_user,
            "Markets fetched"
        );

        let balance = self
            .platform
            .balance(&self.settings.username)
            .await
            .with_context(|| format!("Could not fetch balance for {}", self.settings.username))?;
        report.balance = balance;
        info!(balance = format!("{balance:.0}M"), "Current balance");

        if self.risk.should_limit_orders(balance) {
            warn!(
                positions = self.risk.ledger().len(),
                exposure = format!("{:.2}M", self.risk.ledger().total_exposure()),
                "Portfolio risk limits reached, skipping new trades"
            );
            report.limited = true;
        } else {
            for market in &open {
                if self.risk.ledger().contains(&market.id) {
                    debug!(market_id = %market.id, "Position already open, skipping");
                    continue;
                }
                match self.analyze_and_trade(market, balance).await {
                    MarketOutcome::NoSignal => {}
                    MarketOutcome::Declined => report.signals += 1,
                    MarketOutcome::Placed(amount) => {
                        report.signals += 1;
                        report.bets_placed += 1;
                        report.total_committed += amount;
                    }
                    MarketOutcome::Failed => {
                        report.signals += 1;
                        report.bets_failed += 1;
                    }
                }
            }
        }

        self.persist();
        let performance = self.ensemble.performance();
        self.ensemble.reweight(&performance);

        info!(report = %report, "Trading cycle complete");
        Ok(report)
    }

    /// Drop positions whose markets have resolved and credit the estimators
    /// that voted on them. Closed but unresolved markets keep their stake
    /// locked, so their positions stay. Returns the number of markets settled.
    pub async fn reconcile(&mut self) -> usize {
        let mut market_ids: Vec<String> = self
            .risk
            .ledger()
            .positions()
            .iter()
            .map(|p| p.market_id.clone())
            .collect();
        market_ids.sort();
        market_ids.dedup();

        let mut settled = 0;
        for market_id in market_ids {
            let market = match self.platform.market(&market_id).await {
                Ok(m) => m,
                Err(e) => {
                    warn!(market_id = %market_id, error = %e, "Could not refresh position, keeping it");
                    continue;
                }
            };
            if !market.is_resolved {
                if !market.is_open(Utc::now()) {
                    debug!(market_id = %market_id, "Market closed, awaiting resolution");
                }
                continue;
            }

            let removed = self.risk.close_position(&market_id);
            settled += 1;
            match market.resolved_direction() {
                Some(outcome) => {
                    for position in &removed {
                        for vote in settle(position, outcome) {
                            self.ensemble.record_outcome(vote.estimator, vote.won, vote.unit_return);
                        }
                    }
                    info!(market_id = %market_id, outcome = %outcome, "Position settled");
                }
                None => {
                    info!(
                        market_id = %market_id,
                        resolution = market.resolution.as_deref().unwrap_or("unknown"),
                        "Position closed without a YES/NO outcome"
                    );
                }
            }
        }
        settled
    }

    /// History, comments and recent bets. Each part falls back to empty on
    /// failure.
    async fn fetch_context(&self, market_id: &str) -> MarketContext {
        let probability_history = self
            .platform
            .probability_history(market_id)
            .await
            .unwrap_or_else(|e| {
                warn!(market_id, error = %e, "Could not fetch probability history");
                Vec::new()
            });
        let comments = self
            .platform
            .comments(market_id, self.settings.comment_limit)
            .await
            .unwrap_or_else(|e| {
                warn!(market_id, error = %e, "Could not fetch comments");
                Vec::new()
            });
        let bets = self
            .platform
            .bets(market_id, self.settings.bet_limit)
            .await
            .unwrap_or_else(|e| {
                warn!(market_id, error = %e, "Could not fetch bets");
                Vec::new()
            });

        MarketContext {
            probability_history,
            comments,
            bets,
        }
    }

    async fn analyze_and_trade(&mut self, market: &Market, balance: f64) -> MarketOutcome {
        info!(market_id = %market.id, question = %truncate(&market.question, 80), "Analyzing market");

        let context = self.fetch_context(&market.id).await;
        let features = MarketFeatures::extract(market, &context.probability_history, Utc::now());
        debug!(
            category = %features.category,
            liquidity = format!("{:.2}", features.liquidity),
            volatility = format!("{:.4}", features.volatility),
            efficiency = format!("{:.2}", features.efficiency),
            "Market features"
        );

        let Some(consensus) = self.ensemble.analyze(market, &context).await else {
            debug!(market_id = %market.id, "No consensus signal");
            return MarketOutcome::NoSignal;
        };
        let signal = &consensus.signal;
        info!(
            direction = %signal.direction(),
            probability = format!("{:.1}%", signal.probability() * 100.0),
            confidence = format!("{:.1}%", signal.confidence() * 100.0),
            strength = format!("{:.2}", signal.strength()),
            reasoning = %truncate(signal.reasoning(), 160),
            "Consensus signal"
        );

        let Some(amount) = self.risk.size_bet(signal, market.probability, balance) else {
            info!(market_id = %market.id, "Risk manager declined bet");
            return MarketOutcome::Declined;
        };

        if self.dry_run {
            info!(
                market_id = %market.id,
                direction = %signal.direction(),
                amount = format!("{amount:.2}M"),
                "[DRY RUN] Would place bet"
            );
            self.record_trade(market, &consensus, amount, None);
            return MarketOutcome::Placed(amount);
        }

        match self.platform.place_bet(&market.id, signal.direction(), amount).await {
            Ok(receipt) => {
                info!(receipt = %receipt, question = %truncate(&market.question, 60), "Trade executed");
                self.record_trade(market, &consensus, amount, Some(receipt.bet_id));

                let mut position = OpenPosition::new(market.id.clone(), amount, signal.direction());
                position.entry_probability = market.probability;
                position.votes = consensus.votes();
                self.risk.record_position(position);
                MarketOutcome::Placed(amount)
            }
            Err(e) => {
                error!(market_id = %market.id, error = %e, "Trade failed");
                MarketOutcome::Failed
            }
        }
    }

    fn record_trade(&mut self, market: &Market, consensus: &Consensus, amount: f64, bet_id: Option<String>) {
        let record = TradeRecord {
            timestamp: Utc::now(),
            market_id: market.id.clone(),
            question: market.question.clone(),
            direction: consensus.signal.direction(),
            amount,
            market_probability: market.probability,
            signal: consensus.signal.clone(),
            dry_run: bet_id.is_none(),
            bet_id,
        };
        match self.store.append_trade(&record) {
            Ok(()) => self.trades_recorded += 1,
            Err(e) => error!(error = %e, "Failed to record trade"),
        }
    }

    /// Write positions and the performance snapshot. Failures are logged.
    fn persist(&self) {
        if let Err(e) = self.store.save_positions(self.risk.ledger().positions()) {
            error!(error = %e, "Failed to save positions");
        }
        let snapshot = PerformanceSnapshot {
            timestamp: Utc::now(),
            total_trades: self.trades_recorded,
            estimators: self.ensemble.performance(),
        };
        if let Err(e) = self.store.save_performance(&snapshot) {
            error!(error = %e, "Failed to save performance data");
        }
    }
}

/// First `max` characters, with an ellipsis when cut.
fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let head: String = text.chars().take(max).collect();
        format!("{head}...")
    }
}
