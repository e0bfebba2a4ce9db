//! Ensemble combiner.
//!
//! Holds the registered estimators, their weights and track records, and
//! fuses their signals into one consensus by confidence-scaled weighted vote.

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use super::signal::Signal;
use crate::estimators::Estimator;
use crate::types::{BotError, Direction, EstimatorId, Market, MarketContext, PerformanceMetrics};

/// Score given to an estimator with no resolved trades.
const DEFAULT_SCORE: f64 = 0.5;
/// Floor on the score of an estimator with history.
const MIN_SCORE: f64 = 0.1;
const WIN_RATE_WEIGHT: f64 = 0.6;
const RETURN_WEIGHT: f64 = 0.4;

// ---------------------------------------------------------------------------
// Weights
// ---------------------------------------------------------------------------

/// Non-negative estimator weights summing to 1.0.
///
/// Every registered estimator has an entry. Entries are only replaced
/// wholesale, never removed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeightMap(BTreeMap<EstimatorId, f64>);

impl WeightMap {
    pub fn uniform(ids: &[EstimatorId]) -> Result<Self, BotError> {
        Self::normalized(ids.iter().map(|id| (*id, 1.0)).collect())
    }

    /// Build from configured weights keyed by estimator name.
    ///
    /// Names that do not match a registered estimator are ignored with a
    /// warning. Registered estimators without a configured weight get 1/n
    /// before normalization. An all-zero configuration falls back to uniform.
    pub fn from_config(ids: &[EstimatorId], configured: &BTreeMap<String, f64>) -> Result<Self, BotError> {
        let mut raw = BTreeMap::new();
        for (name, weight) in configured {
            let id = match name.parse::<EstimatorId>() {
                Ok(id) if ids.contains(&id) => id,
                _ => {
                    warn!(estimator = %name, "Ignoring weight for unregistered estimator");
                    continue;
                }
            };
            if !weight.is_finite() || *weight < 0.0 {
                return Err(BotError::Config(format!(
                    "weight for {id} must be a non-negative number, got {weight}"
                )));
            }
            raw.insert(id, *weight);
        }

        let default = 1.0 / ids.len().max(1) as f64;
        for id in ids {
            raw.entry(*id).or_insert(default);
        }

        if raw.values().all(|w| *w == 0.0) {
            return Self::uniform(ids);
        }
        Self::normalized(raw)
    }

    fn normalized(raw: BTreeMap<EstimatorId, f64>) -> Result<Self, BotError> {
        let total: f64 = raw.values().sum();
        if raw.is_empty() || total <= 0.0 {
            return Err(BotError::Config("cannot normalize an empty weight map".into()));
        }
        Ok(Self(raw.into_iter().map(|(id, w)| (id, w / total)).collect()))
    }

    /// Weight of `id`, 0.0 when unregistered.
    pub fn get(&self, id: EstimatorId) -> f64 {
        self.0.get(&id).copied().unwrap_or(0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (EstimatorId, f64)> + '_ {
        self.0.iter().map(|(id, w)| (*id, *w))
    }

    pub fn total(&self) -> f64 {
        self.0.values().sum()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for WeightMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .iter()
            .map(|(id, w)| format!("{id}={:.1}%", w * 100.0))
            .collect();
        write!(f, "{}", parts.join(" "))
    }
}

// ---------------------------------------------------------------------------
// Consensus
// ---------------------------------------------------------------------------

/// A fused signal together with the signals that produced it.
#[derive(Debug, Clone)]
pub struct Consensus {
    pub signal: Signal,
    pub contributions: BTreeMap<EstimatorId, Signal>,
}

impl Consensus {
    /// Direction each contributor voted for.
    pub fn votes(&self) -> BTreeMap<EstimatorId, Direction> {
        self.contributions
            .iter()
            .map(|(id, s)| (*id, s.direction()))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Ensemble
// ---------------------------------------------------------------------------

struct Member {
    estimator: Box<dyn Estimator>,
    enabled: bool,
    performance: PerformanceMetrics,
}

/// Registered estimators, their weights and their track records.
///
/// Mutated only through `&mut self` by the trading task. Estimators are
/// invoked one after another; running them or several markets in parallel
/// would need the weight map behind a lock.
pub struct Ensemble {
    members: Vec<Member>,
    weights: WeightMap,
}

impl std::fmt::Debug for Ensemble {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ensemble")
            .field("estimators", &self.estimator_ids())
            .field("active", &self.active_count())
            .field("weights", &self.weights)
            .finish()
    }
}

impl Ensemble {
    /// Register `estimators` with weights taken from `configured`.
    pub fn new(
        estimators: Vec<Box<dyn Estimator>>,
        configured: &BTreeMap<String, f64>,
    ) -> Result<Self, BotError> {
        let ids = Self::unique_ids(&estimators)?;
        let weights = WeightMap::from_config(&ids, configured)?;
        Ok(Self::assemble(estimators, weights))
    }

    /// Register `estimators` with equal weights.
    pub fn uniform(estimators: Vec<Box<dyn Estimator>>) -> Result<Self, BotError> {
        let ids = Self::unique_ids(&estimators)?;
        let weights = WeightMap::uniform(&ids)?;
        Ok(Self::assemble(estimators, weights))
    }

    fn unique_ids(estimators: &[Box<dyn Estimator>]) -> Result<Vec<EstimatorId>, BotError> {
        if estimators.is_empty() {
            return Err(BotError::Config("ensemble needs at least one estimator".into()));
        }
        let mut ids: Vec<EstimatorId> = Vec::with_capacity(estimators.len());
        for estimator in estimators {
            let id = estimator.id();
            if ids.contains(&id) {
                return Err(BotError::Config(format!("estimator {id} registered twice")));
            }
            ids.push(id);
        }
        Ok(ids)
    }

    fn assemble(estimators: Vec<Box<dyn Estimator>>, weights: WeightMap) -> Self {
        info!(weights = %weights, "Ensemble initialised");
        let members = estimators
            .into_iter()
            .map(|estimator| Member {
                estimator,
                enabled: true,
                performance: PerformanceMetrics::default(),
            })
            .collect();
        Self { members, weights }
    }

    pub fn weights(&self) -> &WeightMap {
        &self.weights
    }

    pub fn estimator_ids(&self) -> Vec<EstimatorId> {
        self.members.iter().map(|m| m.estimator.id()).collect()
    }

    pub fn active_count(&self) -> usize {
        self.members.iter().filter(|m| m.enabled).count()
    }

    /// `None` when `id` is not registered.
    pub fn is_enabled(&self, id: EstimatorId) -> Option<bool> {
        self.member(id).map(|m| m.enabled)
    }

    /// Toggle participation without touching the weight. Returns false for an
    /// unregistered id.
    pub fn set_enabled(&mut self, id: EstimatorId, enabled: bool) -> bool {
        match self.members.iter_mut().find(|m| m.estimator.id() == id) {
            Some(member) => {
                member.enabled = enabled;
                info!(estimator = %id, enabled, "Estimator toggled");
                true
            }
            None => false,
        }
    }

    /// Ask every enabled estimator for a signal. Errors become abstentions.
    pub async fn collect(
        &self,
        market: &Market,
        context: &MarketContext,
    ) -> BTreeMap<EstimatorId, Signal> {
        let mut signals = BTreeMap::new();
        for member in self.members.iter().filter(|m| m.enabled) {
            let id = member.estimator.id();
            match member.estimator.analyze(market, context).await {
                Ok(Some(signal)) => {
                    debug!(estimator = %id, market_id = %market.id, signal = %signal, "Estimator signal");
                    signals.insert(id, signal);
                }
                Ok(None) => {
                    debug!(estimator = %id, market_id = %market.id, "Estimator abstained");
                }
                Err(e) => {
                    warn!(estimator = %id, market_id = %market.id, error = %e, "Estimator failed");
                }
            }
        }
        signals
    }

    /// Fuse signals into a consensus.
    ///
    /// Each signal counts with `weight × confidence`. Probability and
    /// confidence are weighted means; direction is the heavier side, with a
    /// tie going to NO; strength is the normalized margin between sides.
    pub fn fuse(&self, signals: &BTreeMap<EstimatorId, Signal>) -> Option<Signal> {
        if signals.is_empty() {
            return None;
        }

        let mut total_weight = 0.0;
        let mut weighted_prob = 0.0;
        let mut weighted_confidence = 0.0;
        let mut yes_mass = 0.0;
        let mut no_mass = 0.0;

        for (id, signal) in signals {
            let weight = self.weights.get(*id) * signal.confidence();
            total_weight += weight;
            weighted_prob += signal.probability() * weight;
            weighted_confidence += signal.confidence() * weight;
            match signal.direction() {
                Direction::Yes => yes_mass += weight,
                Direction::No => no_mass += weight,
            }
        }

        if total_weight <= 0.0 {
            return None;
        }

        let direction = if yes_mass > no_mass { Direction::Yes } else { Direction::No };

        let parts: Vec<String> = signals
            .iter()
            .map(|(id, s)| {
                format!(
                    "{id} ({:.0}%): {} @ {:.1}%",
                    self.weights.get(*id) * 100.0,
                    s.direction(),
                    s.probability() * 100.0,
                )
            })
            .collect();

        Signal::new(
            weighted_prob / total_weight,
            weighted_confidence / total_weight,
            direction,
            (yes_mass - no_mass).abs() / total_weight,
            format!("Ensemble: {}", parts.join("; ")),
        )
        .ok()
    }

    /// Collect then fuse.
    pub async fn analyze(&self, market: &Market, context: &MarketContext) -> Option<Consensus> {
        let contributions = self.collect(market, context).await;
        let signal = self.fuse(&contributions)?;
        Some(Consensus {
            signal,
            contributions,
        })
    }

    /// Recompute weights from realized performance.
    ///
    /// Estimators with resolved trades score
    /// `0.6·win_rate + 0.4·average_return`, floored at 0.1. Estimators with
    /// no trades, or missing from `performance`, score 0.5. Scores are
    /// normalized and the whole map replaced at once.
    pub fn reweight(&mut self, performance: &BTreeMap<EstimatorId, PerformanceMetrics>) {
        let scores: BTreeMap<EstimatorId, f64> = self
            .members
            .iter()
            .map(|m| {
                let id = m.estimator.id();
                let score = match performance.get(&id) {
                    Some(p) if p.total_trades > 0 => {
                        (WIN_RATE_WEIGHT * p.win_rate() + RETURN_WEIGHT * p.average_return()).max(MIN_SCORE)
                    }
                    _ => DEFAULT_SCORE,
                };
                (id, score)
            })
            .collect();

        match WeightMap::normalized(scores) {
            Ok(weights) => {
                info!(weights = %weights, "Updated estimator weights");
                self.weights = weights;
            }
            Err(e) => warn!(error = %e, "Keeping previous weights"),
        }
    }

    /// Track record of every registered estimator.
    pub fn performance(&self) -> BTreeMap<EstimatorId, PerformanceMetrics> {
        self.members
            .iter()
            .map(|m| (m.estimator.id(), m.performance))
            .collect()
    }

    /// Credit one resolved vote. Returns false for an unregistered id.
    pub fn record_outcome(&mut self, id: EstimatorId, won: bool, unit_return: f64) -> bool {
        match self.member_mut(id) {
            Some(member) => {
                member.performance.record(won, unit_return);
                true
            }
            None => false,
        }
    }

    /// Seed track records from persisted history. Unknown ids are ignored.
    pub fn restore_performance(&mut self, history: &BTreeMap<EstimatorId, PerformanceMetrics>) {
        for (id, metrics) in history {
            if let Some(member) = self.member_mut(*id) {
                member.performance = *metrics;
            }
        }
    }

    fn member(&self, id: EstimatorId) -> Option<&Member> {
        self.members.iter().find(|m| m.estimator.id() == id)
    }

    fn member_mut(&mut self, id: EstimatorId) -> Option<&mut Member> {
        self.members.iter_mut().find(|m| m.estimator.id() == id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
