//! Probability estimators.
//!
//! Each estimator looks at one market (plus its recent history, comments and
//! bets) and either offers a [`Signal`] or abstains. The ensemble fuses
//! whatever they return.

pub mod contrarian;
pub mod llm;
pub mod momentum;
pub mod sentiment;
pub mod value;

use anyhow::Result;
use async_trait::async_trait;

use crate::strategy::signal::Signal;
use crate::types::{EstimatorId, Market, MarketContext};

pub use contrarian::{ContrarianConfig, ContrarianEstimator};
pub use llm::{LlmConfig, LlmEstimator};
pub use momentum::{MomentumConfig, MomentumEstimator};
pub use sentiment::{SentimentConfig, SentimentEstimator};
pub use value::{ValueConfig, ValueEstimator};

/// A pluggable source of probability opinions.
///
/// `Ok(None)` is an abstention. Errors are also treated as abstentions by the
/// ensemble, but get logged.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Estimator: Send + Sync {
    fn id(&self) -> EstimatorId;

    async fn analyze(&self, market: &Market, context: &MarketContext) -> Result<Option<Signal>>;
}

/// Format a fraction as a one-decimal percentage for reasoning strings.
pub(crate) fn pct(value: f64) -> String {
    format!("{:.1}%", value * 100.0)
}
