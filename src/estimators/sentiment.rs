//! Sentiment estimator.
//!
//! Scores recent comments with keyword lists and recent bets by YES share of
//! volume, then leans toward the blend when it diverges from the price.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{pct, Estimator};
use crate::strategy::signal::Signal;
use crate::types::{BotError, Comment, Direction, EstimatorId, Market, MarketBet, MarketContext};

/// How many of the most recent comments and bets are scored.
const RECENT: usize = 20;
const COMMENT_WEIGHT: f64 = 0.6;
const TRADING_WEIGHT: f64 = 0.4;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SentimentConfig {
    pub min_comments: usize,
    /// Smallest gap between sentiment and price worth acting on.
    pub min_divergence: f64,
    pub positive_keywords: Vec<String>,
    pub negative_keywords: Vec<String>,
}

impl Default for SentimentConfig {
    fn default() -> Self {
        let words = |list: &[&str]| -> Vec<String> { list.iter().map(|w| w.to_string()).collect() };
        Self {
            min_comments: 3,
            min_divergence: 0.10,
            positive_keywords: words(&[
                "yes", "definitely", "likely", "probable", "confident", "will", "expect", "sure",
                "positive", "bullish", "agree", "correct",
            ]),
            negative_keywords: words(&[
                "no", "unlikely", "doubtful", "won't", "impossible", "bearish", "disagree", "wrong",
                "negative", "won't happen", "improbable",
            ]),
        }
    }
}

impl SentimentConfig {
    pub fn validate(&self) -> Result<(), BotError> {
        if !(0.0..=1.0).contains(&self.min_divergence) {
            return Err(BotError::Config(format!(
                "sentiment min_divergence must be within [0, 1], got {}",
                self.min_divergence
            )));
        }
        if self.positive_keywords.is_empty() && self.negative_keywords.is_empty() {
            return Err(BotError::Config("sentiment needs at least one keyword".into()));
        }
        Ok(())
    }
}

pub struct SentimentEstimator {
    config: SentimentConfig,
}

impl SentimentEstimator {
    pub fn new(mut config: SentimentConfig) -> Result<Self, BotError> {
        config.validate()?;
        for word in config.positive_keywords.iter_mut().chain(config.negative_keywords.iter_mut()) {
            *word = word.to_lowercase();
        }
        Ok(Self { config })
    }

    /// Mean keyword score over recent comments that hit any keyword.
    /// Keywords match as substrings of the lowercased text.
    fn comment_sentiment(&self, comments: &[Comment]) -> f64 {
        let recent = &comments[comments.len().saturating_sub(RECENT)..];
        let scores: Vec<f64> = recent
            .iter()
            .filter_map(|comment| {
                let text = comment.text.to_lowercase();
                let hits = |words: &[String]| words.iter().filter(|w| text.contains(w.as_str())).count();
                let pos = hits(&self.config.positive_keywords);
                let neg = hits(&self.config.negative_keywords);
                (pos + neg > 0).then(|| pos as f64 / (pos + neg + 1) as f64)
            })
            .collect();

        if scores.is_empty() {
            0.5
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        }
    }

    fn confidence(num_comments: usize, num_bets: usize, divergence: f64) -> f64 {
        let comments = (num_comments as f64 / 10.0).min(1.0);
        let bets = (num_bets as f64 / 20.0).min(1.0);
        let gap = (divergence * 2.0).min(1.0);
        (comments * 0.4 + bets * 0.3 + gap * 0.3).clamp(0.2, 0.8)
    }
}

/// YES share of volume across the most recent bets. 0.5 with no volume.
fn trading_sentiment(bets: &[MarketBet]) -> f64 {
    let (yes, no) = bets.iter().take(RECENT).fold((0.0, 0.0), |(yes, no), bet| match bet.outcome {
        Some(Direction::Yes) => (yes + bet.amount, no),
        Some(Direction::No) => (yes, no + bet.amount),
        None => (yes, no),
    });
    let total = yes + no;
    if total <= 0.0 {
        0.5
    } else {
        yes / total
    }
}

#[async_trait]
impl Estimator for SentimentEstimator {
    fn id(&self) -> EstimatorId {
        EstimatorId::Sentiment
    }

    async fn analyze(&self, market: &Market, context: &MarketContext) -> Result<Option<Signal>> {
        let comments = &context.comments;
        if comments.len() < self.config.min_comments {
            debug!(market_id = %market.id, comments = comments.len(), "Insufficient comments for sentiment");
            return Ok(None);
        }

        let from_comments = self.comment_sentiment(comments);
        let from_trading = trading_sentiment(&context.bets);
        let sentiment = from_comments * COMMENT_WEIGHT + from_trading * TRADING_WEIGHT;

        let current = market.probability;
        let divergence = (sentiment - current).abs();
        if divergence < self.config.min_divergence {
            return Ok(None);
        }

        let (direction, estimate) = if sentiment > current {
            (Direction::Yes, (current + divergence * 0.5).min(0.95))
        } else {
            (Direction::No, (current - divergence * 0.5).max(0.05))
        };

        let reasoning = format!(
            "Sentiment {} (comments: {}, trading: {}). Market at {}. Divergence: {}.",
            pct(sentiment),
            pct(from_comments),
            pct(from_trading),
            pct(current),
            pct(divergence),
        );

        Ok(Some(Signal::new(
            estimate,
            Self::confidence(comments.len(), context.bets.len(), divergence),
            direction,
            (divergence * 2.0).min(1.0),
            reasoning,
        )?))
    }
}
