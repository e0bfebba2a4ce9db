//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs. Every
//! section has defaults, so an empty file is a valid configuration.
//! Secrets (API keys) are referenced by env-var name in the config and
//! resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;

use crate::estimators::{ContrarianConfig, LlmConfig, MomentumConfig, SentimentConfig, ValueConfig};
use crate::platforms::manifold::BASE_URL;
use crate::storage::DEFAULT_DATA_DIR;
use crate::strategy::risk::RiskConfig;
use crate::types::{BotError, EstimatorId};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub bot: BotConfig,
    pub manifold: ManifoldConfig,
    pub llm: LlmConfig,
    pub risk: RiskConfig,
    /// Initial estimator weights keyed by estimator name.
    pub weights: BTreeMap<String, f64>,
    pub estimators: EstimatorsConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BotConfig {
    /// Account the bot trades from (used for the balance lookup).
    pub username: String,
    /// Creator whose markets are traded.
    pub target_user: String,
    pub interval_secs: u64,
    pub data_dir: String,
    /// Markets fetched per cycle.
    pub market_limit: u32,
    pub comment_limit: u32,
    pub bet_limit: u32,
    pub dry_run: bool,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            username: "MikhailTalBot".to_string(),
            target_user: "MikhailTal".to_string(),
            interval_secs: 300,
            data_dir: DEFAULT_DATA_DIR.to_string(),
            market_limit: 1000,
            comment_limit: 50,
            bet_limit: 100,
            dry_run: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ManifoldConfig {
    pub base_url: String,
    pub api_key_env: String,
}

impl Default for ManifoldConfig {
    fn default() -> Self {
        Self {
            base_url: BASE_URL.to_string(),
            api_key_env: "MANIFOLD_API_KEY".to_string(),
        }
    }
}

/// Per-estimator parameters. Estimators not listed in `enabled` are built but
/// start switched off in the ensemble.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EstimatorsConfig {
    pub enabled: Vec<String>,
    pub momentum: MomentumConfig,
    pub contrarian: ContrarianConfig,
    pub sentiment: SentimentConfig,
    pub value: ValueConfig,
}

impl Default for EstimatorsConfig {
    fn default() -> Self {
        Self {
            enabled: EstimatorId::ALL.iter().map(|id| id.as_str().to_string()).collect(),
            momentum: MomentumConfig::default(),
            contrarian: ContrarianConfig::default(),
            sentiment: SentimentConfig::default(),
            value: ValueConfig::default(),
        }
    }
}

impl EstimatorsConfig {
    /// Parsed `enabled` list. Unknown names are a configuration error.
    pub fn enabled_ids(&self) -> Result<Vec<EstimatorId>, BotError> {
        self.enabled
            .iter()
            .map(|name| {
                name.parse::<EstimatorId>()
                    .map_err(|_| BotError::Config(format!("unknown estimator in enabled list: {name}")))
            })
            .collect()
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse and validate a TOML document.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every section. Called once at startup.
    pub fn validate(&self) -> Result<(), BotError> {
        if self.bot.target_user.trim().is_empty() {
            return Err(BotError::Config("bot.target_user must not be empty".into()));
        }
        if self.bot.username.trim().is_empty() {
            return Err(BotError::Config("bot.username must not be empty".into()));
        }
        if self.bot.interval_secs == 0 {
            return Err(BotError::Config("bot.interval_secs must be positive".into()));
        }
        for (name, weight) in &self.weights {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(BotError::Config(format!("weight for {name} must be non-negative, got {weight}")));
            }
        }
        self.risk.validate()?;
        self.llm.validate()?;
        self.estimators.enabled_ids()?;
        self.estimators.momentum.validate()?;
        self.estimators.contrarian.validate()?;
        self.estimators.sentiment.validate()?;
        self.estimators.value.validate()?;
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Manifold API key, if the configured variable is set and non-empty.
    pub fn manifold_key(&self) -> Option<SecretString> {
        Self::resolve_env(&self.manifold.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .map(SecretString::new)
    }
}
