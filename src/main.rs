//! Manifold ensemble trading bot.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! builds the estimators and the trading bot, then runs either a single
//! cycle or the continuous loop with graceful shutdown.

use anyhow::{bail, Result};
use clap::Parser;
use std::time::Duration;
use tracing::{error, info, warn};

use manifold_ensemble::config::AppConfig;
use manifold_ensemble::engine::TradingBot;
use manifold_ensemble::estimators::{
    ContrarianEstimator, Estimator, LlmEstimator, MomentumEstimator, SentimentEstimator, ValueEstimator,
};
use manifold_ensemble::platforms::ManifoldClient;
use manifold_ensemble::storage::Store;
use manifold_ensemble::strategy::Ensemble;

const BANNER: &str = r#"
  __  __             _  __       _     _
 |  \/  | __ _ _ __ (_)/ _| ___ | | __| |
 | |\/| |/ _` | '_ \| | |_ / _ \| |/ _` |
 | |  | | (_| | | | | |  _| (_) | | (_| |
 |_|  |_|\__,_|_| |_|_|_|  \___/|_|\__,_|

  Ensemble trading bot
"#;

#[derive(Parser, Debug)]
#[command(name = "manifold-ensemble", about = "Manifold Markets ensemble trading bot")]
struct Cli {
    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,

    /// Log decisions without placing bets
    #[arg(long)]
    dry_run: bool,

    /// Path to the TOML config file
    #[arg(long, default_value = "config.toml")]
    config: String,

    /// Seconds between cycles (overrides the config)
    #[arg(long)]
    interval: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cli = Cli::parse();
    let cfg = AppConfig::load(&cli.config)?;

    init_logging();

    println!("{BANNER}");
    let dry_run = cli.dry_run || cfg.bot.dry_run;
    info!(
        target_user = %cfg.bot.target_user,
        username = %cfg.bot.username,
        dry_run,
        "Bot starting up"
    );

    // -- Initialise components -------------------------------------------

    let manifold_key = cfg.manifold_key();
    if manifold_key.is_none() {
        if dry_run {
            warn!(env = %cfg.manifold.api_key_env, "No Manifold API key, read-only dry run");
        } else {
            bail!("{} is required unless running with --dry-run", cfg.manifold.api_key_env);
        }
    }
    let platform = ManifoldClient::with_base_url(&cfg.manifold.base_url, manifold_key)?;

    let ensemble = build_ensemble(&cfg)?;
    let store = Store::new(&cfg.bot.data_dir);
    let mut bot = TradingBot::new(
        Box::new(platform),
        ensemble,
        cfg.risk.clone(),
        store,
        cfg.bot.clone(),
        dry_run,
    )?;

    if cli.once {
        let report = bot.run_once().await?;
        info!(report = %report, "Single cycle finished");
        return Ok(());
    }

    // -- Main loop -------------------------------------------------------

    let interval_secs = cli.interval.unwrap_or(cfg.bot.interval_secs).max(1);
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(interval_secs, "Entering main loop. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = bot.run_once().await {
                    error!(error = %e, "Cycle failed, continuing to next");
                }
                info!(interval_secs, "Sleeping until next cycle");
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    info!(cycles = bot.cycle_count(), "Bot shut down cleanly.");
    Ok(())
}

/// Build every estimator, register them with the configured weights and
/// switch off those missing from `estimators.enabled`.
fn build_ensemble(cfg: &AppConfig) -> Result<Ensemble> {
    let mut estimators: Vec<Box<dyn Estimator>> = Vec::new();

    match LlmEstimator::from_env(cfg.llm.clone())? {
        Some(llm) => {
            info!(model = %llm.model(), "LLM estimator enabled");
            estimators.push(Box::new(llm));
        }
        None => warn!("LLM estimator not available"),
    }
    estimators.push(Box::new(MomentumEstimator::new(cfg.estimators.momentum.clone())?));
    estimators.push(Box::new(ContrarianEstimator::new(cfg.estimators.contrarian.clone())?));
    estimators.push(Box::new(ValueEstimator::new(cfg.estimators.value.clone())?));
    estimators.push(Box::new(SentimentEstimator::new(cfg.estimators.sentiment.clone())?));

    let mut ensemble = Ensemble::new(estimators, &cfg.weights)?;
    let enabled = cfg.estimators.enabled_ids()?;
    for id in ensemble.estimator_ids() {
        if !enabled.contains(&id) {
            ensemble.set_enabled(id, false);
        }
    }
    info!(
        active = ensemble.active_count(),
        weights = %ensemble.weights(),
        "Estimators ready"
    );
    Ok(ensemble)
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("manifold_ensemble=info"));

    let json_logging = std::env::var("BOT_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
