//! Persistence layer.
//!
//! JSON files in a data directory:
//! - `trades.json`: every executed (or dry-run) trade, append-only
//! - `performance.json`: latest per-estimator track record
//! - `positions.json`: open ledger entries
//!
//! Missing or empty files load as empty. A corrupt file is logged and
//! treated as empty so the bot can keep running.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::strategy::ledger::OpenPosition;
use crate::strategy::signal::Signal;
use crate::types::{BotError, Direction, EstimatorId, PerformanceMetrics};

/// Default data directory.
pub const DEFAULT_DATA_DIR: &str = "data";

const TRADES_FILE: &str = "trades.json";
const PERFORMANCE_FILE: &str = "performance.json";
const POSITIONS_FILE: &str = "positions.json";

/// One trade decision that was acted on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub timestamp: DateTime<Utc>,
    pub market_id: String,
    pub question: String,
    pub direction: Direction,
    pub amount: f64,
    /// Market YES probability when the decision was made.
    pub market_probability: f64,
    /// The consensus signal behind the trade.
    pub signal: Signal,
    /// Platform bet id. `None` in dry-run.
    pub bet_id: Option<String>,
    #[serde(default)]
    pub dry_run: bool,
}

/// Latest per-estimator track record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub timestamp: DateTime<Utc>,
    pub total_trades: u64,
    pub estimators: BTreeMap<EstimatorId, PerformanceMetrics>,
}

/// JSON-file store rooted at a data directory.
#[derive(Debug, Clone)]
pub struct Store {
    dir: PathBuf,
}

impl Store {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    // -- Trades ----------------------------------------------------------

    pub fn load_trades(&self) -> Result<Vec<TradeRecord>> {
        Ok(read_json(&self.dir.join(TRADES_FILE))?.unwrap_or_default())
    }

    pub fn append_trade(&self, trade: &TradeRecord) -> Result<()> {
        let mut trades = self.load_trades()?;
        trades.push(trade.clone());
        write_json(&self.dir.join(TRADES_FILE), &trades)?;
        debug!(market_id = %trade.market_id, total = trades.len(), "Trade recorded");
        Ok(())
    }

    // -- Performance -----------------------------------------------------

    pub fn load_performance(&self) -> Result<Option<PerformanceSnapshot>> {
        read_json(&self.dir.join(PERFORMANCE_FILE))
    }

    pub fn save_performance(&self, snapshot: &PerformanceSnapshot) -> Result<()> {
        write_json(&self.dir.join(PERFORMANCE_FILE), snapshot)
    }

    // -- Positions -------------------------------------------------------

    pub fn load_positions(&self) -> Result<Vec<OpenPosition>> {
        let positions: Vec<OpenPosition> = read_json(&self.dir.join(POSITIONS_FILE))?.unwrap_or_default();
        if !positions.is_empty() {
            info!(count = positions.len(), "Open positions loaded from disk");
        }
        Ok(positions)
    }

    pub fn save_positions(&self, positions: &[OpenPosition]) -> Result<()> {
        write_json(&self.dir.join(POSITIONS_FILE), &positions)
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new(DEFAULT_DATA_DIR)
    }
}

/// `None` when the file is missing, empty or unparseable.
fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        debug!(path = %path.display(), "No saved file, starting fresh");
        return Ok(None);
    }

    let json = std::fs::read_to_string(path)
        .map_err(|e| BotError::Storage(format!("Failed to read {}: {e}", path.display())))?;
    if json.trim().is_empty() {
        return Ok(None);
    }

    match serde_json::from_str(&json) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Corrupt data file, starting fresh");
            Ok(None)
        }
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            BotError::Storage(format!("Failed to create data directory {}: {e}", parent.display()))
        })?;
    }
    let json = serde_json::to_string_pretty(value).context("Failed to serialise data")?;
    std::fs::write(path, json)
        .map_err(|e| BotError::Storage(format!("Failed to write {}: {e}", path.display())))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
