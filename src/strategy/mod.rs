//! Decision core: the signal contract, ensemble fusion, Kelly sizing and the
//! position ledger.

pub mod ensemble;
pub mod kelly;
pub mod ledger;
pub mod risk;
pub mod signal;

pub use ensemble::{Consensus, Ensemble, WeightMap};
pub use ledger::{OpenPosition, PortfolioMetrics, PositionLedger};
pub use risk::{Rejection, RiskConfig, RiskManager, Sizing};
pub use signal::Signal;
