//! Manifold ensemble trading bot.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod analysis;
pub mod config;
pub mod types;
pub mod platforms;
pub mod estimators;
pub mod strategy;
pub mod engine;
pub mod storage;
