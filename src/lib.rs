//! EMA Crossover Options Bot
//!
//! Polls price bars for a single equity, trades weekly options on EMA
//! crossovers (with a once-a-day trend fallback), suppresses duplicate
//! entries, and auto-closes positions after a holding period.

pub mod broker;
pub mod clock;
pub mod common;
pub mod config;
pub mod engine;
pub mod indicators;
pub mod scheduler;
pub mod selector;
pub mod store;
pub mod trade_log;
pub mod types;

pub use config::Config;
pub use engine::{CycleOutcome, CycleReport, DayTracker, TradingEngine, Trigger};
pub use types::*;
