//! Core domain types and logic.

pub mod error;
pub mod timeframe;
pub mod bar;
pub mod stats;
pub mod metric;
pub mod ranking;
pub mod opportunity;
pub mod slot_machine;
pub mod position;
pub mod summary;
pub mod signal;
pub mod pipeline;
pub mod backtest;
pub mod universe;
pub mod config_validation;
