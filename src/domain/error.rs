//! Domain error types.

use crate::domain::timeframe::Timeframe;

/// Top-level error type for rankwatch.
#[derive(Debug, thiserror::Error)]
pub enum RankwatchError {
    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("database query error: {reason}")]
    DatabaseQuery { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("no data for {symbol} on {timeframe}")]
    NoData { symbol: String, timeframe: Timeframe },

    #[error("insufficient data for {symbol} on {timeframe}: have {bars} bars, need {minimum}")]
    InsufficientData {
        symbol: String,
        timeframe: Timeframe,
        bars: usize,
        minimum: usize,
    },

    #[error("no symbol on {timeframe} has a rankable metric")]
    EmptyUniverse { timeframe: Timeframe },

    #[error("snapshot for {symbol} is on {found}, expected {expected}")]
    TimeframeMismatch {
        symbol: String,
        expected: Timeframe,
        found: Timeframe,
    },

    #[error("non-finite {metric} for {symbol}")]
    NonFiniteMetric { symbol: String, metric: String },

    #[error("invalid backtest parameter {field}: {reason}")]
    InvalidBacktestParam { field: String, reason: String },

    #[error("data gap in {symbol}: {gap_secs}s between bars, tolerance {tolerance_secs}s")]
    DataGap {
        symbol: String,
        gap_secs: i64,
        tolerance_secs: i64,
    },

    #[error("invalid bar for {symbol}: {reason}")]
    InvalidBar { symbol: String, reason: String },

    #[error("backtest {backtest_id} was cancelled")]
    Cancelled { backtest_id: String },

    #[error("unknown backtest id {backtest_id}")]
    UnknownBacktest { backtest_id: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<&RankwatchError> for std::process::ExitCode {
    fn from(err: &RankwatchError) -> Self {
        let code: u8 = match err {
            RankwatchError::Io(_) | RankwatchError::UnknownBacktest { .. } => 1,
            RankwatchError::ConfigParse { .. }
            | RankwatchError::ConfigMissing { .. }
            | RankwatchError::ConfigInvalid { .. } => 2,
            RankwatchError::Database { .. } | RankwatchError::DatabaseQuery { .. } => 3,
            RankwatchError::InvalidBacktestParam { .. } | RankwatchError::Cancelled { .. } => 4,
            RankwatchError::NoData { .. }
            | RankwatchError::InsufficientData { .. }
            | RankwatchError::EmptyUniverse { .. }
            | RankwatchError::TimeframeMismatch { .. }
            | RankwatchError::NonFiniteMetric { .. }
            | RankwatchError::DataGap { .. }
            | RankwatchError::InvalidBar { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}
