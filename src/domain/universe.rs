//! Symbol universe: parsing symbol lists and loading bar windows.
//!
//! Symbols that cannot be loaded are recorded with a reason and skipped;
//! loading only fails when no symbol yields any bars.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use tracing::{debug, warn};

use crate::domain::bar::Bar;
use crate::domain::error::RankwatchError;
use crate::domain::timeframe::Timeframe;
use crate::ports::bar_port::BarPort;

#[derive(Debug, Clone, thiserror::Error)]
pub enum UniverseError {
    #[error("empty token in symbol list")]
    EmptyToken,

    #[error("duplicate symbol: {0}")]
    DuplicateSymbol(String),
}

/// Parse a comma-separated symbol list into upper-case symbols.
pub fn parse_symbols(input: &str) -> Result<Vec<String>, UniverseError> {
    let mut symbols = Vec::new();
    let mut seen = HashSet::new();

    for token in input.split(',') {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            return Err(UniverseError::EmptyToken);
        }
        let symbol = trimmed.to_uppercase();
        if !seen.insert(symbol.clone()) {
            return Err(UniverseError::DuplicateSymbol(symbol));
        }
        symbols.push(symbol);
    }

    Ok(symbols)
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    NoData,
    DataGap { gap_secs: i64 },
    InvalidBar { reason: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoData => f.write_str("no data"),
            SkipReason::DataGap { gap_secs } => write!(f, "data gap of {}s", gap_secs),
            SkipReason::InvalidBar { reason } => write!(f, "invalid bar: {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedSymbol {
    pub symbol: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default)]
pub struct LoadedUniverse {
    pub bars: BTreeMap<String, Vec<Bar>>,
    pub skipped: Vec<SkippedSymbol>,
}

/// Fetch up to `limit` bars per symbol. Per-symbol failures are skipped;
/// storage errors abort.
pub fn load_bars(
    bar_port: &dyn BarPort,
    symbols: &[String],
    timeframe: Timeframe,
    limit: usize,
) -> Result<LoadedUniverse, RankwatchError> {
    let mut loaded = LoadedUniverse::default();

    for symbol in symbols {
        match bar_port.fetch_bars(symbol, timeframe, limit) {
            Ok(bars) if bars.is_empty() => {
                warn!(symbol = %symbol, timeframe = %timeframe, "skipping symbol: no data");
                loaded.skipped.push(SkippedSymbol {
                    symbol: symbol.clone(),
                    reason: SkipReason::NoData,
                });
            }
            Ok(bars) => {
                debug!(symbol = %symbol, bars = bars.len(), "loaded bars");
                loaded.bars.insert(symbol.clone(), bars);
            }
            Err(RankwatchError::NoData { .. }) => {
                warn!(symbol = %symbol, timeframe = %timeframe, "skipping symbol: no data");
                loaded.skipped.push(SkippedSymbol {
                    symbol: symbol.clone(),
                    reason: SkipReason::NoData,
                });
            }
            Err(RankwatchError::InvalidBar { reason, .. }) => {
                warn!(symbol = %symbol, reason = %reason, "skipping symbol: invalid bar");
                loaded.skipped.push(SkippedSymbol {
                    symbol: symbol.clone(),
                    reason: SkipReason::InvalidBar { reason },
                });
            }
            Err(e) => return Err(e),
        }
    }

    if loaded.bars.is_empty() {
        return Err(RankwatchError::NoData {
            symbol: symbols.join(","),
            timeframe,
        });
    }

    Ok(loaded)
}

/// Symbols from `configured`, or every symbol the bar source lists.
pub fn resolve_symbols(
    bar_port: &dyn BarPort,
    configured: Option<&str>,
    timeframe: Timeframe,
) -> Result<Vec<String>, RankwatchError> {
    match configured {
        Some(list) => parse_symbols(list).map_err(|e| RankwatchError::ConfigInvalid {
            section: "data".to_string(),
            key: "symbols".to_string(),
            reason: e.to_string(),
        }),
        None => bar_port.list_symbols(timeframe),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_single_symbol() {
        assert_eq!(parse_symbols("BTCUSDT").unwrap(), vec!["BTCUSDT"]);
    }

    #[test]
    fn parse_uppercases_and_trims() {
        let symbols = parse_symbols(" btcusdt , EthUsdt,SOLUSDT ").unwrap();
        assert_eq!(symbols, vec!["BTCUSDT", "ETHUSDT", "SOLUSDT"]);
    }

    #[test]
    fn parse_empty_token() {
        assert!(matches!(
            parse_symbols("BTCUSDT,,ETHUSDT"),
            Err(UniverseError::EmptyToken)
        ));
        assert!(matches!(parse_symbols(""), Err(UniverseError::EmptyToken)));
    }

    #[test]
    fn parse_duplicate_case_insensitive() {
        match parse_symbols("BTCUSDT,btcusdt") {
            Err(UniverseError::DuplicateSymbol(s)) => assert_eq!(s, "BTCUSDT"),
            other => panic!("expected DuplicateSymbol, got {:?}", other),
        }
    }

    #[test]
    fn skip_reason_display() {
        assert_eq!(SkipReason::NoData.to_string(), "no data");
        assert_eq!(
            SkipReason::DataGap { gap_secs: 7200 }.to_string(),
            "data gap of 7200s"
        );
    }
}
