//! CSV bar source and trade ledger export.
//!
//! Bar files live in one directory as `<SYMBOL>_<timeframe>.csv` with header
//! `open_time,open,high,low,close,volume`; `open_time` is epoch milliseconds.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::domain::bar::Bar;
use crate::domain::error::RankwatchError;
use crate::domain::position::Trade;
use crate::domain::timeframe::Timeframe;
use crate::ports::bar_port::BarPort;

#[derive(Debug, Deserialize)]
struct BarRow {
    open_time: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

pub struct CsvBarAdapter {
    base_path: PathBuf,
}

impl CsvBarAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, symbol: &str, timeframe: Timeframe) -> PathBuf {
        self.base_path.join(format!("{}_{}.csv", symbol, timeframe))
    }
}

impl BarPort for CsvBarAdapter {
    fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Bar>, RankwatchError> {
        let path = self.csv_path(symbol, timeframe);
        let mut rdr = match csv::Reader::from_path(&path) {
            Ok(rdr) => rdr,
            Err(e) => match e.kind() {
                csv::ErrorKind::Io(err) if err.kind() == io::ErrorKind::NotFound => {
                    return Err(RankwatchError::NoData {
                        symbol: symbol.to_string(),
                        timeframe,
                    });
                }
                _ => {
                    return Err(RankwatchError::Database {
                        reason: format!("failed to read {}: {}", path.display(), e),
                    });
                }
            },
        };

        let mut bars = Vec::new();
        for result in rdr.deserialize::<BarRow>() {
            let row = result.map_err(|e| RankwatchError::Database {
                reason: format!("CSV parse error in {}: {}", path.display(), e),
            })?;
            let open_time = DateTime::<Utc>::from_timestamp_millis(row.open_time).ok_or_else(|| {
                RankwatchError::InvalidBar {
                    symbol: symbol.to_string(),
                    reason: format!("open_time {} out of range", row.open_time),
                }
            })?;
            bars.push(Bar {
                open_time,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.volume,
            });
        }

        bars.sort_by_key(|b| b.open_time);
        bars.dedup_by_key(|b| b.open_time);
        let start = bars.len().saturating_sub(limit);
        debug!(
            symbol = %symbol,
            path = %path.display(),
            bars = bars.len() - start,
            "read csv bars"
        );
        Ok(bars.split_off(start))
    }

    fn list_symbols(&self, timeframe: Timeframe) -> Result<Vec<String>, RankwatchError> {
        let entries = fs::read_dir(&self.base_path).map_err(|e| RankwatchError::Database {
            reason: format!(
                "failed to read directory {}: {}",
                self.base_path.display(),
                e
            ),
        })?;

        let suffix = format!("_{}.csv", timeframe);
        let mut symbols = Vec::new();

        for entry in entries {
            let entry = entry.map_err(|e| RankwatchError::Database {
                reason: format!("directory entry error: {}", e),
            })?;

            let name = entry.file_name();
            let name_str = name.to_string_lossy();

            if let Some(symbol) = name_str.strip_suffix(&suffix) {
                if !symbol.is_empty() {
                    symbols.push(symbol.to_string());
                }
            }
        }

        symbols.sort();
        Ok(symbols)
    }
}

/// Write a trade ledger as CSV rows, one per trade.
pub fn write_trades<P: AsRef<Path>>(path: P, trades: &[Trade]) -> Result<(), RankwatchError> {
    let path = path.as_ref();
    let mut wtr = csv::Writer::from_path(path).map_err(|e| RankwatchError::Database {
        reason: format!("failed to create {}: {}", path.display(), e),
    })?;
    for trade in trades {
        wtr.serialize(trade).map_err(|e| RankwatchError::Database {
            reason: format!("failed to write trade row: {}", e),
        })?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::position::{Direction, ExitReason};
    use chrono::TimeZone;
    use tempfile::TempDir;

    const HEADER: &str = "open_time,open,high,low,close,volume\n";

    fn setup_test_data() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().to_path_buf();

        // 2024-01-15T00:00Z, +1h, +2h; written out of order.
        let csv_content = format!(
            "{HEADER}\
            1705280400000,105.0,115.0,100.0,110.0,60000\n\
            1705276800000,100.0,110.0,90.0,105.0,50000.5\n\
            1705284000000,110.0,120.0,105.0,115.0,55000\n"
        );

        fs::write(path.join("BTCUSDT_1h.csv"), csv_content).unwrap();
        fs::write(path.join("ETHUSDT_1h.csv"), HEADER).unwrap();
        fs::write(path.join("ETHUSDT_1d.csv"), HEADER).unwrap();
        fs::write(path.join("notes.txt"), "ignore me").unwrap();

        (dir, path)
    }

    #[test]
    fn fetch_bars_returns_sorted_data() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvBarAdapter::new(path);

        let bars = adapter.fetch_bars("BTCUSDT", Timeframe::H1, 100).unwrap();

        assert_eq!(bars.len(), 3);
        assert_eq!(
            bars[0].open_time,
            Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap()
        );
        assert_eq!(bars[0].open, 100.0);
        assert_eq!(bars[0].high, 110.0);
        assert_eq!(bars[0].low, 90.0);
        assert_eq!(bars[0].close, 105.0);
        assert_eq!(bars[0].volume, 50000.5);
        assert!(bars.windows(2).all(|w| w[0].open_time < w[1].open_time));
    }

    #[test]
    fn fetch_bars_keeps_most_recent() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvBarAdapter::new(path);

        let bars = adapter.fetch_bars("BTCUSDT", Timeframe::H1, 2).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[1].close, 115.0);
    }

    #[test]
    fn fetch_bars_missing_file_is_no_data() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvBarAdapter::new(path);

        let result = adapter.fetch_bars("XYZ", Timeframe::H1, 10);
        assert!(matches!(result, Err(RankwatchError::NoData { .. })));
    }

    #[test]
    fn fetch_bars_rejects_malformed_rows() {
        let (_dir, path) = setup_test_data();
        fs::write(path.join("BAD_1h.csv"), format!("{HEADER}abc,1,1,1,1,1\n")).unwrap();
        let adapter = CsvBarAdapter::new(path);

        let result = adapter.fetch_bars("BAD", Timeframe::H1, 10);
        assert!(matches!(result, Err(RankwatchError::Database { .. })));
    }

    #[test]
    fn list_symbols_filters_by_timeframe() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvBarAdapter::new(path);

        assert_eq!(
            adapter.list_symbols(Timeframe::H1).unwrap(),
            vec!["BTCUSDT", "ETHUSDT"]
        );
        assert_eq!(adapter.list_symbols(Timeframe::D1).unwrap(), vec!["ETHUSDT"]);
        assert!(adapter.list_symbols(Timeframe::M5).unwrap().is_empty());
    }

    #[test]
    fn write_trades_emits_header_and_rows() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("trades.csv");
        let entry = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        let trade = Trade {
            symbol: "BTCUSDT".into(),
            direction: Direction::Short,
            entry_time: entry,
            entry_price: 100.0,
            exit_time: entry + chrono::Duration::hours(3),
            exit_price: 97.0,
            exit_reason: ExitReason::TakeProfit,
            pnl_pct: 3.0,
            bars_held: 3,
        };

        write_trades(&out, &[trade]).unwrap();
        let content = fs::read_to_string(&out).unwrap();
        let mut lines = content.lines();
        assert_eq!(
            lines.next().unwrap(),
            "symbol,direction,entry_time,entry_price,exit_time,exit_price,\
             exit_reason,pnl_pct,bars_held"
        );
        let row = lines.next().unwrap();
        assert!(row.starts_with("BTCUSDT,short,"));
        assert!(row.contains("take_profit"));
    }
}
