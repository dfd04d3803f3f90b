#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use rankwatch::domain::backtest::BacktestRun;
pub use rankwatch::domain::bar::Bar;
use rankwatch::domain::error::RankwatchError;
use rankwatch::domain::metric::MetricSnapshot;
use rankwatch::domain::opportunity::Opportunity;
use rankwatch::domain::ranking::RankingSnapshot;
use rankwatch::domain::timeframe::Timeframe;
use rankwatch::ports::bar_port::BarPort;
use rankwatch::ports::store_port::SnapshotStore;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};

pub struct MockBarPort {
    pub data: HashMap<String, Vec<Bar>>,
    pub errors: HashMap<String, String>,
}

impl MockBarPort {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            errors: HashMap::new(),
        }
    }

    pub fn with_bars(mut self, symbol: &str, bars: Vec<Bar>) -> Self {
        self.data.insert(symbol.to_string(), bars);
        self
    }

    pub fn with_error(mut self, symbol: &str, reason: &str) -> Self {
        self.errors.insert(symbol.to_string(), reason.to_string());
        self
    }
}

impl BarPort for MockBarPort {
    fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Bar>, RankwatchError> {
        if let Some(reason) = self.errors.get(symbol) {
            return Err(RankwatchError::Database {
                reason: reason.clone(),
            });
        }
        match self.data.get(symbol) {
            Some(bars) => {
                let start = bars.len().saturating_sub(limit);
                Ok(bars[start..].to_vec())
            }
            None => Err(RankwatchError::NoData {
                symbol: symbol.to_string(),
                timeframe,
            }),
        }
    }

    fn list_symbols(&self, _timeframe: Timeframe) -> Result<Vec<String>, RankwatchError> {
        let mut symbols: Vec<String> = self.data.keys().cloned().collect();
        symbols.sort();
        Ok(symbols)
    }
}

#[derive(Default)]
pub struct MockSnapshotStore {
    pub metrics: RefCell<Vec<MetricSnapshot>>,
    pub rankings: RefCell<Vec<RankingSnapshot>>,
    pub opportunities: RefCell<Vec<Opportunity>>,
    pub backtests: RefCell<BTreeMap<String, BacktestRun>>,
}

impl SnapshotStore for MockSnapshotStore {
    fn save_metrics(&self, snapshots: &[MetricSnapshot]) -> Result<(), RankwatchError> {
        self.metrics.borrow_mut().extend_from_slice(snapshots);
        Ok(())
    }

    fn latest_metrics(
        &self,
        timeframe: Timeframe,
    ) -> Result<Vec<MetricSnapshot>, RankwatchError> {
        let metrics = self.metrics.borrow();
        let latest = metrics
            .iter()
            .filter(|m| m.timeframe == timeframe)
            .map(|m| m.timestamp)
            .max();
        Ok(metrics
            .iter()
            .filter(|m| m.timeframe == timeframe && Some(m.timestamp) == latest)
            .cloned()
            .collect())
    }

    fn save_rankings(&self, snapshots: &[RankingSnapshot]) -> Result<(), RankwatchError> {
        self.rankings.borrow_mut().extend_from_slice(snapshots);
        Ok(())
    }

    fn latest_rankings(
        &self,
        timeframe: Timeframe,
    ) -> Result<Vec<RankingSnapshot>, RankwatchError> {
        let rankings = self.rankings.borrow();
        let latest = rankings
            .iter()
            .filter(|r| r.timeframe == timeframe)
            .map(|r| r.timestamp)
            .max();
        Ok(rankings
            .iter()
            .filter(|r| r.timeframe == timeframe && Some(r.timestamp) == latest)
            .cloned()
            .collect())
    }

    fn rankings_before(
        &self,
        timeframe: Timeframe,
        before: DateTime<Utc>,
    ) -> Result<Vec<RankingSnapshot>, RankwatchError> {
        let rankings = self.rankings.borrow();
        let prior = rankings
            .iter()
            .filter(|r| r.timeframe == timeframe && r.timestamp < before)
            .map(|r| r.timestamp)
            .max();
        Ok(rankings
            .iter()
            .filter(|r| r.timeframe == timeframe && Some(r.timestamp) == prior)
            .cloned()
            .collect())
    }

    fn save_opportunities(&self, opportunities: &[Opportunity]) -> Result<(), RankwatchError> {
        let mut stored = self.opportunities.borrow_mut();
        for o in opportunities {
            stored.retain(|s| {
                !(s.symbol == o.symbol
                    && s.timeframe == o.timeframe
                    && s.direction == o.direction
                    && s.detection_time == o.detection_time)
            });
            stored.push(o.clone());
        }
        Ok(())
    }

    fn opportunity_history(
        &self,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Opportunity>, RankwatchError> {
        let mut history: Vec<Opportunity> = self
            .opportunities
            .borrow()
            .iter()
            .filter(|o| o.timeframe == timeframe)
            .cloned()
            .collect();
        history.sort_by(|a, b| b.detection_time.cmp(&a.detection_time));
        history.truncate(limit);
        Ok(history)
    }

    fn save_backtest(&self, run: &BacktestRun) -> Result<(), RankwatchError> {
        let mut backtests = self.backtests.borrow_mut();
        if backtests.contains_key(&run.id) {
            return Err(RankwatchError::DatabaseQuery {
                reason: format!("backtest {} already stored", run.id),
            });
        }
        backtests.insert(run.id.clone(), run.clone());
        Ok(())
    }

    fn load_backtest(&self, backtest_id: &str) -> Result<BacktestRun, RankwatchError> {
        self.backtests
            .borrow()
            .get(backtest_id)
            .cloned()
            .ok_or_else(|| RankwatchError::UnknownBacktest {
                backtest_id: backtest_id.to_string(),
            })
    }
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// Hourly bars whose close compounds by `growth_pct` each bar. Each bar opens
/// at the previous close and its range extends 0.1% past open and close.
pub fn trend_bars(n: usize, growth_pct: f64) -> Vec<Bar> {
    let mut prev_close = 100.0;
    (0..n)
        .map(|i| {
            let close = 100.0 * (1.0 + growth_pct / 100.0).powi(i as i32);
            let open = prev_close;
            prev_close = close;
            Bar {
                open_time: t0() + Duration::hours(i as i64),
                open,
                high: open.max(close) * 1.001,
                low: open.min(close) * 0.999,
                close,
                volume: 1000.0,
            }
        })
        .collect()
}

/// Hourly bars following `closes`, opening at the previous close.
pub fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
    let mut prev_close = closes.first().copied().unwrap_or(100.0);
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = prev_close;
            prev_close = close;
            Bar {
                open_time: t0() + Duration::hours(i as i64),
                open,
                high: open.max(close) * 1.002,
                low: open.min(close) * 0.998,
                close,
                volume: 1000.0 + i as f64,
            }
        })
        .collect()
}

/// Five-symbol universe from strongest riser to strongest faller.
pub fn trend_universe(n: usize) -> BTreeMap<String, Vec<Bar>> {
    [
        ("UP3", 3.0),
        ("UP1", 1.0),
        ("MID", 0.5),
        ("DN1", -1.0),
        ("DN3", -3.0),
    ]
    .into_iter()
    .map(|(symbol, growth)| (symbol.to_string(), trend_bars(n, growth)))
    .collect()
}

pub fn last_time(bars: &BTreeMap<String, Vec<Bar>>) -> DateTime<Utc> {
    bars.values()
        .filter_map(|b| b.last().map(|bar| bar.open_time))
        .max()
        .unwrap()
}

/// Write `<SYMBOL>_1h.csv` files for each history into `dir`.
pub fn write_csv_universe(dir: &std::path::Path, bars: &BTreeMap<String, Vec<Bar>>) {
    for (symbol, history) in bars {
        let mut content = String::from("open_time,open,high,low,close,volume\n");
        for bar in history {
            content.push_str(&format!(
                "{},{},{},{},{},{}\n",
                bar.open_time.timestamp_millis(),
                bar.open,
                bar.high,
                bar.low,
                bar.close,
                bar.volume
            ));
        }
        std::fs::write(dir.join(format!("{}_1h.csv", symbol)), content).unwrap();
    }
}
