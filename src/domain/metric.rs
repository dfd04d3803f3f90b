//! Metric calculator: one fixed metric vector per symbol from a rolling window.
//!
//! Definitions over the most recent `window` bars `w[0..W]`:
//!
//! - `volume_metric`: volume of `w[W-1]` as a percentage of the mean volume of
//!   `w[0..W-1]`.
//! - `momentum_metric`: percent change of close from `w[W-momentum_period]` to
//!   `w[W-1]`.
//! - `price_metric`: percent change of close from `w[W-price_period]` to
//!   `w[W-1]`.
//! - `total_pct_change`: percent change of close from `w[0]` to `w[W-1]`.
//! - `zscore_metric`: `(close_last - mean) / stddev` over the window closes,
//!   `0` when the closes have no variance.
//! - `in_uptrend`: `momentum_metric > 0`.
//!
//! A symbol with fewer than `window` bars yields a snapshot whose fields are
//! all `None`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::domain::bar::Bar;
use crate::domain::error::RankwatchError;
use crate::domain::stats;
use crate::domain::timeframe::Timeframe;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricId {
    Volume,
    Momentum,
    Price,
    TotalPct,
    Zscore,
}

impl MetricId {
    pub const ALL: [MetricId; 5] = [
        MetricId::Volume,
        MetricId::Momentum,
        MetricId::Price,
        MetricId::TotalPct,
        MetricId::Zscore,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricId::Volume => "volume",
            MetricId::Momentum => "momentum",
            MetricId::Price => "price",
            MetricId::TotalPct => "total_pct",
            MetricId::Zscore => "zscore",
        }
    }
}

impl fmt::Display for MetricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_lowercase();
        MetricId::ALL
            .into_iter()
            .find(|m| m.as_str() == needle)
            .ok_or_else(|| format!("unknown metric '{}'", s.trim()))
    }
}

/// Parse a comma-separated metric list, rejecting empties and duplicates.
pub fn parse_metric_list(input: &str) -> Result<Vec<MetricId>, String> {
    let mut metrics = Vec::new();
    for token in input.split(',') {
        let metric: MetricId = token.parse()?;
        if metrics.contains(&metric) {
            return Err(format!("duplicate metric '{}'", metric));
        }
        metrics.push(metric);
    }
    Ok(metrics)
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricConfig {
    pub window: usize,
    pub momentum_period: usize,
    pub price_period: usize,
}

impl Default for MetricConfig {
    fn default() -> Self {
        MetricConfig {
            window: 20,
            momentum_period: 14,
            price_period: 5,
        }
    }
}

/// A fully computed metric vector. Construction rejects non-finite values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricValues {
    pub volume: f64,
    pub momentum: f64,
    pub price: f64,
    pub total_pct: f64,
    pub zscore: f64,
}

impl MetricValues {
    pub fn validated(symbol: &str, values: MetricValues) -> Result<Self, RankwatchError> {
        for metric in MetricId::ALL {
            if !values.get(metric).is_finite() {
                return Err(RankwatchError::NonFiniteMetric {
                    symbol: symbol.to_string(),
                    metric: metric.to_string(),
                });
            }
        }
        Ok(values)
    }

    pub fn get(&self, metric: MetricId) -> f64 {
        match metric {
            MetricId::Volume => self.volume,
            MetricId::Momentum => self.momentum,
            MetricId::Price => self.price,
            MetricId::TotalPct => self.total_pct,
            MetricId::Zscore => self.zscore,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub timestamp: DateTime<Utc>,
    pub price: Option<f64>,
    pub volume_metric: Option<f64>,
    pub momentum_metric: Option<f64>,
    pub price_metric: Option<f64>,
    pub total_pct_change: Option<f64>,
    pub zscore_metric: Option<f64>,
    pub in_uptrend: Option<bool>,
}

impl MetricSnapshot {
    /// Snapshot for a symbol whose metrics are undefined this run.
    pub fn empty(symbol: &str, timeframe: Timeframe, timestamp: DateTime<Utc>) -> Self {
        MetricSnapshot {
            symbol: symbol.to_string(),
            timeframe,
            timestamp,
            price: None,
            volume_metric: None,
            momentum_metric: None,
            price_metric: None,
            total_pct_change: None,
            zscore_metric: None,
            in_uptrend: None,
        }
    }

    pub fn from_values(
        symbol: &str,
        timeframe: Timeframe,
        timestamp: DateTime<Utc>,
        price: f64,
        values: MetricValues,
    ) -> Self {
        MetricSnapshot {
            symbol: symbol.to_string(),
            timeframe,
            timestamp,
            price: Some(price),
            volume_metric: Some(values.volume),
            momentum_metric: Some(values.momentum),
            price_metric: Some(values.price),
            total_pct_change: Some(values.total_pct),
            zscore_metric: Some(values.zscore),
            in_uptrend: Some(values.momentum > 0.0),
        }
    }

    pub fn value(&self, metric: MetricId) -> Option<f64> {
        match metric {
            MetricId::Volume => self.volume_metric,
            MetricId::Momentum => self.momentum_metric,
            MetricId::Price => self.price_metric,
            MetricId::TotalPct => self.total_pct_change,
            MetricId::Zscore => self.zscore_metric,
        }
    }

    pub fn is_empty(&self) -> bool {
        MetricId::ALL.iter().all(|m| self.value(*m).is_none())
    }
}

/// Metric vector over the last `config.window` bars, or `None` when the
/// history is shorter than the window.
pub fn compute_values(bars: &[Bar], config: &MetricConfig) -> Option<(f64, MetricValues)> {
    let w = config.window;
    if w < 2 || bars.len() < w {
        return None;
    }
    let window = &bars[bars.len() - w..];
    let last = &window[w - 1];

    let baseline_volumes: Vec<f64> = window[..w - 1].iter().map(|b| b.volume).collect();
    let closes: Vec<f64> = window.iter().map(|b| b.close).collect();

    let momentum_start = &window[w - config.momentum_period.clamp(1, w)];
    let price_start = &window[w - config.price_period.clamp(1, w)];

    let values = MetricValues {
        volume: stats::ratio_pct(last.volume, stats::mean(&baseline_volumes)),
        momentum: stats::pct_change(momentum_start.close, last.close),
        price: stats::pct_change(price_start.close, last.close),
        total_pct: stats::pct_change(window[0].close, last.close),
        zscore: stats::zscore(&closes),
    };
    Some((last.close, values))
}

/// Compute one symbol's snapshot. Insufficient history is not an error; it
/// yields an all-`None` snapshot. Non-finite results are rejected.
pub fn calculate(
    symbol: &str,
    timeframe: Timeframe,
    timestamp: DateTime<Utc>,
    bars: &[Bar],
    config: &MetricConfig,
) -> Result<MetricSnapshot, RankwatchError> {
    match compute_values(bars, config) {
        None => Ok(MetricSnapshot::empty(symbol, timeframe, timestamp)),
        Some((price, values)) => {
            if !price.is_finite() {
                return Err(RankwatchError::NonFiniteMetric {
                    symbol: symbol.to_string(),
                    metric: "price".to_string(),
                });
            }
            let values = MetricValues::validated(symbol, values)?;
            Ok(MetricSnapshot::from_values(
                symbol, timeframe, timestamp, price, values,
            ))
        }
    }
}

/// Compute snapshots for every symbol. Failures are isolated per symbol:
/// the symbol gets an empty snapshot and the run continues.
pub fn calculate_universe(
    windows: &BTreeMap<String, Vec<Bar>>,
    timeframe: Timeframe,
    timestamp: DateTime<Utc>,
    config: &MetricConfig,
) -> BTreeMap<String, MetricSnapshot> {
    let mut result = BTreeMap::new();
    let mut skipped = 0usize;

    for (symbol, bars) in windows {
        let snapshot = match calculate(symbol, timeframe, timestamp, bars, config) {
            Ok(s) => {
                if s.is_empty() {
                    debug!(
                        symbol = %symbol,
                        bars = bars.len(),
                        needed = config.window,
                        "insufficient history, metrics left empty"
                    );
                    skipped += 1;
                }
                s
            }
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "metric calculation failed");
                skipped += 1;
                MetricSnapshot::empty(symbol, timeframe, timestamp)
            }
        };
        result.insert(symbol.clone(), snapshot);
    }

    info!(
        timeframe = %timeframe,
        computed = result.len() - skipped,
        skipped,
        "metrics calculated"
    );
    result
}
