//! Ranking engine: per-metric and overall ranks for one timeframe, plus rank
//! changes against the previous snapshot.
//!
//! Each metric column ranks only the symbols with a value for that metric,
//! so the column is a permutation of `1..N`. Ties break on the symbol name.
//! The overall column covers the symbols ranked in every in-scope metric and
//! orders them by the weighted sum of their ranks (lower is better).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

use crate::domain::error::RankwatchError;
use crate::domain::metric::{MetricId, MetricSnapshot};
use crate::domain::timeframe::Timeframe;

/// A rank column: the overall rank or one metric's rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RankColumn {
    Overall,
    Metric(MetricId),
}

impl RankColumn {
    pub fn all() -> Vec<RankColumn> {
        std::iter::once(RankColumn::Overall)
            .chain(MetricId::ALL.into_iter().map(RankColumn::Metric))
            .collect()
    }
}

impl fmt::Display for RankColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RankColumn::Overall => f.write_str("overall"),
            RankColumn::Metric(m) => write!(f, "{}", m),
        }
    }
}

impl FromStr for RankColumn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("overall") {
            return Ok(RankColumn::Overall);
        }
        s.parse::<MetricId>().map(RankColumn::Metric)
    }
}

impl TryFrom<String> for RankColumn {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RankColumn> for String {
    fn from(col: RankColumn) -> Self {
        col.to_string()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankingConfig {
    /// Metrics that are ranked and feed the overall rank.
    pub metrics: Vec<MetricId>,
    /// Per-metric weight in the overall composite; missing entries weigh 1.0.
    pub weights: BTreeMap<MetricId, f64>,
}

impl Default for RankingConfig {
    fn default() -> Self {
        RankingConfig {
            metrics: MetricId::ALL.to_vec(),
            weights: BTreeMap::new(),
        }
    }
}

impl RankingConfig {
    pub fn weight(&self, metric: MetricId) -> f64 {
        self.weights.get(&metric).copied().unwrap_or(1.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingSnapshot {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub timestamp: DateTime<Utc>,
    pub ranks: BTreeMap<MetricId, u32>,
    pub overall_rank: Option<u32>,
    pub composite_score: Option<f64>,
}

impl RankingSnapshot {
    pub fn rank(&self, column: RankColumn) -> Option<u32> {
        match column {
            RankColumn::Overall => self.overall_rank,
            RankColumn::Metric(m) => self.ranks.get(&m).copied(),
        }
    }
}

/// Signed rank movement of one symbol in one column; positive means improved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankChange {
    pub symbol: String,
    pub column: RankColumn,
    pub delta: i64,
}

/// Rank deltas for one symbol present in both snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SymbolRankChanges {
    pub metrics: BTreeMap<MetricId, i64>,
    pub overall: Option<i64>,
}

impl SymbolRankChanges {
    pub fn delta(&self, column: RankColumn) -> Option<i64> {
        match column {
            RankColumn::Overall => self.overall,
            RankColumn::Metric(m) => self.metrics.get(&m).copied(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RankChanges {
    by_symbol: BTreeMap<String, SymbolRankChanges>,
}

impl RankChanges {
    pub fn get(&self, symbol: &str) -> Option<&SymbolRankChanges> {
        self.by_symbol.get(symbol)
    }

    pub fn delta(&self, symbol: &str, column: RankColumn) -> Option<i64> {
        self.get(symbol).and_then(|c| c.delta(column))
    }

    pub fn len(&self) -> usize {
        self.by_symbol.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_symbol.is_empty()
    }

    /// Flat records, ordered by symbol then column.
    pub fn records(&self) -> Vec<RankChange> {
        let mut out = Vec::new();
        for (symbol, changes) in &self.by_symbol {
            if let Some(delta) = changes.overall {
                out.push(RankChange {
                    symbol: symbol.clone(),
                    column: RankColumn::Overall,
                    delta,
                });
            }
            for (metric, delta) in &changes.metrics {
                out.push(RankChange {
                    symbol: symbol.clone(),
                    column: RankColumn::Metric(*metric),
                    delta: *delta,
                });
            }
        }
        out
    }
}

/// Output of one ranking run.
#[derive(Debug, Clone, PartialEq)]
pub struct RankingRun {
    pub timeframe: Timeframe,
    pub timestamp: DateTime<Utc>,
    /// Ordered by overall rank, unranked symbols last by name.
    pub snapshots: Vec<RankingSnapshot>,
    pub changes: RankChanges,
}

impl RankingRun {
    pub fn get(&self, symbol: &str) -> Option<&RankingSnapshot> {
        self.snapshots.iter().find(|s| s.symbol == symbol)
    }

    /// Number of symbols holding a rank in `column`.
    pub fn column_len(&self, column: RankColumn) -> usize {
        column_len(&self.snapshots, column)
    }
}

pub fn column_len(snapshots: &[RankingSnapshot], column: RankColumn) -> usize {
    snapshots
        .iter()
        .filter(|s| s.rank(column).is_some())
        .count()
}

/// Symbols in `column`, best rank first.
pub fn column_order(snapshots: &[RankingSnapshot], column: RankColumn) -> Vec<(&str, u32)> {
    let mut entries: Vec<(&str, u32)> = snapshots
        .iter()
        .filter_map(|s| s.rank(column).map(|r| (s.symbol.as_str(), r)))
        .collect();
    entries.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));
    entries
}

/// Ranks for one metric over the symbols that have a value for it. The
/// largest value ranks first; ties fall back to symbol order.
pub fn rank_metric(
    metrics: &BTreeMap<String, MetricSnapshot>,
    metric: MetricId,
) -> BTreeMap<String, u32> {
    let mut values: Vec<(&str, f64)> = metrics
        .values()
        .filter_map(|s| s.value(metric).map(|v| (s.symbol.as_str(), v)))
        .collect();

    values.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    values
        .into_iter()
        .enumerate()
        .map(|(i, (symbol, _))| (symbol.to_string(), (i + 1) as u32))
        .collect()
}

/// Rank every symbol of one timeframe. Fails when no symbol has any metric.
pub fn rank_snapshots(
    metrics: &BTreeMap<String, MetricSnapshot>,
    timeframe: Timeframe,
    timestamp: DateTime<Utc>,
    config: &RankingConfig,
) -> Result<Vec<RankingSnapshot>, RankwatchError> {
    if let Some(other) = metrics.values().find(|s| s.timeframe != timeframe) {
        return Err(RankwatchError::TimeframeMismatch {
            symbol: other.symbol.clone(),
            expected: timeframe,
            found: other.timeframe,
        });
    }

    let mut ranks: BTreeMap<String, BTreeMap<MetricId, u32>> = BTreeMap::new();
    for &metric in &config.metrics {
        for (symbol, rank) in rank_metric(metrics, metric) {
            ranks.entry(symbol).or_default().insert(metric, rank);
        }
    }

    if ranks.is_empty() {
        return Err(RankwatchError::EmptyUniverse { timeframe });
    }

    let mut composites: Vec<(&str, f64)> = ranks
        .iter()
        .filter(|(_, r)| config.metrics.iter().all(|m| r.contains_key(m)))
        .map(|(symbol, r)| {
            let score = config
                .metrics
                .iter()
                .map(|m| config.weight(*m) * r[m] as f64)
                .sum::<f64>();
            (symbol.as_str(), score)
        })
        .collect();
    composites.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));

    let overall: BTreeMap<&str, (u32, f64)> = composites
        .iter()
        .enumerate()
        .map(|(i, (symbol, score))| (*symbol, ((i + 1) as u32, *score)))
        .collect();

    let mut snapshots: Vec<RankingSnapshot> = ranks
        .iter()
        .map(|(symbol, r)| {
            let overall = overall.get(symbol.as_str());
            RankingSnapshot {
                symbol: symbol.clone(),
                timeframe,
                timestamp,
                ranks: r.clone(),
                overall_rank: overall.map(|o| o.0),
                composite_score: overall.map(|o| o.1),
            }
        })
        .collect();

    snapshots.sort_by(|a, b| match (a.overall_rank, b.overall_rank) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.symbol.cmp(&b.symbol),
    });

    Ok(snapshots)
}

/// Deltas `previous - current` for symbols present in both snapshots.
/// A column missing on either side has no delta.
pub fn rank_changes(current: &[RankingSnapshot], previous: &[RankingSnapshot]) -> RankChanges {
    let previous: BTreeMap<&str, &RankingSnapshot> =
        previous.iter().map(|s| (s.symbol.as_str(), s)).collect();

    let mut by_symbol = BTreeMap::new();
    for snap in current {
        let Some(prev) = previous.get(snap.symbol.as_str()) else {
            continue;
        };
        if prev.timeframe != snap.timeframe {
            warn!(
                symbol = %snap.symbol,
                current = %snap.timeframe,
                previous = %prev.timeframe,
                "ignoring prior rank from another timeframe"
            );
            continue;
        }

        let metrics = snap
            .ranks
            .iter()
            .filter_map(|(metric, &rank)| {
                prev.ranks
                    .get(metric)
                    .map(|&p| (*metric, p as i64 - rank as i64))
            })
            .collect();
        let overall = match (prev.overall_rank, snap.overall_rank) {
            (Some(p), Some(c)) => Some(p as i64 - c as i64),
            _ => None,
        };

        by_symbol.insert(snap.symbol.clone(), SymbolRankChanges { metrics, overall });
    }

    RankChanges { by_symbol }
}

/// Rank a timeframe and diff against the prior snapshot set, if any.
pub fn rank(
    metrics: &BTreeMap<String, MetricSnapshot>,
    timeframe: Timeframe,
    timestamp: DateTime<Utc>,
    prior: Option<&[RankingSnapshot]>,
    config: &RankingConfig,
) -> Result<RankingRun, RankwatchError> {
    let snapshots = rank_snapshots(metrics, timeframe, timestamp, config)?;
    let changes = prior
        .map(|p| rank_changes(&snapshots, p))
        .unwrap_or_default();

    info!(
        timeframe = %timeframe,
        ranked = snapshots.len(),
        overall = column_len(&snapshots, RankColumn::Overall),
        changes = changes.len(),
        "ranking completed"
    );

    Ok(RankingRun {
        timeframe,
        timestamp,
        snapshots,
        changes,
    })
}
