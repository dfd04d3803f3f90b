//! Opportunity detector: scored long/short candidates from one ranking run.
//!
//! A symbol is a long candidate when it is in an uptrend and every signal
//! metric ranks inside the top `top_percentile` band of its column. Shorts
//! mirror this: not in an uptrend, every signal metric in the bottom band.
//!
//! Strength is the weighted average over the symbol's ranked metrics of the
//! rank normalized to 0..100: `100 * (N - rank + 1) / N` for longs and
//! `100 * rank / N` for shorts, so rank 1 scores 100 on the long side and
//! rank N scores 100 on the short side.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::info;

use crate::domain::metric::{MetricId, MetricSnapshot};
use crate::domain::position::Direction;
use crate::domain::ranking::{RankColumn, RankingRun, RankingSnapshot};
use crate::domain::timeframe::Timeframe;

#[derive(Debug, Clone, PartialEq)]
pub struct OpportunityConfig {
    pub top_percentile: f64,
    pub signal_metrics: Vec<MetricId>,
    /// Missing entries weigh 1.0.
    pub strength_weights: BTreeMap<MetricId, f64>,
    pub current_cap: usize,
    pub history_cap: usize,
}

impl Default for OpportunityConfig {
    fn default() -> Self {
        OpportunityConfig {
            top_percentile: 20.0,
            signal_metrics: vec![MetricId::Momentum, MetricId::Price],
            strength_weights: BTreeMap::new(),
            current_cap: 5,
            history_cap: 15,
        }
    }
}

impl OpportunityConfig {
    pub fn strength_weight(&self, metric: MetricId) -> f64 {
        self.strength_weights.get(&metric).copied().unwrap_or(1.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub direction: Direction,
    pub strength: f64,
    pub supporting_metrics: Vec<MetricId>,
    pub detection_time: DateTime<Utc>,
    pub price: Option<f64>,
    pub overall_rank: Option<u32>,
    pub rank_change: Option<i64>,
}

/// One run's candidates, each list sorted by descending strength and capped.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OpportunityReport {
    pub long: Vec<Opportunity>,
    pub short: Vec<Opportunity>,
}

impl OpportunityReport {
    pub fn direction(&self, direction: Direction) -> &[Opportunity] {
        match direction {
            Direction::Long => &self.long,
            Direction::Short => &self.short,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Opportunity> {
        self.long.iter().chain(self.short.iter())
    }

    pub fn len(&self) -> usize {
        self.long.len() + self.short.len()
    }

    pub fn is_empty(&self) -> bool {
        self.long.is_empty() && self.short.is_empty()
    }
}

/// Number of ranks inside the top `percentile` of a column of `n` symbols.
pub fn band_size(n: usize, percentile: f64) -> usize {
    if n == 0 || percentile <= 0.0 {
        return 0;
    }
    let band = (n as f64 * percentile / 100.0).ceil() as usize;
    band.min(n)
}

pub fn normalized_rank(rank: u32, n: usize, direction: Direction) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let n = n as f64;
    let rank = rank as f64;
    match direction {
        Direction::Long => 100.0 * (n - rank + 1.0) / n,
        Direction::Short => 100.0 * rank / n,
    }
}

fn in_band(rank: u32, n: usize, percentile: f64, direction: Direction) -> bool {
    let band = band_size(n, percentile);
    let rank = rank as usize;
    match direction {
        Direction::Long => rank <= band,
        Direction::Short => rank > n - band,
    }
}

/// Weighted average normalized rank over the snapshot's ranked metrics.
pub fn strength(
    snapshot: &RankingSnapshot,
    column_sizes: &BTreeMap<MetricId, usize>,
    direction: Direction,
    config: &OpportunityConfig,
) -> f64 {
    let mut weighted = 0.0;
    let mut total_weight = 0.0;
    for (metric, &rank) in &snapshot.ranks {
        let weight = config.strength_weight(*metric);
        let n = column_sizes.get(metric).copied().unwrap_or(0);
        weighted += weight * normalized_rank(rank, n, direction);
        total_weight += weight;
    }
    if total_weight <= 0.0 {
        return 0.0;
    }
    weighted / total_weight
}

fn candidate_direction(
    snapshot: &RankingSnapshot,
    metric: &MetricSnapshot,
    column_sizes: &BTreeMap<MetricId, usize>,
    config: &OpportunityConfig,
) -> Option<Direction> {
    let direction = match metric.in_uptrend? {
        true => Direction::Long,
        false => Direction::Short,
    };
    let qualifies = !config.signal_metrics.is_empty()
        && config.signal_metrics.iter().all(|m| {
            match (snapshot.ranks.get(m), column_sizes.get(m)) {
                (Some(&rank), Some(&n)) => in_band(rank, n, config.top_percentile, direction),
                _ => false,
            }
        });
    qualifies.then_some(direction)
}

fn by_strength(a: &Opportunity, b: &Opportunity) -> Ordering {
    b.strength
        .total_cmp(&a.strength)
        .then_with(|| a.symbol.cmp(&b.symbol))
}

/// Detect candidates for one ranking run.
pub fn detect(
    run: &RankingRun,
    metrics: &BTreeMap<String, MetricSnapshot>,
    config: &OpportunityConfig,
) -> OpportunityReport {
    let column_sizes: BTreeMap<MetricId, usize> = MetricId::ALL
        .into_iter()
        .map(|m| (m, run.column_len(RankColumn::Metric(m))))
        .collect();

    let mut report = OpportunityReport::default();
    for snapshot in &run.snapshots {
        let Some(metric) = metrics.get(&snapshot.symbol) else {
            continue;
        };
        let Some(direction) = candidate_direction(snapshot, metric, &column_sizes, config) else {
            continue;
        };

        let supporting_metrics = snapshot
            .ranks
            .iter()
            .filter(|(m, rank)| {
                let n = column_sizes.get(m).copied().unwrap_or(0);
                in_band(**rank, n, config.top_percentile, direction)
            })
            .map(|(m, _)| *m)
            .collect();

        let opportunity = Opportunity {
            symbol: snapshot.symbol.clone(),
            timeframe: run.timeframe,
            direction,
            strength: strength(snapshot, &column_sizes, direction, config),
            supporting_metrics,
            detection_time: run.timestamp,
            price: metric.price,
            overall_rank: snapshot.overall_rank,
            rank_change: run.changes.delta(&snapshot.symbol, RankColumn::Overall),
        };
        match direction {
            Direction::Long => report.long.push(opportunity),
            Direction::Short => report.short.push(opportunity),
        }
    }

    report.long.sort_by(by_strength);
    report.short.sort_by(by_strength);
    report.long.truncate(config.current_cap);
    report.short.truncate(config.current_cap);

    info!(
        timeframe = %run.timeframe,
        long = report.long.len(),
        short = report.short.len(),
        "opportunities detected"
    );
    report
}

/// Accumulated opportunities across runs, newest first, capped per direction.
#[derive(Debug, Clone, PartialEq)]
pub struct OpportunityHistory {
    cap: usize,
    current: OpportunityReport,
    long: Vec<Opportunity>,
    short: Vec<Opportunity>,
}

impl OpportunityHistory {
    pub fn new(cap: usize) -> Self {
        OpportunityHistory {
            cap,
            current: OpportunityReport::default(),
            long: Vec::new(),
            short: Vec::new(),
        }
    }

    pub fn record(&mut self, report: OpportunityReport) {
        fn merge(history: &mut Vec<Opportunity>, latest: &[Opportunity], cap: usize) {
            let mut merged = latest.to_vec();
            merged.append(history);
            merged.truncate(cap);
            *history = merged;
        }
        merge(&mut self.long, &report.long, self.cap);
        merge(&mut self.short, &report.short, self.cap);
        self.current = report;
    }

    /// Rebuild from stored records in any order, one run per detection time.
    pub fn from_records(cap: usize, records: Vec<Opportunity>) -> Self {
        let mut runs: BTreeMap<DateTime<Utc>, OpportunityReport> = BTreeMap::new();
        for record in records {
            let report = runs.entry(record.detection_time).or_default();
            match record.direction {
                Direction::Long => report.long.push(record),
                Direction::Short => report.short.push(record),
            }
        }

        let mut history = OpportunityHistory::new(cap);
        for (_, mut report) in runs {
            report.long.sort_by(by_strength);
            report.short.sort_by(by_strength);
            history.record(report);
        }
        history
    }

    /// Latest run only.
    pub fn current(&self) -> &OpportunityReport {
        &self.current
    }

    pub fn history(&self, direction: Direction) -> &[Opportunity] {
        match direction {
            Direction::Long => &self.long,
            Direction::Short => &self.short,
        }
    }
}
