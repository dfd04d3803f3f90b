//! Slot-machine matcher: symbols lining up across rank columns.
//!
//! Columns are the per-metric rank columns truncated to their top `K`
//! symbols; a symbol's slot position is its rank value. Two algorithms:
//!
//! - `consistent` groups a symbol's top-K metric ranks by slot. The largest
//!   group is its match. With `exact_slots = false` every top-K metric counts
//!   and the slot is the symbol's best rank.
//! - `momentum` takes the overall rank improvement since the prior run and
//!   counts the metric columns that improved by at least the per-metric
//!   threshold.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::info;

use crate::domain::metric::MetricId;
use crate::domain::ranking::{column_order, RankColumn, RankingRun, RankingSnapshot};

pub const DEFAULT_MATCH_THRESHOLD: usize = 3;
pub const STRONG_MATCH_COUNT: usize = 4;
pub const JACKPOT_MATCH_COUNT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotAlgorithm {
    Consistent,
    Momentum,
}

impl fmt::Display for SlotAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotAlgorithm::Consistent => f.write_str("consistent"),
            SlotAlgorithm::Momentum => f.write_str("momentum"),
        }
    }
}

impl FromStr for SlotAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "consistent" => Ok(SlotAlgorithm::Consistent),
            "momentum" => Ok(SlotAlgorithm::Momentum),
            other => Err(format!("unknown slot machine algorithm '{}'", other)),
        }
    }
}

/// Presentation tier of a match, from the shared match-count constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    Highlight,
    Strong,
    Jackpot,
}

impl MatchTier {
    pub fn for_count(match_count: usize) -> Self {
        if match_count >= JACKPOT_MATCH_COUNT {
            MatchTier::Jackpot
        } else if match_count >= STRONG_MATCH_COUNT {
            MatchTier::Strong
        } else {
            MatchTier::Highlight
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlotMachineConfig {
    pub algorithm: SlotAlgorithm,
    pub top_k: u32,
    pub match_threshold: usize,
    pub max_rows: usize,
    pub top_n: usize,
    pub exact_slots: bool,
    pub min_overall_improvement: i64,
    pub min_metric_improvement: i64,
    pub max_overall_rank: u32,
}

impl Default for SlotMachineConfig {
    fn default() -> Self {
        SlotMachineConfig {
            algorithm: SlotAlgorithm::Consistent,
            top_k: 20,
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            max_rows: 50,
            top_n: 10,
            exact_slots: true,
            min_overall_improvement: 5,
            min_metric_improvement: 5,
            max_overall_rank: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotMachineMatch {
    pub symbol: String,
    pub slot_position: u32,
    pub matched_columns: Vec<MetricId>,
    pub match_count: usize,
    pub algorithm: SlotAlgorithm,
    pub overall_improvement: Option<f64>,
    pub tier: MatchTier,
}

/// One displayed column: symbols in slot order.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotColumn {
    pub column: RankColumn,
    pub symbols: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlotMachineBoard {
    pub algorithm: SlotAlgorithm,
    pub columns: Vec<SlotColumn>,
    pub matches: Vec<SlotMachineMatch>,
}

impl SlotMachineBoard {
    pub fn top(&self, n: usize) -> &[SlotMachineMatch] {
        &self.matches[..n.min(self.matches.len())]
    }
}

fn top_k_ranks(snapshot: &RankingSnapshot, top_k: u32) -> Vec<(MetricId, u32)> {
    snapshot
        .ranks
        .iter()
        .filter(|(_, rank)| **rank <= top_k)
        .map(|(m, r)| (*m, *r))
        .collect()
}

fn consistent_match(
    snapshot: &RankingSnapshot,
    config: &SlotMachineConfig,
) -> Option<(u32, Vec<MetricId>)> {
    let ranks = top_k_ranks(snapshot, config.top_k);
    if !config.exact_slots {
        let slot = ranks.iter().map(|(_, r)| *r).min()?;
        return Some((slot, ranks.into_iter().map(|(m, _)| m).collect()));
    }

    let mut by_slot: BTreeMap<u32, Vec<MetricId>> = BTreeMap::new();
    for (metric, rank) in ranks {
        by_slot.entry(rank).or_default().push(metric);
    }
    // Largest group wins; BTreeMap order keeps the lower slot on ties.
    let mut best: Option<(u32, Vec<MetricId>)> = None;
    for (slot, metrics) in by_slot {
        if best.as_ref().is_none_or(|(_, b)| metrics.len() > b.len()) {
            best = Some((slot, metrics));
        }
    }
    best
}

fn find_consistent(run: &RankingRun, config: &SlotMachineConfig) -> Vec<SlotMachineMatch> {
    let mut matches: Vec<SlotMachineMatch> = run
        .snapshots
        .iter()
        .filter_map(|snapshot| {
            let (slot, matched) = consistent_match(snapshot, config)?;
            (matched.len() >= config.match_threshold).then(|| SlotMachineMatch {
                symbol: snapshot.symbol.clone(),
                slot_position: slot,
                match_count: matched.len(),
                tier: MatchTier::for_count(matched.len()),
                matched_columns: matched,
                algorithm: SlotAlgorithm::Consistent,
                overall_improvement: None,
            })
        })
        .collect();

    matches.sort_by(|a, b| {
        b.match_count
            .cmp(&a.match_count)
            .then_with(|| a.slot_position.cmp(&b.slot_position))
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
    matches
}

fn find_momentum(run: &RankingRun, config: &SlotMachineConfig) -> Vec<SlotMachineMatch> {
    let mut matches: Vec<SlotMachineMatch> = run
        .snapshots
        .iter()
        .filter_map(|snapshot| {
            let changes = run.changes.get(&snapshot.symbol)?;
            let improvement = changes.overall?;
            let overall_rank = snapshot.overall_rank?;
            if improvement <= 0
                || improvement < config.min_overall_improvement
                || overall_rank > config.max_overall_rank
            {
                return None;
            }

            let matched: Vec<MetricId> = changes
                .metrics
                .iter()
                .filter(|(_, delta)| **delta > 0 && **delta >= config.min_metric_improvement)
                .map(|(m, _)| *m)
                .collect();
            (matched.len() >= config.match_threshold).then(|| SlotMachineMatch {
                symbol: snapshot.symbol.clone(),
                slot_position: overall_rank,
                match_count: matched.len(),
                tier: MatchTier::for_count(matched.len()),
                matched_columns: matched,
                algorithm: SlotAlgorithm::Momentum,
                overall_improvement: Some(improvement as f64),
            })
        })
        .collect();

    matches.sort_by(|a, b| {
        let ia = a.overall_improvement.unwrap_or(0.0);
        let ib = b.overall_improvement.unwrap_or(0.0);
        ib.total_cmp(&ia)
            .then_with(|| b.match_count.cmp(&a.match_count))
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
    matches
}

fn columns(run: &RankingRun, config: &SlotMachineConfig) -> Vec<SlotColumn> {
    RankColumn::all()
        .into_iter()
        .map(|column| SlotColumn {
            column,
            symbols: column_order(&run.snapshots, column)
                .into_iter()
                .take(config.max_rows)
                .map(|(symbol, _)| symbol.to_string())
                .collect(),
        })
        .collect()
}

pub fn evaluate(run: &RankingRun, config: &SlotMachineConfig) -> SlotMachineBoard {
    let matches = match config.algorithm {
        SlotAlgorithm::Consistent => find_consistent(run, config),
        SlotAlgorithm::Momentum => find_momentum(run, config),
    };
    info!(
        timeframe = %run.timeframe,
        algorithm = %config.algorithm,
        matches = matches.len(),
        jackpots = matches.iter().filter(|m| m.tier == MatchTier::Jackpot).count(),
        "slot machine evaluated"
    );
    SlotMachineBoard {
        algorithm: config.algorithm,
        columns: columns(run, config),
        matches,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ranking::{RankChanges, rank_changes};
    use crate::domain::timeframe::Timeframe;
    use chrono::{TimeZone, Utc};

    fn snapshot(symbol: &str, ranks: [u32; 5], overall: u32) -> RankingSnapshot {
        RankingSnapshot {
            symbol: symbol.to_string(),
            timeframe: Timeframe::H1,
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            ranks: MetricId::ALL.into_iter().zip(ranks).collect(),
            overall_rank: Some(overall),
            composite_score: None,
        }
    }

    fn run(snapshots: Vec<RankingSnapshot>, changes: RankChanges) -> RankingRun {
        RankingRun {
            timeframe: Timeframe::H1,
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            snapshots,
            changes,
        }
    }

    #[test]
    fn tiers_follow_shared_constants() {
        assert_eq!(MatchTier::for_count(DEFAULT_MATCH_THRESHOLD), MatchTier::Highlight);
        assert_eq!(MatchTier::for_count(STRONG_MATCH_COUNT), MatchTier::Strong);
        assert_eq!(MatchTier::for_count(JACKPOT_MATCH_COUNT), MatchTier::Jackpot);
    }

    #[test]
    fn consistent_exact_slots() {
        let r = run(
            vec![
                snapshot("AAA", [1, 1, 1, 1, 1], 1),
                snapshot("BBB", [2, 2, 2, 3, 3], 2),
                snapshot("CCC", [3, 3, 3, 2, 2], 3),
                snapshot("DDD", [4, 5, 6, 4, 4], 4),
            ],
            RankChanges::default(),
        );
        let board = evaluate(&r, &SlotMachineConfig::default());
        let found: Vec<(&str, u32, usize)> = board
            .matches
            .iter()
            .map(|m| (m.symbol.as_str(), m.slot_position, m.match_count))
            .collect();
        assert_eq!(found, vec![("AAA", 1, 5), ("BBB", 2, 3), ("CCC", 3, 3), ("DDD", 4, 3)]);
        assert_eq!(board.matches[0].tier, MatchTier::Jackpot);
        assert_eq!(
            board.matches[1].matched_columns,
            vec![MetricId::Volume, MetricId::Momentum, MetricId::Price]
        );
    }

    #[test]
    fn consistent_respects_top_k() {
        let r = run(
            vec![snapshot("AAA", [25, 25, 25, 25, 25], 25)],
            RankChanges::default(),
        );
        let board = evaluate(&r, &SlotMachineConfig::default());
        assert!(board.matches.is_empty());
    }

    #[test]
    fn loose_mode_counts_top_k_presence() {
        let r = run(
            vec![
                snapshot("AAA", [1, 3, 5, 7, 30], 1),
                snapshot("BBB", [2, 30, 30, 30, 30], 2),
            ],
            RankChanges::default(),
        );
        let config = SlotMachineConfig {
            exact_slots: false,
            ..SlotMachineConfig::default()
        };
        let board = evaluate(&r, &config);
        assert_eq!(board.matches.len(), 1);
        assert_eq!(board.matches[0].symbol, "AAA");
        assert_eq!(board.matches[0].match_count, 4);
        assert_eq!(board.matches[0].slot_position, 1);
        assert_eq!(board.matches[0].tier, MatchTier::Strong);
    }

    #[test]
    fn momentum_requires_overall_and_metric_improvement() {
        let previous = vec![
            snapshot("UP", [20, 20, 20, 20, 20], 20),
            snapshot("SMALL", [10, 10, 10, 10, 10], 4),
            snapshot("DOWN", [1, 1, 1, 1, 1], 1),
        ];
        let current = vec![
            snapshot("UP", [2, 3, 10, 19, 20], 2),
            snapshot("SMALL", [1, 1, 1, 1, 1], 1),
            snapshot("DOWN", [9, 9, 9, 9, 9], 9),
        ];
        let changes = rank_changes(&current, &previous);
        let board = evaluate(
            &run(current, changes),
            &SlotMachineConfig {
                algorithm: SlotAlgorithm::Momentum,
                ..SlotMachineConfig::default()
            },
        );

        // SMALL improved overall by only 3.
        assert_eq!(board.matches.len(), 1);
        let m = &board.matches[0];
        assert_eq!(m.symbol, "UP");
        assert_eq!(m.overall_improvement, Some(18.0));
        assert_eq!(m.slot_position, 2);
        assert_eq!(
            m.matched_columns,
            vec![MetricId::Volume, MetricId::Momentum, MetricId::Price]
        );
    }

    #[test]
    fn momentum_respects_max_overall_rank() {
        let previous = vec![snapshot("UP", [90; 5], 90)];
        let current = vec![snapshot("UP", [40; 5], 40)];
        let changes = rank_changes(&current, &previous);
        let board = evaluate(
            &run(current, changes),
            &SlotMachineConfig {
                algorithm: SlotAlgorithm::Momentum,
                ..SlotMachineConfig::default()
            },
        );
        assert!(board.matches.is_empty());
    }

    #[test]
    fn columns_capped_and_top_slice() {
        let snaps: Vec<RankingSnapshot> = (1..=5)
            .map(|i| snapshot(&format!("S{}", i), [i; 5], i))
            .collect();
        let config = SlotMachineConfig {
            max_rows: 3,
            ..SlotMachineConfig::default()
        };
        let board = evaluate(&run(snaps, RankChanges::default()), &config);
        assert_eq!(board.columns.len(), 6);
        assert_eq!(board.columns[0].column, RankColumn::Overall);
        assert_eq!(board.columns[0].symbols, vec!["S1", "S2", "S3"]);
        assert_eq!(board.matches.len(), 5);
        assert_eq!(board.top(2).len(), 2);
        assert_eq!(board.top(100).len(), 5);
    }

    #[test]
    fn algorithm_parses() {
        assert_eq!("Momentum".parse::<SlotAlgorithm>().unwrap(), SlotAlgorithm::Momentum);
        assert!("random".parse::<SlotAlgorithm>().is_err());
    }
}
