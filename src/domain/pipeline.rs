//! Analysis pipeline: metrics, ranking, opportunities and slot machine for
//! one timeframe, either once or replayed bar by bar over a history.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use crate::domain::bar::{tail_window, Bar};
use crate::domain::error::RankwatchError;
use crate::domain::metric::{calculate_universe, MetricConfig, MetricSnapshot};
use crate::domain::opportunity::{detect, OpportunityConfig, OpportunityReport};
use crate::domain::ranking::{rank, RankingConfig, RankingRun, RankingSnapshot};
use crate::domain::slot_machine::{evaluate, SlotMachineBoard, SlotMachineConfig};
use crate::domain::timeframe::Timeframe;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AnalysisConfig {
    pub metrics: MetricConfig,
    pub ranking: RankingConfig,
    pub opportunity: OpportunityConfig,
    pub slot_machine: SlotMachineConfig,
}

#[derive(Debug, Clone)]
pub struct AnalysisRun {
    pub timeframe: Timeframe,
    pub timestamp: DateTime<Utc>,
    pub metrics: BTreeMap<String, MetricSnapshot>,
    pub ranking: RankingRun,
    pub opportunities: OpportunityReport,
    pub slot_machine: SlotMachineBoard,
}

/// One analysis run over windows copied by the caller.
pub fn run_analysis(
    windows: &BTreeMap<String, Vec<Bar>>,
    timeframe: Timeframe,
    timestamp: DateTime<Utc>,
    prior: Option<&[RankingSnapshot]>,
    config: &AnalysisConfig,
) -> Result<AnalysisRun, RankwatchError> {
    let metrics = calculate_universe(windows, timeframe, timestamp, &config.metrics);
    let ranking = rank(&metrics, timeframe, timestamp, prior, &config.ranking)?;
    let opportunities = detect(&ranking, &metrics, &config.opportunity);
    let slot_machine = evaluate(&ranking, &config.slot_machine);

    Ok(AnalysisRun {
        timeframe,
        timestamp,
        metrics,
        ranking,
        opportunities,
        slot_machine,
    })
}

/// Replay a multi-symbol history: one run per distinct bar open time, each
/// seeing only bars up to that time and the previous run's rankings. Steps
/// where no symbol has a full window yet produce no run. A symbol drops out
/// once its history has ended.
pub fn replay_history(
    histories: &BTreeMap<String, Vec<Bar>>,
    timeframe: Timeframe,
    config: &AnalysisConfig,
) -> Result<Vec<AnalysisRun>, RankwatchError> {
    let times: BTreeSet<DateTime<Utc>> = histories
        .values()
        .flat_map(|bars| bars.iter().map(|b| b.open_time))
        .collect();

    let mut runs: Vec<AnalysisRun> = Vec::new();
    for time in times {
        let windows: BTreeMap<String, Vec<Bar>> = histories
            .iter()
            .filter(|(_, bars)| bars.last().is_some_and(|b| b.open_time >= time))
            .map(|(symbol, bars)| {
                let end = bars.partition_point(|b| b.open_time <= time);
                (symbol.clone(), tail_window(&bars[..end], config.metrics.window))
            })
            .filter(|(_, window)| !window.is_empty())
            .collect();

        let prior = runs.last().map(|r| r.ranking.snapshots.as_slice());
        match run_analysis(&windows, timeframe, time, prior, config) {
            Ok(run) => runs.push(run),
            Err(RankwatchError::EmptyUniverse { .. }) => {
                debug!(time = %time, "no rankable symbols yet");
            }
            Err(e) => return Err(e),
        }
    }

    info!(timeframe = %timeframe, runs = runs.len(), "history replayed");
    Ok(runs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::position::Direction;
    use chrono::{Duration, TimeZone};

    fn history(start_close: f64, step: f64, n: usize) -> Vec<Bar> {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let close = start_close + step * i as f64;
                Bar {
                    open_time: t0 + Duration::hours(i as i64),
                    open: close,
                    high: close + 1.0,
                    low: close - 1.0,
                    close,
                    volume: 1_000.0 + i as f64,
                }
            })
            .collect()
    }

    fn small_config() -> AnalysisConfig {
        AnalysisConfig {
            metrics: MetricConfig {
                window: 5,
                momentum_period: 4,
                price_period: 2,
            },
            ..AnalysisConfig::default()
        }
    }

    #[test]
    fn run_analysis_chains_components() {
        let mut windows = BTreeMap::new();
        windows.insert("UP".to_string(), history(100.0, 2.0, 10));
        windows.insert("DOWN".to_string(), history(200.0, -2.0, 10));
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();

        let run = run_analysis(&windows, Timeframe::H1, ts, None, &small_config()).unwrap();
        assert_eq!(run.metrics.len(), 2);
        assert_eq!(run.ranking.get("UP").unwrap().overall_rank, Some(1));
        assert_eq!(run.opportunities.long[0].symbol, "UP");
        assert_eq!(run.opportunities.long[0].direction, Direction::Long);
        assert_eq!(run.opportunities.short[0].symbol, "DOWN");
    }

    #[test]
    fn run_analysis_fails_without_history() {
        let mut windows = BTreeMap::new();
        windows.insert("UP".to_string(), history(100.0, 1.0, 3));
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 2, 0, 0).unwrap();
        let err = run_analysis(&windows, Timeframe::H1, ts, None, &small_config()).unwrap_err();
        assert!(matches!(err, RankwatchError::EmptyUniverse { .. }));
    }

    #[test]
    fn replay_skips_warmup_and_chains_prior() {
        let mut histories = BTreeMap::new();
        histories.insert("UP".to_string(), history(100.0, 2.0, 8));
        histories.insert("DOWN".to_string(), history(200.0, -2.0, 8));

        let runs = replay_history(&histories, Timeframe::H1, &small_config()).unwrap();
        // Window 5 over 8 bars: runs at bars 4..=7.
        assert_eq!(runs.len(), 4);
        assert!(runs[0].ranking.changes.is_empty());
        assert_eq!(runs[1].ranking.changes.len(), 2);
        assert!(runs.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn replay_drops_symbols_after_their_history_ends() {
        let mut histories = BTreeMap::new();
        histories.insert("UP".to_string(), history(100.0, 2.0, 10));
        histories.insert("DOWN".to_string(), history(200.0, -2.0, 10));
        histories.insert("SHORT".to_string(), history(50.0, 1.0, 6));

        let runs = replay_history(&histories, Timeframe::H1, &small_config()).unwrap();
        assert_eq!(runs.len(), 6);
        // SHORT's last bar is bar 5, the second run.
        assert!(runs[1].metrics.contains_key("SHORT"));
        assert!(runs[2..].iter().all(|r| !r.metrics.contains_key("SHORT")));
        assert!(runs[2..].iter().all(|r| r.ranking.get("SHORT").is_none()));
    }
}
