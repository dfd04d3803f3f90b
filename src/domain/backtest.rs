//! Backtest simulator: replays entry signals against historical bars.
//!
//! Per symbol the simulator holds at most one position. A signal on bar `t`
//! fills at the open of bar `t+1`. From the bar after the fill, each bar is
//! checked against the stop-loss and take-profit thresholds; when both fall
//! inside the bar's range the stop-loss wins. A position still open after
//! `max_bars` bars exits at that bar's close. Positions open when the
//! history ends are discarded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::bar::Bar;
use crate::domain::error::RankwatchError;
use crate::domain::position::{Direction, ExitReason, OpenPosition, Trade};
use crate::domain::signal::SignalSource;
use crate::domain::summary::{summarize_all, BacktestSummary};
use crate::domain::timeframe::Timeframe;
use crate::domain::universe::{SkipReason, SkippedSymbol};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectionFilter {
    Long,
    Short,
    Both,
}

impl DirectionFilter {
    pub fn allows(&self, direction: Direction) -> bool {
        match self {
            DirectionFilter::Long => direction == Direction::Long,
            DirectionFilter::Short => direction == Direction::Short,
            DirectionFilter::Both => true,
        }
    }
}

impl fmt::Display for DirectionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectionFilter::Long => f.write_str("long"),
            DirectionFilter::Short => f.write_str("short"),
            DirectionFilter::Both => f.write_str("both"),
        }
    }
}

impl FromStr for DirectionFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "long" => Ok(DirectionFilter::Long),
            "short" => Ok(DirectionFilter::Short),
            "both" => Ok(DirectionFilter::Both),
            other => Err(format!("unknown direction '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestParams {
    pub take_profit_pct: f64,
    pub stop_loss_pct: f64,
    pub max_bars: i64,
    pub direction: DirectionFilter,
    /// Consecutive missing bars tolerated before a symbol is aborted.
    pub max_missing_bars: u32,
}

impl Default for BacktestParams {
    fn default() -> Self {
        BacktestParams {
            take_profit_pct: 3.0,
            stop_loss_pct: 1.5,
            max_bars: 20,
            direction: DirectionFilter::Both,
            max_missing_bars: 2,
        }
    }
}

impl BacktestParams {
    pub fn validate(&self) -> Result<(), RankwatchError> {
        if !self.take_profit_pct.is_finite() || self.take_profit_pct <= 0.0 {
            return Err(RankwatchError::InvalidBacktestParam {
                field: "take_profit_pct".to_string(),
                reason: format!("must be positive, got {}", self.take_profit_pct),
            });
        }
        if !self.stop_loss_pct.is_finite() || self.stop_loss_pct <= 0.0 {
            return Err(RankwatchError::InvalidBacktestParam {
                field: "stop_loss_pct".to_string(),
                reason: format!("must be positive, got {}", self.stop_loss_pct),
            });
        }
        if self.max_bars <= 0 {
            return Err(RankwatchError::InvalidBacktestParam {
                field: "max_bars".to_string(),
                reason: format!("must be positive, got {}", self.max_bars),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestRequest {
    /// Generated when absent.
    pub id: Option<String>,
    pub symbols: Vec<String>,
    pub timeframe: Timeframe,
    pub params: BacktestParams,
}

/// Cooperative cancellation flag shared with the caller.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A completed backtest. Never mutated after `simulate` returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestRun {
    pub id: String,
    pub timeframe: Timeframe,
    pub params: BacktestParams,
    pub symbols: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub trades: Vec<Trade>,
    pub summaries: Vec<BacktestSummary>,
}

/// Outcome of a simulation: the run plus symbols that were left out.
#[derive(Debug, Clone)]
pub struct BacktestOutcome {
    pub run: BacktestRun,
    pub skipped: Vec<SkippedSymbol>,
}

pub fn generate_backtest_id(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("backtest_{}_{}", now.format("%Y%m%d_%H%M%S"), &suffix[..8])
}

/// Bars must be valid, strictly increasing, and no gap may exceed
/// `max_missing_bars` missing bars.
fn check_history(
    symbol: &str,
    bars: &[Bar],
    timeframe: Timeframe,
    max_missing_bars: u32,
) -> Result<(), RankwatchError> {
    let step = timeframe.duration_secs();
    let tolerance_secs = step * (1 + max_missing_bars as i64);
    for bar in bars {
        bar.validate(symbol)?;
    }
    for pair in bars.windows(2) {
        let gap_secs = (pair[1].open_time - pair[0].open_time).num_seconds();
        if gap_secs <= 0 {
            return Err(RankwatchError::InvalidBar {
                symbol: symbol.to_string(),
                reason: format!("bars out of order at {}", pair[1].open_time),
            });
        }
        if gap_secs > tolerance_secs {
            return Err(RankwatchError::DataGap {
                symbol: symbol.to_string(),
                gap_secs,
                tolerance_secs,
            });
        }
    }
    Ok(())
}

fn exit_for(
    position: &OpenPosition,
    bar: &Bar,
    bars_held: usize,
    max_bars: usize,
) -> Option<(f64, ExitReason)> {
    if position.should_stop_loss(bar.low, bar.high) {
        Some((position.stop_loss, ExitReason::StopLoss))
    } else if position.should_take_profit(bar.low, bar.high) {
        Some((position.take_profit, ExitReason::TakeProfit))
    } else if bars_held >= max_bars {
        Some((bar.close, ExitReason::MaxBars))
    } else {
        None
    }
}

fn simulate_symbol(
    backtest_id: &str,
    symbol: &str,
    bars: &[Bar],
    params: &BacktestParams,
    max_bars: usize,
    signals: &mut dyn SignalSource,
    cancel: &CancellationToken,
) -> Result<Vec<Trade>, RankwatchError> {
    let mut trades = Vec::new();
    let mut open: Option<OpenPosition> = None;
    let mut pending: Option<Direction> = None;

    for (t, bar) in bars.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(RankwatchError::Cancelled {
                backtest_id: backtest_id.to_string(),
            });
        }

        let mut exited = false;
        if let Some(direction) = pending.take() {
            open = Some(OpenPosition::open(
                symbol,
                direction,
                t,
                bar.open_time,
                bar.open,
                params.take_profit_pct,
                params.stop_loss_pct,
            ));
        } else if let Some(position) = open.take() {
            let bars_held = t - position.entry_index;
            match exit_for(&position, bar, bars_held, max_bars) {
                Some((price, reason)) => {
                    trades.push(position.close(bar.open_time, price, reason, bars_held));
                    exited = true;
                }
                None => open = Some(position),
            }
        }

        if open.is_none() && !exited && t + 1 < bars.len() {
            pending = signals
                .entry_signal(symbol, &bars[..=t])
                .filter(|d| params.direction.allows(*d));
        }
    }

    if let Some(position) = open {
        debug!(
            symbol = %symbol,
            entry_time = %position.entry_time,
            "discarding position still open at end of history"
        );
    }
    Ok(trades)
}

/// Run a backtest. Parameters are validated before any bar is touched;
/// symbols with missing, invalid, or gapped histories are skipped.
pub fn simulate(
    request: &BacktestRequest,
    histories: &BTreeMap<String, Vec<Bar>>,
    signals: &mut dyn SignalSource,
    cancel: &CancellationToken,
) -> Result<BacktestOutcome, RankwatchError> {
    request.params.validate()?;
    if request.symbols.is_empty() {
        return Err(RankwatchError::InvalidBacktestParam {
            field: "symbols".to_string(),
            reason: "at least one symbol is required".to_string(),
        });
    }
    let max_bars = request.params.max_bars as usize;

    let created_at = Utc::now();
    let id = request
        .id
        .clone()
        .unwrap_or_else(|| generate_backtest_id(created_at));

    let mut trades = Vec::new();
    let mut skipped = Vec::new();
    for symbol in &request.symbols {
        let bars = match histories.get(symbol) {
            Some(bars) if !bars.is_empty() => bars,
            _ => {
                warn!(backtest_id = %id, symbol = %symbol, "skipping symbol: no data");
                skipped.push(SkippedSymbol {
                    symbol: symbol.clone(),
                    reason: SkipReason::NoData,
                });
                continue;
            }
        };

        match check_history(symbol, bars, request.timeframe, request.params.max_missing_bars) {
            Ok(()) => {}
            Err(RankwatchError::DataGap { gap_secs, .. }) => {
                warn!(backtest_id = %id, symbol = %symbol, gap_secs, "aborting symbol: data gap");
                skipped.push(SkippedSymbol {
                    symbol: symbol.clone(),
                    reason: SkipReason::DataGap { gap_secs },
                });
                continue;
            }
            Err(RankwatchError::InvalidBar { reason, .. }) => {
                warn!(
                    backtest_id = %id,
                    symbol = %symbol,
                    reason = %reason,
                    "aborting symbol: invalid bar"
                );
                skipped.push(SkippedSymbol {
                    symbol: symbol.clone(),
                    reason: SkipReason::InvalidBar { reason },
                });
                continue;
            }
            Err(e) => return Err(e),
        }

        let symbol_trades =
            simulate_symbol(&id, symbol, bars, &request.params, max_bars, signals, cancel)
                .inspect_err(|_| warn!(backtest_id = %id, "backtest cancelled"))?;
        debug!(
            backtest_id = %id,
            symbol = %symbol,
            trades = symbol_trades.len(),
            "symbol simulated"
        );
        trades.extend(symbol_trades);
    }

    if skipped.len() == request.symbols.len()
        && skipped.iter().all(|s| s.reason == SkipReason::NoData)
    {
        return Err(RankwatchError::NoData {
            symbol: request.symbols.join(","),
            timeframe: request.timeframe,
        });
    }

    trades.sort_by(|a, b| {
        a.entry_time
            .cmp(&b.entry_time)
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
    let summaries = summarize_all(&trades);

    info!(
        backtest_id = %id,
        symbols = request.symbols.len() - skipped.len(),
        skipped = skipped.len(),
        trades = trades.len(),
        "backtest completed"
    );

    Ok(BacktestOutcome {
        run: BacktestRun {
            id,
            timeframe: request.timeframe,
            params: request.params.clone(),
            symbols: request.symbols.clone(),
            created_at,
            trades,
            summaries,
        },
        skipped,
    })
}
