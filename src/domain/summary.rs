//! Result aggregation: win rate and PnL statistics over a trade ledger.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::position::{Direction, Trade};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryScope {
    Long,
    Short,
    Combined,
}

impl SummaryScope {
    pub const ALL: [SummaryScope; 3] = [
        SummaryScope::Long,
        SummaryScope::Short,
        SummaryScope::Combined,
    ];

    fn includes(&self, direction: Direction) -> bool {
        match self {
            SummaryScope::Long => direction == Direction::Long,
            SummaryScope::Short => direction == Direction::Short,
            SummaryScope::Combined => true,
        }
    }
}

impl fmt::Display for SummaryScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SummaryScope::Long => f.write_str("long"),
            SummaryScope::Short => f.write_str("short"),
            SummaryScope::Combined => f.write_str("combined"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestSummary {
    pub direction: SummaryScope,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub average_pnl: f64,
    pub max_profit: f64,
    pub max_loss: f64,
    pub avg_bars_held: f64,
}

/// Summary of the trades in `scope`. An empty scope yields all zeros.
pub fn summarize(trades: &[Trade], scope: SummaryScope) -> BacktestSummary {
    let mut total_trades = 0usize;
    let mut winning_trades = 0usize;
    let mut losing_trades = 0usize;
    let mut total_pnl = 0.0_f64;
    let mut max_profit = 0.0_f64;
    let mut max_loss = 0.0_f64;
    let mut total_bars = 0usize;

    for trade in trades.iter().filter(|t| scope.includes(t.direction)) {
        let pnl = trade.pnl_pct;
        total_trades += 1;
        total_pnl += pnl;
        total_bars += trade.bars_held;
        if pnl > 0.0 {
            winning_trades += 1;
        } else {
            losing_trades += 1;
        }
        if total_trades == 1 {
            max_profit = pnl;
            max_loss = pnl;
        } else {
            max_profit = max_profit.max(pnl);
            max_loss = max_loss.min(pnl);
        }
    }

    let (win_rate, average_pnl, avg_bars_held) = if total_trades > 0 {
        let n = total_trades as f64;
        (
            100.0 * winning_trades as f64 / n,
            total_pnl / n,
            total_bars as f64 / n,
        )
    } else {
        (0.0, 0.0, 0.0)
    };

    BacktestSummary {
        direction: scope,
        total_trades,
        winning_trades,
        losing_trades,
        win_rate,
        total_pnl,
        average_pnl,
        max_profit,
        max_loss,
        avg_bars_held,
    }
}

/// Long, short and combined summaries, in that order.
pub fn summarize_all(trades: &[Trade]) -> Vec<BacktestSummary> {
    SummaryScope::ALL
        .into_iter()
        .map(|scope| summarize(trades, scope))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::position::ExitReason;
    use chrono::{TimeZone, Utc};

    fn trade(direction: Direction, pnl_pct: f64, bars_held: usize) -> Trade {
        let entry = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Trade {
            symbol: "BTCUSDT".into(),
            direction,
            entry_time: entry,
            entry_price: 100.0,
            exit_time: entry + chrono::Duration::hours(bars_held as i64),
            exit_price: 100.0 + pnl_pct,
            exit_reason: ExitReason::MaxBars,
            pnl_pct,
            bars_held,
        }
    }

    #[test]
    fn empty_ledger_is_all_zero() {
        for summary in summarize_all(&[]) {
            assert_eq!(summary.total_trades, 0);
            assert_eq!(summary.win_rate, 0.0);
            assert_eq!(summary.total_pnl, 0.0);
            assert_eq!(summary.average_pnl, 0.0);
            assert_eq!(summary.avg_bars_held, 0.0);
        }
    }

    #[test]
    fn partitions_by_direction() {
        let trades = vec![
            trade(Direction::Long, 3.0, 2),
            trade(Direction::Long, -1.5, 4),
            trade(Direction::Short, 2.0, 6),
        ];
        let summaries = summarize_all(&trades);

        let long = &summaries[0];
        assert_eq!(long.direction, SummaryScope::Long);
        assert_eq!(long.total_trades, 2);
        assert_eq!(long.winning_trades, 1);
        assert_eq!(long.losing_trades, 1);
        assert!((long.win_rate - 50.0).abs() < 1e-9);
        assert!((long.total_pnl - 1.5).abs() < 1e-9);
        assert!((long.average_pnl - 0.75).abs() < 1e-9);
        assert!((long.max_profit - 3.0).abs() < 1e-9);
        assert!((long.max_loss + 1.5).abs() < 1e-9);
        assert!((long.avg_bars_held - 3.0).abs() < 1e-9);

        let short = &summaries[1];
        assert_eq!(short.total_trades, 1);
        assert!((short.win_rate - 100.0).abs() < 1e-9);

        let combined = &summaries[2];
        assert_eq!(combined.total_trades, 3);
        assert!((combined.total_pnl - 3.5).abs() < 1e-9);
        assert!((combined.win_rate - 200.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn breakeven_counts_as_a_loss() {
        let s = summarize(
            &[trade(Direction::Long, 0.0, 5), trade(Direction::Long, 1.0, 2)],
            SummaryScope::Combined,
        );
        assert_eq!(s.winning_trades, 1);
        assert_eq!(s.losing_trades, 1);
        assert_eq!(s.winning_trades + s.losing_trades, s.total_trades);
        assert!((s.win_rate - 50.0).abs() < 1e-9);
    }

    #[test]
    fn losses_only_keep_negative_max_profit() {
        let s = summarize(
            &[trade(Direction::Short, -2.0, 1), trade(Direction::Short, -1.0, 1)],
            SummaryScope::Short,
        );
        assert!((s.max_profit + 1.0).abs() < 1e-9);
        assert!((s.max_loss + 2.0).abs() < 1e-9);
    }
}
