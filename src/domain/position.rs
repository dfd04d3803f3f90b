//! Simulated positions and closed trades.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "long" => Ok(Direction::Long),
            "short" => Ok(Direction::Short),
            other => Err(format!("unknown direction '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    MaxBars,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::TakeProfit => "take_profit",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::MaxBars => "max_bars",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExitReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "take_profit" => Ok(ExitReason::TakeProfit),
            "stop_loss" => Ok(ExitReason::StopLoss),
            "max_bars" => Ok(ExitReason::MaxBars),
            other => Err(format!("unknown exit reason '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenPosition {
    pub symbol: String,
    pub direction: Direction,
    pub entry_index: usize,
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
}

impl OpenPosition {
    /// Opens at `entry_price` with thresholds placed `take_profit_pct` and
    /// `stop_loss_pct` away in the direction's favour and against it.
    pub fn open(
        symbol: &str,
        direction: Direction,
        entry_index: usize,
        entry_time: DateTime<Utc>,
        entry_price: f64,
        take_profit_pct: f64,
        stop_loss_pct: f64,
    ) -> Self {
        let (take_profit, stop_loss) = match direction {
            Direction::Long => (
                entry_price * (1.0 + take_profit_pct / 100.0),
                entry_price * (1.0 - stop_loss_pct / 100.0),
            ),
            Direction::Short => (
                entry_price * (1.0 - take_profit_pct / 100.0),
                entry_price * (1.0 + stop_loss_pct / 100.0),
            ),
        };
        OpenPosition {
            symbol: symbol.to_string(),
            direction,
            entry_index,
            entry_time,
            entry_price,
            stop_loss,
            take_profit,
        }
    }

    pub fn is_long(&self) -> bool {
        self.direction == Direction::Long
    }

    /// Stop hit somewhere in a bar spanning `[low, high]`.
    pub fn should_stop_loss(&self, low: f64, high: f64) -> bool {
        if self.is_long() {
            low <= self.stop_loss
        } else {
            high >= self.stop_loss
        }
    }

    /// Target hit somewhere in a bar spanning `[low, high]`.
    pub fn should_take_profit(&self, low: f64, high: f64) -> bool {
        if self.is_long() {
            high >= self.take_profit
        } else {
            low <= self.take_profit
        }
    }

    pub fn pnl_pct(&self, exit_price: f64) -> f64 {
        let raw = (exit_price - self.entry_price) / self.entry_price * 100.0;
        match self.direction {
            Direction::Long => raw,
            Direction::Short => -raw,
        }
    }

    pub fn close(
        self,
        exit_time: DateTime<Utc>,
        exit_price: f64,
        exit_reason: ExitReason,
        bars_held: usize,
    ) -> Trade {
        let pnl_pct = self.pnl_pct(exit_price);
        Trade {
            symbol: self.symbol,
            direction: self.direction,
            entry_time: self.entry_time,
            entry_price: self.entry_price,
            exit_time,
            exit_price,
            exit_reason,
            pnl_pct,
            bars_held,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: String,
    pub direction: Direction,
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_time: DateTime<Utc>,
    pub exit_price: f64,
    pub exit_reason: ExitReason,
    pub pnl_pct: f64,
    pub bars_held: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap()
    }

    fn sample_long_position() -> OpenPosition {
        OpenPosition::open("BTCUSDT", Direction::Long, 3, t0(), 100.0, 10.0, 5.0)
    }

    fn sample_short_position() -> OpenPosition {
        OpenPosition::open("ETHUSDT", Direction::Short, 3, t0(), 100.0, 10.0, 5.0)
    }

    #[test]
    fn long_thresholds() {
        let pos = sample_long_position();
        assert!((pos.take_profit - 110.0).abs() < 1e-9);
        assert!((pos.stop_loss - 95.0).abs() < 1e-9);
    }

    #[test]
    fn short_thresholds_mirror() {
        let pos = sample_short_position();
        assert!((pos.take_profit - 90.0).abs() < 1e-9);
        assert!((pos.stop_loss - 105.0).abs() < 1e-9);
    }

    #[test]
    fn stop_loss_long_triggered() {
        let pos = sample_long_position();
        assert!(pos.should_stop_loss(94.0, 101.0));
        assert!(pos.should_stop_loss(95.0, 101.0));
        assert!(!pos.should_stop_loss(96.0, 101.0));
    }

    #[test]
    fn stop_loss_short_triggered() {
        let pos = sample_short_position();
        assert!(pos.should_stop_loss(99.0, 106.0));
        assert!(pos.should_stop_loss(99.0, 105.0));
        assert!(!pos.should_stop_loss(99.0, 104.0));
    }

    #[test]
    fn take_profit_long_triggered() {
        let pos = sample_long_position();
        assert!(pos.should_take_profit(99.0, 111.0));
        assert!(pos.should_take_profit(99.0, 110.0));
        assert!(!pos.should_take_profit(99.0, 109.0));
    }

    #[test]
    fn take_profit_short_triggered() {
        let pos = sample_short_position();
        assert!(pos.should_take_profit(89.0, 101.0));
        assert!(pos.should_take_profit(90.0, 101.0));
        assert!(!pos.should_take_profit(91.0, 101.0));
    }

    #[test]
    fn pnl_sign_inverted_for_short() {
        assert!((sample_long_position().pnl_pct(110.0) - 10.0).abs() < 1e-9);
        assert!((sample_short_position().pnl_pct(90.0) - 10.0).abs() < 1e-9);
        assert!((sample_short_position().pnl_pct(105.0) + 5.0).abs() < 1e-9);
    }

    #[test]
    fn close_builds_trade() {
        let exit = t0() + chrono::Duration::hours(4);
        let trade = sample_long_position().close(exit, 95.0, ExitReason::StopLoss, 4);
        assert_eq!(trade.symbol, "BTCUSDT");
        assert_eq!(trade.exit_reason, ExitReason::StopLoss);
        assert!((trade.pnl_pct + 5.0).abs() < 1e-9);
        assert_eq!(trade.bars_held, 4);
        assert!(trade.entry_time < trade.exit_time);
    }

    #[test]
    fn direction_parses() {
        assert_eq!("LONG".parse::<Direction>().unwrap(), Direction::Long);
        assert!("sideways".parse::<Direction>().is_err());
        assert_eq!(ExitReason::MaxBars.to_string(), "max_bars");
    }
}
