//! OHLCV bar representation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::error::RankwatchError;

/// One closed OHLCV observation for an instrument over a timeframe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// Prices finite and positive, high >= low, volume finite and non-negative.
    pub fn validate(&self, symbol: &str) -> Result<(), RankwatchError> {
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return Err(RankwatchError::InvalidBar {
                symbol: symbol.to_string(),
                reason: format!("non-positive or non-finite price at {}", self.open_time),
            });
        }
        if self.high < self.low {
            return Err(RankwatchError::InvalidBar {
                symbol: symbol.to_string(),
                reason: format!("high below low at {}", self.open_time),
            });
        }
        if !self.volume.is_finite() || self.volume < 0.0 {
            return Err(RankwatchError::InvalidBar {
                symbol: symbol.to_string(),
                reason: format!("invalid volume at {}", self.open_time),
            });
        }
        Ok(())
    }
}

/// Copy of the most recent `window` bars (or all of them when shorter).
pub fn tail_window(bars: &[Bar], window: usize) -> Vec<Bar> {
    let start = bars.len().saturating_sub(window);
    bars[start..].to_vec()
}
