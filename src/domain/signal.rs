//! Entry-signal sources for the backtest simulator.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::info;

use crate::domain::bar::Bar;
use crate::domain::error::RankwatchError;
use crate::domain::pipeline::{replay_history, AnalysisConfig};
use crate::domain::position::Direction;
use crate::domain::timeframe::Timeframe;

/// Decides, at the last bar of `history`, whether `symbol` should enter.
///
/// `history` ends at the signal bar, so a source never sees later bars.
pub trait SignalSource {
    fn entry_signal(&mut self, symbol: &str, history: &[Bar]) -> Option<Direction>;
}

impl<F> SignalSource for F
where
    F: FnMut(&str, &[Bar]) -> Option<Direction>,
{
    fn entry_signal(&mut self, symbol: &str, history: &[Bar]) -> Option<Direction> {
        self(symbol, history)
    }
}

/// Signals fixed in advance, keyed by symbol and signal bar open time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScheduledSignals {
    signals: BTreeMap<(String, DateTime<Utc>), Direction>,
}

impl ScheduledSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, symbol: &str, time: DateTime<Utc>, direction: Direction) {
        self.signals.insert((symbol.to_string(), time), direction);
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }
}

impl SignalSource for ScheduledSignals {
    fn entry_signal(&mut self, symbol: &str, history: &[Bar]) -> Option<Direction> {
        let last = history.last()?;
        self.signals
            .get(&(symbol.to_string(), last.open_time))
            .copied()
    }
}

/// Signals from the opportunity detector replayed over a history.
pub struct OpportunitySignals;

impl OpportunitySignals {
    /// Every opportunity reported at a replay step becomes a signal on that
    /// step's bar.
    pub fn from_history(
        histories: &BTreeMap<String, Vec<Bar>>,
        timeframe: Timeframe,
        config: &AnalysisConfig,
    ) -> Result<ScheduledSignals, RankwatchError> {
        let mut signals = ScheduledSignals::new();
        for run in replay_history(histories, timeframe, config)? {
            for opportunity in run.opportunities.iter() {
                signals.insert(&opportunity.symbol, run.timestamp, opportunity.direction);
            }
        }
        info!(timeframe = %timeframe, signals = signals.len(), "opportunity signals built");
        Ok(signals)
    }
}
