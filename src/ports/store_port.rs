//! Snapshot store port: persisted outputs of analysis and backtest runs.

use chrono::{DateTime, Utc};

use crate::domain::backtest::BacktestRun;
use crate::domain::error::RankwatchError;
use crate::domain::metric::MetricSnapshot;
use crate::domain::opportunity::Opportunity;
use crate::domain::ranking::RankingSnapshot;
use crate::domain::timeframe::Timeframe;

pub trait SnapshotStore {
    fn save_metrics(&self, snapshots: &[MetricSnapshot]) -> Result<(), RankwatchError>;

    /// Latest metric snapshot per symbol for a timeframe.
    fn latest_metrics(
        &self,
        timeframe: Timeframe,
    ) -> Result<Vec<MetricSnapshot>, RankwatchError>;

    fn save_rankings(&self, snapshots: &[RankingSnapshot]) -> Result<(), RankwatchError>;

    /// Snapshots sharing the most recent timestamp for a timeframe, or an
    /// empty list when nothing has been ranked yet.
    fn latest_rankings(
        &self,
        timeframe: Timeframe,
    ) -> Result<Vec<RankingSnapshot>, RankwatchError>;

    /// Snapshots sharing the most recent timestamp strictly before `before`.
    fn rankings_before(
        &self,
        timeframe: Timeframe,
        before: DateTime<Utc>,
    ) -> Result<Vec<RankingSnapshot>, RankwatchError>;

    /// Re-saving an opportunity with the same symbol, timeframe, direction
    /// and detection time replaces the stored record.
    fn save_opportunities(&self, opportunities: &[Opportunity]) -> Result<(), RankwatchError>;

    /// Newest first, at most `limit` records.
    fn opportunity_history(
        &self,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Opportunity>, RankwatchError>;

    /// Write-once: saving an id that already exists fails.
    fn save_backtest(&self, run: &BacktestRun) -> Result<(), RankwatchError>;

    fn load_backtest(&self, backtest_id: &str) -> Result<BacktestRun, RankwatchError>;
}
