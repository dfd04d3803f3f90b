//! Bar source port.

use crate::domain::bar::Bar;
use crate::domain::error::RankwatchError;
use crate::domain::timeframe::Timeframe;

pub trait BarPort {
    /// Up to `limit` most recent closed bars, oldest first. A symbol the
    /// source does not know yields `RankwatchError::NoData`.
    fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Bar>, RankwatchError>;

    fn list_symbols(&self, timeframe: Timeframe) -> Result<Vec<String>, RankwatchError>;
}
