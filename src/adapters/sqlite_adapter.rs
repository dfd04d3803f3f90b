//! SQLite snapshot store and bar source.

use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;
use tracing::{debug, info};

use crate::domain::backtest::{BacktestParams, BacktestRun, DirectionFilter};
use crate::domain::bar::Bar;
use crate::domain::error::RankwatchError;
use crate::domain::metric::{MetricId, MetricSnapshot};
use crate::domain::opportunity::Opportunity;
use crate::domain::position::{Direction, ExitReason, Trade};
use crate::domain::ranking::RankingSnapshot;
use crate::domain::summary::summarize_all;
use crate::domain::timeframe::Timeframe;
use crate::ports::bar_port::BarPort;
use crate::ports::config_port::ConfigPort;
use crate::ports::store_port::SnapshotStore;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS bars (
    symbol TEXT NOT NULL,
    timeframe TEXT NOT NULL,
    open_time INTEGER NOT NULL,
    open REAL NOT NULL,
    high REAL NOT NULL,
    low REAL NOT NULL,
    close REAL NOT NULL,
    volume REAL NOT NULL,
    PRIMARY KEY (symbol, timeframe, open_time)
);
CREATE TABLE IF NOT EXISTS metric_snapshots (
    symbol TEXT NOT NULL,
    timeframe TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    price REAL,
    volume_metric REAL,
    momentum_metric REAL,
    price_metric REAL,
    total_pct_change REAL,
    zscore_metric REAL,
    in_uptrend INTEGER,
    PRIMARY KEY (symbol, timeframe, timestamp)
);
CREATE TABLE IF NOT EXISTS ranking_snapshots (
    symbol TEXT NOT NULL,
    timeframe TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    overall_rank INTEGER,
    composite_score REAL,
    PRIMARY KEY (symbol, timeframe, timestamp)
);
CREATE TABLE IF NOT EXISTS metric_ranks (
    symbol TEXT NOT NULL,
    timeframe TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    metric TEXT NOT NULL,
    rank INTEGER NOT NULL,
    PRIMARY KEY (symbol, timeframe, timestamp, metric)
);
CREATE TABLE IF NOT EXISTS opportunities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    timeframe TEXT NOT NULL,
    direction TEXT NOT NULL,
    strength REAL NOT NULL,
    supporting_metrics TEXT NOT NULL,
    detection_time TEXT NOT NULL,
    price REAL,
    overall_rank INTEGER,
    rank_change INTEGER,
    UNIQUE (symbol, timeframe, direction, detection_time)
);
CREATE TABLE IF NOT EXISTS backtests (
    id TEXT PRIMARY KEY,
    timeframe TEXT NOT NULL,
    take_profit_pct REAL NOT NULL,
    stop_loss_pct REAL NOT NULL,
    max_bars INTEGER NOT NULL,
    direction TEXT NOT NULL,
    max_missing_bars INTEGER NOT NULL,
    symbols TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS trades (
    backtest_id TEXT NOT NULL REFERENCES backtests(id),
    seq INTEGER NOT NULL,
    symbol TEXT NOT NULL,
    direction TEXT NOT NULL,
    entry_time TEXT NOT NULL,
    entry_price REAL NOT NULL,
    exit_time TEXT NOT NULL,
    exit_price REAL NOT NULL,
    exit_reason TEXT NOT NULL,
    pnl_pct REAL NOT NULL,
    bars_held INTEGER NOT NULL,
    PRIMARY KEY (backtest_id, seq)
);
CREATE INDEX IF NOT EXISTS idx_ranking_tf_ts ON ranking_snapshots(timeframe, timestamp);
CREATE INDEX IF NOT EXISTS idx_opportunities_tf ON opportunities(timeframe, detection_time);";

fn pool_err(e: r2d2::Error) -> RankwatchError {
    RankwatchError::Database {
        reason: e.to_string(),
    }
}

fn query_err(e: rusqlite::Error) -> RankwatchError {
    RankwatchError::DatabaseQuery {
        reason: e.to_string(),
    }
}

/// Fixed-width UTC text so timestamps order lexicographically.
fn ts_text(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn conversion_err(idx: usize, reason: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, reason.into())
}

fn parse_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|e: T::Err| conversion_err(idx, format!("'{}': {}", text, e)))
}

fn ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, format!("'{}': {}", text, e)))
}

fn join_list<T: Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn split_list<T>(text: &str) -> Result<Vec<T>, String>
where
    T: FromStr,
    T::Err: Display,
{
    text.split(',')
        .filter(|t| !t.is_empty())
        .map(|t| t.parse::<T>().map_err(|e| e.to_string()))
        .collect()
}

pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteStore {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, RankwatchError> {
        let db_path =
            config
                .get_non_empty("sqlite", "path")
                .ok_or_else(|| RankwatchError::ConfigMissing {
                    section: "sqlite".into(),
                    key: "path".into(),
                })?;

        let pool_size = config.get_int("sqlite", "pool_size", 4).max(1) as u32;

        let manager = SqliteConnectionManager::file(&db_path);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(pool_err)?;

        info!(path = %db_path, pool_size, "opened sqlite store");
        Ok(Self { pool })
    }

    pub fn in_memory() -> Result<Self, RankwatchError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(pool_err)?;

        Ok(Self { pool })
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, RankwatchError> {
        self.pool.get().map_err(pool_err)
    }

    pub fn initialize_schema(&self) -> Result<(), RankwatchError> {
        self.conn()?.execute_batch(SCHEMA).map_err(query_err)
    }

    pub fn insert_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        bars: &[Bar],
    ) -> Result<(), RankwatchError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;

        for bar in bars {
            tx.execute(
                "INSERT OR REPLACE INTO bars
                 (symbol, timeframe, open_time, open, high, low, close, volume)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    symbol,
                    timeframe.as_str(),
                    bar.open_time.timestamp_millis(),
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume
                ],
            )
            .map_err(query_err)?;
        }

        tx.commit().map_err(query_err)
    }

    fn load_ranks(
        &self,
        timeframe: Timeframe,
        timestamp: &str,
    ) -> Result<BTreeMap<String, BTreeMap<MetricId, u32>>, RankwatchError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT symbol, metric, rank FROM metric_ranks
                 WHERE timeframe = ?1 AND timestamp = ?2",
            )
            .map_err(query_err)?;
        let rows = stmt
            .query_map(params![timeframe.as_str(), timestamp], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    parse_col::<MetricId>(row, 1)?,
                    row.get::<_, u32>(2)?,
                ))
            })
            .map_err(query_err)?;

        let mut ranks: BTreeMap<String, BTreeMap<MetricId, u32>> = BTreeMap::new();
        for row in rows {
            let (symbol, metric, rank) = row.map_err(query_err)?;
            ranks.entry(symbol).or_default().insert(metric, rank);
        }
        Ok(ranks)
    }

    fn rankings_at(
        &self,
        timeframe: Timeframe,
        timestamp: &str,
    ) -> Result<Vec<RankingSnapshot>, RankwatchError> {
        let mut ranks = self.load_ranks(timeframe, timestamp)?;

        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT symbol, timestamp, overall_rank, composite_score FROM ranking_snapshots
                 WHERE timeframe = ?1 AND timestamp = ?2
                 ORDER BY overall_rank IS NULL, overall_rank, symbol",
            )
            .map_err(query_err)?;
        let rows = stmt
            .query_map(params![timeframe.as_str(), timestamp], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    ts_col(row, 1)?,
                    row.get::<_, Option<u32>>(2)?,
                    row.get::<_, Option<f64>>(3)?,
                ))
            })
            .map_err(query_err)?;

        let mut snapshots = Vec::new();
        for row in rows {
            let (symbol, timestamp, overall_rank, composite_score) = row.map_err(query_err)?;
            snapshots.push(RankingSnapshot {
                ranks: ranks.remove(&symbol).unwrap_or_default(),
                symbol,
                timeframe,
                timestamp,
                overall_rank,
                composite_score,
            });
        }
        Ok(snapshots)
    }
}

impl BarPort for SqliteStore {
    fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Bar>, RankwatchError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT open_time, open, high, low, close, volume FROM bars
                 WHERE symbol = ?1 AND timeframe = ?2
                 ORDER BY open_time DESC LIMIT ?3",
            )
            .map_err(query_err)?;

        let rows = stmt
            .query_map(params![symbol, timeframe.as_str(), limit as i64], |row| {
                let millis: i64 = row.get(0)?;
                let open_time = DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(|| {
                    rusqlite::Error::IntegralValueOutOfRange(0, millis)
                })?;
                Ok(Bar {
                    open_time,
                    open: row.get(1)?,
                    high: row.get(2)?,
                    low: row.get(3)?,
                    close: row.get(4)?,
                    volume: row.get(5)?,
                })
            })
            .map_err(query_err)?;

        let mut bars = Vec::new();
        for row in rows {
            bars.push(row.map_err(query_err)?);
        }
        if bars.is_empty() {
            return Err(RankwatchError::NoData {
                symbol: symbol.to_string(),
                timeframe,
            });
        }
        bars.reverse();
        Ok(bars)
    }

    fn list_symbols(&self, timeframe: Timeframe) -> Result<Vec<String>, RankwatchError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT DISTINCT symbol FROM bars WHERE timeframe = ?1 ORDER BY symbol")
            .map_err(query_err)?;
        let rows = stmt
            .query_map(params![timeframe.as_str()], |row| row.get(0))
            .map_err(query_err)?;

        let mut symbols = Vec::new();
        for row in rows {
            symbols.push(row.map_err(query_err)?);
        }
        Ok(symbols)
    }
}

impl SnapshotStore for SqliteStore {
    fn save_metrics(&self, snapshots: &[MetricSnapshot]) -> Result<(), RankwatchError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;
        for s in snapshots {
            tx.execute(
                "INSERT OR REPLACE INTO metric_snapshots
                 (symbol, timeframe, timestamp, price, volume_metric, momentum_metric,
                  price_metric, total_pct_change, zscore_metric, in_uptrend)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    s.symbol,
                    s.timeframe.as_str(),
                    ts_text(s.timestamp),
                    s.price,
                    s.volume_metric,
                    s.momentum_metric,
                    s.price_metric,
                    s.total_pct_change,
                    s.zscore_metric,
                    s.in_uptrend
                ],
            )
            .map_err(query_err)?;
        }
        tx.commit().map_err(query_err)?;
        debug!(count = snapshots.len(), "saved metric snapshots");
        Ok(())
    }

    fn latest_metrics(
        &self,
        timeframe: Timeframe,
    ) -> Result<Vec<MetricSnapshot>, RankwatchError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT m.symbol, m.timestamp, m.price, m.volume_metric, m.momentum_metric,
                        m.price_metric, m.total_pct_change, m.zscore_metric, m.in_uptrend
                 FROM metric_snapshots m
                 WHERE m.timeframe = ?1 AND m.timestamp = (
                     SELECT MAX(timestamp) FROM metric_snapshots
                     WHERE timeframe = ?1 AND symbol = m.symbol)
                 ORDER BY m.symbol",
            )
            .map_err(query_err)?;
        let rows = stmt
            .query_map(params![timeframe.as_str()], |row| {
                Ok(MetricSnapshot {
                    symbol: row.get(0)?,
                    timeframe,
                    timestamp: ts_col(row, 1)?,
                    price: row.get(2)?,
                    volume_metric: row.get(3)?,
                    momentum_metric: row.get(4)?,
                    price_metric: row.get(5)?,
                    total_pct_change: row.get(6)?,
                    zscore_metric: row.get(7)?,
                    in_uptrend: row.get(8)?,
                })
            })
            .map_err(query_err)?;

        let mut snapshots = Vec::new();
        for row in rows {
            snapshots.push(row.map_err(query_err)?);
        }
        Ok(snapshots)
    }

    fn save_rankings(&self, snapshots: &[RankingSnapshot]) -> Result<(), RankwatchError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;
        for s in snapshots {
            let ts = ts_text(s.timestamp);
            tx.execute(
                "INSERT OR REPLACE INTO ranking_snapshots
                 (symbol, timeframe, timestamp, overall_rank, composite_score)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    s.symbol,
                    s.timeframe.as_str(),
                    ts,
                    s.overall_rank,
                    s.composite_score
                ],
            )
            .map_err(query_err)?;
            for (metric, rank) in &s.ranks {
                tx.execute(
                    "INSERT OR REPLACE INTO metric_ranks
                     (symbol, timeframe, timestamp, metric, rank)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![s.symbol, s.timeframe.as_str(), ts, metric.as_str(), rank],
                )
                .map_err(query_err)?;
            }
        }
        tx.commit().map_err(query_err)?;
        debug!(count = snapshots.len(), "saved ranking snapshots");
        Ok(())
    }

    fn latest_rankings(
        &self,
        timeframe: Timeframe,
    ) -> Result<Vec<RankingSnapshot>, RankwatchError> {
        let latest: Option<String> = self
            .conn()?
            .query_row(
                "SELECT MAX(timestamp) FROM ranking_snapshots WHERE timeframe = ?1",
                params![timeframe.as_str()],
                |row| row.get(0),
            )
            .map_err(query_err)?;
        match latest {
            Some(latest) => self.rankings_at(timeframe, &latest),
            None => Ok(Vec::new()),
        }
    }

    fn rankings_before(
        &self,
        timeframe: Timeframe,
        before: DateTime<Utc>,
    ) -> Result<Vec<RankingSnapshot>, RankwatchError> {
        let prior: Option<String> = self
            .conn()?
            .query_row(
                "SELECT MAX(timestamp) FROM ranking_snapshots
                 WHERE timeframe = ?1 AND timestamp < ?2",
                params![timeframe.as_str(), ts_text(before)],
                |row| row.get(0),
            )
            .map_err(query_err)?;
        match prior {
            Some(prior) => self.rankings_at(timeframe, &prior),
            None => Ok(Vec::new()),
        }
    }

    fn save_opportunities(&self, opportunities: &[Opportunity]) -> Result<(), RankwatchError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;
        for o in opportunities {
            tx.execute(
                "INSERT OR REPLACE INTO opportunities
                 (symbol, timeframe, direction, strength, supporting_metrics, detection_time,
                  price, overall_rank, rank_change)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    o.symbol,
                    o.timeframe.as_str(),
                    o.direction.as_str(),
                    o.strength,
                    join_list(&o.supporting_metrics),
                    ts_text(o.detection_time),
                    o.price,
                    o.overall_rank,
                    o.rank_change
                ],
            )
            .map_err(query_err)?;
        }
        tx.commit().map_err(query_err)?;
        debug!(count = opportunities.len(), "saved opportunities");
        Ok(())
    }

    fn opportunity_history(
        &self,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Opportunity>, RankwatchError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT symbol, direction, strength, supporting_metrics, detection_time,
                        price, overall_rank, rank_change
                 FROM opportunities WHERE timeframe = ?1
                 ORDER BY detection_time DESC, id ASC LIMIT ?2",
            )
            .map_err(query_err)?;
        let rows = stmt
            .query_map(params![timeframe.as_str(), limit as i64], |row| {
                let supporting: String = row.get(3)?;
                Ok(Opportunity {
                    symbol: row.get(0)?,
                    timeframe,
                    direction: parse_col::<Direction>(row, 1)?,
                    strength: row.get(2)?,
                    supporting_metrics: split_list(&supporting)
                        .map_err(|e| conversion_err(3, e))?,
                    detection_time: ts_col(row, 4)?,
                    price: row.get(5)?,
                    overall_rank: row.get(6)?,
                    rank_change: row.get(7)?,
                })
            })
            .map_err(query_err)?;

        let mut opportunities = Vec::new();
        for row in rows {
            opportunities.push(row.map_err(query_err)?);
        }
        Ok(opportunities)
    }

    fn save_backtest(&self, run: &BacktestRun) -> Result<(), RankwatchError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;

        let exists: Option<String> = tx
            .query_row(
                "SELECT id FROM backtests WHERE id = ?1",
                params![run.id],
                |row| row.get(0),
            )
            .optional()
            .map_err(query_err)?;
        if exists.is_some() {
            return Err(RankwatchError::DatabaseQuery {
                reason: format!("backtest {} already stored", run.id),
            });
        }

        tx.execute(
            "INSERT INTO backtests
             (id, timeframe, take_profit_pct, stop_loss_pct, max_bars, direction,
              max_missing_bars, symbols, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                run.id,
                run.timeframe.as_str(),
                run.params.take_profit_pct,
                run.params.stop_loss_pct,
                run.params.max_bars,
                run.params.direction.to_string(),
                run.params.max_missing_bars,
                run.symbols.join(","),
                ts_text(run.created_at)
            ],
        )
        .map_err(query_err)?;

        for (seq, t) in run.trades.iter().enumerate() {
            tx.execute(
                "INSERT INTO trades
                 (backtest_id, seq, symbol, direction, entry_time, entry_price, exit_time,
                  exit_price, exit_reason, pnl_pct, bars_held)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    run.id,
                    seq as i64,
                    t.symbol,
                    t.direction.as_str(),
                    ts_text(t.entry_time),
                    t.entry_price,
                    ts_text(t.exit_time),
                    t.exit_price,
                    t.exit_reason.as_str(),
                    t.pnl_pct,
                    t.bars_held as i64
                ],
            )
            .map_err(query_err)?;
        }

        tx.commit().map_err(query_err)?;
        info!(backtest_id = %run.id, trades = run.trades.len(), "saved backtest");
        Ok(())
    }

    fn load_backtest(&self, backtest_id: &str) -> Result<BacktestRun, RankwatchError> {
        let conn = self.conn()?;
        let header = conn
            .query_row(
                "SELECT timeframe, take_profit_pct, stop_loss_pct, max_bars, direction,
                        max_missing_bars, symbols, created_at
                 FROM backtests WHERE id = ?1",
                params![backtest_id],
                |row| {
                    let symbols: String = row.get(6)?;
                    Ok((
                        parse_col::<Timeframe>(row, 0)?,
                        BacktestParams {
                            take_profit_pct: row.get(1)?,
                            stop_loss_pct: row.get(2)?,
                            max_bars: row.get(3)?,
                            direction: parse_col::<DirectionFilter>(row, 4)?,
                            max_missing_bars: row.get(5)?,
                        },
                        split_list::<String>(&symbols).map_err(|e| conversion_err(6, e))?,
                        ts_col(row, 7)?,
                    ))
                },
            )
            .optional()
            .map_err(query_err)?;
        let Some((timeframe, params, symbols, created_at)) = header else {
            return Err(RankwatchError::UnknownBacktest {
                backtest_id: backtest_id.to_string(),
            });
        };

        let mut stmt = conn
            .prepare(
                "SELECT symbol, direction, entry_time, entry_price, exit_time, exit_price,
                        exit_reason, pnl_pct, bars_held
                 FROM trades WHERE backtest_id = ?1 ORDER BY seq",
            )
            .map_err(query_err)?;
        let rows = stmt
            .query_map(params![backtest_id], |row| {
                Ok(Trade {
                    symbol: row.get(0)?,
                    direction: parse_col::<Direction>(row, 1)?,
                    entry_time: ts_col(row, 2)?,
                    entry_price: row.get(3)?,
                    exit_time: ts_col(row, 4)?,
                    exit_price: row.get(5)?,
                    exit_reason: parse_col::<ExitReason>(row, 6)?,
                    pnl_pct: row.get(7)?,
                    bars_held: row.get::<_, i64>(8)? as usize,
                })
            })
            .map_err(query_err)?;

        let mut trades = Vec::new();
        for row in rows {
            trades.push(row.map_err(query_err)?);
        }
        let summaries = summarize_all(&trades);

        Ok(BacktestRun {
            id: backtest_id.to_string(),
            timeframe,
            params,
            symbols,
            created_at,
            trades,
            summaries,
        })
    }
}
