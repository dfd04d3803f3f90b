//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;

use crate::adapters::csv_adapter::{write_trades, CsvBarAdapter};
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::backtest::{
    simulate, BacktestParams, BacktestRequest, BacktestRun, CancellationToken, DirectionFilter,
};
use crate::domain::bar::{tail_window, Bar};
use crate::domain::config_validation::{validate_analysis_config, validate_backtest_config};
use crate::domain::error::RankwatchError;
use crate::domain::metric::{parse_metric_list, MetricConfig, MetricId};
use crate::domain::opportunity::{OpportunityConfig, OpportunityHistory};
use crate::domain::pipeline::{run_analysis, AnalysisConfig, AnalysisRun};
use crate::domain::position::Direction;
use crate::domain::ranking::{RankColumn, RankingConfig};
use crate::domain::signal::OpportunitySignals;
use crate::domain::slot_machine::{SlotAlgorithm, SlotMachineConfig};
use crate::domain::timeframe::Timeframe;
use crate::domain::universe::{load_bars, resolve_symbols, SkippedSymbol};
use crate::ports::bar_port::BarPort;
use crate::ports::config_port::ConfigPort;
use crate::ports::store_port::SnapshotStore;

#[derive(Parser, Debug)]
#[command(name = "rankwatch", about = "Cross-sectional market ranking and opportunity backtester")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Rank the universe and report opportunities and slot machine matches
    Analyze {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        timeframe: Option<String>,
        /// Slot machine algorithm (consistent or momentum)
        #[arg(long)]
        algorithm: Option<String>,
        /// Number of slot machine matches to print
        #[arg(long)]
        top: Option<usize>,
    },
    /// Backtest opportunity signals over stored history
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        /// Comma-separated symbol list
        #[arg(long)]
        symbols: Option<String>,
        #[arg(long)]
        timeframe: Option<String>,
        #[arg(long)]
        take_profit: Option<f64>,
        #[arg(long)]
        stop_loss: Option<f64>,
        #[arg(long)]
        max_bars: Option<i64>,
        /// long, short or both
        #[arg(long)]
        direction: Option<String>,
        #[arg(long)]
        id: Option<String>,
        /// Write the trade ledger to this CSV file
        #[arg(long)]
        trades_out: Option<PathBuf>,
    },
    /// Print a stored backtest summary
    ShowBacktest {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        id: String,
    },
    /// Print stored opportunity history, newest first
    History {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        timeframe: Option<String>,
        /// Records kept per direction (defaults to [opportunity] history_cap)
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Validate a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    let result = match cli.command {
        Command::Analyze {
            config,
            timeframe,
            algorithm,
            top,
        } => load_config(&config).and_then(|mut adapter| {
            apply_overrides(
                &mut adapter,
                &[
                    ("data", "timeframe", timeframe),
                    ("slot_machine", "algorithm", algorithm),
                    ("slot_machine", "top_n", top.map(|n| n.to_string())),
                ],
            );
            run_analyze(&adapter)
        }),
        Command::Backtest {
            config,
            symbols,
            timeframe,
            take_profit,
            stop_loss,
            max_bars,
            direction,
            id,
            trades_out,
        } => load_config(&config).and_then(|mut adapter| {
            apply_overrides(
                &mut adapter,
                &[
                    ("data", "symbols", symbols),
                    ("data", "timeframe", timeframe),
                    ("backtest", "take_profit", take_profit.map(|v| v.to_string())),
                    ("backtest", "stop_loss", stop_loss.map(|v| v.to_string())),
                    ("backtest", "max_bars", max_bars.map(|v| v.to_string())),
                    ("backtest", "direction", direction),
                ],
            );
            run_backtest(&adapter, id, trades_out.as_ref())
        }),
        Command::ShowBacktest { config, id } => {
            load_config(&config).and_then(|adapter| run_show_backtest(&adapter, &id))
        }
        Command::History {
            config,
            timeframe,
            limit,
        } => load_config(&config).and_then(|mut adapter| {
            apply_overrides(
                &mut adapter,
                &[
                    ("data", "timeframe", timeframe),
                    ("opportunity", "history_cap", limit.map(|n| n.to_string())),
                ],
            );
            run_history(&adapter)
        }),
        Command::Validate { config } => {
            load_config(&config).and_then(|adapter| run_validate(&adapter))
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(&e)
        }
    }
}

pub fn load_config(path: &PathBuf) -> Result<FileConfigAdapter, RankwatchError> {
    eprintln!("Loading config from {}", path.display());
    FileConfigAdapter::from_file(path)
}

/// Command-line flags win over the file.
fn apply_overrides(adapter: &mut FileConfigAdapter, overrides: &[(&str, &str, Option<String>)]) {
    for (section, key, value) in overrides {
        if let Some(value) = value {
            adapter.set(section, key, value);
        }
    }
}

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> RankwatchError {
    RankwatchError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

pub fn timeframe_from(config: &dyn ConfigPort) -> Result<Timeframe, RankwatchError> {
    match config.get_non_empty("data", "timeframe") {
        Some(tf) => tf
            .parse::<Timeframe>()
            .map_err(|e| invalid("data", "timeframe", e.to_string())),
        None => Ok(Timeframe::H1),
    }
}

fn metric_list(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: &[MetricId],
) -> Result<Vec<MetricId>, RankwatchError> {
    match config.get_non_empty(section, key) {
        Some(list) => parse_metric_list(&list).map_err(|e| invalid(section, key, e)),
        None => Ok(default.to_vec()),
    }
}

fn weights(config: &dyn ConfigPort, section: &str, prefix: &str) -> BTreeMap<MetricId, f64> {
    MetricId::ALL
        .iter()
        .map(|m| (*m, config.get_double(section, &format!("{}{}", prefix, m), 1.0)))
        .collect()
}

fn positive(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: i64,
) -> Result<i64, RankwatchError> {
    let value = config.get_int(section, key, default);
    if value < 1 {
        return Err(invalid(section, key, format!("{} must be positive", key)));
    }
    Ok(value)
}

pub fn build_analysis_config(config: &dyn ConfigPort) -> Result<AnalysisConfig, RankwatchError> {
    let metrics = MetricConfig {
        window: positive(config, "metrics", "window", 20)? as usize,
        momentum_period: positive(config, "metrics", "momentum_period", 14)? as usize,
        price_period: positive(config, "metrics", "price_period", 5)? as usize,
    };

    let ranking = RankingConfig {
        metrics: metric_list(config, "ranking", "metrics", &MetricId::ALL)?,
        weights: weights(config, "ranking", "weight_"),
    };

    let opportunity = OpportunityConfig {
        top_percentile: config.get_double("opportunity", "top_percentile", 20.0),
        signal_metrics: metric_list(
            config,
            "opportunity",
            "signal_metrics",
            &[MetricId::Momentum, MetricId::Price],
        )?,
        strength_weights: weights(config, "opportunity", "strength_weight_"),
        current_cap: positive(config, "opportunity", "current_cap", 5)? as usize,
        history_cap: positive(config, "opportunity", "history_cap", 15)? as usize,
    };

    let defaults = SlotMachineConfig::default();
    let algorithm = match config.get_non_empty("slot_machine", "algorithm") {
        Some(name) => name
            .parse::<SlotAlgorithm>()
            .map_err(|e| invalid("slot_machine", "algorithm", e))?,
        None => defaults.algorithm,
    };
    let slot_machine = SlotMachineConfig {
        algorithm,
        top_k: positive(config, "slot_machine", "top_k", defaults.top_k as i64)? as u32,
        match_threshold: positive(
            config,
            "slot_machine",
            "match_threshold",
            defaults.match_threshold as i64,
        )? as usize,
        max_rows: positive(config, "slot_machine", "max_rows", defaults.max_rows as i64)? as usize,
        top_n: positive(config, "slot_machine", "top_n", defaults.top_n as i64)? as usize,
        exact_slots: config.get_bool("slot_machine", "exact_slots", defaults.exact_slots),
        min_overall_improvement: positive(
            config,
            "slot_machine",
            "min_overall_improvement",
            defaults.min_overall_improvement,
        )?,
        min_metric_improvement: positive(
            config,
            "slot_machine",
            "min_metric_improvement",
            defaults.min_metric_improvement,
        )?,
        max_overall_rank: positive(
            config,
            "slot_machine",
            "max_overall_rank",
            defaults.max_overall_rank as i64,
        )? as u32,
    };

    Ok(AnalysisConfig {
        metrics,
        ranking,
        opportunity,
        slot_machine,
    })
}

pub fn build_backtest_params(config: &dyn ConfigPort) -> Result<BacktestParams, RankwatchError> {
    let defaults = BacktestParams::default();
    let direction = match config.get_non_empty("backtest", "direction") {
        Some(name) => name
            .parse::<DirectionFilter>()
            .map_err(|e| invalid("backtest", "direction", e))?,
        None => defaults.direction,
    };
    let max_missing_bars = config.get_int(
        "backtest",
        "max_missing_bars",
        defaults.max_missing_bars as i64,
    );
    let params = BacktestParams {
        take_profit_pct: config.get_double("backtest", "take_profit", defaults.take_profit_pct),
        stop_loss_pct: config.get_double("backtest", "stop_loss", defaults.stop_loss_pct),
        max_bars: config.get_int("backtest", "max_bars", defaults.max_bars),
        direction,
        max_missing_bars: u32::try_from(max_missing_bars)
            .map_err(|_| invalid("backtest", "max_missing_bars", "must be non-negative"))?,
    };
    params.validate()?;
    Ok(params)
}

/// CSV directory from `[data] path`, else the SQLite store when configured.
fn open_bar_source(config: &dyn ConfigPort) -> Result<Box<dyn BarPort>, RankwatchError> {
    if let Some(path) = config.get_non_empty("data", "path") {
        return Ok(Box::new(CsvBarAdapter::new(PathBuf::from(path))));
    }

    #[cfg(feature = "sqlite")]
    if config.get_non_empty("sqlite", "path").is_some() {
        let store = crate::adapters::sqlite_adapter::SqliteStore::from_config(config)?;
        store.initialize_schema()?;
        return Ok(Box::new(store));
    }

    Err(RankwatchError::ConfigMissing {
        section: "data".into(),
        key: "path".into(),
    })
}

/// The snapshot store, or `None` when `[sqlite] path` is not set.
fn open_store(config: &dyn ConfigPort) -> Result<Option<Box<dyn SnapshotStore>>, RankwatchError> {
    if config.get_non_empty("sqlite", "path").is_none() {
        return Ok(None);
    }

    #[cfg(feature = "sqlite")]
    {
        let store = crate::adapters::sqlite_adapter::SqliteStore::from_config(config)?;
        store.initialize_schema()?;
        Ok(Some(Box::new(store)))
    }

    #[cfg(not(feature = "sqlite"))]
    {
        eprintln!("warning: sqlite feature is disabled; results will not be persisted");
        Ok(None)
    }
}

fn history_limit(config: &dyn ConfigPort) -> Result<usize, RankwatchError> {
    Ok(positive(config, "data", "history_limit", 1000)? as usize)
}

fn report_skipped(skipped: &[SkippedSymbol]) {
    for s in skipped {
        eprintln!("  skipped {}: {}", s.symbol, s.reason);
    }
}

fn run_analyze(config: &dyn ConfigPort) -> Result<(), RankwatchError> {
    validate_analysis_config(config)?;
    let analysis = build_analysis_config(config)?;
    let timeframe = timeframe_from(config)?;

    let bar_source = open_bar_source(config)?;
    let symbols = resolve_symbols(
        bar_source.as_ref(),
        config.get_non_empty("data", "symbols").as_deref(),
        timeframe,
    )?;
    eprintln!("Analyzing {} symbols on {}", symbols.len(), timeframe);
    let loaded = load_bars(bar_source.as_ref(), &symbols, timeframe, history_limit(config)?)?;
    report_skipped(&loaded.skipped);

    let timestamp = loaded
        .bars
        .values()
        .filter_map(|bars| bars.last().map(|b| b.open_time))
        .max()
        .ok_or(RankwatchError::EmptyUniverse { timeframe })?;
    let windows: BTreeMap<String, Vec<Bar>> = loaded
        .bars
        .iter()
        .map(|(symbol, bars)| (symbol.clone(), tail_window(bars, analysis.metrics.window)))
        .collect();

    let store = open_store(config)?;
    let prior = match &store {
        Some(store) => store.rankings_before(timeframe, timestamp)?,
        None => Vec::new(),
    };
    let prior = (!prior.is_empty()).then_some(prior.as_slice());

    let run = run_analysis(&windows, timeframe, timestamp, prior, &analysis)?;
    print_analysis(&run, &analysis);

    if let Some(store) = &store {
        let metrics: Vec<_> = run.metrics.values().cloned().collect();
        store.save_metrics(&metrics)?;
        store.save_rankings(&run.ranking.snapshots)?;
        let opportunities: Vec<_> = run.opportunities.iter().cloned().collect();
        store.save_opportunities(&opportunities)?;
        eprintln!("Snapshots saved for {} at {}", timeframe, timestamp);
    }
    Ok(())
}

fn fmt_opt<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

fn fmt_delta(delta: Option<i64>) -> String {
    match delta {
        Some(d) if d > 0 => format!("+{}", d),
        Some(d) => d.to_string(),
        None => "-".to_string(),
    }
}

fn print_analysis(run: &AnalysisRun, config: &AnalysisConfig) {
    println!("=== Rankings ({} @ {}) ===", run.timeframe, run.timestamp);
    let header: Vec<String> = config.ranking.metrics.iter().map(|m| m.to_string()).collect();
    println!("{:<12} {:>8} {:>7}  {}", "symbol", "overall", "change", header.join("  "));
    for snapshot in &run.ranking.snapshots {
        let ranks: Vec<String> = config
            .ranking
            .metrics
            .iter()
            .map(|m| {
                let rank = fmt_opt(snapshot.ranks.get(m));
                format!("{:>width$}", rank, width = m.as_str().len())
            })
            .collect();
        println!(
            "{:<12} {:>8} {:>7}  {}",
            snapshot.symbol,
            fmt_opt(snapshot.overall_rank),
            fmt_delta(run.ranking.changes.delta(&snapshot.symbol, RankColumn::Overall)),
            ranks.join("  ")
        );
    }

    println!();
    println!("=== Opportunities ===");
    if run.opportunities.is_empty() {
        println!("none");
    }
    for opportunity in run.opportunities.iter() {
        let supporting: Vec<&str> = opportunity
            .supporting_metrics
            .iter()
            .map(|m| m.as_str())
            .collect();
        println!(
            "{:<5} {:<12} strength {:>6.2}  price {}  overall {}  [{}]",
            opportunity.direction,
            opportunity.symbol,
            opportunity.strength,
            fmt_opt(opportunity.price),
            fmt_opt(opportunity.overall_rank),
            supporting.join(",")
        );
    }

    println!();
    println!("=== Slot machine ({}) ===", run.slot_machine.algorithm);
    let top = run.slot_machine.top(config.slot_machine.top_n);
    if top.is_empty() {
        println!("no matches");
    }
    for m in top {
        let columns: Vec<&str> = m.matched_columns.iter().map(|c| c.as_str()).collect();
        println!(
            "{:<12} slot {:>3}  matches {}  {:?}  [{}]{}",
            m.symbol,
            m.slot_position,
            m.match_count,
            m.tier,
            columns.join(","),
            m.overall_improvement
                .map(|i| format!("  overall +{}", i))
                .unwrap_or_default()
        );
    }
}

fn run_backtest(
    config: &dyn ConfigPort,
    id: Option<String>,
    trades_out: Option<&PathBuf>,
) -> Result<(), RankwatchError> {
    validate_backtest_config(config)?;
    let analysis = build_analysis_config(config)?;
    let params = build_backtest_params(config)?;
    let timeframe = timeframe_from(config)?;

    let bar_source = open_bar_source(config)?;
    let symbols = resolve_symbols(
        bar_source.as_ref(),
        config.get_non_empty("data", "symbols").as_deref(),
        timeframe,
    )?;
    let loaded = load_bars(bar_source.as_ref(), &symbols, timeframe, history_limit(config)?)?;

    eprintln!(
        "Running backtest: {} symbols on {}, tp {}% sl {}% max {} bars, {}",
        loaded.bars.len(),
        timeframe,
        params.take_profit_pct,
        params.stop_loss_pct,
        params.max_bars,
        params.direction
    );
    let mut signals = OpportunitySignals::from_history(&loaded.bars, timeframe, &analysis)?;

    let request = BacktestRequest {
        id,
        symbols: loaded.bars.keys().cloned().collect(),
        timeframe,
        params,
    };
    let outcome = simulate(&request, &loaded.bars, &mut signals, &CancellationToken::new())?;
    report_skipped(&loaded.skipped);
    report_skipped(&outcome.skipped);

    print_backtest(&outcome.run);

    if let Some(path) = trades_out {
        write_trades(path, &outcome.run.trades)?;
        eprintln!("Trade ledger written to: {}", path.display());
    }
    if let Some(store) = open_store(config)? {
        store.save_backtest(&outcome.run)?;
        eprintln!("Backtest {} saved", outcome.run.id);
    }
    Ok(())
}

fn print_backtest(run: &BacktestRun) {
    println!("=== Backtest {} ===", run.id);
    println!(
        "timeframe {}  symbols {}  created {}",
        run.timeframe,
        run.symbols.join(","),
        run.created_at
    );
    println!(
        "{:<9} {:>6} {:>5} {:>6} {:>8} {:>10} {:>9} {:>9} {:>9} {:>9}",
        "scope", "trades", "wins", "losses", "win%", "total%", "avg%", "best%", "worst%", "avg bars"
    );
    for s in &run.summaries {
        println!(
            "{:<9} {:>6} {:>5} {:>6} {:>8.2} {:>10.2} {:>9.2} {:>9.2} {:>9.2} {:>9.1}",
            s.direction.to_string(),
            s.total_trades,
            s.winning_trades,
            s.losing_trades,
            s.win_rate,
            s.total_pnl,
            s.average_pnl,
            s.max_profit,
            s.max_loss,
            s.avg_bars_held
        );
    }
}

fn run_show_backtest(config: &dyn ConfigPort, id: &str) -> Result<(), RankwatchError> {
    let store = open_store(config)?.ok_or_else(|| RankwatchError::ConfigMissing {
        section: "sqlite".into(),
        key: "path".into(),
    })?;
    let run = store.load_backtest(id)?;
    print_backtest(&run);
    Ok(())
}

fn run_history(config: &dyn ConfigPort) -> Result<(), RankwatchError> {
    let timeframe = timeframe_from(config)?;
    let cap = positive(config, "opportunity", "history_cap", 15)? as usize;
    let store = open_store(config)?.ok_or_else(|| RankwatchError::ConfigMissing {
        section: "sqlite".into(),
        key: "path".into(),
    })?;

    // The query limit spans both directions.
    let records = store.opportunity_history(timeframe, cap * 2)?;
    let history = OpportunityHistory::from_records(cap, records);

    println!("=== Opportunity history ({}) ===", timeframe);
    for direction in [Direction::Long, Direction::Short] {
        let entries = history.history(direction);
        println!("{} ({})", direction, entries.len());
        for o in entries {
            println!(
                "  {}  {:<12} strength {:>6.2}  overall {}  change {}",
                o.detection_time,
                o.symbol,
                o.strength,
                fmt_opt(o.overall_rank),
                fmt_delta(o.rank_change)
            );
        }
    }
    Ok(())
}

fn run_validate(config: &dyn ConfigPort) -> Result<(), RankwatchError> {
    validate_backtest_config(config)?;
    build_analysis_config(config)?;
    build_backtest_params(config)?;
    let timeframe = timeframe_from(config)?;
    println!("Configuration is valid (timeframe {})", timeframe);
    Ok(())
}
