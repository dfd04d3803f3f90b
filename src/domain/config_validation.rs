//! Configuration validation.
//!
//! Validates every configured key before a run so a bad value fails fast
//! with the section and key that caused it.

use crate::domain::backtest::DirectionFilter;
use crate::domain::error::RankwatchError;
use crate::domain::metric::{parse_metric_list, MetricId};
use crate::domain::slot_machine::SlotAlgorithm;
use crate::domain::timeframe::Timeframe;
use crate::domain::universe::parse_symbols;
use crate::ports::config_port::ConfigPort;

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> RankwatchError {
    RankwatchError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

pub fn validate_analysis_config(config: &dyn ConfigPort) -> Result<(), RankwatchError> {
    validate_data(config)?;
    validate_metrics(config)?;
    let ranked = validate_ranking(config)?;
    validate_opportunity(config, &ranked)?;
    validate_slot_machine(config)?;
    Ok(())
}

pub fn validate_backtest_config(config: &dyn ConfigPort) -> Result<(), RankwatchError> {
    validate_analysis_config(config)?;

    let take_profit = config.get_double("backtest", "take_profit", 3.0);
    if !take_profit.is_finite() || take_profit <= 0.0 {
        return Err(invalid("backtest", "take_profit", "take_profit must be positive"));
    }
    let stop_loss = config.get_double("backtest", "stop_loss", 1.5);
    if !stop_loss.is_finite() || stop_loss <= 0.0 {
        return Err(invalid("backtest", "stop_loss", "stop_loss must be positive"));
    }
    if config.get_int("backtest", "max_bars", 20) <= 0 {
        return Err(invalid("backtest", "max_bars", "max_bars must be positive"));
    }
    if config.get_int("backtest", "max_missing_bars", 2) < 0 {
        return Err(invalid(
            "backtest",
            "max_missing_bars",
            "max_missing_bars must be non-negative",
        ));
    }
    if let Some(direction) = config.get_non_empty("backtest", "direction") {
        direction
            .parse::<DirectionFilter>()
            .map_err(|e| invalid("backtest", "direction", e))?;
    }
    Ok(())
}

fn validate_data(config: &dyn ConfigPort) -> Result<(), RankwatchError> {
    if let Some(tf) = config.get_non_empty("data", "timeframe") {
        tf.parse::<Timeframe>()
            .map_err(|e| invalid("data", "timeframe", e.to_string()))?;
    }
    if let Some(symbols) = config.get_non_empty("data", "symbols") {
        parse_symbols(&symbols).map_err(|e| invalid("data", "symbols", e.to_string()))?;
    }
    let window = config.get_int("metrics", "window", 20);
    if config.get_int("data", "history_limit", 1000) < window {
        return Err(invalid(
            "data",
            "history_limit",
            "history_limit must be at least the metric window",
        ));
    }
    Ok(())
}

fn validate_metrics(config: &dyn ConfigPort) -> Result<(), RankwatchError> {
    let window = config.get_int("metrics", "window", 20);
    if window < 2 {
        return Err(invalid("metrics", "window", "window must be at least 2"));
    }
    let momentum = config.get_int("metrics", "momentum_period", 14);
    if momentum < 1 || momentum > window {
        return Err(invalid(
            "metrics",
            "momentum_period",
            "momentum_period must be between 1 and window",
        ));
    }
    let price = config.get_int("metrics", "price_period", 5);
    if price < 1 || price >= momentum {
        return Err(invalid(
            "metrics",
            "price_period",
            "price_period must be positive and shorter than momentum_period",
        ));
    }
    Ok(())
}

fn validate_weights(
    config: &dyn ConfigPort,
    section: &str,
    prefix: &str,
    metrics: &[MetricId],
) -> Result<(), RankwatchError> {
    let mut total = 0.0;
    for metric in metrics {
        let key = format!("{}{}", prefix, metric);
        let weight = config.get_double(section, &key, 1.0);
        if !weight.is_finite() || weight < 0.0 {
            return Err(invalid(section, &key, "weight must be non-negative"));
        }
        total += weight;
    }
    if total <= 0.0 {
        return Err(invalid(section, prefix.trim_end_matches('_'), "weights must not all be zero"));
    }
    Ok(())
}

/// Returns the ranked metrics so later sections can be checked against them.
fn validate_ranking(config: &dyn ConfigPort) -> Result<Vec<MetricId>, RankwatchError> {
    let metrics = match config.get_non_empty("ranking", "metrics") {
        Some(list) => parse_metric_list(&list).map_err(|e| invalid("ranking", "metrics", e))?,
        None => MetricId::ALL.to_vec(),
    };
    validate_weights(config, "ranking", "weight_", &metrics)?;
    Ok(metrics)
}

fn validate_opportunity(
    config: &dyn ConfigPort,
    ranked: &[MetricId],
) -> Result<(), RankwatchError> {
    let pct = config.get_double("opportunity", "top_percentile", 20.0);
    if !pct.is_finite() || pct <= 0.0 || pct > 100.0 {
        return Err(invalid(
            "opportunity",
            "top_percentile",
            "top_percentile must be in (0, 100]",
        ));
    }
    if let Some(list) = config.get_non_empty("opportunity", "signal_metrics") {
        let signal = parse_metric_list(&list)
            .map_err(|e| invalid("opportunity", "signal_metrics", e))?;
        if let Some(missing) = signal.iter().find(|m| !ranked.contains(m)) {
            return Err(invalid(
                "opportunity",
                "signal_metrics",
                format!("{} is not a ranked metric", missing),
            ));
        }
    }
    validate_weights(config, "opportunity", "strength_weight_", ranked)?;

    let current = config.get_int("opportunity", "current_cap", 5);
    if current < 1 {
        return Err(invalid("opportunity", "current_cap", "current_cap must be positive"));
    }
    if config.get_int("opportunity", "history_cap", 15) < current {
        return Err(invalid(
            "opportunity",
            "history_cap",
            "history_cap must be at least current_cap",
        ));
    }
    Ok(())
}

fn validate_slot_machine(config: &dyn ConfigPort) -> Result<(), RankwatchError> {
    if let Some(algorithm) = config.get_non_empty("slot_machine", "algorithm") {
        algorithm
            .parse::<SlotAlgorithm>()
            .map_err(|e| invalid("slot_machine", "algorithm", e))?;
    }
    for (key, default) in [
        ("top_k", 20),
        ("match_threshold", 3),
        ("max_rows", 50),
        ("top_n", 10),
        ("min_overall_improvement", 5),
        ("min_metric_improvement", 5),
        ("max_overall_rank", 30),
    ] {
        if config.get_int("slot_machine", key, default) < 1 {
            return Err(invalid("slot_machine", key, format!("{} must be positive", key)));
        }
    }
    Ok(())
}
