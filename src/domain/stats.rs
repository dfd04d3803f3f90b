//! Rolling-window statistics with explicit zero guards.
//!
//! Every helper returns a finite number for finite input: empty slices,
//! zero bases and zero variance map to `0.0` instead of NaN or infinity.

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
pub fn stddev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let avg = mean(values);
    let variance = values
        .iter()
        .map(|v| {
            let diff = v - avg;
            diff * diff
        })
        .sum::<f64>()
        / values.len() as f64;
    variance.sqrt()
}

/// (last - mean) / stddev, or 0 when the window has no variance.
pub fn zscore(values: &[f64]) -> f64 {
    let Some(&last) = values.last() else {
        return 0.0;
    };
    let sd = stddev(values);
    if sd == 0.0 {
        return 0.0;
    }
    (last - mean(values)) / sd
}

/// Percent change from `base` to `value`; 0 for a zero base.
pub fn pct_change(base: f64, value: f64) -> f64 {
    if base == 0.0 {
        return 0.0;
    }
    (value - base) / base * 100.0
}

/// `value` as a percentage of `baseline`; 0 for a zero baseline.
pub fn ratio_pct(value: f64, baseline: f64) -> f64 {
    if baseline == 0.0 {
        return 0.0;
    }
    value / baseline * 100.0
}
