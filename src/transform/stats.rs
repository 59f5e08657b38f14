use std::cmp::Ordering;

use crate::metrics::types::TrendDirection;

/// Round to one decimal place.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// `part / total * 100`, or 0 when `total` is 0.
pub fn calculate_percentage(part: f64, total: f64) -> f64 {
    if total == 0.0 {
        0.0
    } else {
        part / total * 100.0
    }
}

/// Direction and absolute relative change from `previous` to `current`.
///
/// With a zero baseline the change is reported as 100% (or 0% if both are zero).
pub fn calculate_trend(current: f64, previous: f64) -> (TrendDirection, f64) {
    let delta = current - previous;
    let direction = if delta > 0.0 {
        TrendDirection::Up
    } else if delta < 0.0 {
        TrendDirection::Down
    } else {
        TrendDirection::Stable
    };
    let percentage = if previous == 0.0 {
        if current == 0.0 {
            0.0
        } else {
            100.0
        }
    } else {
        (delta / previous).abs() * 100.0
    };
    (direction, percentage)
}

/// Mean of each full window, in order.
pub fn moving_average(values: &[f64], window: usize) -> Vec<f64> {
    if window == 0 || window > values.len() {
        return Vec::new();
    }
    values
        .windows(window)
        .map(|w| w.iter().sum::<f64>() / window as f64)
        .collect()
}

/// Min-max scale into `[0, 1]`. A constant input maps to zeros.
pub fn normalize(values: &[f64]) -> Vec<f64> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let span = max - min;
    values
        .iter()
        .map(|v| if span > 0.0 { (v - min) / span } else { 0.0 })
        .collect()
}

/// Values outside Tukey's fences, `[Q1 - 1.5 IQR, Q3 + 1.5 IQR]`, in input order.
///
/// Quartiles are read at sorted indices `floor(n/4)` and `floor(3n/4)`.
pub fn detect_outliers(values: &[f64]) -> Vec<f64> {
    if values.len() < 4 {
        return Vec::new();
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let n = sorted.len();
    let q1 = sorted[n / 4];
    let q3 = sorted[(n * 3) / 4];
    let iqr = q3 - q1;
    let lower = q1 - 1.5 * iqr;
    let upper = q3 + 1.5 * iqr;
    values
        .iter()
        .copied()
        .filter(|v| *v < lower || *v > upper)
        .collect()
}
