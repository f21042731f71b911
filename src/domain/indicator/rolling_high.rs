//! Rolling-high detector.
//!
//! A day is flagged when the highest close of the trailing `lookback` days
//! (inclusive) was set within the trailing `within_days` days. Ties resolve to
//! the most recent day, so a close that matches an older high counts as fresh.

use crate::domain::error::IndicatorError;

pub fn recent_high_at(
    closes: &[f64],
    end: usize,
    lookback: usize,
    within_days: usize,
) -> Result<bool, IndicatorError> {
    let available = if end < closes.len() { end + 1 } else { 0 };
    if lookback == 0 || available < lookback {
        return Err(IndicatorError::InsufficientHistory {
            needed: lookback.max(1),
            available,
        });
    }

    let start = end + 1 - lookback;
    let mut max_idx = start;
    for i in start..=end {
        if closes[i] >= closes[max_idx] {
            max_idx = i;
        }
    }

    Ok(end - max_idx < within_days)
}

pub fn calculate_recent_highs(closes: &[f64], lookback: usize, within_days: usize) -> Vec<bool> {
    (0..closes.len())
        .map(|i| recent_high_at(closes, i, lookback, within_days).unwrap_or(false))
        .collect()
}
