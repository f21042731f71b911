//! Simple moving average over daily closes.
//!
//! Value at day `i` is the arithmetic mean of closes `i+1-period ..= i`.
//! Days with fewer than `period` closes have no value.

use crate::domain::error::IndicatorError;

pub fn sma_at(closes: &[f64], end: usize, period: usize) -> Result<f64, IndicatorError> {
    let available = if closes.is_empty() {
        0
    } else {
        end.min(closes.len() - 1) + 1
    };
    if period == 0 || available < period || end >= closes.len() {
        return Err(IndicatorError::InsufficientHistory {
            needed: period.max(1),
            available,
        });
    }
    let window = &closes[end + 1 - period..=end];
    Ok(window.iter().sum::<f64>() / period as f64)
}

pub fn calculate_sma(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    (0..closes.len())
        .map(|i| sma_at(closes, i, period).ok())
        .collect()
}
