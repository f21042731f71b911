//! Technical indicators derived from a symbol's daily closes.
//!
//! - [`sma`]: simple moving averages (MA20, MA50)
//! - [`rsi`]: Wilder RSI(14)
//! - [`rolling_high`]: recent rolling-high detector
//! - [`engine`]: combines the above into one [`IndicatorRecord`] per trading day

pub mod engine;
pub mod rolling_high;
pub mod rsi;
pub mod sma;

pub use engine::IndicatorEngine;

pub const MA_SHORT_PERIOD: usize = 20;
pub const MA_LONG_PERIOD: usize = 50;
pub const RSI_PERIOD: usize = 14;

/// Derived indicator snapshot for one symbol on one trading day.
///
/// `ts_utc` is UTC midnight of the trading day. Moving averages and RSI are
/// `None` until enough closes exist; they are never zero-filled.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorRecord {
    pub symbol: String,
    pub ts_utc: i64,
    pub ma20: Option<f64>,
    pub ma50: Option<f64>,
    pub rsi14: Option<f64>,
    pub is_30d_high: bool,
    pub signal: bool,
    pub updated_at: i64,
}

/// Thresholds consumed by the engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndicatorSettings {
    pub rsi_min: f64,
    pub high_lookback: usize,
    pub high_within_days: usize,
}

impl Default for IndicatorSettings {
    fn default() -> Self {
        Self {
            rsi_min: 55.0,
            high_lookback: 30,
            high_within_days: 5,
        }
    }
}

impl IndicatorSettings {
    /// Number of trailing daily closes needed before every field can be present.
    pub fn required_closes(&self) -> usize {
        MA_LONG_PERIOD
            .max(RSI_PERIOD + 1)
            .max(self.high_lookback)
    }
}

/// Composite trade signal: momentum above threshold on a fresh rolling high.
pub fn signal(rsi14: Option<f64>, is_recent_high: bool, rsi_min: f64) -> bool {
    match rsi14 {
        Some(rsi) => is_recent_high && rsi >= rsi_min,
        None => false,
    }
}
