//! Price bar representation and the trading-day bucketing used by the engine.

use chrono::{DateTime, NaiveDate, Utc};
use std::fmt;

pub const SECONDS_PER_DAY: i64 = 86_400;

/// One OHLCV observation keyed by `(symbol, ts_utc)`.
///
/// Prices are optional: providers report gaps as missing values rather than
/// zeros, and a zero close would poison every indicator downstream.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceBar {
    pub symbol: String,
    pub ts_utc: i64,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: f64,
}

impl PriceBar {
    /// UTC midnight of the day this bar belongs to.
    pub fn day_start(&self) -> i64 {
        day_start(self.ts_utc)
    }

    /// All four prices absent: a provider placeholder for a non-trading slot.
    pub fn is_placeholder(&self) -> bool {
        self.open.is_none() && self.high.is_none() && self.low.is_none() && self.close.is_none()
    }

    /// Every present price is finite, and high >= max(open, close) >=
    /// min(open, close) >= low when all four are present.
    pub fn is_well_formed(&self) -> bool {
        if !(self.volume.is_finite() && self.volume >= 0.0) {
            return false;
        }
        let prices = [self.open, self.high, self.low, self.close];
        if !prices.iter().flatten().all(|v| v.is_finite()) {
            return false;
        }
        match prices {
            [Some(o), Some(h), Some(l), Some(c)] => h >= o.max(c) && o.min(c) >= l,
            _ => true,
        }
    }
}

/// Candle as reported by the upstream provider, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCandle {
    pub ts_utc: i64,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<f64>,
}

impl RawCandle {
    pub fn into_bar(self, symbol: &str) -> PriceBar {
        PriceBar {
            symbol: symbol.to_string(),
            ts_utc: self.ts_utc,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume.unwrap_or(0.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Granularity {
    Daily,
    Intraday,
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Granularity::Daily => write!(f, "daily"),
            Granularity::Intraday => write!(f, "intraday"),
        }
    }
}

/// How much history to request from the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchRange {
    /// Only the most recent bar(s); used by incremental runs.
    LatestOnly,
    /// A backfill of the given number of calendar days.
    Days(u32),
}

pub fn day_start(ts_utc: i64) -> i64 {
    ts_utc - ts_utc.rem_euclid(SECONDS_PER_DAY)
}

pub fn ts_to_date(ts_utc: i64) -> Option<NaiveDate> {
    DateTime::<Utc>::from_timestamp(ts_utc, 0).map(|dt| dt.date_naive())
}

/// One trading day's close, taken from the latest bar of that day with a close.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyClose {
    pub day_ts: i64,
    pub close: f64,
}

/// Collapse an ascending bar history (daily and intraday mixed) into one close
/// per UTC day. Days where no bar has a close are omitted.
pub fn daily_closes(bars: &[PriceBar]) -> Vec<DailyClose> {
    let mut closes: Vec<DailyClose> = Vec::new();
    let mut latest_ts_in_day = i64::MIN;

    for bar in bars {
        let Some(close) = bar.close else {
            continue;
        };
        let day = bar.day_start();
        match closes.last_mut() {
            Some(last) if last.day_ts == day => {
                if bar.ts_utc >= latest_ts_in_day {
                    last.close = close;
                    latest_ts_in_day = bar.ts_utc;
                }
            }
            _ => {
                closes.push(DailyClose { day_ts: day, close });
                latest_ts_in_day = bar.ts_utc;
            }
        }
    }

    closes
}
