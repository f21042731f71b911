//! Read models over the store.
//!
//! [`latest_summary`] gives one row per symbol with its last close, day-over-day
//! change and most recent indicator record. [`symbol_history`] gives the recent
//! daily rows of a single symbol.

use crate::domain::error::StoreError;
use crate::domain::price_bar::daily_closes;
use crate::ports::store_port::TimeSeriesStore;

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub symbol: String,
    /// Timestamp of the last bar with a close.
    pub ts_utc: i64,
    pub last_close: f64,
    /// Percent change against the previous trading day's close.
    pub pct_change_1d: Option<f64>,
    pub ma20: Option<f64>,
    pub ma50: Option<f64>,
    pub rsi14: Option<f64>,
    pub is_30d_high: bool,
    pub signal: bool,
    /// Indicator computation time, or the bar time when no record exists.
    pub updated_at: i64,
}

/// Build summary rows for `symbols` (every stored symbol when `None`), as of
/// `as_of` (inclusive) or the latest data. Symbols without any close are left
/// out. Rows are sorted by symbol.
pub fn latest_summary(
    store: &dyn TimeSeriesStore,
    symbols: Option<&[String]>,
    as_of: Option<i64>,
) -> Result<Vec<SummaryRow>, StoreError> {
    let mut symbols: Vec<String> = match symbols {
        Some(list) => list.to_vec(),
        None => store.query_symbols()?,
    };
    symbols.sort();
    symbols.dedup();

    let cutoff = as_of.unwrap_or(i64::MAX);
    let mut rows = Vec::with_capacity(symbols.len());

    for symbol in symbols {
        let history: Vec<_> = store
            .query_price_history(&symbol, None)?
            .into_iter()
            .filter(|b| b.ts_utc <= cutoff)
            .collect();
        let Some((last_bar, last_close)) = history
            .iter()
            .rev()
            .find_map(|b| b.close.map(|c| (b, c)))
        else {
            continue;
        };

        let closes = daily_closes(&history);
        let prev_close = closes
            .iter()
            .rev()
            .find(|d| d.day_ts < last_bar.day_start())
            .map(|d| d.close);
        let pct_change_1d = prev_close
            .filter(|p| *p != 0.0)
            .map(|p| (last_close - p) / p * 100.0);

        let latest = store
            .query_indicators(&symbol, None)?
            .into_iter()
            .filter(|r| r.ts_utc <= cutoff)
            .last();

        rows.push(SummaryRow {
            symbol: symbol.clone(),
            ts_utc: last_bar.ts_utc,
            last_close,
            pct_change_1d,
            ma20: latest.as_ref().and_then(|r| r.ma20),
            ma50: latest.as_ref().and_then(|r| r.ma50),
            rsi14: latest.as_ref().and_then(|r| r.rsi14),
            is_30d_high: latest.as_ref().is_some_and(|r| r.is_30d_high),
            signal: latest.as_ref().is_some_and(|r| r.signal),
            updated_at: latest.as_ref().map_or(last_bar.ts_utc, |r| r.updated_at),
        });
    }

    tracing::debug!(rows = rows.len(), "summary built");
    Ok(rows)
}

/// One trading day of a symbol: the daily close and the indicator record in
/// force at that day.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRow {
    /// Start of the UTC trading day.
    pub day_ts: i64,
    pub close: f64,
    pub ma20: Option<f64>,
    pub ma50: Option<f64>,
    pub rsi14: Option<f64>,
    pub is_30d_high: bool,
    pub signal: bool,
}

/// The last `limit` trading days of `symbol`, newest first. Each day carries
/// the latest indicator record at or before it. Unknown symbols give an empty
/// list.
pub fn symbol_history(
    store: &dyn TimeSeriesStore,
    symbol: &str,
    limit: usize,
) -> Result<Vec<HistoryRow>, StoreError> {
    let history = store.query_price_history(symbol, None)?;
    let closes = daily_closes(&history);
    let indicators = store.query_indicators(symbol, None)?;

    let rows: Vec<HistoryRow> = closes
        .iter()
        .rev()
        .take(limit)
        .map(|day| {
            let idx = indicators.partition_point(|r| r.ts_utc <= day.day_ts);
            let record = idx.checked_sub(1).and_then(|i| indicators.get(i));
            HistoryRow {
                day_ts: day.day_ts,
                close: day.close,
                ma20: record.and_then(|r| r.ma20),
                ma50: record.and_then(|r| r.ma50),
                rsi14: record.and_then(|r| r.rsi14),
                is_30d_high: record.is_some_and(|r| r.is_30d_high),
                signal: record.is_some_and(|r| r.signal),
            }
        })
        .collect();

    tracing::debug!(symbol, rows = rows.len(), "history built");
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::BatchWriteError;
    use crate::domain::indicator::IndicatorRecord;
    use crate::domain::price_bar::{PriceBar, SECONDS_PER_DAY};
    use approx::assert_relative_eq;

    const DAY0: i64 = 1_704_067_200;

    struct FixtureStore {
        prices: Vec<PriceBar>,
        indicators: Vec<IndicatorRecord>,
    }

    impl TimeSeriesStore for FixtureStore {
        fn upsert_prices(&self, bars: &[PriceBar]) -> Result<usize, BatchWriteError> {
            Ok(bars.len())
        }

        fn upsert_indicators(&self, records: &[IndicatorRecord]) -> Result<usize, BatchWriteError> {
            Ok(records.len())
        }

        fn query_price_history(
            &self,
            symbol: &str,
            since: Option<i64>,
        ) -> Result<Vec<PriceBar>, StoreError> {
            Ok(self
                .prices
                .iter()
                .filter(|b| b.symbol == symbol && since.is_none_or(|s| b.ts_utc >= s))
                .cloned()
                .collect())
        }

        fn query_indicators(
            &self,
            symbol: &str,
            since: Option<i64>,
        ) -> Result<Vec<IndicatorRecord>, StoreError> {
            Ok(self
                .indicators
                .iter()
                .filter(|r| r.symbol == symbol && since.is_none_or(|s| r.ts_utc >= s))
                .cloned()
                .collect())
        }

        fn query_symbols(&self) -> Result<Vec<String>, StoreError> {
            let mut s: Vec<String> = self.prices.iter().map(|b| b.symbol.clone()).collect();
            s.sort();
            s.dedup();
            Ok(s)
        }
    }

    fn bar(symbol: &str, ts: i64, close: f64) -> PriceBar {
        PriceBar {
            symbol: symbol.into(),
            ts_utc: ts,
            open: Some(close),
            high: Some(close),
            low: Some(close),
            close: Some(close),
            volume: 10.0,
        }
    }

    fn record(symbol: &str, ts: i64, rsi: f64, signal: bool) -> IndicatorRecord {
        IndicatorRecord {
            symbol: symbol.into(),
            ts_utc: ts,
            ma20: Some(100.0),
            ma50: None,
            rsi14: Some(rsi),
            is_30d_high: signal,
            signal,
            updated_at: ts + 3_600,
        }
    }

    fn fixture() -> FixtureStore {
        FixtureStore {
            prices: vec![
                bar("BBRI.JK", DAY0, 100.0),
                bar("BBRI.JK", DAY0 + SECONDS_PER_DAY, 110.0),
                bar("BBRI.JK", DAY0 + SECONDS_PER_DAY + 3_600, 105.0),
                bar("ASII.JK", DAY0, 50.0),
            ],
            indicators: vec![
                record("BBRI.JK", DAY0, 40.0, false),
                record("BBRI.JK", DAY0 + SECONDS_PER_DAY, 60.0, true),
            ],
        }
    }

    #[test]
    fn rows_are_sorted_and_complete() {
        let rows = latest_summary(&fixture(), None, None).unwrap();
        let symbols: Vec<&str> = rows.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["ASII.JK", "BBRI.JK"]);

        let bbri = &rows[1];
        assert_eq!(bbri.last_close, 105.0);
        assert_relative_eq!(bbri.pct_change_1d.unwrap(), 5.0);
        assert_eq!(bbri.rsi14, Some(60.0));
        assert!(bbri.signal);
        assert_eq!(bbri.updated_at, DAY0 + SECONDS_PER_DAY + 3_600);
    }

    #[test]
    fn symbol_without_indicators_falls_back_to_bar_time() {
        let rows = latest_summary(&fixture(), None, None).unwrap();
        let asii = &rows[0];
        assert_eq!(asii.pct_change_1d, None);
        assert_eq!(asii.rsi14, None);
        assert!(!asii.signal);
        assert_eq!(asii.updated_at, DAY0);
    }

    #[test]
    fn as_of_cuts_off_later_data() {
        let rows = latest_summary(&fixture(), None, Some(DAY0 + 100)).unwrap();
        let bbri = rows.iter().find(|r| r.symbol == "BBRI.JK").unwrap();
        assert_eq!(bbri.last_close, 100.0);
        assert_eq!(bbri.rsi14, Some(40.0));
        assert!(!bbri.signal);
    }

    #[test]
    fn history_is_newest_first_with_daily_closes() {
        let rows = symbol_history(&fixture(), "BBRI.JK", 10).unwrap();
        assert_eq!(rows.len(), 2);

        assert_eq!(rows[0].day_ts, DAY0 + SECONDS_PER_DAY);
        assert_eq!(rows[0].close, 105.0);
        assert_eq!(rows[0].rsi14, Some(60.0));
        assert!(rows[0].signal);

        assert_eq!(rows[1].day_ts, DAY0);
        assert_eq!(rows[1].close, 100.0);
        assert_eq!(rows[1].rsi14, Some(40.0));
        assert!(!rows[1].signal);
    }

    #[test]
    fn history_respects_limit() {
        let rows = symbol_history(&fixture(), "BBRI.JK", 1).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].day_ts, DAY0 + SECONDS_PER_DAY);

        assert!(symbol_history(&fixture(), "BBRI.JK", 0).unwrap().is_empty());
    }

    #[test]
    fn history_carries_earlier_record_forward() {
        let mut store = fixture();
        store.indicators.truncate(1);
        store
            .prices
            .push(bar("BBRI.JK", DAY0 + 3 * SECONDS_PER_DAY, 120.0));

        let rows = symbol_history(&store, "BBRI.JK", 5).unwrap();
        let days: Vec<i64> = rows.iter().map(|r| r.day_ts).collect();
        assert_eq!(
            days,
            vec![DAY0 + 3 * SECONDS_PER_DAY, DAY0 + SECONDS_PER_DAY, DAY0]
        );
        assert!(rows.iter().all(|r| r.rsi14 == Some(40.0)));
    }

    #[test]
    fn history_without_indicators_or_prices() {
        let rows = symbol_history(&fixture(), "ASII.JK", 5).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].close, 50.0);
        assert_eq!(rows[0].ma20, None);
        assert!(!rows[0].is_30d_high);

        assert!(symbol_history(&fixture(), "TLKM.JK", 5).unwrap().is_empty());
    }

    #[test]
    fn explicit_symbols_skip_unknown() {
        let wanted = vec!["TLKM.JK".to_string(), "BBRI.JK".to_string()];
        let rows = latest_summary(&fixture(), Some(&wanted), None).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].symbol, "BBRI.JK");
    }
}
