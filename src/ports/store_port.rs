//! Time-series storage port.

use crate::domain::error::{BatchWriteError, StoreError};
use crate::domain::indicator::IndicatorRecord;
use crate::domain::price_bar::PriceBar;

/// Persistence for price bars and indicator records, keyed by `(symbol, ts_utc)`.
///
/// Upserts overwrite in place and are idempotent: applying the same batch
/// twice leaves the same stored state. Each batch is applied atomically.
/// Implementations serialize their own writes.
pub trait TimeSeriesStore: Send + Sync {
    /// Returns the number of distinct keys written.
    fn upsert_prices(&self, bars: &[PriceBar]) -> Result<usize, BatchWriteError>;

    /// Returns the number of distinct keys written.
    fn upsert_indicators(&self, records: &[IndicatorRecord]) -> Result<usize, BatchWriteError>;

    /// Bars for `symbol` with `ts_utc >= since`, ascending.
    fn query_price_history(
        &self,
        symbol: &str,
        since: Option<i64>,
    ) -> Result<Vec<PriceBar>, StoreError>;

    /// Indicator records for `symbol` with `ts_utc >= since`, ascending.
    fn query_indicators(
        &self,
        symbol: &str,
        since: Option<i64>,
    ) -> Result<Vec<IndicatorRecord>, StoreError>;

    /// Distinct symbols with stored prices, sorted.
    fn query_symbols(&self) -> Result<Vec<String>, StoreError>;
}

/// Rejects keys no backend can store. Shared by all adapters so they agree on
/// what counts as a conflict.
pub fn validate_key(symbol: &str, ts_utc: i64) -> Result<(), StoreError> {
    if symbol.trim().is_empty() {
        return Err(StoreError::Conflict {
            reason: format!("empty symbol at ts {}", ts_utc),
        });
    }
    if symbol.contains(['/', '\\']) || symbol.chars().any(char::is_control) {
        return Err(StoreError::Conflict {
            reason: format!("invalid symbol {:?}", symbol),
        });
    }
    if ts_utc < 0 {
        return Err(StoreError::Conflict {
            reason: format!("negative timestamp {} for {}", ts_utc, symbol),
        });
    }
    Ok(())
}
