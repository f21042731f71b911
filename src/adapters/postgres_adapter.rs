//! PostgreSQL time-series store.

use crate::domain::error::{BatchWriteError, StoreError, WatchError};
use crate::domain::indicator::IndicatorRecord;
use crate::domain::price_bar::PriceBar;
use crate::ports::config_port::ConfigPort;
use crate::ports::store_port::{validate_key, TimeSeriesStore};
use postgres::types::ToSql;
use postgres::{Client, NoTls};
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS prices (
        symbol TEXT NOT NULL,
        ts_utc BIGINT NOT NULL,
        open DOUBLE PRECISION,
        high DOUBLE PRECISION,
        low DOUBLE PRECISION,
        close DOUBLE PRECISION,
        volume DOUBLE PRECISION NOT NULL DEFAULT 0,
        PRIMARY KEY (symbol, ts_utc)
    );
    CREATE INDEX IF NOT EXISTS idx_prices_symbol_ts ON prices(symbol, ts_utc DESC);
    CREATE TABLE IF NOT EXISTS indicators (
        symbol TEXT NOT NULL,
        ts_utc BIGINT NOT NULL,
        ma20 DOUBLE PRECISION,
        ma50 DOUBLE PRECISION,
        rsi14 DOUBLE PRECISION,
        is_30d_high BOOLEAN NOT NULL,
        signal BOOLEAN NOT NULL,
        updated_at_utc BIGINT NOT NULL,
        PRIMARY KEY (symbol, ts_utc)
    );
    CREATE INDEX IF NOT EXISTS idx_indicators_symbol_ts ON indicators(symbol, ts_utc DESC);";

const UPSERT_PRICE: &str = "INSERT INTO prices (symbol, ts_utc, open, high, low, close, volume)
     VALUES ($1, $2, $3, $4, $5, $6, $7)
     ON CONFLICT (symbol, ts_utc) DO UPDATE SET
         open = EXCLUDED.open, high = EXCLUDED.high, low = EXCLUDED.low,
         close = EXCLUDED.close, volume = EXCLUDED.volume";

const UPSERT_INDICATOR: &str = "INSERT INTO indicators
         (symbol, ts_utc, ma20, ma50, rsi14, is_30d_high, signal, updated_at_utc)
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
     ON CONFLICT (symbol, ts_utc) DO UPDATE SET
         ma20 = EXCLUDED.ma20, ma50 = EXCLUDED.ma50, rsi14 = EXCLUDED.rsi14,
         is_30d_high = EXCLUDED.is_30d_high, signal = EXCLUDED.signal,
         updated_at_utc = EXCLUDED.updated_at_utc";

pub struct PostgresStore {
    client: Mutex<Client>,
}

/// Integrity constraint violations (SQLSTATE class 23) are conflicts; anything
/// else is treated as an I/O failure.
fn map_pg(e: postgres::Error) -> StoreError {
    let integrity = e.code().is_some_and(|c| c.code().starts_with("23"));
    if integrity {
        StoreError::Conflict {
            reason: e.to_string(),
        }
    } else {
        StoreError::IoFailure {
            reason: e.to_string(),
        }
    }
}

impl PostgresStore {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, WatchError> {
        let connection_string = config
            .get_string("postgres", "connection_string")
            .ok_or_else(|| WatchError::ConfigMissing {
                section: "postgres".into(),
                key: "connection_string".into(),
            })?;

        let client = Client::connect(&connection_string, NoTls).map_err(map_pg)?;
        tracing::debug!("connected to postgres store");

        Ok(Self {
            client: Mutex::new(client),
        })
    }

    pub fn initialize_schema(&self) -> Result<(), StoreError> {
        self.client()?.batch_execute(SCHEMA).map_err(map_pg)
    }

    fn client(&self) -> Result<MutexGuard<'_, Client>, StoreError> {
        self.client.lock().map_err(|_| StoreError::IoFailure {
            reason: "postgres client lock poisoned".into(),
        })
    }

    fn write_batch<T>(
        &self,
        rows: &[T],
        key: impl Fn(&T) -> (&str, i64),
        sql: &str,
        bind: impl Fn(&T) -> Vec<&(dyn ToSql + Sync)>,
    ) -> Result<usize, BatchWriteError> {
        let attempted = rows.len();
        let fail = |e: StoreError| BatchWriteError::none_written(attempted, e);

        let mut keys = HashSet::with_capacity(rows.len());
        for row in rows {
            let (symbol, ts) = key(row);
            validate_key(symbol, ts).map_err(fail)?;
            keys.insert((symbol, ts));
        }
        if rows.is_empty() {
            return Ok(0);
        }

        let mut client = self.client().map_err(fail)?;
        let mut tx = client.transaction().map_err(|e| fail(map_pg(e)))?;
        let stmt = tx.prepare(sql).map_err(|e| fail(map_pg(e)))?;
        for row in rows {
            tx.execute(&stmt, &bind(row)).map_err(|e| fail(map_pg(e)))?;
        }
        tx.commit().map_err(|e| fail(map_pg(e)))?;
        Ok(keys.len())
    }
}

impl TimeSeriesStore for PostgresStore {
    fn upsert_prices(&self, bars: &[PriceBar]) -> Result<usize, BatchWriteError> {
        let written = self.write_batch(
            bars,
            |b| (b.symbol.as_str(), b.ts_utc),
            UPSERT_PRICE,
            |b| {
                vec![
                    &b.symbol, &b.ts_utc, &b.open, &b.high, &b.low, &b.close, &b.volume,
                ]
            },
        )?;
        tracing::debug!(rows = written, "postgres prices upserted");
        Ok(written)
    }

    fn upsert_indicators(&self, records: &[IndicatorRecord]) -> Result<usize, BatchWriteError> {
        let written = self.write_batch(
            records,
            |r| (r.symbol.as_str(), r.ts_utc),
            UPSERT_INDICATOR,
            |r| {
                vec![
                    &r.symbol,
                    &r.ts_utc,
                    &r.ma20,
                    &r.ma50,
                    &r.rsi14,
                    &r.is_30d_high,
                    &r.signal,
                    &r.updated_at,
                ]
            },
        )?;
        tracing::debug!(rows = written, "postgres indicators upserted");
        Ok(written)
    }

    fn query_price_history(
        &self,
        symbol: &str,
        since: Option<i64>,
    ) -> Result<Vec<PriceBar>, StoreError> {
        let since = since.unwrap_or(i64::MIN);
        let rows = self
            .client()?
            .query(
                "SELECT symbol, ts_utc, open, high, low, close, volume
                 FROM prices
                 WHERE symbol = $1 AND ts_utc >= $2
                 ORDER BY ts_utc ASC",
                &[&symbol, &since],
            )
            .map_err(map_pg)?;

        Ok(rows
            .into_iter()
            .map(|row| PriceBar {
                symbol: row.get(0),
                ts_utc: row.get(1),
                open: row.get(2),
                high: row.get(3),
                low: row.get(4),
                close: row.get(5),
                volume: row.get(6),
            })
            .collect())
    }

    fn query_indicators(
        &self,
        symbol: &str,
        since: Option<i64>,
    ) -> Result<Vec<IndicatorRecord>, StoreError> {
        let since = since.unwrap_or(i64::MIN);
        let rows = self
            .client()?
            .query(
                "SELECT symbol, ts_utc, ma20, ma50, rsi14, is_30d_high, signal, updated_at_utc
                 FROM indicators
                 WHERE symbol = $1 AND ts_utc >= $2
                 ORDER BY ts_utc ASC",
                &[&symbol, &since],
            )
            .map_err(map_pg)?;

        Ok(rows
            .into_iter()
            .map(|row| IndicatorRecord {
                symbol: row.get(0),
                ts_utc: row.get(1),
                ma20: row.get(2),
                ma50: row.get(3),
                rsi14: row.get(4),
                is_30d_high: row.get(5),
                signal: row.get(6),
                updated_at: row.get(7),
            })
            .collect())
    }

    fn query_symbols(&self) -> Result<Vec<String>, StoreError> {
        let rows = self
            .client()?
            .query("SELECT DISTINCT symbol FROM prices ORDER BY symbol", &[])
            .map_err(map_pg)?;
        Ok(rows.into_iter().map(|row| row.get(0)).collect())
    }
}
