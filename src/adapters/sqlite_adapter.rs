//! SQLite time-series store.

use crate::domain::error::{BatchWriteError, StoreError, WatchError};
use crate::domain::indicator::IndicatorRecord;
use crate::domain::price_bar::PriceBar;
use crate::ports::config_port::ConfigPort;
use crate::ports::store_port::{validate_key, TimeSeriesStore};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, ErrorCode};
use std::collections::HashSet;
use std::sync::Mutex;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS prices (
        symbol TEXT NOT NULL,
        ts_utc INTEGER NOT NULL,
        open REAL,
        high REAL,
        low REAL,
        close REAL,
        volume REAL NOT NULL DEFAULT 0,
        PRIMARY KEY (symbol, ts_utc)
    );
    CREATE INDEX IF NOT EXISTS idx_prices_symbol_ts ON prices(symbol, ts_utc DESC);
    CREATE TABLE IF NOT EXISTS indicators (
        symbol TEXT NOT NULL,
        ts_utc INTEGER NOT NULL,
        ma20 REAL,
        ma50 REAL,
        rsi14 REAL,
        is_30d_high INTEGER NOT NULL,
        signal INTEGER NOT NULL,
        updated_at_utc INTEGER NOT NULL,
        PRIMARY KEY (symbol, ts_utc)
    );
    CREATE INDEX IF NOT EXISTS idx_indicators_symbol_ts ON indicators(symbol, ts_utc DESC);";

pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
    /// SQLite has a single writer; pooled readers run alongside it.
    write_lock: Mutex<()>,
}

fn map_sqlite(e: rusqlite::Error) -> StoreError {
    match e.sqlite_error_code() {
        Some(ErrorCode::ConstraintViolation) => StoreError::Conflict {
            reason: e.to_string(),
        },
        _ => StoreError::IoFailure {
            reason: e.to_string(),
        },
    }
}

fn map_pool(e: r2d2::Error) -> StoreError {
    StoreError::IoFailure {
        reason: e.to_string(),
    }
}

impl SqliteStore {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, WatchError> {
        let db_path =
            config
                .get_string("storage", "path")
                .ok_or_else(|| WatchError::ConfigMissing {
                    section: "storage".into(),
                    key: "path".into(),
                })?;

        let pool_size = config.get_int("storage", "pool_size", 4).max(1) as u32;

        let manager = SqliteConnectionManager::file(&db_path).with_init(|conn| {
            conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")
        });
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(map_pool)?;

        tracing::debug!(path = db_path.as_str(), pool_size, "opened sqlite store");
        Ok(Self {
            pool,
            write_lock: Mutex::new(()),
        })
    }

    /// Single-connection in-memory store; every pooled connection to
    /// `:memory:` would otherwise see its own empty database.
    pub fn in_memory() -> Result<Self, StoreError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(map_pool)?;

        Ok(Self {
            pool,
            write_lock: Mutex::new(()),
        })
    }

    pub fn initialize_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute_batch(SCHEMA).map_err(map_sqlite)
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, StoreError> {
        self.pool.get().map_err(map_pool)
    }

    fn write_batch<T>(
        &self,
        rows: &[T],
        key: impl Fn(&T) -> (&str, i64),
        sql: &str,
        bind: impl Fn(&mut rusqlite::CachedStatement<'_>, &T) -> rusqlite::Result<usize>,
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

        let _guard = self.write_lock.lock().map_err(|_| {
            fail(StoreError::IoFailure {
                reason: "sqlite write lock poisoned".into(),
            })
        })?;
        let mut conn = self.conn().map_err(fail)?;
        let tx = conn.transaction().map_err(|e| fail(map_sqlite(e)))?;
        {
            let mut stmt = tx.prepare_cached(sql).map_err(|e| fail(map_sqlite(e)))?;
            for row in rows {
                bind(&mut stmt, row).map_err(|e| fail(map_sqlite(e)))?;
            }
        }
        tx.commit().map_err(|e| fail(map_sqlite(e)))?;
        Ok(keys.len())
    }
}

impl TimeSeriesStore for SqliteStore {
    fn upsert_prices(&self, bars: &[PriceBar]) -> Result<usize, BatchWriteError> {
        let written = self.write_batch(
            bars,
            |b| (b.symbol.as_str(), b.ts_utc),
            "INSERT OR REPLACE INTO prices (symbol, ts_utc, open, high, low, close, volume)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            |stmt, b| {
                stmt.execute(params![
                    b.symbol, b.ts_utc, b.open, b.high, b.low, b.close, b.volume
                ])
            },
        )?;
        tracing::debug!(rows = written, "sqlite prices upserted");
        Ok(written)
    }

    fn upsert_indicators(&self, records: &[IndicatorRecord]) -> Result<usize, BatchWriteError> {
        let written = self.write_batch(
            records,
            |r| (r.symbol.as_str(), r.ts_utc),
            "INSERT OR REPLACE INTO indicators
                 (symbol, ts_utc, ma20, ma50, rsi14, is_30d_high, signal, updated_at_utc)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            |stmt, r| {
                stmt.execute(params![
                    r.symbol,
                    r.ts_utc,
                    r.ma20,
                    r.ma50,
                    r.rsi14,
                    r.is_30d_high,
                    r.signal,
                    r.updated_at
                ])
            },
        )?;
        tracing::debug!(rows = written, "sqlite indicators upserted");
        Ok(written)
    }

    fn query_price_history(
        &self,
        symbol: &str,
        since: Option<i64>,
    ) -> Result<Vec<PriceBar>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare_cached(
                "SELECT symbol, ts_utc, open, high, low, close, volume
                 FROM prices
                 WHERE symbol = ?1 AND ts_utc >= ?2
                 ORDER BY ts_utc ASC",
            )
            .map_err(map_sqlite)?;

        let rows = stmt
            .query_map(params![symbol, since.unwrap_or(i64::MIN)], |row| {
                Ok(PriceBar {
                    symbol: row.get(0)?,
                    ts_utc: row.get(1)?,
                    open: row.get(2)?,
                    high: row.get(3)?,
                    low: row.get(4)?,
                    close: row.get(5)?,
                    volume: row.get(6)?,
                })
            })
            .map_err(map_sqlite)?;

        rows.collect::<Result<Vec<_>, _>>().map_err(map_sqlite)
    }

    fn query_indicators(
        &self,
        symbol: &str,
        since: Option<i64>,
    ) -> Result<Vec<IndicatorRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare_cached(
                "SELECT symbol, ts_utc, ma20, ma50, rsi14, is_30d_high, signal, updated_at_utc
                 FROM indicators
                 WHERE symbol = ?1 AND ts_utc >= ?2
                 ORDER BY ts_utc ASC",
            )
            .map_err(map_sqlite)?;

        let rows = stmt
            .query_map(params![symbol, since.unwrap_or(i64::MIN)], |row| {
                Ok(IndicatorRecord {
                    symbol: row.get(0)?,
                    ts_utc: row.get(1)?,
                    ma20: row.get(2)?,
                    ma50: row.get(3)?,
                    rsi14: row.get(4)?,
                    is_30d_high: row.get(5)?,
                    signal: row.get(6)?,
                    updated_at: row.get(7)?,
                })
            })
            .map_err(map_sqlite)?;

        rows.collect::<Result<Vec<_>, _>>().map_err(map_sqlite)
    }

    fn query_symbols(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare_cached("SELECT DISTINCT symbol FROM prices ORDER BY symbol")
            .map_err(map_sqlite)?;
        let rows = stmt.query_map([], |row| row.get(0)).map_err(map_sqlite)?;
        rows.collect::<Result<Vec<String>, _>>().map_err(map_sqlite)
    }
}
