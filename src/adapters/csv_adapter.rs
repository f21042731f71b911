//! Flat-file time-series store: one CSV per symbol for prices and one for
//! indicators, under `<base>/prices/` and `<base>/indicators/`.

use crate::domain::error::{BatchWriteError, StoreError, WatchError};
use crate::domain::indicator::IndicatorRecord;
use crate::domain::price_bar::PriceBar;
use crate::ports::config_port::ConfigPort;
use crate::ports::store_port::{validate_key, TimeSeriesStore};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const PRICES_DIR: &str = "prices";
const INDICATORS_DIR: &str = "indicators";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PriceRow {
    symbol: String,
    ts_utc: i64,
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    close: Option<f64>,
    volume: f64,
}

impl From<&PriceBar> for PriceRow {
    fn from(b: &PriceBar) -> Self {
        Self {
            symbol: b.symbol.clone(),
            ts_utc: b.ts_utc,
            open: b.open,
            high: b.high,
            low: b.low,
            close: b.close,
            volume: b.volume,
        }
    }
}

impl From<PriceRow> for PriceBar {
    fn from(r: PriceRow) -> Self {
        Self {
            symbol: r.symbol,
            ts_utc: r.ts_utc,
            open: r.open,
            high: r.high,
            low: r.low,
            close: r.close,
            volume: r.volume,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndicatorRow {
    symbol: String,
    ts_utc: i64,
    ma20: Option<f64>,
    ma50: Option<f64>,
    rsi14: Option<f64>,
    is_30d_high: bool,
    signal: bool,
    updated_at_utc: i64,
}

impl From<&IndicatorRecord> for IndicatorRow {
    fn from(r: &IndicatorRecord) -> Self {
        Self {
            symbol: r.symbol.clone(),
            ts_utc: r.ts_utc,
            ma20: r.ma20,
            ma50: r.ma50,
            rsi14: r.rsi14,
            is_30d_high: r.is_30d_high,
            signal: r.signal,
            updated_at_utc: r.updated_at,
        }
    }
}

impl From<IndicatorRow> for IndicatorRecord {
    fn from(r: IndicatorRow) -> Self {
        Self {
            symbol: r.symbol,
            ts_utc: r.ts_utc,
            ma20: r.ma20,
            ma50: r.ma50,
            rsi14: r.rsi14,
            is_30d_high: r.is_30d_high,
            signal: r.signal,
            updated_at: r.updated_at_utc,
        }
    }
}

trait Keyed {
    fn key(&self) -> (&str, i64);
}

impl Keyed for PriceRow {
    fn key(&self) -> (&str, i64) {
        (&self.symbol, self.ts_utc)
    }
}

impl Keyed for IndicatorRow {
    fn key(&self) -> (&str, i64) {
        (&self.symbol, self.ts_utc)
    }
}

fn io_failure(path: &Path, e: impl std::fmt::Display) -> StoreError {
    StoreError::IoFailure {
        reason: format!("{}: {}", path.display(), e),
    }
}

pub struct CsvStore {
    base_path: PathBuf,
    /// Serializes read-modify-write cycles across threads.
    write_lock: Mutex<()>,
}

impl CsvStore {
    pub fn new(base_path: PathBuf) -> Self {
        Self {
            base_path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, WatchError> {
        let dir = config
            .get_string("storage", "csv_dir")
            .ok_or_else(|| WatchError::ConfigMissing {
                section: "storage".into(),
                key: "csv_dir".into(),
            })?;
        Ok(Self::new(PathBuf::from(dir)))
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        for sub in [PRICES_DIR, INDICATORS_DIR] {
            let dir = self.base_path.join(sub);
            fs::create_dir_all(&dir).map_err(|e| io_failure(&dir, e))?;
        }
        Ok(())
    }

    fn csv_path(&self, sub: &str, symbol: &str) -> PathBuf {
        self.base_path.join(sub).join(format!("{}.csv", symbol))
    }

    /// A missing file reads as no rows.
    fn read_rows<R: DeserializeOwned>(path: &Path) -> Result<Vec<R>, StoreError> {
        let mut rdr = match csv::Reader::from_path(path) {
            Ok(r) => r,
            Err(e) => {
                if let csv::ErrorKind::Io(io_err) = e.kind() {
                    if io_err.kind() == io::ErrorKind::NotFound {
                        return Ok(Vec::new());
                    }
                }
                return Err(io_failure(path, e));
            }
        };
        rdr.deserialize()
            .collect::<Result<Vec<R>, _>>()
            .map_err(|e| io_failure(path, e))
    }

    fn write_temp<R: Serialize>(path: &Path, rows: &[R]) -> Result<PathBuf, StoreError> {
        let dir = path.parent().unwrap_or(Path::new("."));
        fs::create_dir_all(dir).map_err(|e| io_failure(dir, e))?;

        let tmp = path.with_extension("csv.tmp");
        let result = (|| -> Result<(), csv::Error> {
            let mut wtr = csv::Writer::from_path(&tmp)?;
            for row in rows {
                wtr.serialize(row)?;
            }
            wtr.flush()?;
            Ok(())
        })();
        match result {
            Ok(()) => Ok(tmp),
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                Err(io_failure(&tmp, e))
            }
        }
    }

    /// Merge `rows` into the per-symbol files under `sub`. Every file is
    /// staged to a temp file before any rename, so a staging failure leaves
    /// all files untouched.
    fn upsert_rows<R>(&self, sub: &str, rows: Vec<R>) -> Result<usize, BatchWriteError>
    where
        R: Keyed + Serialize + DeserializeOwned,
    {
        let attempted = rows.len();
        let fail = |e: StoreError| BatchWriteError::none_written(attempted, e);

        for row in &rows {
            let (symbol, ts) = row.key();
            validate_key(symbol, ts).map_err(fail)?;
        }
        if rows.is_empty() {
            return Ok(0);
        }

        let mut by_symbol: BTreeMap<String, Vec<R>> = BTreeMap::new();
        for row in rows {
            by_symbol.entry(row.key().0.to_string()).or_default().push(row);
        }

        let _guard = self.write_lock.lock().map_err(|_| {
            fail(StoreError::IoFailure {
                reason: "csv write lock poisoned".into(),
            })
        })?;

        let mut staged: Vec<(PathBuf, PathBuf, usize)> = Vec::with_capacity(by_symbol.len());
        for (symbol, new_rows) in by_symbol {
            let path = self.csv_path(sub, &symbol);
            let incoming: BTreeMap<i64, R> =
                new_rows.into_iter().map(|r| (r.key().1, r)).collect();
            let count = incoming.len();
            let merged = Self::read_rows::<R>(&path).map(|existing| {
                let mut by_ts: BTreeMap<i64, R> =
                    existing.into_iter().map(|r| (r.key().1, r)).collect();
                by_ts.extend(incoming);
                by_ts.into_values().collect::<Vec<R>>()
            });
            match merged.and_then(|rows| Self::write_temp(&path, &rows)) {
                Ok(tmp) => staged.push((tmp, path, count)),
                Err(e) => {
                    for (tmp, _, _) in &staged {
                        let _ = fs::remove_file(tmp);
                    }
                    return Err(fail(e));
                }
            }
        }

        let mut written = 0;
        let mut staged = staged.into_iter();
        while let Some((tmp, path, count)) = staged.next() {
            if let Err(e) = fs::rename(&tmp, &path) {
                let _ = fs::remove_file(&tmp);
                for (rest, _, _) in staged {
                    let _ = fs::remove_file(rest);
                }
                return Err(BatchWriteError {
                    written,
                    attempted,
                    source: io_failure(&path, e),
                });
            }
            written += count;
        }

        tracing::debug!(dir = sub, rows = written, "csv rows upserted");
        Ok(written)
    }

    fn query_rows<R: Keyed + DeserializeOwned>(
        &self,
        sub: &str,
        symbol: &str,
        since: Option<i64>,
    ) -> Result<Vec<R>, StoreError> {
        let mut rows: Vec<R> = Self::read_rows(&self.csv_path(sub, symbol))?;
        if let Some(since) = since {
            rows.retain(|r| r.key().1 >= since);
        }
        rows.sort_by_key(|r| r.key().1);
        Ok(rows)
    }
}

impl TimeSeriesStore for CsvStore {
    fn upsert_prices(&self, bars: &[PriceBar]) -> Result<usize, BatchWriteError> {
        self.upsert_rows(PRICES_DIR, bars.iter().map(PriceRow::from).collect())
    }

    fn upsert_indicators(&self, records: &[IndicatorRecord]) -> Result<usize, BatchWriteError> {
        self.upsert_rows(
            INDICATORS_DIR,
            records.iter().map(IndicatorRow::from).collect(),
        )
    }

    fn query_price_history(
        &self,
        symbol: &str,
        since: Option<i64>,
    ) -> Result<Vec<PriceBar>, StoreError> {
        let rows: Vec<PriceRow> = self.query_rows(PRICES_DIR, symbol, since)?;
        Ok(rows.into_iter().map(PriceBar::from).collect())
    }

    fn query_indicators(
        &self,
        symbol: &str,
        since: Option<i64>,
    ) -> Result<Vec<IndicatorRecord>, StoreError> {
        let rows: Vec<IndicatorRow> = self.query_rows(INDICATORS_DIR, symbol, since)?;
        Ok(rows.into_iter().map(IndicatorRecord::from).collect())
    }

    fn query_symbols(&self) -> Result<Vec<String>, StoreError> {
        let dir = self.base_path.join(PRICES_DIR);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_failure(&dir, e)),
        };

        let mut symbols = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_failure(&dir, e))?;
            let name = entry.file_name();
            let name_str = name.to_string_lossy();
            if let Some(symbol) = name_str.strip_suffix(".csv") {
                symbols.push(symbol.to_string());
            }
        }

        symbols.sort();
        Ok(symbols)
    }
}
