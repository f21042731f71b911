#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use idxwatch::domain::error::FetchError;
use idxwatch::domain::fetcher::MarketDataFetcher;
use idxwatch::domain::indicator::{IndicatorEngine, IndicatorSettings};
use idxwatch::domain::pipeline::{PipelineConfig, PipelineOrchestrator};
use idxwatch::domain::price_bar::{FetchRange, Granularity, RawCandle, SECONDS_PER_DAY};
use idxwatch::domain::retry::{Clock, NoJitter, RetryPolicy};
use idxwatch::ports::market_data_port::MarketDataPort;
use idxwatch::ports::store_port::TimeSeriesStore;
use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 2024-03-01 00:00:00 UTC
pub const DAY0: i64 = 1_709_251_200;

/// Market close on the IDX is 09:00 UTC.
pub const CLOSE_OFFSET: i64 = 9 * 3_600;

pub fn day(n: i64) -> i64 {
    DAY0 + n * SECONDS_PER_DAY
}

pub struct FixedClock {
    now: i64,
}

impl FixedClock {
    pub fn at(now: i64) -> Self {
        Self { now }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.now, 0).unwrap()
    }

    fn sleep(&self, _duration: Duration) {}
}

type Key = (String, Granularity);

#[derive(Default)]
pub struct MockProvider {
    responses: HashMap<Key, Result<Vec<RawCandle>, FetchError>>,
    pub requests: Mutex<Vec<(String, Granularity, FetchRange)>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_candles(mut self, symbol: &str, granularity: Granularity, candles: Vec<RawCandle>) -> Self {
        self.responses
            .insert((symbol.to_string(), granularity), Ok(candles));
        self
    }

    pub fn with_error(mut self, symbol: &str, granularity: Granularity, err: FetchError) -> Self {
        self.responses
            .insert((symbol.to_string(), granularity), Err(err));
        self
    }

    pub fn request_count(&self, symbol: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _, _)| s == symbol)
            .count()
    }
}

impl MarketDataPort for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn get_candles(
        &self,
        symbol: &str,
        granularity: Granularity,
        range: FetchRange,
    ) -> Result<Vec<RawCandle>, FetchError> {
        self.requests
            .lock()
            .unwrap()
            .push((symbol.to_string(), granularity, range));
        self.responses
            .get(&(symbol.to_string(), granularity))
            .cloned()
            .unwrap_or_else(|| {
                Err(FetchError::EmptyResult {
                    symbol: symbol.to_string(),
                })
            })
    }
}

pub fn candle(ts_utc: i64, close: f64) -> RawCandle {
    RawCandle {
        ts_utc,
        open: Some(close),
        high: Some(close + 1.0),
        low: Some(close - 1.0),
        close: Some(close),
        volume: Some(10_000.0),
    }
}

/// One daily candle per day starting at `DAY0`, stamped at market close.
pub fn daily_candles(closes: &[f64]) -> Vec<RawCandle> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| candle(day(i as i64) + CLOSE_OFFSET, c))
        .collect()
}

/// Steady climb from `start` by `step` per day.
pub fn trending_closes(count: usize, start: f64, step: f64) -> Vec<f64> {
    (0..count).map(|i| start + step * i as f64).collect()
}

pub fn fast_retry_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        jitter_ratio: 0.0,
        deadline: Duration::from_secs(60),
    }
}

pub fn orchestrator(
    store: Arc<dyn TimeSeriesStore>,
    provider: Arc<MockProvider>,
    now: i64,
    workers: usize,
) -> PipelineOrchestrator {
    let fetcher = MarketDataFetcher::new(
        provider,
        fast_retry_policy(),
        Arc::new(FixedClock::at(now)),
        Arc::new(NoJitter),
    );
    PipelineOrchestrator::new(
        store,
        fetcher,
        IndicatorEngine::new(IndicatorSettings::default()),
        PipelineConfig {
            include_intraday: true,
            workers,
            warmup_days: 120,
        },
    )
}

pub fn write_temp_ini(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

pub fn symbols(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}
