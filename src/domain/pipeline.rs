//! Pipeline orchestrator: fetch, store, compute and store indicators for each
//! symbol of the universe, isolating failures per symbol.

use crate::domain::error::{BatchWriteError, FetchError, StoreError};
use crate::domain::fetcher::MarketDataFetcher;
use crate::domain::indicator::IndicatorEngine;
use crate::domain::price_bar::{
    daily_closes, day_start, DailyClose, FetchRange, Granularity, PriceBar, SECONDS_PER_DAY,
};
use crate::ports::store_port::TimeSeriesStore;
use rayon::prelude::*;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Intraday history the provider serves for hourly candles.
pub const MAX_INTRADAY_BACKFILL_DAYS: u32 = 7;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineConfig {
    pub include_intraday: bool,
    pub workers: usize,
    /// Trading days (daily closes) of history loaded before the first day
    /// written. Never less than the engine's longest window.
    pub warmup_days: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            include_intraday: true,
            workers: 4,
            warmup_days: 120,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Incremental,
    Backfill { days: u32 },
}

impl RunMode {
    fn ranges(self) -> (FetchRange, FetchRange) {
        match self {
            RunMode::Incremental => (FetchRange::LatestOnly, FetchRange::LatestOnly),
            RunMode::Backfill { days } => (
                FetchRange::Days(days),
                FetchRange::Days(days.min(MAX_INTRADAY_BACKFILL_DAYS)),
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub include_intraday: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    /// Writing price bars.
    Store,
    /// Reading history back, computing and writing indicator records.
    Indicators,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Fetch => write!(f, "fetch"),
            Stage::Store => write!(f, "store"),
            Stage::Indicators => write!(f, "indicators"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SymbolOutcome {
    Updated { bars: usize, indicators: usize },
    NoNewData,
    Failed {
        stage: Stage,
        kind: &'static str,
        reason: String,
    },
}

impl SymbolOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, SymbolOutcome::Failed { .. })
    }

    fn from_fetch(err: FetchError) -> Self {
        SymbolOutcome::Failed {
            stage: Stage::Fetch,
            kind: err.kind(),
            reason: err.to_string(),
        }
    }

    fn from_batch(stage: Stage, err: BatchWriteError) -> Self {
        SymbolOutcome::Failed {
            stage,
            kind: err.source.kind(),
            reason: err.to_string(),
        }
    }

    fn from_store(stage: Stage, err: StoreError) -> Self {
        SymbolOutcome::Failed {
            stage,
            kind: err.kind(),
            reason: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SymbolReport {
    pub symbol: String,
    pub outcome: SymbolOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// In universe order.
    pub outcomes: Vec<SymbolReport>,
    pub bars_written: usize,
    pub indicators_written: usize,
    pub duration: Duration,
}

impl RunSummary {
    fn from_reports(outcomes: Vec<SymbolReport>, duration: Duration) -> Self {
        let mut summary = RunSummary {
            attempted: outcomes.len(),
            succeeded: 0,
            failed: 0,
            outcomes: Vec::new(),
            bars_written: 0,
            indicators_written: 0,
            duration,
        };
        for report in &outcomes {
            match report.outcome {
                SymbolOutcome::Updated { bars, indicators } => {
                    summary.succeeded += 1;
                    summary.bars_written += bars;
                    summary.indicators_written += indicators;
                }
                SymbolOutcome::NoNewData => summary.succeeded += 1,
                SymbolOutcome::Failed { .. } => summary.failed += 1,
            }
        }
        summary.outcomes = outcomes;
        summary
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    pub fn outcome_for(&self, symbol: &str) -> Option<&SymbolOutcome> {
        self.outcomes
            .iter()
            .find(|r| r.symbol == symbol)
            .map(|r| &r.outcome)
    }
}

pub struct PipelineOrchestrator {
    store: Arc<dyn TimeSeriesStore>,
    fetcher: MarketDataFetcher,
    engine: IndicatorEngine,
    config: PipelineConfig,
}

impl PipelineOrchestrator {
    pub fn new(
        store: Arc<dyn TimeSeriesStore>,
        fetcher: MarketDataFetcher,
        engine: IndicatorEngine,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            fetcher,
            engine,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Process every symbol once. Never fails as a whole: each symbol's
    /// failure is recorded in its own outcome.
    pub fn run(&self, symbols: &[String], mode: RunMode, options: RunOptions) -> RunSummary {
        let started = Instant::now();
        tracing::info!(
            symbols = symbols.len(),
            ?mode,
            include_intraday = options.include_intraday,
            workers = self.config.workers,
            "pipeline run started"
        );

        let process = |symbol: &String| SymbolReport {
            symbol: symbol.clone(),
            outcome: self.process_symbol(symbol, mode, options),
        };

        let reports: Vec<SymbolReport> = if self.config.workers <= 1 {
            symbols.iter().map(process).collect()
        } else {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.workers)
                .build()
            {
                Ok(pool) => pool.install(|| symbols.par_iter().map(process).collect()),
                Err(e) => {
                    tracing::warn!(error = %e, "worker pool unavailable, running sequentially");
                    symbols.iter().map(process).collect()
                }
            }
        };

        let summary = RunSummary::from_reports(reports, started.elapsed());
        tracing::info!(
            attempted = summary.attempted,
            succeeded = summary.succeeded,
            failed = summary.failed,
            bars = summary.bars_written,
            indicators = summary.indicators_written,
            elapsed_ms = summary.duration.as_millis() as u64,
            "pipeline run finished"
        );
        summary
    }

    fn process_symbol(&self, symbol: &str, mode: RunMode, options: RunOptions) -> SymbolOutcome {
        let outcome = self.try_process_symbol(symbol, mode, options);
        match &outcome {
            SymbolOutcome::Updated { bars, indicators } => {
                tracing::info!(symbol, bars, indicators, "symbol updated");
            }
            SymbolOutcome::NoNewData => tracing::info!(symbol, "no new data"),
            SymbolOutcome::Failed {
                stage,
                kind,
                reason,
            } => tracing::error!(symbol, %stage, kind, reason = reason.as_str(), "symbol failed"),
        }
        outcome
    }

    fn try_process_symbol(
        &self,
        symbol: &str,
        mode: RunMode,
        options: RunOptions,
    ) -> SymbolOutcome {
        let now = self.fetcher.clock().now().timestamp();
        let (daily_range, intraday_range) = mode.ranges();

        let mut fetched: Vec<Vec<PriceBar>> = Vec::with_capacity(2);
        match self.fetcher.fetch(symbol, Granularity::Daily, daily_range) {
            Ok(bars) => fetched.push(bars),
            Err(FetchError::EmptyResult { .. }) => {}
            Err(e) => return SymbolOutcome::from_fetch(e),
        }
        if options.include_intraday {
            match self
                .fetcher
                .fetch(symbol, Granularity::Intraday, intraday_range)
            {
                Ok(bars) => fetched.push(bars),
                Err(FetchError::EmptyResult { .. }) => {}
                Err(e) => return SymbolOutcome::from_fetch(e),
            }
        }

        let bars = merge_bars(fetched);
        let Some(earliest) = bars.first().map(|b| b.ts_utc) else {
            return SymbolOutcome::NoNewData;
        };

        let bars_written = match self.store.upsert_prices(&bars) {
            Ok(n) => n,
            Err(e) => return SymbolOutcome::from_batch(Stage::Store, e),
        };

        let write_from = match mode {
            RunMode::Incremental => day_start(earliest),
            RunMode::Backfill { days } => day_start(now - i64::from(days) * SECONDS_PER_DAY),
        };
        let history = match self.store.query_price_history(symbol, None) {
            Ok(h) => h,
            Err(e) => return SymbolOutcome::from_store(Stage::Indicators, e),
        };
        let stored: HashSet<i64> = match self.store.query_indicators(symbol, None) {
            Ok(records) => records.into_iter().map(|r| r.ts_utc).collect(),
            Err(e) => return SymbolOutcome::from_store(Stage::Indicators, e),
        };

        let closes = daily_closes(&history);
        let first_day = closes
            .iter()
            .map(|d| d.day_ts)
            .find(|day| *day < write_from && !stored.contains(day))
            .unwrap_or(write_from);
        let warmup = (self.config.warmup_days as usize)
            .max(self.engine.settings().required_closes());
        let window = trailing_window(history, &closes, first_day, warmup);

        let records: Vec<_> = self
            .engine
            .compute(symbol, &window, now)
            .into_iter()
            .filter(|r| r.ts_utc >= write_from || !stored.contains(&r.ts_utc))
            .collect();

        let indicators_written = if records.is_empty() {
            0
        } else {
            match self.store.upsert_indicators(&records) {
                Ok(n) => n,
                Err(e) => return SymbolOutcome::from_batch(Stage::Indicators, e),
            }
        };

        SymbolOutcome::Updated {
            bars: bars_written,
            indicators: indicators_written,
        }
    }
}

/// Bars from `warmup` trading days before `first_day` onward, so every day
/// from `first_day` sees its full trailing window.
fn trailing_window(
    mut history: Vec<PriceBar>,
    closes: &[DailyClose],
    first_day: i64,
    warmup: usize,
) -> Vec<PriceBar> {
    let first_idx = closes.partition_point(|d| d.day_ts < first_day);
    let start = closes
        .get(first_idx.saturating_sub(warmup))
        .map_or(first_day, |d| d.day_ts);
    history.retain(|b| b.ts_utc >= start);
    history
}

/// Merge fetch results into one ascending batch, later results overwriting
/// earlier ones on the same timestamp.
fn merge_bars(batches: Vec<Vec<PriceBar>>) -> Vec<PriceBar> {
    let mut by_ts = BTreeMap::new();
    for bar in batches.into_iter().flatten() {
        by_ts.insert(bar.ts_utc, bar);
    }
    by_ts.into_values().collect()
}
