//! CLI definition and dispatch.
//!
//! Exit codes: 0 success, 1 I/O, 2 configuration or universe, 3 storage,
//! 5 when a run finished but at least one symbol failed.

use chrono::{DateTime, NaiveDate, NaiveTime};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use crate::adapters::csv_adapter::CsvStore;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::yahoo_adapter::YahooChartProvider;
use crate::domain::config_validation::validate_pipeline_config;
use crate::domain::error::WatchError;
use crate::domain::fetcher::MarketDataFetcher;
use crate::domain::indicator::{IndicatorEngine, IndicatorSettings};
use crate::domain::pipeline::{
    PipelineConfig, PipelineOrchestrator, RunMode, RunOptions, RunSummary, SymbolOutcome,
};
use crate::domain::price_bar::SECONDS_PER_DAY;
use crate::domain::retry::{RandomJitter, RetryPolicy, SystemClock};
use crate::domain::summary::{latest_summary, symbol_history, HistoryRow, SummaryRow};
use crate::domain::universe::load_universe;
use crate::ports::config_port::ConfigPort;
use crate::ports::store_port::TimeSeriesStore;

/// Exit code for a run where some symbols failed.
pub const EXIT_PARTIAL_FAILURE: u8 = 5;

#[derive(Parser, Debug)]
#[command(name = "idxwatch", about = "Price ingestion and daily indicator pipeline")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the storage schema and check the symbol universe
    Seed {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Fetch the latest candles and refresh indicators
    Fetch {
        #[arg(short, long)]
        config: PathBuf,
        /// Fetch this many days of history instead of only the latest bars
        #[arg(long)]
        days: Option<u32>,
        #[arg(long)]
        no_intraday: bool,
    },
    /// Re-fetch N days of history and recompute indicators over it
    Backfill {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        days: u32,
        #[arg(long)]
        no_intraday: bool,
    },
    /// List symbols with stored prices
    Symbols {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Show the latest close and indicators for every stored symbol
    Summary {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        signals_only: bool,
        /// Show the state as of the end of this UTC day (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Show recent daily closes and indicators for one symbol, newest first
    History {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        symbol: String,
        /// Number of trading days to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Seed { config } => run_seed(&config),
        Command::Fetch {
            config,
            days,
            no_intraday,
        } => {
            let mode = match days {
                Some(days) => RunMode::Backfill { days },
                None => RunMode::Incremental,
            };
            run_pipeline(&config, mode, no_intraday)
        }
        Command::Backfill {
            config,
            days,
            no_intraday,
        } => run_pipeline(&config, RunMode::Backfill { days }, no_intraday),
        Command::Symbols { config } => run_symbols(&config),
        Command::Summary {
            config,
            signals_only,
            date,
        } => run_summary(&config, signals_only, date),
        Command::History {
            config,
            symbol,
            limit,
        } => run_history(&config, &symbol, limit),
    }
}

fn report(err: &WatchError) -> ExitCode {
    eprintln!("error: {err}");
    err.into()
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|e| report(&e))
}

pub fn build_indicator_settings(config: &dyn ConfigPort) -> IndicatorSettings {
    let defaults = IndicatorSettings::default();
    IndicatorSettings {
        rsi_min: config.get_double("indicators", "rsi_min", defaults.rsi_min),
        high_lookback: config
            .get_int("indicators", "high_lookback", defaults.high_lookback as i64)
            .max(1) as usize,
        high_within_days: config
            .get_int("indicators", "high_within_days", defaults.high_within_days as i64)
            .max(1) as usize,
    }
}

pub fn build_retry_policy(config: &dyn ConfigPort) -> RetryPolicy {
    let millis = |key: &str, default: Duration| {
        Duration::from_millis(config.get_int("fetch", key, default.as_millis() as i64).max(0) as u64)
    };
    let defaults = RetryPolicy::default();
    RetryPolicy {
        max_attempts: config
            .get_int("fetch", "max_attempts", i64::from(defaults.max_attempts))
            .max(1) as u32,
        base_delay: millis("base_delay_ms", defaults.base_delay),
        max_delay: millis("max_delay_ms", defaults.max_delay),
        jitter_ratio: config.get_double("fetch", "jitter_ratio", defaults.jitter_ratio),
        deadline: Duration::from_secs(
            config
                .get_int("fetch", "deadline_secs", defaults.deadline.as_secs() as i64)
                .max(1) as u64,
        ),
    }
}

pub fn build_pipeline_config(config: &dyn ConfigPort) -> PipelineConfig {
    let defaults = PipelineConfig::default();
    PipelineConfig {
        include_intraday: config.get_bool("pipeline", "include_intraday", defaults.include_intraday),
        workers: config
            .get_int("pipeline", "workers", defaults.workers as i64)
            .max(1) as usize,
        warmup_days: config
            .get_int("pipeline", "warmup_days", i64::from(defaults.warmup_days))
            .max(0) as u32,
    }
}

/// Open the backend named by `[storage] backend` and make sure its schema
/// exists.
pub fn open_store(config: &dyn ConfigPort) -> Result<Arc<dyn TimeSeriesStore>, WatchError> {
    let backend = config
        .get_string("storage", "backend")
        .unwrap_or_else(|| "sqlite".to_string())
        .to_lowercase();

    match backend.as_str() {
        "csv" => {
            let store = CsvStore::from_config(config)?;
            store.initialize()?;
            Ok(Arc::new(store))
        }
        "sqlite" => {
            #[cfg(feature = "sqlite")]
            {
                use crate::adapters::sqlite_adapter::SqliteStore;
                let store = SqliteStore::from_config(config)?;
                store.initialize_schema()?;
                Ok(Arc::new(store))
            }
            #[cfg(not(feature = "sqlite"))]
            {
                Err(backend_not_built("sqlite"))
            }
        }
        "postgres" => {
            #[cfg(feature = "postgres")]
            {
                use crate::adapters::postgres_adapter::PostgresStore;
                let store = PostgresStore::from_config(config)?;
                store.initialize_schema()?;
                Ok(Arc::new(store))
            }
            #[cfg(not(feature = "postgres"))]
            {
                Err(backend_not_built("postgres"))
            }
        }
        other => Err(WatchError::ConfigInvalid {
            section: "storage".into(),
            key: "backend".into(),
            reason: format!("unknown backend {other:?}"),
        }),
    }
}

#[allow(dead_code)]
fn backend_not_built(name: &str) -> WatchError {
    WatchError::ConfigInvalid {
        section: "storage".into(),
        key: "backend".into(),
        reason: format!("built without {name} support"),
    }
}

fn run_seed(config_path: &Path) -> ExitCode {
    eprintln!("Loading config from {}", config_path.display());
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };
    if let Err(e) = validate_pipeline_config(&config) {
        return report(&e);
    }

    let universe = match load_universe(&config) {
        Ok(u) => u,
        Err(e) => return report(&e),
    };
    if let Err(e) = open_store(&config) {
        return report(&e);
    }

    eprintln!("Storage ready");
    eprintln!("Universe: {} symbols", universe.count());
    for symbol in &universe.symbols {
        println!("{symbol}");
    }
    ExitCode::SUCCESS
}

fn run_pipeline(config_path: &Path, mode: RunMode, no_intraday: bool) -> ExitCode {
    // Stage 1: Load and validate config
    eprintln!("Loading config from {}", config_path.display());
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };
    if let Err(e) = validate_pipeline_config(&config) {
        return report(&e);
    }

    // Stage 2: Universe, store and provider
    let universe = match load_universe(&config) {
        Ok(u) => u,
        Err(e) => return report(&e),
    };
    let store = match open_store(&config) {
        Ok(s) => s,
        Err(e) => return report(&e),
    };
    let provider = match YahooChartProvider::from_config(&config) {
        Ok(p) => p,
        Err(e) => return report(&e),
    };

    // Stage 3: Wire the pipeline
    let pipeline_config = build_pipeline_config(&config);
    let fetcher = MarketDataFetcher::new(
        Arc::new(provider),
        build_retry_policy(&config),
        Arc::new(SystemClock),
        Arc::new(RandomJitter),
    );
    let engine = IndicatorEngine::new(build_indicator_settings(&config));
    let orchestrator = PipelineOrchestrator::new(store, fetcher, engine, pipeline_config);
    let options = RunOptions {
        include_intraday: pipeline_config.include_intraday && !no_intraday,
    };

    // Stage 4: Run
    eprintln!(
        "Running {}: {} symbols, intraday {}",
        match mode {
            RunMode::Incremental => "incremental fetch".to_string(),
            RunMode::Backfill { days } => format!("backfill of {days} days"),
        },
        universe.count(),
        if options.include_intraday { "on" } else { "off" },
    );
    let summary = orchestrator.run(&universe.symbols, mode, options);
    print_run_summary(&summary);

    if summary.has_failures() {
        ExitCode::from(EXIT_PARTIAL_FAILURE)
    } else {
        ExitCode::SUCCESS
    }
}

fn print_run_summary(summary: &RunSummary) {
    eprintln!("\n=== Run Summary ===");
    eprintln!("Attempted:        {}", summary.attempted);
    eprintln!("Succeeded:        {}", summary.succeeded);
    eprintln!("Failed:           {}", summary.failed);
    eprintln!("Bars written:     {}", summary.bars_written);
    eprintln!("Indicators:       {}", summary.indicators_written);
    eprintln!("Duration:         {:.1}s", summary.duration.as_secs_f64());

    let failures: Vec<_> = summary
        .outcomes
        .iter()
        .filter_map(|r| match &r.outcome {
            SymbolOutcome::Failed {
                stage,
                kind,
                reason,
            } => Some((&r.symbol, stage, kind, reason)),
            _ => None,
        })
        .collect();
    if !failures.is_empty() {
        eprintln!("\n=== Failed Symbols ===");
        for (symbol, stage, kind, reason) in failures {
            eprintln!("  {symbol}: {stage}/{kind}: {reason}");
        }
    }
}

fn run_symbols(config_path: &Path) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };
    let store = match open_store(&config) {
        Ok(s) => s,
        Err(e) => return report(&e),
    };

    let symbols = match store.query_symbols() {
        Ok(s) => s,
        Err(e) => return report(&WatchError::from(e)),
    };
    if symbols.is_empty() {
        eprintln!("No symbols stored yet");
    } else {
        for symbol in &symbols {
            println!("{symbol}");
        }
        eprintln!("{} symbols found", symbols.len());
    }
    ExitCode::SUCCESS
}

fn run_summary(config_path: &Path, signals_only: bool, date: Option<NaiveDate>) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };
    let store = match open_store(&config) {
        Ok(s) => s,
        Err(e) => return report(&e),
    };

    let as_of = date.map(end_of_day_utc);
    let rows = match latest_summary(store.as_ref(), None, as_of) {
        Ok(rows) => rows,
        Err(e) => return report(&WatchError::from(e)),
    };

    let rows: Vec<&SummaryRow> = rows.iter().filter(|r| !signals_only || r.signal).collect();
    if rows.is_empty() {
        eprintln!("No data to summarize");
        return ExitCode::SUCCESS;
    }

    println!(
        "{:<12} {:>10} {:>8} {:>10} {:>10} {:>6} {:>5} {:>6}  {}",
        "SYMBOL", "CLOSE", "CHG%", "MA20", "MA50", "RSI14", "HIGH", "SIGNAL", "UPDATED (UTC)"
    );
    for row in rows {
        println!("{}", format_summary_row(row));
    }
    ExitCode::SUCCESS
}

fn run_history(config_path: &Path, symbol: &str, limit: usize) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };
    let store = match open_store(&config) {
        Ok(s) => s,
        Err(e) => return report(&e),
    };

    let symbol = symbol.trim().to_uppercase();
    let rows = match symbol_history(store.as_ref(), &symbol, limit) {
        Ok(rows) => rows,
        Err(e) => return report(&WatchError::from(e)),
    };
    if rows.is_empty() {
        eprintln!("No history stored for {symbol}");
        return ExitCode::SUCCESS;
    }

    println!(
        "{:<10} {:>10} {:>10} {:>10} {:>6} {:>5} {:>6}",
        "DATE", "CLOSE", "MA20", "MA50", "RSI14", "HIGH", "SIGNAL"
    );
    for row in &rows {
        println!("{}", format_history_row(row));
    }
    eprintln!("{} days shown for {symbol}", rows.len());
    ExitCode::SUCCESS
}

pub fn end_of_day_utc(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp() + SECONDS_PER_DAY - 1
}

fn opt(value: Option<f64>, precision: usize) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.precision$}"))
}

pub fn format_summary_row(row: &SummaryRow) -> String {
    let updated = DateTime::from_timestamp(row.updated_at, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{:<12} {:>10.2} {:>8} {:>10} {:>10} {:>6} {:>5} {:>6}  {}",
        row.symbol,
        row.last_close,
        opt(row.pct_change_1d, 2),
        opt(row.ma20, 2),
        opt(row.ma50, 2),
        opt(row.rsi14, 1),
        if row.is_30d_high { "yes" } else { "no" },
        if row.signal { "BUY" } else { "-" },
        updated,
    )
}

pub fn format_history_row(row: &HistoryRow) -> String {
    let date = DateTime::from_timestamp(row.day_ts, 0)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{:<10} {:>10.2} {:>10} {:>10} {:>6} {:>5} {:>6}",
        date,
        row.close,
        opt(row.ma20, 2),
        opt(row.ma50, 2),
        opt(row.rsi14, 1),
        if row.is_30d_high { "yes" } else { "no" },
        if row.signal { "BUY" } else { "-" },
    )
}
