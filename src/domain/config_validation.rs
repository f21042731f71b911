//! Configuration validation.
//!
//! Validates every field the pipeline reads before a run starts, so a bad
//! value fails the command up front instead of one symbol at a time.

use crate::domain::error::WatchError;
use crate::ports::config_port::ConfigPort;

pub const STORAGE_BACKENDS: [&str; 3] = ["sqlite", "csv", "postgres"];
pub const MAX_WORKERS: i64 = 8;
pub const MIN_WARMUP_DAYS: i64 = 50;

pub fn validate_pipeline_config(config: &dyn ConfigPort) -> Result<(), WatchError> {
    validate_storage_backend(config)?;
    validate_rsi_min(config)?;
    validate_high_windows(config)?;
    validate_workers(config)?;
    validate_warmup(config)?;
    validate_retry(config)?;
    Ok(())
}

fn invalid(section: &str, key: &str, reason: &str) -> WatchError {
    WatchError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn validate_storage_backend(config: &dyn ConfigPort) -> Result<(), WatchError> {
    let backend = config
        .get_string("storage", "backend")
        .unwrap_or_else(|| "sqlite".to_string())
        .to_lowercase();
    if !STORAGE_BACKENDS.contains(&backend.as_str()) {
        return Err(invalid(
            "storage",
            "backend",
            "backend must be one of sqlite, csv, postgres",
        ));
    }
    Ok(())
}

fn validate_rsi_min(config: &dyn ConfigPort) -> Result<(), WatchError> {
    let value = config.get_double("indicators", "rsi_min", 55.0);
    if !(0.0..=100.0).contains(&value) {
        return Err(invalid(
            "indicators",
            "rsi_min",
            "rsi_min must be between 0 and 100",
        ));
    }
    Ok(())
}

fn validate_high_windows(config: &dyn ConfigPort) -> Result<(), WatchError> {
    let lookback = config.get_int("indicators", "high_lookback", 30);
    if lookback < 1 {
        return Err(invalid(
            "indicators",
            "high_lookback",
            "high_lookback must be at least 1",
        ));
    }
    let within = config.get_int("indicators", "high_within_days", 5);
    if within < 1 || within > lookback {
        return Err(invalid(
            "indicators",
            "high_within_days",
            "high_within_days must be between 1 and high_lookback",
        ));
    }
    Ok(())
}

fn validate_workers(config: &dyn ConfigPort) -> Result<(), WatchError> {
    let workers = config.get_int("pipeline", "workers", 4);
    if !(1..=MAX_WORKERS).contains(&workers) {
        return Err(invalid(
            "pipeline",
            "workers",
            "workers must be between 1 and 8",
        ));
    }
    Ok(())
}

/// Warmup is counted in trading days and must cover the longest indicator
/// window: MA50 (which also covers the RSI seed) or the rolling-high lookback.
fn validate_warmup(config: &dyn ConfigPort) -> Result<(), WatchError> {
    let warmup = config.get_int("pipeline", "warmup_days", 120);
    let lookback = config.get_int("indicators", "high_lookback", 30);
    let required = MIN_WARMUP_DAYS.max(lookback);
    if warmup < required {
        return Err(invalid(
            "pipeline",
            "warmup_days",
            &format!("warmup_days must be at least {required} trading days"),
        ));
    }
    Ok(())
}

fn validate_retry(config: &dyn ConfigPort) -> Result<(), WatchError> {
    let attempts = config.get_int("fetch", "max_attempts", 3);
    if !(1..=10).contains(&attempts) {
        return Err(invalid(
            "fetch",
            "max_attempts",
            "max_attempts must be between 1 and 10",
        ));
    }
    let base = config.get_int("fetch", "base_delay_ms", 1_000);
    if base < 1 {
        return Err(invalid(
            "fetch",
            "base_delay_ms",
            "base_delay_ms must be positive",
        ));
    }
    let max = config.get_int("fetch", "max_delay_ms", 30_000);
    if max < base {
        return Err(invalid(
            "fetch",
            "max_delay_ms",
            "max_delay_ms must not be below base_delay_ms",
        ));
    }
    let jitter = config.get_double("fetch", "jitter_ratio", 0.25);
    if !(0.0..=1.0).contains(&jitter) {
        return Err(invalid(
            "fetch",
            "jitter_ratio",
            "jitter_ratio must be between 0 and 1",
        ));
    }
    if config.get_int("fetch", "deadline_secs", 60) < 1 {
        return Err(invalid(
            "fetch",
            "deadline_secs",
            "deadline_secs must be positive",
        ));
    }
    if config.get_int("fetch", "timeout_secs", 10) < 1 {
        return Err(invalid(
            "fetch",
            "timeout_secs",
            "timeout_secs must be positive",
        ));
    }
    Ok(())
}
