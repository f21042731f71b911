//! Domain error types.
//!
//! Each pipeline stage has its own error enum so the orchestrator can record
//! *which* stage failed and *how*, without string matching.

/// Errors raised while retrieving candles from the upstream provider.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    #[error("rate limited by provider")]
    RateLimited {
        /// Provider hint for the minimum wait before the next attempt.
        retry_after_secs: Option<u64>,
    },

    #[error("network error: {reason}")]
    NetworkError { reason: String },

    #[error("no data returned for {symbol}")]
    EmptyResult { symbol: String },
}

impl FetchError {
    /// Rate limits and network failures are worth another attempt; an empty
    /// result is an answer, not a failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::RateLimited { .. } | FetchError::NetworkError { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::RateLimited { .. } => "rate_limited",
            FetchError::NetworkError { .. } => "network_error",
            FetchError::EmptyResult { .. } => "empty_result",
        }
    }
}

/// Errors raised by a [`TimeSeriesStore`](crate::ports::store_port::TimeSeriesStore) backend.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("conflict: {reason}")]
    Conflict { reason: String },

    #[error("storage I/O failure: {reason}")]
    IoFailure { reason: String },
}

impl StoreError {
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::Conflict { .. } => "conflict",
            StoreError::IoFailure { .. } => "io_failure",
        }
    }
}

/// A batch upsert that did not complete.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{source} ({written} of {attempted} rows written)")]
pub struct BatchWriteError {
    pub written: usize,
    pub attempted: usize,
    #[source]
    pub source: StoreError,
}

impl BatchWriteError {
    /// Batch rejected as a whole; nothing was applied.
    pub fn none_written(attempted: usize, source: StoreError) -> Self {
        Self {
            written: 0,
            attempted,
            source,
        }
    }
}

/// Raised by the individual indicator helpers. The engine folds it into an
/// absent field; it never fails a write.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IndicatorError {
    #[error("insufficient history: need {needed} closes, have {available}")]
    InsufficientHistory { needed: usize, available: usize },
}

/// Top-level error type for the idxwatch shell (config, universe, storage setup).
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("universe error: {reason}")]
    Universe { reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<&WatchError> for std::process::ExitCode {
    fn from(err: &WatchError) -> Self {
        let code: u8 = match err {
            WatchError::Io(_) => 1,
            WatchError::ConfigParse { .. }
            | WatchError::ConfigMissing { .. }
            | WatchError::ConfigInvalid { .. }
            | WatchError::Universe { .. } => 2,
            WatchError::Store(_) => 3,
        };
        std::process::ExitCode::from(code)
    }
}
