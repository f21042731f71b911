//! Symbol universe: the ordered list of tickers a run covers.
//!
//! Read from `[universe] symbols` (comma-separated) or from the file named by
//! `[universe] tickers_file`. The file is either a JSON array of tickers or
//! plain text with one ticker per line, where `#` starts a comment.

use crate::domain::error::WatchError;
use crate::ports::config_port::ConfigPort;
use std::collections::HashSet;
use std::fs;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Universe {
    pub symbols: Vec<String>,
}

impl Universe {
    pub fn count(&self) -> usize {
        self.symbols.len()
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum UniverseError {
    #[error("empty token in symbol list")]
    EmptyToken,

    #[error("duplicate symbol: {0}")]
    DuplicateSymbol(String),

    #[error("symbol list is empty")]
    Empty,

    #[error("invalid JSON ticker list: {0}")]
    InvalidJson(String),
}

fn collect_symbols<'a>(
    tokens: impl Iterator<Item = &'a str>,
) -> Result<Vec<String>, UniverseError> {
    let mut symbols = Vec::new();
    let mut seen = HashSet::new();

    for token in tokens {
        let symbol = token.trim().to_uppercase();
        if !seen.insert(symbol.clone()) {
            return Err(UniverseError::DuplicateSymbol(symbol));
        }
        symbols.push(symbol);
    }

    if symbols.is_empty() {
        return Err(UniverseError::Empty);
    }
    Ok(symbols)
}

pub fn parse_symbols(input: &str) -> Result<Vec<String>, UniverseError> {
    if input.split(',').any(|t| t.trim().is_empty()) {
        return Err(UniverseError::EmptyToken);
    }
    collect_symbols(input.split(','))
}

pub fn parse_ticker_lines(content: &str) -> Result<Vec<String>, UniverseError> {
    let tokens = content
        .lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty());
    collect_symbols(tokens)
}

/// Parses a tickers file. Content opening with `[` is read as a JSON array of
/// strings; anything else goes through [`parse_ticker_lines`].
pub fn parse_tickers_file(content: &str) -> Result<Vec<String>, UniverseError> {
    if !content.trim_start().starts_with('[') {
        return parse_ticker_lines(content);
    }
    let tickers: Vec<String> =
        serde_json::from_str(content).map_err(|e| UniverseError::InvalidJson(e.to_string()))?;
    if tickers.iter().any(|t| t.trim().is_empty()) {
        return Err(UniverseError::EmptyToken);
    }
    collect_symbols(tickers.iter().map(String::as_str))
}

pub fn load_universe(config: &dyn ConfigPort) -> Result<Universe, WatchError> {
    let to_watch_error = |e: UniverseError| WatchError::Universe {
        reason: e.to_string(),
    };

    if let Some(list) = config
        .get_string("universe", "symbols")
        .filter(|s| !s.trim().is_empty())
    {
        let symbols = parse_symbols(&list).map_err(to_watch_error)?;
        return Ok(Universe { symbols });
    }

    let path = config
        .get_string("universe", "tickers_file")
        .ok_or_else(|| WatchError::ConfigMissing {
            section: "universe".into(),
            key: "symbols or tickers_file".into(),
        })?;
    let content = fs::read_to_string(&path).map_err(|e| WatchError::Universe {
        reason: format!("failed to read {}: {}", path, e),
    })?;
    let symbols = parse_tickers_file(&content).map_err(to_watch_error)?;
    Ok(Universe { symbols })
}
