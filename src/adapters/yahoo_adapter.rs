//! Yahoo Finance chart provider.
//!
//! Requests candles from the v8 chart API (`interval=1d` or `interval=60m`
//! between `period1` and `period2`). One HTTP request per call; retries are
//! the fetcher's job. Status codes map onto [`FetchError`]:
//!
//! - 429 → `RateLimited`, carrying `Retry-After` when it is given in seconds
//! - 5xx, connect and timeout failures, unreadable bodies → `NetworkError`
//! - 404, `"Not Found"` chart errors, no result or no timestamps → `EmptyResult`

use crate::domain::error::{FetchError, WatchError};
use crate::domain::price_bar::{FetchRange, Granularity, RawCandle, SECONDS_PER_DAY};
use crate::ports::config_port::ConfigPort;
use crate::ports::market_data_port::MarketDataPort;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";

/// Window requested for `FetchRange::LatestOnly`, wide enough to cover a
/// weekend or a public holiday.
const LATEST_DAILY_DAYS: i64 = 5;
const LATEST_INTRADAY_DAYS: i64 = 2;

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) idxwatch";

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<QuoteData>,
}

#[derive(Debug, Default, Deserialize)]
struct QuoteData {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

pub struct YahooChartProvider {
    client: reqwest::blocking::Client,
    base_url: Url,
}

impl YahooChartProvider {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, WatchError> {
        let invalid = |reason: String| WatchError::ConfigInvalid {
            section: "provider".into(),
            key: "base_url".into(),
            reason,
        };
        let base_url = Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(invalid("URL cannot carry a path".into()));
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| WatchError::Io(std::io::Error::other(e)))?;

        Ok(Self { client, base_url })
    }

    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, WatchError> {
        let base_url = config
            .get_string("provider", "base_url")
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let timeout_secs = config.get_int("fetch", "timeout_secs", 10).max(1) as u64;
        Self::new(&base_url, Duration::from_secs(timeout_secs))
    }

    fn chart_url(&self, symbol: &str, granularity: Granularity, range: FetchRange, now: i64) -> Url {
        let (interval, latest_days) = match granularity {
            Granularity::Daily => ("1d", LATEST_DAILY_DAYS),
            Granularity::Intraday => ("60m", LATEST_INTRADAY_DAYS),
        };
        let days = match range {
            FetchRange::LatestOnly => latest_days,
            FetchRange::Days(n) => i64::from(n.max(1)),
        };
        let period1 = now - days * SECONDS_PER_DAY;

        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(symbol);
        }
        url.query_pairs_mut()
            .append_pair("interval", interval)
            .append_pair("period1", &period1.to_string())
            .append_pair("period2", &now.to_string());
        url
    }
}

fn retry_after_secs(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

fn parse_chart(symbol: &str, body: &str) -> Result<Vec<RawCandle>, FetchError> {
    let empty = || FetchError::EmptyResult {
        symbol: symbol.to_string(),
    };

    let response: ChartResponse =
        serde_json::from_str(body).map_err(|e| FetchError::NetworkError {
            reason: format!("unreadable chart response for {symbol}: {e}"),
        })?;

    if let Some(err) = response.chart.error {
        if err.code == "Not Found" {
            return Err(empty());
        }
        return Err(FetchError::NetworkError {
            reason: format!("{}: {}", err.code, err.description),
        });
    }

    let data = response
        .chart
        .result
        .and_then(|r| r.into_iter().next())
        .ok_or_else(empty)?;
    let timestamps = data.timestamp.filter(|t| !t.is_empty()).ok_or_else(empty)?;
    let quote = data.indicators.quote.into_iter().next().unwrap_or_default();

    let at = |v: &Vec<Option<f64>>, i: usize| v.get(i).copied().flatten();
    Ok(timestamps
        .iter()
        .enumerate()
        .map(|(i, &ts)| RawCandle {
            ts_utc: ts,
            open: at(&quote.open, i),
            high: at(&quote.high, i),
            low: at(&quote.low, i),
            close: at(&quote.close, i),
            volume: at(&quote.volume, i),
        })
        .collect())
}

impl MarketDataPort for YahooChartProvider {
    fn name(&self) -> &str {
        "yahoo_chart"
    }

    fn get_candles(
        &self,
        symbol: &str,
        granularity: Granularity,
        range: FetchRange,
    ) -> Result<Vec<RawCandle>, FetchError> {
        let now = chrono::Utc::now().timestamp();
        let url = self.chart_url(symbol, granularity, range, now);
        tracing::debug!(symbol, %granularity, url = url.as_str(), "requesting chart");

        let resp = self
            .client
            .get(url)
            .send()
            .map_err(|e| FetchError::NetworkError {
                reason: if e.is_timeout() {
                    format!("request timed out: {e}")
                } else if e.is_connect() {
                    format!("connection failed: {e}")
                } else {
                    e.to_string()
                },
            })?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::RateLimited {
                retry_after_secs: retry_after_secs(resp.headers()),
            });
        }
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::EmptyResult {
                symbol: symbol.to_string(),
            });
        }
        if !status.is_success() {
            return Err(FetchError::NetworkError {
                reason: format!("HTTP {status} for {symbol}"),
            });
        }

        let body = resp.text().map_err(|e| FetchError::NetworkError {
            reason: format!("failed to read response for {symbol}: {e}"),
        })?;
        parse_chart(symbol, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_705_300_000;

    fn provider() -> YahooChartProvider {
        YahooChartProvider::new(DEFAULT_BASE_URL, Duration::from_secs(5)).unwrap()
    }

    fn query(url: &Url, key: &str) -> Option<String> {
        url.query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    #[test]
    fn daily_latest_url() {
        let url = provider().chart_url("BBCA.JK", Granularity::Daily, FetchRange::LatestOnly, NOW);
        assert_eq!(url.path(), "/v8/finance/chart/BBCA.JK");
        assert_eq!(query(&url, "interval").as_deref(), Some("1d"));
        assert_eq!(query(&url, "period2"), Some(NOW.to_string()));
        assert_eq!(
            query(&url, "period1"),
            Some((NOW - 5 * SECONDS_PER_DAY).to_string())
        );
    }

    #[test]
    fn intraday_backfill_url() {
        let url = provider().chart_url("TLKM.JK", Granularity::Intraday, FetchRange::Days(7), NOW);
        assert_eq!(query(&url, "interval").as_deref(), Some("60m"));
        assert_eq!(
            query(&url, "period1"),
            Some((NOW - 7 * SECONDS_PER_DAY).to_string())
        );
    }

    #[test]
    fn symbol_is_one_path_segment() {
        let url = provider().chart_url("A/B", Granularity::Daily, FetchRange::Days(1), NOW);
        assert!(url.path().ends_with("/A%2FB"));
    }

    #[test]
    fn trailing_slash_base_url() {
        let p = YahooChartProvider::new("http://localhost:8080/chart/", Duration::from_secs(1)).unwrap();
        let url = p.chart_url("BBRI.JK", Granularity::Daily, FetchRange::LatestOnly, NOW);
        assert_eq!(url.path(), "/chart/BBRI.JK");
    }

    #[test]
    fn invalid_base_url() {
        assert!(matches!(
            YahooChartProvider::new("not a url", Duration::from_secs(1)),
            Err(WatchError::ConfigInvalid { .. })
        ));
    }

    #[test]
    fn parses_chart_with_gaps() {
        let body = r#"{
            "chart": {
                "result": [{
                    "meta": {"symbol": "BBCA.JK"},
                    "timestamp": [1705276800, 1705363200, 1705449600],
                    "indicators": {
                        "quote": [{
                            "open":   [9500.0, null, 9600.0],
                            "high":   [9550.0, null, 9700.0],
                            "low":    [9450.0, null, 9575.0],
                            "close":  [9525.0, null, 9650.0],
                            "volume": [120000, null, 98000]
                        }]
                    }
                }],
                "error": null
            }
        }"#;
        let candles = parse_chart("BBCA.JK", body).unwrap();
        assert_eq!(candles.len(), 3);
        assert_eq!(candles[0].close, Some(9525.0));
        assert_eq!(candles[0].volume, Some(120_000.0));
        assert_eq!(candles[1].close, None);
        assert_eq!(candles[2].ts_utc, 1_705_449_600);
    }

    #[test]
    fn not_found_is_empty_result() {
        let body = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#;
        assert!(matches!(
            parse_chart("XXXX.JK", body),
            Err(FetchError::EmptyResult { .. })
        ));
    }

    #[test]
    fn other_chart_error_is_network_error() {
        let body = r#"{"chart":{"result":null,"error":{"code":"Internal Server Error","description":"boom"}}}"#;
        assert!(matches!(
            parse_chart("BBCA.JK", body),
            Err(FetchError::NetworkError { .. })
        ));
    }

    #[test]
    fn missing_timestamps_is_empty_result() {
        let body = r#"{"chart":{"result":[{"indicators":{"quote":[{}]}}],"error":null}}"#;
        assert!(matches!(
            parse_chart("BBCA.JK", body),
            Err(FetchError::EmptyResult { .. })
        ));
    }

    #[test]
    fn garbage_body_is_network_error() {
        assert!(matches!(
            parse_chart("BBCA.JK", "<html>captcha</html>"),
            Err(FetchError::NetworkError { .. })
        ));
    }

    #[test]
    fn retry_after_header() {
        let mut headers = reqwest::header::HeaderMap::new();
        assert_eq!(retry_after_secs(&headers), None);
        headers.insert(reqwest::header::RETRY_AFTER, "17".parse().unwrap());
        assert_eq!(retry_after_secs(&headers), Some(17));
    }
}
