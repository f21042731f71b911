//! Market data fetcher: retry with backoff around a [`MarketDataPort`], then
//! clean the result into an ascending, deduplicated bar sequence.

use crate::domain::error::FetchError;
use crate::domain::price_bar::{FetchRange, Granularity, PriceBar, RawCandle};
use crate::domain::retry::{Clock, Jitter, RetryPolicy};
use crate::ports::market_data_port::MarketDataPort;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub struct MarketDataFetcher {
    provider: Arc<dyn MarketDataPort>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    jitter: Arc<dyn Jitter>,
}

impl MarketDataFetcher {
    pub fn new(
        provider: Arc<dyn MarketDataPort>,
        policy: RetryPolicy,
        clock: Arc<dyn Clock>,
        jitter: Arc<dyn Jitter>,
    ) -> Self {
        Self {
            provider,
            policy,
            clock,
            jitter,
        }
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Fetch bars for one symbol.
    ///
    /// Fails with the last retryable error once `max_attempts` is used up, with
    /// `NetworkError` when a provider call returns after the deadline or the
    /// next sleep would cross it, and with `EmptyResult` when nothing usable
    /// comes back.
    pub fn fetch(
        &self,
        symbol: &str,
        granularity: Granularity,
        range: FetchRange,
    ) -> Result<Vec<PriceBar>, FetchError> {
        let started = self.clock.now();
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = self.provider.get_candles(symbol, granularity, range);
            let now = self.clock.now();
            let elapsed = (now - started).to_std().unwrap_or(Duration::ZERO);
            if elapsed > self.policy.deadline {
                let last = match &result {
                    Ok(_) => "response arrived late".to_string(),
                    Err(err) => err.to_string(),
                };
                return Err(self.deadline_exceeded(symbol, granularity, attempt, &last));
            }

            match result {
                Ok(candles) => {
                    return clean_candles(symbol, candles, now.timestamp());
                }
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = self
                        .policy
                        .delay_with_jitter(attempt, &err, self.jitter.as_ref());
                    if elapsed + delay > self.policy.deadline {
                        return Err(self.deadline_exceeded(
                            symbol,
                            granularity,
                            attempt,
                            &err.to_string(),
                        ));
                    }
                    tracing::warn!(
                        symbol,
                        %granularity,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "fetch failed, retrying"
                    );
                    self.clock.sleep(delay);
                }
                Err(err) => {
                    if err.is_retryable() {
                        tracing::warn!(symbol, %granularity, attempt, error = %err, "fetch attempts exhausted");
                    }
                    return Err(err);
                }
            }
        }
    }

    fn deadline_exceeded(
        &self,
        symbol: &str,
        granularity: Granularity,
        attempt: u32,
        last: &str,
    ) -> FetchError {
        tracing::warn!(symbol, %granularity, attempt, last, "fetch deadline exceeded");
        FetchError::NetworkError {
            reason: format!(
                "deadline of {}s exceeded after {} attempts (last error: {})",
                self.policy.deadline.as_secs(),
                attempt,
                last
            ),
        }
    }
}

/// Drop future, placeholder and malformed candles, dedup by timestamp keeping
/// the last one seen, and sort ascending.
pub fn clean_candles(
    symbol: &str,
    candles: Vec<RawCandle>,
    fetched_at: i64,
) -> Result<Vec<PriceBar>, FetchError> {
    let mut by_ts: BTreeMap<i64, PriceBar> = BTreeMap::new();

    for candle in candles {
        if candle.ts_utc > fetched_at {
            tracing::debug!(symbol, ts = candle.ts_utc, "skipping future candle");
            continue;
        }
        let bar = candle.into_bar(symbol);
        if bar.is_placeholder() {
            continue;
        }
        if !bar.is_well_formed() {
            tracing::warn!(symbol, ts = bar.ts_utc, "skipping malformed candle");
            continue;
        }
        by_ts.insert(bar.ts_utc, bar);
    }

    if by_ts.is_empty() {
        return Err(FetchError::EmptyResult {
            symbol: symbol.to_string(),
        });
    }

    Ok(by_ts.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::retry::NoJitter;
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::Mutex;

    const NOW: i64 = 1_705_300_000;

    struct ManualClock {
        now: Mutex<DateTime<Utc>>,
        sleeps: Mutex<Vec<Duration>>,
    }

    impl ManualClock {
        fn at(ts: i64) -> Self {
            Self {
                now: Mutex::new(Utc.timestamp_opt(ts, 0).unwrap()),
                sleeps: Mutex::new(Vec::new()),
            }
        }
    }

    impl ManualClock {
        fn advance(&self, secs: i64) {
            *self.now.lock().unwrap() += chrono::Duration::seconds(secs);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock().unwrap()
        }

        fn sleep(&self, duration: Duration) {
            let mut now = self.now.lock().unwrap();
            *now += chrono::Duration::from_std(duration).unwrap();
            self.sleeps.lock().unwrap().push(duration);
        }
    }

    /// Replays a script of responses, one per call.
    struct ScriptedProvider {
        responses: Mutex<Vec<Result<Vec<RawCandle>, FetchError>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedProvider {
        fn new(mut responses: Vec<Result<Vec<RawCandle>, FetchError>>) -> Self {
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    impl MarketDataPort for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        fn get_candles(
            &self,
            _symbol: &str,
            _granularity: Granularity,
            _range: FetchRange,
        ) -> Result<Vec<RawCandle>, FetchError> {
            *self.calls.lock().unwrap() += 1;
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    /// Moves the clock forward by a fixed time per call before answering.
    struct SlowProvider {
        inner: ScriptedProvider,
        clock: Arc<ManualClock>,
        call_secs: i64,
    }

    impl MarketDataPort for SlowProvider {
        fn name(&self) -> &str {
            "slow"
        }

        fn get_candles(
            &self,
            symbol: &str,
            granularity: Granularity,
            range: FetchRange,
        ) -> Result<Vec<RawCandle>, FetchError> {
            self.clock.advance(self.call_secs);
            self.inner.get_candles(symbol, granularity, range)
        }
    }

    fn candle(ts: i64, close: f64) -> RawCandle {
        RawCandle {
            ts_utc: ts,
            open: Some(close),
            high: Some(close + 1.0),
            low: Some(close - 1.0),
            close: Some(close),
            volume: Some(500.0),
        }
    }

    fn rate_limited() -> FetchError {
        FetchError::RateLimited {
            retry_after_secs: None,
        }
    }

    fn fetcher_with(
        provider: Arc<ScriptedProvider>,
        clock: Arc<ManualClock>,
        policy: RetryPolicy,
    ) -> MarketDataFetcher {
        MarketDataFetcher::new(provider, policy, clock, Arc::new(NoJitter))
    }

    #[test]
    fn retries_rate_limit_then_succeeds() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(rate_limited()),
            Err(rate_limited()),
            Ok(vec![candle(NOW - 100, 10.0)]),
        ]));
        let clock = Arc::new(ManualClock::at(NOW));
        let fetcher = fetcher_with(provider.clone(), clock.clone(), RetryPolicy::default());

        let bars = fetcher
            .fetch("BBCA.JK", Granularity::Daily, FetchRange::LatestOnly)
            .unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(provider.calls(), 3);
        assert_eq!(
            *clock.sleeps.lock().unwrap(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
    }

    #[test]
    fn exhaustion_returns_last_error() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(rate_limited()),
            Err(rate_limited()),
            Err(FetchError::NetworkError {
                reason: "connection reset".into(),
            }),
        ]));
        let clock = Arc::new(ManualClock::at(NOW));
        let fetcher = fetcher_with(provider.clone(), clock, RetryPolicy::default());

        let err = fetcher
            .fetch("BBCA.JK", Granularity::Daily, FetchRange::LatestOnly)
            .unwrap_err();
        assert_eq!(
            err,
            FetchError::NetworkError {
                reason: "connection reset".into()
            }
        );
        assert_eq!(provider.calls(), 3);
    }

    #[test]
    fn empty_result_is_not_retried() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(FetchError::EmptyResult {
            symbol: "BBCA.JK".into(),
        })]));
        let clock = Arc::new(ManualClock::at(NOW));
        let fetcher = fetcher_with(provider.clone(), clock.clone(), RetryPolicy::default());

        let err = fetcher
            .fetch("BBCA.JK", Granularity::Daily, FetchRange::LatestOnly)
            .unwrap_err();
        assert!(matches!(err, FetchError::EmptyResult { .. }));
        assert_eq!(provider.calls(), 1);
        assert!(clock.sleeps.lock().unwrap().is_empty());
    }

    #[test]
    fn deadline_surfaces_as_network_error() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(FetchError::RateLimited {
                retry_after_secs: Some(120),
            }),
            Ok(vec![candle(NOW - 100, 10.0)]),
        ]));
        let clock = Arc::new(ManualClock::at(NOW));
        let fetcher = fetcher_with(provider.clone(), clock.clone(), RetryPolicy::default());

        let err = fetcher
            .fetch("BBCA.JK", Granularity::Intraday, FetchRange::LatestOnly)
            .unwrap_err();
        assert!(matches!(err, FetchError::NetworkError { ref reason } if reason.contains("deadline")));
        assert_eq!(provider.calls(), 1);
        assert!(clock.sleeps.lock().unwrap().is_empty());
    }

    #[test]
    fn success_after_deadline_is_network_error() {
        let clock = Arc::new(ManualClock::at(NOW));
        let provider = Arc::new(SlowProvider {
            inner: ScriptedProvider::new(vec![
                Err(rate_limited()),
                Ok(vec![candle(NOW - 100, 10.0)]),
            ]),
            clock: clock.clone(),
            call_secs: 35,
        });
        let policy = RetryPolicy {
            max_attempts: 2,
            ..RetryPolicy::default()
        };
        let fetcher = MarketDataFetcher::new(provider.clone(), policy, clock.clone(), Arc::new(NoJitter));

        let err = fetcher
            .fetch("BBCA.JK", Granularity::Daily, FetchRange::LatestOnly)
            .unwrap_err();
        assert!(matches!(err, FetchError::NetworkError { ref reason } if reason.contains("deadline")));
        assert_eq!(provider.inner.calls(), 2);
        assert_eq!(*clock.sleeps.lock().unwrap(), vec![Duration::from_secs(1)]);
    }

    #[test]
    fn last_attempt_past_deadline_is_network_error() {
        let clock = Arc::new(ManualClock::at(NOW));
        let provider = Arc::new(SlowProvider {
            inner: ScriptedProvider::new(vec![Err(rate_limited())]),
            clock: clock.clone(),
            call_secs: 61,
        });
        let policy = RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        };
        let fetcher = MarketDataFetcher::new(provider.clone(), policy, clock, Arc::new(NoJitter));

        let err = fetcher
            .fetch("BBCA.JK", Granularity::Daily, FetchRange::LatestOnly)
            .unwrap_err();
        assert!(matches!(err, FetchError::NetworkError { ref reason } if reason.contains("deadline")));
        assert_eq!(provider.inner.calls(), 1);
    }

    #[test]
    fn slow_call_within_deadline_succeeds() {
        let clock = Arc::new(ManualClock::at(NOW));
        let provider = Arc::new(SlowProvider {
            inner: ScriptedProvider::new(vec![Ok(vec![candle(NOW - 100, 10.0)])]),
            clock: clock.clone(),
            call_secs: 59,
        });
        let fetcher =
            MarketDataFetcher::new(provider, RetryPolicy::default(), clock, Arc::new(NoJitter));

        let bars = fetcher
            .fetch("BBCA.JK", Granularity::Daily, FetchRange::LatestOnly)
            .unwrap();
        assert_eq!(bars.len(), 1);
    }

    #[test]
    fn future_candles_are_dropped() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(vec![
            candle(NOW - 3_600, 10.0),
            candle(NOW, 11.0),
            candle(NOW + 1, 12.0),
        ])]));
        let clock = Arc::new(ManualClock::at(NOW));
        let fetcher = fetcher_with(provider, clock, RetryPolicy::default());

        let bars = fetcher
            .fetch("BBCA.JK", Granularity::Intraday, FetchRange::LatestOnly)
            .unwrap();
        assert_eq!(bars.len(), 2);
        assert!(bars.iter().all(|b| b.ts_utc <= NOW));
    }

    #[test]
    fn only_future_candles_is_empty() {
        let err = clean_candles("BBCA.JK", vec![candle(NOW + 60, 1.0)], NOW).unwrap_err();
        assert!(matches!(err, FetchError::EmptyResult { .. }));
    }

    #[test]
    fn dedup_keeps_last_seen_and_sorts() {
        let bars = clean_candles(
            "BBCA.JK",
            vec![
                candle(300, 3.0),
                candle(100, 1.0),
                candle(300, 33.0),
                candle(200, 2.0),
            ],
            NOW,
        )
        .unwrap();

        let ts: Vec<i64> = bars.iter().map(|b| b.ts_utc).collect();
        assert_eq!(ts, vec![100, 200, 300]);
        assert_eq!(bars[2].close, Some(33.0));
        assert!(bars.iter().all(|b| b.symbol == "BBCA.JK"));
    }

    #[test]
    fn placeholders_and_malformed_are_dropped() {
        let placeholder = RawCandle {
            ts_utc: 100,
            open: None,
            high: None,
            low: None,
            close: None,
            volume: None,
        };
        let mut malformed = candle(200, 10.0);
        malformed.high = Some(5.0);

        let bars = clean_candles(
            "BBCA.JK",
            vec![placeholder, malformed, candle(300, 10.0)],
            NOW,
        )
        .unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].ts_utc, 300);
    }
}
