//! Indicator engine: price history in, one [`IndicatorRecord`] per trading day out.
//!
//! The engine is a pure function of the bars, the settings and the supplied
//! computation time. It never reads a clock or a store, so recomputing the same
//! window always yields the same records.

use crate::domain::indicator::rolling_high::calculate_recent_highs;
use crate::domain::indicator::rsi::calculate_rsi;
use crate::domain::indicator::sma::calculate_sma;
use crate::domain::indicator::{
    signal, IndicatorRecord, IndicatorSettings, MA_LONG_PERIOD, MA_SHORT_PERIOD, RSI_PERIOD,
};
use crate::domain::price_bar::{daily_closes, PriceBar};

#[derive(Debug, Clone, Copy)]
pub struct IndicatorEngine {
    settings: IndicatorSettings,
}

impl IndicatorEngine {
    pub fn new(settings: IndicatorSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &IndicatorSettings {
        &self.settings
    }

    /// `history` must be ascending by timestamp and belong to `symbol`.
    pub fn compute(
        &self,
        symbol: &str,
        history: &[PriceBar],
        computed_at: i64,
    ) -> Vec<IndicatorRecord> {
        let days = daily_closes(history);
        let closes: Vec<f64> = days.iter().map(|d| d.close).collect();

        let ma20 = calculate_sma(&closes, MA_SHORT_PERIOD);
        let ma50 = calculate_sma(&closes, MA_LONG_PERIOD);
        let rsi14 = calculate_rsi(&closes, RSI_PERIOD);
        let highs = calculate_recent_highs(
            &closes,
            self.settings.high_lookback,
            self.settings.high_within_days,
        );

        days.iter()
            .enumerate()
            .map(|(i, day)| IndicatorRecord {
                symbol: symbol.to_string(),
                ts_utc: day.day_ts,
                ma20: ma20[i],
                ma50: ma50[i],
                rsi14: rsi14[i],
                is_30d_high: highs[i],
                signal: signal(rsi14[i], highs[i], self.settings.rsi_min),
                updated_at: computed_at,
            })
            .collect()
    }
}
