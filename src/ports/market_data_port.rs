//! Upstream market data port.

use crate::domain::error::FetchError;
use crate::domain::price_bar::{FetchRange, Granularity, RawCandle};

/// Black-box candle source. Implementations classify their failures into
/// [`FetchError`]; retrying is the fetcher's job, not the provider's.
pub trait MarketDataPort: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    fn get_candles(
        &self,
        symbol: &str,
        granularity: Granularity,
        range: FetchRange,
    ) -> Result<Vec<RawCandle>, FetchError>;
}
