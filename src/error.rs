//! Error types surfaced by the candle cache.

use thiserror::Error;

use crate::market_data::CandleKey;

/// Historical bulk load failed.
///
/// Carries the series that was requested and the collaborator's error
/// unmodified as [`std::error::Error::source`].
#[derive(Error, Debug)]
#[error("failed to fetch historical candles for {key}")]
pub struct FetchError {
    /// Series the load was issued for.
    pub key: CandleKey,
    /// Underlying transport / API failure.
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync + 'static>,
}

impl FetchError {
    pub fn new(key: CandleKey, source: anyhow::Error) -> Self {
        Self {
            key,
            source: source.into(),
        }
    }
}
