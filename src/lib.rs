//! Bounded, live-updated cache of exchange candles for one trading pair.
//!
//! [`CandleIngestionService`](market_data::CandleIngestionService) seeds a
//! fixed-size window from a historical fetch and keeps its most recent bar
//! current from a live update stream. The exchange is reached through the
//! [`CandleSource`](market_data::CandleSource) trait; Binance is the bundled
//! implementation.

pub mod account;
pub mod binance;
pub mod config;
pub mod error;
pub mod market_data;
pub mod types;

pub use error::FetchError;
