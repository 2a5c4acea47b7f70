pub mod candle;
pub mod candle_buffer;
pub mod ingestion;
pub mod kline_stream;
pub mod source;

// Re-exports for convenient access (e.g. `use crate::market_data::Candle`).
pub use candle::{Candle, CandleKey, RawCandle};
pub use candle_buffer::CandleBuffer;
pub use ingestion::CandleIngestionService;
pub use kline_stream::BinanceCandleSource;
pub use source::{CandleCallback, CandleSource, Subscription};
