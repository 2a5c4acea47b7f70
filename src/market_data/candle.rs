// =============================================================================
// Candle records — raw exchange payloads and their normalized form
// =============================================================================
//
// Prices and volumes are kept as the exact decimal strings Binance sends. They
// are never parsed into floats here, so no rounding is introduced between the
// exchange and the cache.
//
// Timestamps are `Option<i64>`: `None` means "unknown", which is distinct from
// an explicit zero.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default value for every decimal field the source omitted.
const ZERO: &str = "0";

static NULL: Value = Value::Null;

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// A fully populated OHLCV bar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candle {
    pub open_time: Option<i64>,
    pub open: String,
    pub high: String,
    pub low: String,
    pub close: String,
    pub volume: String,
    pub close_time: Option<i64>,
    pub quote_volume: String,
    pub trades: u64,
    pub base_asset_volume: String,
    pub quote_asset_volume: String,
}

/// A partially populated candle exactly as an external source produced it.
///
/// Every field is optional; [`Candle::normalize`] fills in the defaults.
/// Deserialisation goes through [`RawCandle::from_value`], so it accepts the
/// same loosely typed input and never fails on a JSON value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "Value")]
pub struct RawCandle {
    pub start_time: Option<i64>,
    pub open: Option<String>,
    pub high: Option<String>,
    pub low: Option<String>,
    pub close: Option<String>,
    pub volume: Option<String>,
    pub close_time: Option<i64>,
    pub quote_volume: Option<String>,
    pub trades: Option<u64>,
    pub base_asset_volume: Option<String>,
    pub quote_asset_volume: Option<String>,
}

/// Composite key that identifies a candle series.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct CandleKey {
    pub symbol: String,
    pub interval: String,
}

impl CandleKey {
    pub fn new(symbol: impl Into<String>, interval: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            interval: interval.into(),
        }
    }
}

impl std::fmt::Display for CandleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.interval)
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

impl Candle {
    /// Build a fully populated candle from a raw record.
    ///
    /// Total over any input: missing decimals become `"0"`, a missing trade
    /// count becomes `0`, and missing timestamps stay `None`.
    pub fn normalize(raw: &RawCandle) -> Self {
        Self {
            open_time: raw.start_time,
            open: decimal_or_zero(&raw.open),
            high: decimal_or_zero(&raw.high),
            low: decimal_or_zero(&raw.low),
            close: decimal_or_zero(&raw.close),
            volume: decimal_or_zero(&raw.volume),
            close_time: raw.close_time,
            quote_volume: decimal_or_zero(&raw.quote_volume),
            trades: raw.trades.unwrap_or(0),
            base_asset_volume: decimal_or_zero(&raw.base_asset_volume),
            quote_asset_volume: decimal_or_zero(&raw.quote_asset_volume),
        }
    }

    /// Bar start as a UTC datetime, if known and in range.
    pub fn open_time_utc(&self) -> Option<DateTime<Utc>> {
        self.open_time.and_then(DateTime::<Utc>::from_timestamp_millis)
    }
}

impl From<RawCandle> for Candle {
    fn from(raw: RawCandle) -> Self {
        Self::normalize(&raw)
    }
}

/// An empty string carries no value, so it is treated like an absent field.
fn decimal_or_zero(field: &Option<String>) -> String {
    match field.as_deref() {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => ZERO.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Extraction from exchange payloads
// ---------------------------------------------------------------------------

impl From<Value> for RawCandle {
    fn from(value: Value) -> Self {
        Self::from_value(&value)
    }
}

impl RawCandle {
    /// Extract a raw candle from any JSON mapping with camelCase keys.
    ///
    /// Never fails: unknown or mistyped fields are ignored and non-object
    /// input yields an empty record.
    pub fn from_value(value: &Value) -> Self {
        let start_time = value
            .get("startTime")
            .and_then(json_i64)
            .or_else(|| value.get("openTime").and_then(json_i64));

        Self {
            start_time,
            open: value.get("open").and_then(json_decimal),
            high: value.get("high").and_then(json_decimal),
            low: value.get("low").and_then(json_decimal),
            close: value.get("close").and_then(json_decimal),
            volume: value.get("volume").and_then(json_decimal),
            close_time: value.get("closeTime").and_then(json_i64),
            quote_volume: value.get("quoteVolume").and_then(json_decimal),
            trades: value.get("trades").and_then(json_u64),
            base_asset_volume: value.get("baseAssetVolume").and_then(json_decimal),
            quote_asset_volume: value.get("quoteAssetVolume").and_then(json_decimal),
        }
    }

    /// Extract a raw candle from one entry of the REST `/api/v3/klines`
    /// array-of-arrays response.
    ///
    /// Array indices:
    ///   [0] openTime, [1] open, [2] high, [3] low, [4] close, [5] volume,
    ///   [6] closeTime, [7] quoteAssetVolume, [8] numberOfTrades,
    ///   [9] takerBuyBaseVolume, [10] takerBuyQuoteVolume
    ///
    /// Short entries simply leave the trailing fields empty.
    pub fn from_kline_array(entry: &[Value]) -> Self {
        let at = |i: usize| entry.get(i);
        Self {
            start_time: at(0).and_then(json_i64),
            open: at(1).and_then(json_decimal),
            high: at(2).and_then(json_decimal),
            low: at(3).and_then(json_decimal),
            close: at(4).and_then(json_decimal),
            volume: at(5).and_then(json_decimal),
            close_time: at(6).and_then(json_i64),
            quote_volume: at(7).and_then(json_decimal),
            trades: at(8).and_then(json_u64),
            base_asset_volume: at(9).and_then(json_decimal),
            quote_asset_volume: at(10).and_then(json_decimal),
        }
    }

    /// Extract a raw candle from a WebSocket kline event.
    ///
    /// Accepts both the single-stream payload and the combined-stream
    /// envelope:
    /// ```json
    /// { "e": "kline", "s": "BTCUSDT", "k": { "t": .., "o": "..", .. } }
    /// { "stream": "btcusdt@kline_1m", "data": { "e": "kline", "k": { .. } } }
    /// ```
    pub fn from_kline_event(root: &Value) -> Self {
        let data = root.get("data").unwrap_or(root);
        let k = data.get("k").unwrap_or(&NULL);
        let field = |name: &str| k.get(name);

        Self {
            start_time: field("t").and_then(json_i64),
            open: field("o").and_then(json_decimal),
            high: field("h").and_then(json_decimal),
            low: field("l").and_then(json_decimal),
            close: field("c").and_then(json_decimal),
            volume: field("v").and_then(json_decimal),
            close_time: field("T").and_then(json_i64),
            quote_volume: field("q").and_then(json_decimal),
            trades: field("n").and_then(json_u64),
            base_asset_volume: field("V").and_then(json_decimal),
            quote_asset_volume: field("Q").and_then(json_decimal),
        }
    }
}

/// Binance sends decimals as JSON strings; plain numbers are rendered back to
/// their textual form instead of going through `f64`.
fn json_decimal(val: &Value) -> Option<String> {
    match val {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn json_i64(val: &Value) -> Option<i64> {
    match val {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn json_u64(val: &Value) -> Option<u64> {
    match val {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
