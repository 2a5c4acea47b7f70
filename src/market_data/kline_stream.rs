// =============================================================================
// Kline WebSocket stream + Binance-backed CandleSource
// =============================================================================

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio_tungstenite::connect_async;
use tracing::{debug, error, info, warn};

use super::candle::{CandleKey, RawCandle};
use super::source::{CandleCallback, CandleSource, Subscription};
use crate::binance::client::BinanceClient;

/// Production WebSocket endpoint.
pub const DEFAULT_WS_BASE_URL: &str = "wss://stream.binance.com:9443";

/// Kline intervals Binance accepts.
const SUPPORTED_INTERVALS: &[&str] = &[
    "1s", "1m", "3m", "5m", "15m", "30m", "1h", "2h", "4h", "6h", "8h", "12h", "1d", "3d",
    "1w", "1M",
];

/// Build the single-stream kline URL for one (symbol, interval) pair.
pub fn kline_stream_url(ws_base_url: &str, symbol: &str, interval: &str) -> String {
    let lower = symbol.to_lowercase();
    format!(
        "{}/ws/{lower}@kline_{interval}",
        ws_base_url.trim_end_matches('/')
    )
}

/// Decode one text frame into a raw candle.
///
/// Fails when the frame is not JSON, is an event other than `kline`, or
/// carries no `k` object (error frames, method replies).  Missing fields
/// inside `k` are left for normalization to default.
fn parse_kline_frame(text: &str) -> Result<RawCandle> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("failed to parse kline JSON")?;

    let data = root.get("data").unwrap_or(&root);
    if let Some(event) = data.get("e").and_then(|e| e.as_str()) {
        if event != "kline" {
            anyhow::bail!("unexpected event type {event}");
        }
    }
    if !data.get("k").map_or(false, |k| k.is_object()) {
        anyhow::bail!("frame carries no kline payload: {root}");
    }

    Ok(RawCandle::from_kline_event(&root))
}

/// Connect to the kline stream at `url` and hand every update to `on_update`
/// in arrival order.
///
/// Runs until the stream disconnects or an error occurs. There is no
/// reconnection: a new subscription has to be started by the caller.
pub async fn run_kline_stream(url: &str, key: &CandleKey, on_update: &CandleCallback) -> Result<()> {
    info!(url = %url, key = %key, "connecting to kline WebSocket");

    let (ws_stream, _response) = connect_async(url)
        .await
        .context("failed to connect to kline WebSocket")?;

    info!(key = %key, "kline WebSocket connected");
    let (_write, mut read) = ws_stream.split();

    loop {
        match read.next().await {
            Some(Ok(msg)) => {
                if let tokio_tungstenite::tungstenite::Message::Text(text) = msg {
                    match parse_kline_frame(&text) {
                        Ok(raw) => {
                            debug!(key = %key, open_time = ?raw.start_time, close = ?raw.close, "kline received");
                            on_update(raw);
                        }
                        Err(e) => {
                            warn!(key = %key, error = %e, "failed to parse kline message");
                        }
                    }
                }
                // Ping / Pong / Binary / Close frames are ignored --
                // tungstenite answers pings itself.
            }
            Some(Err(e)) => {
                error!(key = %key, error = %e, "kline WebSocket read error");
                return Err(e.into());
            }
            None => {
                warn!(key = %key, "kline WebSocket stream ended");
                return Ok(());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// BinanceCandleSource
// ---------------------------------------------------------------------------

/// [`CandleSource`] backed by the Binance REST klines endpoint and the kline
/// WebSocket stream.
pub struct BinanceCandleSource {
    client: Arc<BinanceClient>,
    ws_base_url: String,
}

impl BinanceCandleSource {
    pub fn new(client: Arc<BinanceClient>, ws_base_url: impl Into<String>) -> Self {
        Self {
            client,
            ws_base_url: ws_base_url.into(),
        }
    }
}

#[async_trait]
impl CandleSource for BinanceCandleSource {
    async fn fetch_historical_candles(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<RawCandle>> {
        self.client.get_klines(symbol, interval, limit).await
    }

    fn subscribe_live_candles(
        &self,
        symbol: &str,
        interval: &str,
        on_update: CandleCallback,
    ) -> Result<Subscription> {
        if !SUPPORTED_INTERVALS.contains(&interval) {
            warn!(
                interval = %interval,
                "unsupported kline interval requested -- it will still be subscribed"
            );
        }

        let runtime = tokio::runtime::Handle::try_current()
            .context("live candle subscription requires a tokio runtime")?;

        let key = CandleKey::new(symbol, interval);
        let url = kline_stream_url(&self.ws_base_url, symbol, interval);
        let task_key = key.clone();

        let task = runtime.spawn(async move {
            if let Err(e) = run_kline_stream(&url, &task_key, &on_update).await {
                error!(key = %task_key, error = %format!("{e:#}"), "kline stream stopped");
            }
        });

        Ok(Subscription::spawned(key, task))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
