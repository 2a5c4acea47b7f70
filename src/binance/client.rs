// =============================================================================
// Binance REST API Client — public market data + HMAC-SHA256 signed requests
// =============================================================================
//
// SECURITY: The secret key is never logged or serialized. Signed requests
// carry X-MBX-APIKEY as a header and a recvWindow of 5 000 ms to tolerate
// minor clock drift between this process and Binance servers.
// =============================================================================

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use sha2::Sha256;
use tracing::{debug, error, instrument, warn};

use crate::market_data::RawCandle;
use crate::types::TickerStats;

type HmacSha256 = Hmac<Sha256>;

/// Default recv-window sent with every signed request (milliseconds).
const RECV_WINDOW: u64 = 5000;

/// Production REST endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.binance.com";

/// Binance spot REST client.
#[derive(Clone)]
pub struct BinanceClient {
    api_key: String,
    secret: String,
    base_url: String,
    client: reqwest::Client,
}

impl BinanceClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Create a client against the production endpoint.
    ///
    /// # Arguments
    /// * `api_key` — Binance API key (sent as a header, never in query params).
    /// * `secret`  — Binance secret key used exclusively for HMAC signing.
    ///
    /// Both may be empty; public market-data calls work without them.
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>) -> Result<Self> {
        Self::with_base_url(api_key, secret, DEFAULT_BASE_URL)
    }

    /// Create a client against an arbitrary REST base URL (testnet, proxy).
    pub fn with_base_url(
        api_key: impl Into<String>,
        secret: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self> {
        let api_key = api_key.into();
        let secret = secret.into();
        let base_url = base_url.into().trim_end_matches('/').to_string();

        let mut default_headers = HeaderMap::new();
        if !api_key.is_empty() {
            match HeaderValue::from_str(&api_key) {
                Ok(val) => {
                    default_headers.insert("X-MBX-APIKEY", val);
                }
                Err(_) => warn!("API key contains invalid header characters -- not sent"),
            }
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build reqwest client")?;

        debug!(base_url = %base_url, "BinanceClient initialised");

        Ok(Self {
            api_key,
            secret,
            base_url,
            client,
        })
    }

    /// Whether both API key and secret are configured.
    pub fn has_credentials(&self) -> bool {
        !self.api_key.is_empty() && !self.secret.is_empty()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // -------------------------------------------------------------------------
    // Signing helpers
    // -------------------------------------------------------------------------

    /// Produce an HMAC-SHA256 hex signature of `query`.
    pub fn sign(&self, query: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Current UNIX timestamp in milliseconds.
    pub fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }

    /// Build the full query string for a signed request (appends timestamp,
    /// recvWindow, and signature).
    fn signed_query(&self, params: &str) -> String {
        let ts = Self::timestamp_ms();
        let base = if params.is_empty() {
            format!("timestamp={ts}&recvWindow={RECV_WINDOW}")
        } else {
            format!("{params}&timestamp={ts}&recvWindow={RECV_WINDOW}")
        };
        let sig = self.sign(&base);
        format!("{base}&signature={sig}")
    }

    /// GET `url`, decode the JSON body and fail on a non-success status.
    async fn get_json(&self, url: &str, what: &str) -> Result<serde_json::Value> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {what} request failed"))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse {what} response"))?;

        if !status.is_success() {
            anyhow::bail!("Binance GET {} returned {}: {}", what, status, body);
        }

        Ok(body)
    }

    // -------------------------------------------------------------------------
    // Account
    // -------------------------------------------------------------------------

    /// GET /api/v3/account (signed).
    #[instrument(skip(self), name = "binance::get_account")]
    pub async fn get_account(&self) -> Result<serde_json::Value> {
        if !self.has_credentials() {
            anyhow::bail!("GET /api/v3/account requires BINANCE_API_KEY and BINANCE_SECRET_KEY");
        }

        let qs = self.signed_query("");
        let url = format!("{}/api/v3/account?{}", self.base_url, qs);
        let body = self.get_json(&url, "/api/v3/account").await?;

        debug!("account info retrieved successfully");
        Ok(body)
    }

    // -------------------------------------------------------------------------
    // Public market data
    // -------------------------------------------------------------------------

    /// GET /api/v3/klines (public — no signature required).
    ///
    /// Returns the bars oldest first, as raw records; see
    /// [`RawCandle::from_kline_array`] for the array layout.
    #[instrument(skip(self), name = "binance::get_klines")]
    pub async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<RawCandle>> {
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url, symbol, interval, limit
        );
        let body = self.get_json(&url, "/api/v3/klines").await?;
        let candles = parse_klines(&body)?;

        debug!(symbol, interval, count = candles.len(), "klines fetched");
        Ok(candles)
    }

    /// GET /api/v3/ticker/24hr for a single symbol.  Failures are logged
    /// here and returned to the caller.
    #[instrument(skip(self), name = "binance::get_24h_ticker")]
    pub async fn get_24h_ticker(&self, symbol: &str) -> Result<TickerStats> {
        let result = self.fetch_24h_ticker(symbol).await;
        if let Err(e) = &result {
            error!(symbol, error = %format!("{e:#}"), "error fetching 24h ticker data");
        }
        result
    }

    async fn fetch_24h_ticker(&self, symbol: &str) -> Result<TickerStats> {
        let url = format!("{}/api/v3/ticker/24hr?symbol={}", self.base_url, symbol);
        let body = self.get_json(&url, "/api/v3/ticker/24hr").await?;

        let stats: TickerStats =
            serde_json::from_value(body).context("unexpected 24h ticker response shape")?;

        debug!(
            symbol,
            last_price = %stats.last_price,
            change_pct = %stats.price_change_percent,
            "24h ticker retrieved"
        );
        Ok(stats)
    }
}

/// Decode the `/api/v3/klines` array-of-arrays body.
fn parse_klines(body: &serde_json::Value) -> Result<Vec<RawCandle>> {
    let raw = body.as_array().context("klines response is not an array")?;

    raw.iter()
        .map(|entry| {
            entry
                .as_array()
                .map(|arr| RawCandle::from_kline_array(arr))
                .context("kline entry is not an array")
        })
        .collect()
}

impl std::fmt::Debug for BinanceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceClient")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}
