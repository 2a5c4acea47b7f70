// =============================================================================
// Feed Configuration — which series to cache and where to fetch it from
// =============================================================================
//
// Loaded from a JSON file; every field carries `#[serde(default)]` so a
// partial (or empty) file still deserialises. A handful of environment
// variables override the file for quick one-off runs.
//
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::binance::client::DEFAULT_BASE_URL;
use crate::market_data::kline_stream::DEFAULT_WS_BASE_URL;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_symbol() -> String {
    "SOLUSDT".to_string()
}

fn default_interval() -> String {
    "1m".to_string()
}

fn default_limit() -> u32 {
    5
}

fn default_rest_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_ws_base_url() -> String {
    DEFAULT_WS_BASE_URL.to_string()
}

fn default_snapshot_log_secs() -> u64 {
    10
}

// =============================================================================
// FeedConfig
// =============================================================================

/// Settings for the candle feed binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Trading pair, e.g. `SOLUSDT`.
    #[serde(default = "default_symbol")]
    pub symbol: String,

    /// Kline interval, e.g. `1m`.
    #[serde(default = "default_interval")]
    pub interval: String,

    /// Number of bars fetched on load and kept in the window.
    #[serde(default = "default_limit")]
    pub limit: u32,

    #[serde(default = "default_rest_base_url")]
    pub rest_base_url: String,

    #[serde(default = "default_ws_base_url")]
    pub ws_base_url: String,

    /// Period of the cached-window log line.
    #[serde(default = "default_snapshot_log_secs")]
    pub snapshot_log_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            interval: default_interval(),
            limit: default_limit(),
            rest_base_url: default_rest_base_url(),
            ws_base_url: default_ws_base_url(),
            snapshot_log_secs: default_snapshot_log_secs(),
        }
    }
}

impl FeedConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// A missing file is an error so the caller can fall back to defaults with
    /// a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read feed config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse feed config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbol = %config.symbol,
            interval = %config.interval,
            limit = config.limit,
            "feed config loaded"
        );

        Ok(config)
    }

    /// Apply `FEED_SYMBOL`, `FEED_INTERVAL` and `FEED_LIMIT` overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(sym) = lookup("FEED_SYMBOL") {
            let sym = sym.trim().to_uppercase();
            if !sym.is_empty() {
                self.symbol = sym;
            }
        }
        if let Some(iv) = lookup("FEED_INTERVAL") {
            let iv = iv.trim();
            if !iv.is_empty() {
                self.interval = iv.to_string();
            }
        }
        if let Some(limit) = lookup("FEED_LIMIT") {
            match limit.trim().parse::<u32>() {
                Ok(n) if n > 0 => self.limit = n,
                _ => warn!(value = %limit, "ignoring invalid FEED_LIMIT"),
            }
        }
    }
}

/// Exchange credentials, read from `BINANCE_API_KEY` / `BINANCE_SECRET_KEY`.
/// Empty when unset.
#[derive(Clone, Default)]
pub struct Credentials {
    pub api_key: String,
    pub secret_key: String,
}

impl Credentials {
    pub fn from_env() -> Self {
        Self {
            api_key: std::env::var("BINANCE_API_KEY").unwrap_or_default(),
            secret_key: std::env::var("BINANCE_SECRET_KEY").unwrap_or_default(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("secret_key", &"<redacted>")
            .finish()
    }
}
