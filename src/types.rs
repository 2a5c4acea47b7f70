// =============================================================================
// Exchange payload types shared by the REST client and the account service
// =============================================================================

use serde::{Deserialize, Serialize};

/// Balance of a single asset. Amounts are exact decimal strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceInfo {
    pub asset: String,
    #[serde(default = "zero")]
    pub free: String,
    #[serde(default = "zero")]
    pub locked: String,
}

impl BalanceInfo {
    /// `true` when either the free or the locked amount is above zero.
    pub fn is_non_zero(&self) -> bool {
        is_positive(&self.free) || is_positive(&self.locked)
    }
}

fn is_positive(amount: &str) -> bool {
    amount.parse::<f64>().map_or(false, |v| v > 0.0)
}

fn zero() -> String {
    "0".to_string()
}

/// Account summary with balances restricted to non-zero holdings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    #[serde(default)]
    pub account_type: Option<String>,
    #[serde(default)]
    pub can_trade: bool,
    #[serde(default)]
    pub update_time: Option<i64>,
    pub balances: Vec<BalanceInfo>,
}

/// Rolling 24-hour statistics for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickerStats {
    pub symbol: String,
    #[serde(default = "zero")]
    pub price_change: String,
    #[serde(default = "zero")]
    pub price_change_percent: String,
    #[serde(default = "zero")]
    pub weighted_avg_price: String,
    #[serde(default = "zero")]
    pub last_price: String,
    #[serde(default = "zero")]
    pub open_price: String,
    #[serde(default = "zero")]
    pub high_price: String,
    #[serde(default = "zero")]
    pub low_price: String,
    #[serde(default = "zero")]
    pub volume: String,
    #[serde(default = "zero")]
    pub quote_volume: String,
    #[serde(default)]
    pub open_time: Option<i64>,
    #[serde(default)]
    pub close_time: Option<i64>,
    /// Number of trades in the window.
    #[serde(default)]
    pub count: u64,
}
