// =============================================================================
// Account Service — signed account snapshot with non-zero balances only
// =============================================================================

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};

use crate::binance::client::BinanceClient;
use crate::types::{AccountInfo, BalanceInfo};

/// Reads account information through a shared [`BinanceClient`].
pub struct AccountService {
    client: Arc<BinanceClient>,
}

impl AccountService {
    pub fn new(client: Arc<BinanceClient>) -> Self {
        Self { client }
    }

    /// Fetch the account and drop every balance that is zero on both the free
    /// and the locked side.
    pub async fn account_info(&self) -> Result<AccountInfo> {
        let result = self
            .client
            .get_account()
            .await
            .and_then(|body| parse_account(&body));

        match result {
            Ok(info) => {
                info!(assets = info.balances.len(), "account information retrieved");
                Ok(info)
            }
            Err(e) => {
                error!(error = %format!("{e:#}"), "error fetching account information");
                Err(e)
            }
        }
    }
}

/// Decode a `/api/v3/account` body, keeping only non-zero balances.
fn parse_account(body: &serde_json::Value) -> Result<AccountInfo> {
    let balances = body
        .get("balances")
        .and_then(|b| b.as_array())
        .context("Balances not found in account information")?;

    let balances = balances
        .iter()
        .map(|b| serde_json::from_value::<BalanceInfo>(b.clone()))
        .collect::<Result<Vec<_>, _>>()
        .context("malformed balance entry in account information")?
        .into_iter()
        .filter(BalanceInfo::is_non_zero)
        .collect();

    Ok(AccountInfo {
        account_type: body
            .get("accountType")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        can_trade: body
            .get("canTrade")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
        update_time: body.get("updateTime").and_then(|v| v.as_i64()),
        balances,
    })
}
