// =============================================================================
// Candle Feed — Main Entry Point
// =============================================================================
//
// Seeds the candle window for one symbol/interval from the REST API, keeps it
// current from the kline WebSocket and logs it periodically until Ctrl+C.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use candle_feed::account::AccountService;
use candle_feed::binance::BinanceClient;
use candle_feed::config::{Credentials, FeedConfig};
use candle_feed::market_data::{BinanceCandleSource, CandleIngestionService};

const CONFIG_PATH: &str = "feed_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Candle Feed — starting up");

    let mut config = FeedConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        FeedConfig::default()
    });
    config.apply_env_overrides();

    info!(
        symbol = %config.symbol,
        interval = %config.interval,
        limit = config.limit,
        "Configured candle series"
    );

    // ── 2. Build Binance client ──────────────────────────────────────────
    let creds = Credentials::from_env();
    let client = Arc::new(BinanceClient::with_base_url(
        creds.api_key,
        creds.secret_key,
        config.rest_base_url.clone(),
    )?);

    // ── 3. Market overview ───────────────────────────────────────────────
    if let Ok(t) = client.get_24h_ticker(&config.symbol).await {
        info!(
            symbol = %t.symbol,
            last_price = %t.last_price,
            change_pct = %t.price_change_percent,
            high = %t.high_price,
            low = %t.low_price,
            volume = %t.volume,
            "24h ticker"
        );
    }

    if client.has_credentials() {
        let accounts = AccountService::new(client.clone());
        if let Ok(account) = accounts.account_info().await {
            for b in &account.balances {
                info!(asset = %b.asset, free = %b.free, locked = %b.locked, "balance");
            }
        }
    } else {
        info!("No API credentials configured — skipping account information");
    }

    // ── 4. Seed the window and go live ───────────────────────────────────
    let source = Arc::new(BinanceCandleSource::new(
        client.clone(),
        config.ws_base_url.clone(),
    ));
    let service = Arc::new(CandleIngestionService::new(source));

    let seeded = service
        .load_history(&config.symbol, &config.interval, config.limit)
        .await?;
    info!(count = seeded.len(), "Historical candles seeded");
    service.log_snapshot();

    // ── 5. Periodic snapshot log ─────────────────────────────────────────
    let log_service = service.clone();
    let period = Duration::from_secs(config.snapshot_log_secs.max(1));
    let logger = tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            interval.tick().await;
            log_service.log_snapshot();
        }
    });

    info!("Candle feed running. Press Ctrl+C to stop.");

    // ── 6. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    logger.abort();
    service.stop();
    info!(
        closes = ?service.last_close_prices(config.limit as usize),
        "Final close prices"
    );

    info!("Candle Feed shut down complete.");
    Ok(())
}
