// =============================================================================
// Candle Source — the exchange-facing capability the cache consumes
// =============================================================================
//
// The ingestion service never builds exchange clients itself. It receives a
// `CandleSource` at construction time and uses it for exactly two things: a
// one-shot historical fetch and a live subscription. Tests plug in an
// in-memory source; production uses `BinanceCandleSource`.
// =============================================================================

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::info;

use super::candle::{CandleKey, RawCandle};

/// Callback invoked once per live candle update, in delivery order.
pub type CandleCallback = Arc<dyn Fn(RawCandle) + Send + Sync>;

/// Historical fetch and live subscription for candle series.
#[async_trait]
pub trait CandleSource: Send + Sync {
    /// Fetch up to `limit` of the most recent bars, oldest first.
    async fn fetch_historical_candles(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<RawCandle>>;

    /// Start delivering live updates for `(symbol, interval)` to `on_update`.
    ///
    /// Delivery continues until the returned [`Subscription`] is cancelled or
    /// dropped, or the underlying feed ends.
    fn subscribe_live_candles(
        &self,
        symbol: &str,
        interval: &str,
        on_update: CandleCallback,
    ) -> Result<Subscription>;
}

// ---------------------------------------------------------------------------
// Subscription handle
// ---------------------------------------------------------------------------

/// Owned handle to a live update feed.  Cancelling (or dropping) it stops the
/// feed task, if the source runs one.
#[derive(Debug)]
pub struct Subscription {
    key: CandleKey,
    task: Option<JoinHandle<()>>,
    cancelled: bool,
}

impl Subscription {
    /// Subscription backed by a spawned feed task.
    pub fn spawned(key: CandleKey, task: JoinHandle<()>) -> Self {
        Self {
            key,
            task: Some(task),
            cancelled: false,
        }
    }

    /// Subscription whose delivery is driven by the source itself (no task to
    /// abort).
    pub fn detached(key: CandleKey) -> Self {
        Self {
            key,
            task: None,
            cancelled: false,
        }
    }

    pub fn key(&self) -> &CandleKey {
        &self.key
    }

    /// `true` until cancelled or until the feed task has finished.
    pub fn is_active(&self) -> bool {
        !self.cancelled && self.task.as_ref().map_or(true, |t| !t.is_finished())
    }

    /// Stop the feed.  Idempotent.
    pub fn cancel(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;
        if let Some(task) = self.task.take() {
            task.abort();
        }
        info!(key = %self.key, "live candle subscription cancelled");
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detached_subscription_cancel_is_idempotent() {
        let mut sub = Subscription::detached(CandleKey::new("BTCUSDT", "1m"));
        assert!(sub.is_active());
        sub.cancel();
        assert!(!sub.is_active());
        sub.cancel();
        assert!(!sub.is_active());
        assert_eq!(sub.key().symbol, "BTCUSDT");
    }

    #[tokio::test]
    async fn cancel_aborts_the_feed_task() {
        let task = tokio::spawn(async {
            loop {
                tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            }
        });
        let mut sub = Subscription::spawned(CandleKey::new("ETHUSDT", "5m"), task);
        assert!(sub.is_active());
        sub.cancel();
        assert!(!sub.is_active());
    }

    #[tokio::test]
    async fn finished_task_is_inactive() {
        let task = tokio::spawn(async {});
        let sub = Subscription::spawned(CandleKey::new("ETHUSDT", "5m"), task);
        for _ in 0..100 {
            if !sub.is_active() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(!sub.is_active());
    }
}
