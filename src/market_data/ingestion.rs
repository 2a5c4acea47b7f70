// =============================================================================
// Candle Ingestion Service — historical seed + live open-bar updates
// =============================================================================
//
// Owns the rolling window for one (symbol, interval). `load_history` replaces
// the window with a fresh REST snapshot and then starts a live subscription
// whose updates flow back into `ingest_update`.
//
// Merge rule for a live update:
//   last.open_time == update.open_time (both known)  =>  replace last in place
//   anything else                                    =>  append (evict oldest)
//
// An unknown (`None`) open time never matches. An update older than the last
// bar is appended, not dropped.
// =============================================================================

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::candle::{Candle, CandleKey, RawCandle};
use super::candle_buffer::CandleBuffer;
use super::source::{CandleCallback, CandleSource, Subscription};
use crate::error::FetchError;

/// Window size used before the first successful `load_history`.
pub const DEFAULT_LIMIT: usize = 24;

/// What a single live update did to the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IngestOutcome {
    Updated,
    Appended,
}

/// Window contents plus the identity of the feed allowed to write into it.
#[derive(Debug)]
struct SeriesState {
    key: Option<CandleKey>,
    buffer: CandleBuffer,
    /// Bumped on every reload / stop so callbacks from a superseded
    /// subscription can be recognised and ignored.
    generation: u64,
}

impl SeriesState {
    fn ingest(&mut self, raw: &RawCandle) -> IngestOutcome {
        let candle = Candle::normalize(raw);
        let last_open = self.buffer.last().and_then(|c| c.open_time);

        match (last_open, candle.open_time) {
            (Some(last), Some(incoming)) if last == incoming => {
                self.buffer.replace_last(candle);
                IngestOutcome::Updated
            }
            _ => {
                self.buffer.append(candle);
                IngestOutcome::Appended
            }
        }
    }
}

/// Keeps a bounded, live-updated candle window for one (symbol, interval).
pub struct CandleIngestionService {
    source: Arc<dyn CandleSource>,
    state: Arc<RwLock<SeriesState>>,
    subscription: Mutex<Option<Subscription>>,
}

impl CandleIngestionService {
    /// Create an empty, not-yet-loaded service backed by `source`.
    pub fn new(source: Arc<dyn CandleSource>) -> Self {
        Self {
            source,
            state: Arc::new(RwLock::new(SeriesState {
                key: None,
                buffer: CandleBuffer::new(DEFAULT_LIMIT),
                generation: 0,
            })),
            subscription: Mutex::new(None),
        }
    }

    // -------------------------------------------------------------------------
    // Loading
    // -------------------------------------------------------------------------

    /// Replace the window with the latest `limit` bars of `(symbol, interval)`
    /// and start live updates for that series.
    ///
    /// On failure nothing changes: the previous window, key and subscription
    /// all stay as they were.
    pub async fn load_history(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, FetchError> {
        let key = CandleKey::new(symbol, interval);
        info!(key = %key, limit, "loading historical candles");

        let raw = match self
            .source
            .fetch_historical_candles(symbol, interval, limit)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                error!(key = %key, error = %format!("{e:#}"), "error fetching historical candles");
                return Err(FetchError::new(key, e));
            }
        };

        // Held until the new feed is stored: the slot only ever holds the
        // feed of the current generation.
        let mut slot = self.subscription.lock();
        if let Some(mut previous) = slot.take() {
            previous.cancel();
        }

        let (seeded, generation) = {
            let mut buffer = CandleBuffer::new(limit as usize);
            buffer.append_all(raw.iter().map(Candle::normalize));
            let seeded = buffer.all();

            let mut state = self.state.write();
            state.key = Some(key.clone());
            state.buffer = buffer;
            state.generation += 1;
            (seeded, state.generation)
        };

        info!(
            key = %key,
            fetched = raw.len(),
            stored = seeded.len(),
            "historical candles loaded"
        );

        let on_update = self.live_callback(generation);
        match self.source.subscribe_live_candles(symbol, interval, on_update) {
            Ok(sub) => {
                info!(key = %key, "live candle subscription started");
                *slot = Some(sub);
            }
            Err(e) => {
                error!(
                    key = %key,
                    error = %format!("{e:#}"),
                    "failed to start live candle subscription -- window will not update"
                );
            }
        }
        drop(slot);

        Ok(seeded)
    }

    /// Callback handed to the source.  Holds only a weak reference so a
    /// dropped service is not kept alive by a lingering feed.
    fn live_callback(&self, generation: u64) -> CandleCallback {
        let state: Weak<RwLock<SeriesState>> = Arc::downgrade(&self.state);
        Arc::new(move |raw: RawCandle| {
            let Some(state) = state.upgrade() else {
                return;
            };
            let mut state = state.write();
            if state.generation != generation {
                debug!(
                    stale_generation = generation,
                    current_generation = state.generation,
                    "ignoring update from superseded subscription"
                );
                return;
            }
            let outcome = state.ingest(&raw);
            debug!(
                open_time = ?raw.start_time,
                close = ?raw.close,
                ?outcome,
                len = state.buffer.len(),
                "candle update"
            );
        })
    }

    // -------------------------------------------------------------------------
    // Live updates
    // -------------------------------------------------------------------------

    /// Apply one external candle update to the window.
    ///
    /// Never fails: partial input is normalized, not rejected.
    pub fn ingest_update(&self, raw: RawCandle) {
        let mut state = self.state.write();
        let outcome = state.ingest(&raw);
        debug!(
            open_time = ?raw.start_time,
            ?outcome,
            len = state.buffer.len(),
            "candle update"
        );
    }

    /// Cancel the active live subscription, if any.  Updates still delivered
    /// through its callback afterwards are ignored.
    pub fn stop(&self) {
        let mut slot = self.subscription.lock();
        if let Some(mut sub) = slot.take() {
            self.state.write().generation += 1;
            sub.cancel();
        }
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Copy of the current window, oldest first.
    pub fn snapshot(&self) -> Vec<Candle> {
        self.state.read().buffer.all()
    }

    pub fn close_prices(&self) -> Vec<String> {
        self.state.read().buffer.close_prices()
    }

    pub fn last_close_prices(&self, count: usize) -> Vec<String> {
        self.state.read().buffer.last_close_prices(count)
    }

    /// Series of the last successful load.
    pub fn key(&self) -> Option<CandleKey> {
        self.state.read().key.clone()
    }

    /// Current window capacity.
    pub fn limit(&self) -> usize {
        self.state.read().buffer.capacity()
    }

    pub fn is_loaded(&self) -> bool {
        self.state.read().key.is_some()
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription
            .lock()
            .as_ref()
            .map_or(false, Subscription::is_active)
    }

    /// Log a summary of the cached window (full contents at debug level).
    pub fn log_snapshot(&self) {
        let state = self.state.read();
        let key = state
            .key
            .as_ref()
            .map_or_else(|| "<unloaded>".to_string(), ToString::to_string);

        match state.buffer.last() {
            Some(last) => info!(
                key = %key,
                count = state.buffer.len(),
                capacity = state.buffer.capacity(),
                last_open = ?last.open_time_utc(),
                last_close = %last.close,
                "cached candles"
            ),
            None => warn!(key = %key, "no candles cached"),
        }
        debug!(key = %key, candles = ?state.buffer.all(), "cached candle window");
    }
}

impl Drop for CandleIngestionService {
    fn drop(&mut self) {
        if let Some(mut sub) = self.subscription.get_mut().take() {
            sub.cancel();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;

    /// In-memory source: serves a canned history and lets tests push live
    /// updates through every callback it has been handed.
    #[derive(Default)]
    struct MemorySource {
        history: Mutex<Vec<RawCandle>>,
        fail_with: Mutex<Option<String>>,
        fetch_calls: Mutex<Vec<(String, String, u32)>>,
        callbacks: Mutex<Vec<(CandleKey, CandleCallback)>>,
    }

    impl MemorySource {
        fn with_history(history: Vec<RawCandle>) -> Arc<Self> {
            let src = Self::default();
            *src.history.lock() = history;
            Arc::new(src)
        }

        fn fail_next(&self, msg: &str) {
            *self.fail_with.lock() = Some(msg.to_string());
        }

        /// Push to the most recently registered callback.
        fn push(&self, raw: RawCandle) {
            let cb = self.callbacks.lock().last().map(|(_, cb)| cb.clone());
            if let Some(cb) = cb {
                cb(raw);
            }
        }

        /// Push to the callback registered at `index` (older subscriptions).
        fn push_to(&self, index: usize, raw: RawCandle) {
            let cb = self.callbacks.lock()[index].1.clone();
            cb(raw);
        }
    }

    #[async_trait]
    impl CandleSource for MemorySource {
        async fn fetch_historical_candles(
            &self,
            symbol: &str,
            interval: &str,
            limit: u32,
        ) -> Result<Vec<RawCandle>> {
            self.fetch_calls
                .lock()
                .push((symbol.to_string(), interval.to_string(), limit));
            if let Some(msg) = self.fail_with.lock().take() {
                anyhow::bail!(msg);
            }
            Ok(self.history.lock().clone())
        }

        fn subscribe_live_candles(
            &self,
            symbol: &str,
            interval: &str,
            on_update: CandleCallback,
        ) -> Result<Subscription> {
            let key = CandleKey::new(symbol, interval);
            self.callbacks.lock().push((key.clone(), on_update));
            Ok(Subscription::detached(key))
        }
    }

    fn raw(start_time: i64, close: &str) -> RawCandle {
        RawCandle {
            start_time: Some(start_time),
            open: Some(close.to_string()),
            high: Some(close.to_string()),
            low: Some(close.to_string()),
            close: Some(close.to_string()),
            volume: Some("10".into()),
            ..Default::default()
        }
    }

    fn open_times(svc: &CandleIngestionService) -> Vec<Option<i64>> {
        svc.snapshot().iter().map(|c| c.open_time).collect()
    }

    #[tokio::test]
    async fn load_history_seeds_and_subscribes() {
        let src = MemorySource::with_history(vec![raw(1, "105"), raw(2, "110")]);
        let svc = CandleIngestionService::new(src.clone());
        assert!(!svc.is_loaded());

        let seeded = svc.load_history("BTCUSDT", "1m", 5).await.unwrap();

        assert_eq!(seeded.len(), 2);
        assert_eq!(svc.snapshot(), seeded);
        assert_eq!(svc.limit(), 5);
        assert_eq!(svc.key(), Some(CandleKey::new("BTCUSDT", "1m")));
        assert!(svc.is_loaded());
        assert!(svc.is_subscribed());
        assert_eq!(
            *src.fetch_calls.lock(),
            vec![("BTCUSDT".to_string(), "1m".to_string(), 5)]
        );
        let callbacks = src.callbacks.lock();
        assert_eq!(callbacks.len(), 1);
        assert_eq!(callbacks[0].0, CandleKey::new("BTCUSDT", "1m"));
    }

    #[tokio::test]
    async fn load_history_normalizes_partial_bars() {
        let src = MemorySource::with_history(vec![RawCandle {
            start_time: Some(1),
            close: Some("105".into()),
            ..Default::default()
        }]);
        let svc = CandleIngestionService::new(src);
        let seeded = svc.load_history("BTCUSDT", "1m", 5).await.unwrap();
        assert_eq!(seeded[0].open, "0");
        assert_eq!(seeded[0].close, "105");
        assert_eq!(seeded[0].close_time, None);
        assert_eq!(seeded[0].trades, 0);
    }

    #[tokio::test]
    async fn load_history_keeps_only_the_newest_limit_bars() {
        let src = MemorySource::with_history(vec![raw(1, "1"), raw(2, "2"), raw(3, "3")]);
        let svc = CandleIngestionService::new(src);
        let seeded = svc.load_history("BTCUSDT", "1m", 2).await.unwrap();
        assert_eq!(
            seeded.iter().map(|c| c.open_time).collect::<Vec<_>>(),
            vec![Some(2), Some(3)]
        );
    }

    #[tokio::test]
    async fn same_open_time_replaces_last() {
        let src = MemorySource::with_history(vec![raw(5, "100")]);
        let svc = CandleIngestionService::new(src);
        svc.load_history("BTCUSDT", "1m", 10).await.unwrap();

        svc.ingest_update(raw(5, "101"));

        let snap = svc.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].close, "101");
        assert_eq!(snap[0].quote_volume, "0");
    }

    #[tokio::test]
    async fn new_open_time_appends() {
        let src = MemorySource::with_history(vec![raw(5, "100")]);
        let svc = CandleIngestionService::new(src);
        svc.load_history("BTCUSDT", "1m", 10).await.unwrap();

        svc.ingest_update(raw(6, "106"));

        assert_eq!(open_times(&svc), vec![Some(5), Some(6)]);
    }

    #[tokio::test]
    async fn end_to_end_merge_then_evict() {
        let src = MemorySource::with_history(vec![raw(1, "105"), raw(2, "110")]);
        let svc = CandleIngestionService::new(src.clone());
        svc.load_history("BTCUSDT", "1m", 2).await.unwrap();

        src.push(raw(2, "112"));
        let snap = svc.snapshot();
        assert_eq!(open_times(&svc), vec![Some(1), Some(2)]);
        assert_eq!(snap[1].close, "112");

        src.push(raw(3, "115"));
        let snap = svc.snapshot();
        assert_eq!(open_times(&svc), vec![Some(2), Some(3)]);
        assert_eq!(snap[0].close, "112");
        assert_eq!(snap[1].close, "115");
    }

    #[tokio::test]
    async fn failed_first_load_leaves_service_uninitialized() {
        let src = MemorySource::with_history(vec![raw(1, "1")]);
        src.fail_next("Failed to fetch candles");
        let svc = CandleIngestionService::new(src.clone());

        let err = svc.load_history("BTCUSDT", "1m", 5).await.unwrap_err();

        assert_eq!(err.key, CandleKey::new("BTCUSDT", "1m"));
        assert_eq!(err.source.to_string(), "Failed to fetch candles");
        assert!(svc.snapshot().is_empty());
        assert!(!svc.is_loaded());
        assert!(!svc.is_subscribed());
        assert!(src.callbacks.lock().is_empty());
    }

    #[tokio::test]
    async fn failed_reload_keeps_previous_window_and_feed() {
        let src = MemorySource::with_history(vec![raw(1, "1"), raw(2, "2")]);
        let svc = CandleIngestionService::new(src.clone());
        svc.load_history("BTCUSDT", "1m", 5).await.unwrap();
        let before = svc.snapshot();

        src.fail_next("boom");
        assert!(svc.load_history("ETHUSDT", "5m", 3).await.is_err());

        assert_eq!(svc.snapshot(), before);
        assert_eq!(svc.key(), Some(CandleKey::new("BTCUSDT", "1m")));
        assert_eq!(svc.limit(), 5);
        assert!(svc.is_subscribed());

        src.push(raw(3, "3"));
        assert_eq!(open_times(&svc), vec![Some(1), Some(2), Some(3)]);
    }

    #[tokio::test]
    async fn unknown_open_time_never_merges() {
        let src = MemorySource::with_history(vec![]);
        let svc = CandleIngestionService::new(src);
        svc.load_history("BTCUSDT", "1m", 5).await.unwrap();

        svc.ingest_update(RawCandle::default());
        svc.ingest_update(RawCandle::default());

        assert_eq!(open_times(&svc), vec![None, None]);
    }

    #[tokio::test]
    async fn stale_update_is_appended_out_of_order() {
        let src = MemorySource::with_history(vec![raw(5, "5"), raw(6, "6")]);
        let svc = CandleIngestionService::new(src);
        svc.load_history("BTCUSDT", "1m", 5).await.unwrap();

        svc.ingest_update(raw(4, "4"));

        assert_eq!(open_times(&svc), vec![Some(5), Some(6), Some(4)]);
    }

    #[tokio::test]
    async fn reload_supersedes_previous_subscription() {
        let src = MemorySource::with_history(vec![raw(1, "1")]);
        let svc = CandleIngestionService::new(src.clone());
        svc.load_history("BTCUSDT", "1m", 5).await.unwrap();

        *src.history.lock() = vec![raw(10, "10")];
        svc.load_history("BTCUSDT", "1m", 5).await.unwrap();
        assert_eq!(src.callbacks.lock().len(), 2);

        // Late delivery through the first callback is dropped.
        src.push_to(0, raw(2, "2"));
        assert_eq!(open_times(&svc), vec![Some(10)]);

        src.push_to(1, raw(11, "11"));
        assert_eq!(open_times(&svc), vec![Some(10), Some(11)]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_reloads_leave_the_newest_feed_live() {
        let src = MemorySource::with_history(vec![raw(1, "1")]);
        let svc = Arc::new(CandleIngestionService::new(src.clone()));

        for round in 0..50 {
            let loads: Vec<_> = (0..8)
                .map(|_| {
                    let svc = svc.clone();
                    tokio::spawn(async move { svc.load_history("BTCUSDT", "1m", 5).await })
                })
                .collect();
            for load in loads {
                load.await.unwrap().unwrap();
            }

            assert!(svc.is_subscribed());
            src.push(raw(100 + round, "2"));
            assert_eq!(open_times(&svc), vec![Some(1), Some(100 + round)]);
        }
    }

    #[tokio::test]
    async fn stop_ignores_further_updates() {
        let src = MemorySource::with_history(vec![raw(1, "1")]);
        let svc = CandleIngestionService::new(src.clone());
        svc.load_history("BTCUSDT", "1m", 5).await.unwrap();

        svc.stop();
        assert!(!svc.is_subscribed());

        src.push(raw(2, "2"));
        assert_eq!(open_times(&svc), vec![Some(1)]);

        // Direct ingestion still works.
        svc.ingest_update(raw(2, "2"));
        assert_eq!(open_times(&svc), vec![Some(1), Some(2)]);
    }

    #[tokio::test]
    async fn dropped_service_ignores_late_updates() {
        let src = MemorySource::with_history(vec![raw(1, "1")]);
        let svc = CandleIngestionService::new(src.clone());
        svc.load_history("BTCUSDT", "1m", 5).await.unwrap();
        drop(svc);

        src.push(raw(2, "2"));
    }

    #[test]
    fn ingest_before_load_uses_default_window() {
        let svc = CandleIngestionService::new(MemorySource::with_history(vec![]));
        assert_eq!(svc.limit(), DEFAULT_LIMIT);

        svc.ingest_update(RawCandle {
            start_time: Some(1_234_567_891),
            ..Default::default()
        });

        let snap = svc.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].open_time, Some(1_234_567_891));
        assert_eq!(snap[0].close, "0");
        assert!(!svc.is_loaded());
    }

    #[tokio::test]
    async fn close_price_queries() {
        let history = (1..=5).map(|i| raw(i, &i.to_string())).collect();
        let svc = CandleIngestionService::new(MemorySource::with_history(history));
        svc.load_history("BTCUSDT", "1m", 10).await.unwrap();

        assert_eq!(svc.close_prices(), vec!["1", "2", "3", "4", "5"]);
        assert_eq!(svc.last_close_prices(2), vec!["4", "5"]);
        assert!(svc.last_close_prices(0).is_empty());
        svc.log_snapshot();
    }
}
