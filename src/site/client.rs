//! Configuration client: polling, reads, and change notification.
//!
//! # Data Flow
//! ```text
//! continuously_update loop
//!     → fetch_and_update (read RawSource)
//!     → Store::maybe_update (compare + parse)
//!     → on change: restart tracker, metrics, notify watchers
//!     → watcher tasks call their callback with the new config
//! ```
//!
//! # Design Decisions
//! - Watcher channels have capacity 1; bursts of changes coalesce into one call
//! - Each watcher runs its callback from a single task, so calls never overlap
//! - Watcher tasks hold a weak reference and stop once the client is gone

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use tokio::sync::{mpsc, oneshot, OnceCell};
use tokio::sync::mpsc::error::TrySendError;

use crate::observability::metrics;
use crate::resilience::backoff::jitter;
use crate::site::diff::RestartTracker;
use crate::site::error::ConfResult;
use crate::site::source::{EmptySource, RawSource};
use crate::site::store::{Store, UpdateOutcome};
use crate::site::types::{RawConfig, Unified};

/// Receiving end of write notifications.
///
/// Each message is a "done" signal the update loop completes once it has re-read
/// the source.
pub type SourceUpdates = mpsc::Receiver<oneshot::Sender<()>>;

/// Timing of the background update loop.
#[derive(Debug, Clone)]
pub struct UpdateLoopOptions {
    /// Upper bound of the random wait between polls.
    pub max_jitter: Duration,
    /// How long "source unreachable" errors stay out of the error log after the
    /// last successful fetch.
    pub delay_before_unreachable_log: Duration,
}

impl Default for UpdateLoopOptions {
    fn default() -> Self {
        Self {
            max_jitter: Duration::from_secs(5),
            delay_before_unreachable_log: Duration::from_secs(15),
        }
    }
}

struct Watcher {
    id: u64,
    signal: mpsc::Sender<()>,
}

struct ClientInner {
    store: Store,
    source: Arc<dyn RawSource>,
    watchers: Mutex<Vec<Watcher>>,
    next_watcher_id: AtomicU64,
    restart: RestartTracker,
}

/// Handle to the process' site configuration.
///
/// Cheap to clone; clones share the same store and watchers.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// A client reading from `source` into `store`.
    pub fn new(source: Arc<dyn RawSource>, store: Store) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                store,
                source,
                watchers: Mutex::new(Vec::new()),
                next_watcher_id: AtomicU64::new(1),
                restart: RestartTracker::new(),
            }),
        }
    }

    /// A client that always serves `cfg`.
    pub fn mock(cfg: Unified) -> Self {
        let client = Self::new(Arc::new(EmptySource), Store::default());
        client.inner.store.mock(Some(Arc::new(cfg)));
        client
    }

    /// The active configuration, waiting for the first one if needed.
    pub async fn get(&self) -> Arc<Unified> {
        self.inner.store.last_valid().await
    }

    /// The active configuration, or `None` before initialization.
    pub fn try_get(&self) -> Option<Arc<Unified>> {
        self.inner.store.try_last_valid()
    }

    /// The raw configuration behind [`Client::get`].
    pub async fn raw(&self) -> RawConfig {
        self.inner.store.raw().await
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    /// Override the configuration (or clear the override) and notify watchers.
    pub fn mock_config(&self, cfg: Option<Unified>) {
        self.inner.store.mock(cfg.map(Arc::new));
        self.notify_watchers();
    }

    /// Whether an observed change requires a server restart.
    pub fn need_restart(&self) -> bool {
        self.inner.restart.needed()
    }

    /// Call `f` now and after every configuration change.
    ///
    /// The first call happens before this returns. Later calls run on a background
    /// task, one at a time.
    pub async fn watch<F>(&self, f: F) -> WatchHandle
    where
        F: Fn(Arc<Unified>) + Send + Sync + 'static,
    {
        let (signal, mut changes) = mpsc::channel(1);
        let id = self.inner.next_watcher_id.fetch_add(1, Ordering::Relaxed);
        let count = {
            let mut watchers = self.inner.watchers.lock().expect("watcher list poisoned");
            watchers.push(Watcher { id, signal });
            watchers.len()
        };
        metrics::record_watchers(count);

        f(self.get().await);

        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while changes.recv().await.is_some() {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let cfg = inner.store.last_valid().await;
                drop(inner);
                f(cfg);
            }
            tracing::trace!(watcher = id, "Watcher stopped");
        });

        WatchHandle {
            id,
            client: Arc::downgrade(&self.inner),
        }
    }

    /// Memoize `f` over the configuration, recomputing it on every change.
    pub fn cached<T, F>(&self, f: F) -> Cached<T>
    where
        T: Send + Sync + 'static,
        F: Fn(&Unified) -> T + Send + Sync + 'static,
    {
        Cached {
            client: self.clone(),
            compute: Arc::new(f),
            slot: OnceCell::new(),
        }
    }

    /// Read the source once and install the result.
    pub async fn fetch_and_update(&self) -> ConfResult<UpdateOutcome> {
        let raw = match self.inner.source.read().await {
            Ok(raw) => raw,
            Err(e) => {
                metrics::record_fetch("error");
                return Err(e);
            }
        };

        let outcome = match self.inner.store.maybe_update(raw) {
            Ok(outcome) => outcome,
            Err(e) => {
                metrics::record_fetch("error");
                return Err(e);
            }
        };

        if !outcome.changed {
            metrics::record_fetch("unchanged");
            return Ok(outcome);
        }

        metrics::record_fetch("changed");
        metrics::record_config_change();
        match &outcome.old {
            None => tracing::debug!("Site configuration initialized"),
            Some(old) => {
                tracing::info!("Site configuration changed");
                self.inner.restart.observe(old, &outcome.new);
            }
        }
        self.notify_watchers();
        Ok(outcome)
    }

    /// Keep the store in sync with the source. Never returns.
    ///
    /// Each round fetches, completes the pending write signal (if any), then waits
    /// for either the next write signal or a jittered poll interval.
    pub async fn continuously_update(self, options: UpdateLoopOptions, mut source_updates: Option<SourceUpdates>) {
        let mut last_success = Instant::now();
        let mut pending: Option<oneshot::Sender<()>> = None;

        loop {
            match self.fetch_and_update().await {
                Ok(_) => last_success = Instant::now(),
                Err(e) => {
                    if should_log_fetch_error(e.is_unreachable(), last_success.elapsed(), &options) {
                        tracing::error!(error = %e, "Received error during background config update");
                    } else {
                        tracing::debug!(error = %e, "Configuration source not reachable yet");
                    }
                }
            }

            if let Some(done) = pending.take() {
                let _ = done.send(());
            }

            pending = tokio::select! {
                Some(done) = next_source_update(&mut source_updates) => Some(done),
                _ = tokio::time::sleep(jitter(options.max_jitter)) => None,
            };
        }
    }

    fn notify_watchers(&self) {
        let mut watchers = self.inner.watchers.lock().expect("watcher list poisoned");
        let before = watchers.len();
        watchers.retain(|w| match w.signal.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => true,
            Err(TrySendError::Closed(())) => false,
        });
        if watchers.len() != before {
            metrics::record_watchers(watchers.len());
        }
    }

    fn unsubscribe(&self, id: u64) {
        let mut watchers = self.inner.watchers.lock().expect("watcher list poisoned");
        watchers.retain(|w| w.id != id);
        metrics::record_watchers(watchers.len());
    }

    /// Number of registered watchers.
    pub fn watcher_count(&self) -> usize {
        self.inner.watchers.lock().expect("watcher list poisoned").len()
    }
}

async fn next_source_update(updates: &mut Option<SourceUpdates>) -> Option<oneshot::Sender<()>> {
    match updates {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn should_log_fetch_error(unreachable: bool, since_success: Duration, options: &UpdateLoopOptions) -> bool {
    !unreachable || since_success > options.delay_before_unreachable_log
}

/// Registration returned by [`Client::watch`].
///
/// Dropping the handle leaves the watcher registered for the client's lifetime.
pub struct WatchHandle {
    id: u64,
    client: Weak<ClientInner>,
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle").field("id", &self.id).finish()
    }
}

impl WatchHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Stop calling the watcher's callback.
    pub fn unsubscribe(self) {
        if let Some(inner) = self.client.upgrade() {
            Client { inner }.unsubscribe(self.id);
        }
    }
}

/// A value derived from the configuration, recomputed on change.
///
/// Created by [`Client::cached`]. The watch backing it is registered on the first
/// [`Cached::get`] and removed when the `Cached` is dropped.
pub struct Cached<T> {
    client: Client,
    compute: Arc<dyn Fn(&Unified) -> T + Send + Sync>,
    slot: OnceCell<(Arc<ArcSwapOption<T>>, u64)>,
}

impl<T: Send + Sync + 'static> Cached<T> {
    /// The current value, computing it on first use.
    pub async fn get(&self) -> Arc<T> {
        let (slot, _) = self
            .slot
            .get_or_init(|| async {
                let slot = Arc::new(ArcSwapOption::<T>::empty());
                let target = Arc::clone(&slot);
                let compute = Arc::clone(&self.compute);
                let handle = self
                    .client
                    .watch(move |cfg| target.store(Some(Arc::new(compute(cfg.as_ref())))))
                    .await;
                (slot, handle.id())
            })
            .await;
        slot.load_full()
            .expect("watch computes the value before returning")
    }
}

impl<T> Drop for Cached<T> {
    fn drop(&mut self) {
        if let Some((_, id)) = self.slot.get() {
            self.client.unsubscribe(*id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::source::MemorySource;
    use std::sync::atomic::AtomicUsize;

    fn client_with(source: Arc<MemorySource>) -> Client {
        Client::new(source, Store::default())
    }

    async fn eventually(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_watch_calls_before_returning() {
        let client = Client::mock(Unified::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        client.watch(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_watchers_fire_once_per_change() {
        let source = Arc::new(MemorySource::new("{}"));
        let client = client_with(Arc::clone(&source));
        client.fetch_and_update().await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::<Arc<Unified>>::new()));
        let s = Arc::clone(&seen);
        client
            .watch(move |cfg| s.lock().unwrap().push(cfg))
            .await;
        assert_eq!(seen.lock().unwrap().len(), 1);

        source.set_site(r#"{"log":{}}"#);
        assert!(client.fetch_and_update().await.unwrap().changed);
        eventually(|| seen.lock().unwrap().len() == 2).await;
        assert_eq!(client.raw().await.site, r#"{"log":{}}"#);
        assert!(seen.lock().unwrap()[1].site.log.is_some());

        // Same raw value again: no change, no notification.
        assert!(!client.fetch_and_update().await.unwrap().changed);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_last_valid() {
        let source = Arc::new(MemorySource::new(r#"{"licenseKey": "good"}"#));
        let client = client_with(Arc::clone(&source));
        client.fetch_and_update().await.unwrap();

        source.set_site("{ not json");
        assert!(client.fetch_and_update().await.is_err());
        assert_eq!(client.get().await.site.license_key.as_deref(), Some("good"));
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_notifications() {
        let source = Arc::new(MemorySource::new("{}"));
        let client = client_with(Arc::clone(&source));
        client.fetch_and_update().await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let handle = client
            .watch(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        assert_eq!(client.watcher_count(), 1);

        handle.unsubscribe();
        assert_eq!(client.watcher_count(), 0);

        source.set_site(r#"{"licenseKey": "x"}"#);
        client.fetch_and_update().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cached_recomputes_on_change() {
        let source = Arc::new(MemorySource::new(r#"{"externalURL": "https://a"}"#));
        let client = client_with(Arc::clone(&source));
        client.fetch_and_update().await.unwrap();

        let computations = Arc::new(AtomicUsize::new(0));
        let n = Arc::clone(&computations);
        let cached = client.cached(move |cfg| {
            n.fetch_add(1, Ordering::SeqCst);
            cfg.site.external_url.to_uppercase()
        });
        assert_eq!(computations.load(Ordering::SeqCst), 0);

        assert_eq!(*cached.get().await, "HTTPS://A");
        assert_eq!(*cached.get().await, "HTTPS://A");
        assert_eq!(computations.load(Ordering::SeqCst), 1);

        source.set_site(r#"{"externalURL": "https://b"}"#);
        client.fetch_and_update().await.unwrap();
        eventually(|| computations.load(Ordering::SeqCst) == 2).await;
        assert_eq!(*cached.get().await, "HTTPS://B");

        drop(cached);
        assert_eq!(client.watcher_count(), 0);
    }

    #[tokio::test]
    async fn test_mock_config_notifies_and_clears() {
        let source = Arc::new(MemorySource::new(r#"{"externalURL": "https://real"}"#));
        let client = client_with(Arc::clone(&source));
        client.fetch_and_update().await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::<String>::new()));
        let s = Arc::clone(&seen);
        let _handle = client
            .watch(move |cfg| s.lock().unwrap().push(cfg.site.external_url.clone()))
            .await;

        let mut mocked = Unified::default();
        mocked.site.external_url = "https://mock".into();
        client.mock_config(Some(mocked));
        eventually(|| seen.lock().unwrap().len() == 2).await;
        assert_eq!(seen.lock().unwrap()[1], "https://mock");
        assert_eq!(client.raw().await.id, 0);

        client.mock_config(None);
        eventually(|| seen.lock().unwrap().len() == 3).await;
        assert_eq!(seen.lock().unwrap()[2], "https://real");
        assert_eq!(client.get().await.site.external_url, "https://real");
    }

    #[tokio::test]
    async fn test_restart_tracking() {
        let source = Arc::new(MemorySource::new("{}"));
        let client = client_with(Arc::clone(&source));
        client.fetch_and_update().await.unwrap();
        assert!(!client.need_restart());

        source.set_site(r#"{"externalURL": "https://a"}"#);
        client.fetch_and_update().await.unwrap();
        assert!(!client.need_restart());

        source.set_site(r#"{"auth.providers": [{"type": "builtin"}]}"#);
        client.fetch_and_update().await.unwrap();
        assert!(client.need_restart());
    }

    #[tokio::test]
    async fn test_update_loop_acknowledges_writes() {
        let source = Arc::new(MemorySource::new("{}"));
        let client = client_with(Arc::clone(&source));
        let (tx, rx) = mpsc::channel(1);
        let options = UpdateLoopOptions {
            max_jitter: Duration::from_secs(3600),
            ..UpdateLoopOptions::default()
        };
        let task = tokio::spawn(client.clone().continuously_update(options, Some(rx)));

        source.set_site(r#"{"licenseKey": "after"}"#);
        let (done_tx, done_rx) = oneshot::channel();
        tx.send(done_tx).await.unwrap();
        done_rx.await.unwrap();
        assert_eq!(client.get().await.site.license_key.as_deref(), Some("after"));

        task.abort();
    }

    #[test]
    fn test_unreachable_errors_quiet_during_grace() {
        let options = UpdateLoopOptions::default();
        assert!(!should_log_fetch_error(true, Duration::from_secs(1), &options));
        assert!(should_log_fetch_error(true, Duration::from_secs(16), &options));
        assert!(should_log_fetch_error(false, Duration::from_secs(1), &options));
    }
}
