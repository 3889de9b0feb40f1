//! In-memory holder of the last valid site configuration.
//!
//! # Responsibilities
//! - Keep the last successfully parsed configuration and the raw value it came from
//! - Swap both atomically on change, never exposing a half-applied update
//! - Gate reads until the first configuration (or a mock) is available
//! - Fail fast when a server-role process waits on a store that never initializes
//!
//! # Design Decisions
//! - Readers go through `ArcSwapOption` (lock-free); writers serialize on a mutex
//! - Raw and parsed values live in one snapshot so they always match
//! - Readiness is a `watch` channel so any number of tasks can wait on it

use std::sync::{Arc, Mutex};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use tokio::sync::watch;

use crate::site::error::{ConfError, ConfResult};
use crate::site::parse::{parse_config, render_site};
use crate::site::types::{RawConfig, Unified};

/// Result of [`Store::maybe_update`].
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    /// Whether the stored configuration was replaced.
    pub changed: bool,
    /// The configuration that was active before the call, if any.
    pub old: Option<Arc<Unified>>,
    /// The configuration active after the call.
    pub new: Arc<Unified>,
}

#[derive(Debug)]
struct Snapshot {
    raw: RawConfig,
    parsed: Arc<Unified>,
}

/// Thread-safe holder of the "last known good" configuration.
#[derive(Debug)]
pub struct Store {
    snapshot: ArcSwapOption<Snapshot>,
    mock: ArcSwapOption<Unified>,
    write_lock: Mutex<()>,
    ready: watch::Sender<bool>,
    deadlock_timeout: Option<Duration>,
}

impl Store {
    /// Create an empty store.
    ///
    /// With a `deadlock_timeout`, waiting for initialization longer than the timeout
    /// aborts the process instead of hanging.
    pub fn new(deadlock_timeout: Option<Duration>) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            snapshot: ArcSwapOption::empty(),
            mock: ArcSwapOption::empty(),
            write_lock: Mutex::new(()),
            ready,
            deadlock_timeout,
        }
    }

    /// Whether a configuration (real or mocked) is available.
    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// The active configuration, waiting until the store is initialized.
    pub async fn last_valid(&self) -> Arc<Unified> {
        loop {
            self.wait_until_initialized().await;
            if let Some(cfg) = self.try_last_valid() {
                return cfg;
            }
        }
    }

    /// The active configuration, or `None` if the store is not initialized yet.
    pub fn try_last_valid(&self) -> Option<Arc<Unified>> {
        if let Some(mock) = self.mock.load_full() {
            return Some(mock);
        }
        self.snapshot.load_full().map(|s| Arc::clone(&s.parsed))
    }

    /// The raw configuration, waiting until the store is initialized.
    ///
    /// A mocked store reports the mock re-serialized, with id 0.
    pub async fn raw(&self) -> RawConfig {
        loop {
            self.wait_until_initialized().await;
            if let Some(raw) = self.try_raw() {
                return raw;
            }
        }
    }

    /// The raw configuration, or `None` if the store is not initialized yet.
    pub fn try_raw(&self) -> Option<RawConfig> {
        if let Some(mock) = self.mock.load_full() {
            return Some(RawConfig {
                site: render_site(&mock.site),
                service_connections: mock.service_connections.clone(),
                id: 0,
            });
        }
        self.snapshot.load_full().map(|s| s.raw.clone())
    }

    /// Install (or clear, with `None`) a configuration that overrides every read.
    pub fn mock(&self, cfg: Option<Arc<Unified>>) {
        let _guard = self.write_lock.lock().expect("store write lock poisoned");
        let installed = cfg.is_some();
        self.mock.store(cfg);
        if installed {
            self.ready.send_replace(true);
        } else if self.snapshot.load().is_none() {
            self.ready.send_replace(false);
        }
    }

    /// Replace the stored configuration if `raw` differs from the stored raw value.
    ///
    /// A parse failure leaves the previous configuration in place.
    pub fn maybe_update(&self, raw: RawConfig) -> ConfResult<UpdateOutcome> {
        if raw.site.is_empty() {
            return Err(ConfError::InvalidConfig(
                "refusing to install an empty site configuration".to_string(),
            ));
        }

        let _guard = self.write_lock.lock().expect("store write lock poisoned");
        let current = self.snapshot.load_full();

        if let Some(current) = &current {
            if current.raw == raw {
                return Ok(UpdateOutcome {
                    changed: false,
                    old: Some(Arc::clone(&current.parsed)),
                    new: Arc::clone(&current.parsed),
                });
            }
        }

        let parsed = Arc::new(parse_config(&raw)?);
        self.snapshot.store(Some(Arc::new(Snapshot {
            raw,
            parsed: Arc::clone(&parsed),
        })));
        self.ready.send_replace(true);

        Ok(UpdateOutcome {
            changed: true,
            old: current.map(|s| Arc::clone(&s.parsed)),
            new: parsed,
        })
    }

    /// Wait until a configuration is available.
    ///
    /// # Aborts
    /// The whole process, when the store has a deadlock timeout and it elapses
    /// first. Waiters usually run in spawned tasks, where a panic would only end
    /// the task.
    pub async fn wait_until_initialized(&self) {
        let mut ready = self.ready.subscribe();
        match self.deadlock_timeout {
            Some(limit) => {
                if tokio::time::timeout(limit, ready.wait_for(|r| *r)).await.is_err() {
                    deadlock_detected(limit);
                }
            }
            None => {
                // The sender lives in `self`, so the channel cannot close here.
                let _ = ready.wait_for(|r| *r).await;
            }
        }
    }
}

fn deadlock_detected(waited: Duration) -> ! {
    let message = format!(
        "deadlock detected: site configuration was requested before the \
         configuration server finished initializing (waited {:?})",
        waited
    );
    tracing::error!("{}", message);
    eprintln!("{}", message);
    std::process::abort()
}

impl Default for Store {
    fn default() -> Self {
        Self::new(None)
    }
}
