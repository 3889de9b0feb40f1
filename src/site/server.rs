//! Write path for the site configuration (server role).
//!
//! # Data Flow
//! ```text
//! Server::write
//!     → parse_config (reject early, source untouched)
//!     → RawSource::write
//!     → send a "done" signal to the client's update loop
//!     → loop re-reads the source, then completes the signal
//!     → write returns; Client::get reflects the new value
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::observability::metrics;
use crate::site::client::{Client, SourceUpdates};
use crate::site::error::{ConfError, ConfResult};
use crate::site::escape_hatch::{EscapeHatch, EscapeHatchOptions};
use crate::site::parse::parse_config;
use crate::site::source::RawSource;
use crate::site::types::RawConfig;

pub struct Server {
    source: Arc<dyn RawSource>,
    client: Client,
    source_updates: mpsc::Sender<oneshot::Sender<()>>,
    started: AtomicBool,
}

impl Server {
    /// A server writing to `source`.
    ///
    /// The returned receiver must be handed to the client's
    /// [`continuously_update`](Client::continuously_update) loop, otherwise writes
    /// never complete.
    pub fn new(source: Arc<dyn RawSource>, client: Client) -> (Self, SourceUpdates) {
        let (source_updates, rx) = mpsc::channel(1);
        let server = Self {
            source,
            client,
            source_updates,
            started: AtomicBool::new(false),
        };
        (server, rx)
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Persist a new site configuration and wait until the client has loaded it.
    pub async fn write(&self, input: &RawConfig, last_id: i32, author_user_id: i32) -> ConfResult<()> {
        if let Err(e) = parse_config(input) {
            metrics::record_write("invalid");
            return Err(e);
        }

        if let Err(e) = self.source.write(input, last_id, author_user_id).await {
            metrics::record_write(if matches!(e, ConfError::Conflict { .. }) {
                "conflict"
            } else {
                "error"
            });
            return Err(e);
        }

        let (done_tx, done_rx) = oneshot::channel();
        self.source_updates
            .send(done_tx)
            .await
            .map_err(|_| ConfError::Closed)?;
        done_rx.await.map_err(|_| ConfError::Closed)?;

        tracing::info!(author_user_id, last_id, "Site configuration written");
        metrics::record_write("ok");
        Ok(())
    }

    /// Whether a change since startup needs a server restart to take effect.
    pub fn need_server_restart(&self) -> bool {
        self.client.need_restart()
    }

    /// Start background work. Only the first call has an effect.
    ///
    /// Spawns the escape hatch worker when `escape_hatch` is set.
    pub fn start(&self, escape_hatch: Option<EscapeHatchOptions>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        match escape_hatch {
            Some(options) => {
                tracing::info!(path = %options.path.display(), "Starting site configuration escape hatch");
                let hatch = EscapeHatch::new(self.client.clone(), Arc::clone(&self.source), options)
                    .with_source_updates(self.source_updates.clone());
                tokio::spawn(hatch.run());
            }
            None => tracing::info!("Site configuration escape hatch disabled"),
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}
