//! Two-way sync between the site configuration and a file on disk.
//!
//! Lets administrators repair a configuration that locks them out of the web UI by
//! editing a local file. The file and the backing store are reconciled every poll
//! interval: an edited file is written into the store, a changed store is written
//! out to the file. Edits made on both sides within one interval race; the last
//! writer wins.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, oneshot};

use crate::observability::metrics;
use crate::resilience::backoff::retry_fixed;
use crate::site::client::Client;
use crate::site::error::{ConfError, ConfResult};
use crate::site::parse::parse_site;
use crate::site::source::RawSource;
use crate::site::types::RawConfig;

/// Environment variable overriding the escape hatch file location.
pub const ESCAPE_HATCH_PATH_ENV: &str = "SITE_CONFIG_ESCAPE_HATCH_PATH";

/// Environment variable that disables the escape hatch when set to `1`.
pub const NO_ESCAPE_HATCH_ENV: &str = "NO_SITE_CONFIG_ESCAPE_HATCH";

pub const DEFAULT_ESCAPE_HATCH_PATH: &str = "$HOME/site-config.json";

#[derive(Debug, Clone)]
pub struct EscapeHatchOptions {
    pub path: PathBuf,
    pub poll_interval: Duration,
    pub retry_delay: Duration,
}

impl EscapeHatchOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            poll_interval: Duration::from_secs(1),
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// What a reconciliation round did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    /// The file was edited and its contents were written to the store.
    FileToStore,
    /// The store changed (or the file was missing) and the file was rewritten.
    StoreToFile,
    /// The file was edited but does not hold a valid site document.
    RejectedFile,
    Unchanged,
}

pub struct EscapeHatch {
    client: Client,
    source: Arc<dyn RawSource>,
    options: EscapeHatchOptions,
    source_updates: Option<mpsc::Sender<oneshot::Sender<()>>>,
    last_file: Option<String>,
    last_site: Option<String>,
}

impl EscapeHatch {
    pub fn new(client: Client, source: Arc<dyn RawSource>, options: EscapeHatchOptions) -> Self {
        Self {
            client,
            source,
            options,
            source_updates: None,
            last_file: None,
            last_site: None,
        }
    }

    /// Signal the client's update loop after each file→store write and wait for it
    /// to reload, so the edit is visible to readers once the round returns.
    pub fn with_source_updates(mut self, source_updates: mpsc::Sender<oneshot::Sender<()>>) -> Self {
        self.source_updates = Some(source_updates);
        self
    }

    pub fn path(&self) -> &Path {
        &self.options.path
    }

    /// Write the active site document to the file, retrying until it succeeds.
    pub async fn initialize(&mut self) {
        let path = self.options.path.clone();
        let client = &self.client;
        let site = retry_fixed("Escape hatch initial write", self.options.retry_delay, || {
            let path = path.clone();
            async move {
                let raw = client.raw().await;
                write_file(&path, &raw.site).await.map(|_| raw.site)
            }
        })
        .await;

        tracing::info!(path = %self.options.path.display(), "Site configuration escape hatch file written");
        self.last_file = Some(site.clone());
        self.last_site = Some(site);
    }

    /// Run one reconciliation round.
    pub async fn reconcile(&mut self) -> ConfResult<Reconciled> {
        let file = match tokio::fs::read_to_string(&self.options.path).await {
            Ok(contents) => Some(contents),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        match file {
            Some(contents) if self.last_file.as_ref() != Some(&contents) => self.push_file(contents).await,
            Some(_) => self.pull_store(false).await,
            None => self.pull_store(true).await,
        }
    }

    async fn push_file(&mut self, contents: String) -> ConfResult<Reconciled> {
        let current = self.source.read().await?;
        if current.site == contents {
            self.remember(contents);
            return Ok(Reconciled::Unchanged);
        }

        if let Err(e) = parse_site(&contents) {
            tracing::warn!(
                path = %self.options.path.display(),
                error = %e,
                "Ignoring invalid site configuration in escape hatch file"
            );
            self.last_file = Some(contents);
            return Ok(Reconciled::RejectedFile);
        }

        // The latest id, not the one seen when the file was last synced.
        let input = RawConfig {
            site: contents.clone(),
            service_connections: current.service_connections,
            id: current.id,
        };
        self.source.write(&input, current.id, 0).await?;
        if let Some(updates) = &self.source_updates {
            let (done_tx, done_rx) = oneshot::channel();
            updates.send(done_tx).await.map_err(|_| ConfError::Closed)?;
            done_rx.await.map_err(|_| ConfError::Closed)?;
        }

        tracing::info!(path = %self.options.path.display(), "Applied escape hatch file to site configuration");
        metrics::record_escape_hatch_sync("file_to_store");
        self.remember(contents);
        Ok(Reconciled::FileToStore)
    }

    async fn pull_store(&mut self, file_missing: bool) -> ConfResult<Reconciled> {
        let current = self.source.read().await?;
        if !file_missing && self.last_site.as_ref() == Some(&current.site) {
            return Ok(Reconciled::Unchanged);
        }

        write_file(&self.options.path, &current.site).await?;

        tracing::info!(path = %self.options.path.display(), "Wrote site configuration to escape hatch file");
        metrics::record_escape_hatch_sync("store_to_file");
        self.remember(current.site);
        Ok(Reconciled::StoreToFile)
    }

    fn remember(&mut self, site: String) {
        self.last_file = Some(site.clone());
        self.last_site = Some(site);
    }

    /// Initialize, then reconcile forever.
    ///
    /// Polls every `poll_interval`; filesystem events on the file wake the loop early.
    pub async fn run(mut self) {
        self.initialize().await;

        let (wake_tx, wake_rx) = mpsc::channel::<()>(1);
        let watcher = match watch_file(&self.options.path, wake_tx) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                tracing::warn!(error = %e, "Escape hatch file watcher unavailable, polling only");
                None
            }
        };
        let mut wake_rx = watcher.as_ref().map(|_| wake_rx);

        loop {
            match self.reconcile().await {
                Ok(Reconciled::Unchanged) => {}
                Ok(outcome) => tracing::debug!(?outcome, "Escape hatch reconciled"),
                Err(e) => {
                    tracing::warn!(error = %e, "Escape hatch sync failed");
                    tokio::time::sleep(self.options.retry_delay).await;
                    continue;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.options.poll_interval) => {}
                _ = next_wake(&mut wake_rx) => {}
            }
        }
    }
}

fn watch_file(path: &Path, wake: mpsc::Sender<()>) -> Result<RecommendedWatcher, notify::Error> {
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) if event.kind.is_modify() || event.kind.is_create() || event.kind.is_remove() => {
                let _ = wake.try_send(());
            }
            Ok(_) => {}
            Err(e) => tracing::error!("Escape hatch watch error: {:?}", e),
        },
        Config::default().with_poll_interval(Duration::from_secs(2)),
    )?;
    watcher.watch(path, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

async fn next_wake(wake: &mut Option<mpsc::Receiver<()>>) {
    match wake {
        Some(rx) => {
            if rx.recv().await.is_none() {
                *wake = None;
            }
        }
        None => std::future::pending().await,
    }
}

async fn write_file(path: &Path, contents: &str) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, contents).await
}

/// Expand `$VAR` and `${VAR}` references. Unset variables expand to nothing.
pub fn expand_env(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }

        let name: String = if chars.peek() == Some(&'{') {
            chars.next();
            let name: String = chars.by_ref().take_while(|c| *c != '}').collect();
            name
        } else {
            let mut name = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_ascii_alphanumeric() || c == '_' {
                    name.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            if name.is_empty() {
                out.push('$');
                continue;
            }
            name
        };

        if let Some(value) = lookup(&name) {
            out.push_str(&value);
        }
    }
    out
}

/// Resolve the escape hatch location: the explicit path, else the environment
/// override, else `$HOME/site-config.json`. Variables are expanded.
pub fn resolve_path(explicit: Option<&str>, lookup: impl Fn(&str) -> Option<String>) -> PathBuf {
    let raw = explicit
        .map(str::to_string)
        .or_else(|| lookup(ESCAPE_HATCH_PATH_ENV).filter(|p| !p.is_empty()))
        .unwrap_or_else(|| DEFAULT_ESCAPE_HATCH_PATH.to_string());
    PathBuf::from(expand_env(&raw, lookup))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::source::MemorySource;
    use crate::site::store::Store;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "HOME" => Some("/home/sg".to_string()),
            "DIR" => Some("conf".to_string()),
            _ => None,
        }
    }

    async fn setup(site: &str, path: &Path) -> (EscapeHatch, Arc<MemorySource>) {
        let source = Arc::new(MemorySource::new(site));
        let client = Client::new(source.clone(), Store::default());
        client.fetch_and_update().await.unwrap();
        let options = EscapeHatchOptions {
            retry_delay: Duration::from_millis(10),
            ..EscapeHatchOptions::new(path)
        };
        (EscapeHatch::new(client, source.clone(), options), source)
    }

    #[test]
    fn test_expand_env() {
        assert_eq!(expand_env("$HOME/site-config.json", lookup), "/home/sg/site-config.json");
        assert_eq!(expand_env("${HOME}/${DIR}/x.json", lookup), "/home/sg/conf/x.json");
        assert_eq!(expand_env("/tmp/$UNSET/x", lookup), "/tmp//x");
        assert_eq!(expand_env("cost$", lookup), "cost$");
    }

    #[test]
    fn test_resolve_path() {
        assert_eq!(resolve_path(None, lookup), PathBuf::from("/home/sg/site-config.json"));
        assert_eq!(resolve_path(Some("/etc/${DIR}.json"), lookup), PathBuf::from("/etc/conf.json"));
        let with_env = |name: &str| match name {
            ESCAPE_HATCH_PATH_ENV => Some("/data/site.json".to_string()),
            other => lookup(other),
        };
        assert_eq!(resolve_path(None, with_env), PathBuf::from("/data/site.json"));
    }

    #[tokio::test]
    async fn test_initialize_writes_store_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("site-config.json");
        let (mut hatch, _) = setup(r#"{"licenseKey": "k"}"#, &path).await;

        hatch.initialize().await;
        assert_eq!(std::fs::read_to_string(&path).unwrap(), r#"{"licenseKey": "k"}"#);
        assert_eq!(hatch.reconcile().await.unwrap(), Reconciled::Unchanged);
    }

    #[tokio::test]
    async fn test_file_edit_is_written_to_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("site-config.json");
        let (mut hatch, source) = setup("{}", &path).await;
        hatch.initialize().await;

        std::fs::write(&path, r#"{"externalURL": "https://fixed"}"#).unwrap();
        assert_eq!(hatch.reconcile().await.unwrap(), Reconciled::FileToStore);
        let current = source.current();
        assert_eq!(current.site, r#"{"externalURL": "https://fixed"}"#);
        assert_eq!(current.id, 2);
        assert_eq!(hatch.reconcile().await.unwrap(), Reconciled::Unchanged);
    }

    #[tokio::test]
    async fn test_file_edit_is_visible_to_client_on_return() {
        use crate::site::client::UpdateLoopOptions;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("site-config.json");
        let (hatch, _) = setup("{}", &path).await;
        let client = hatch.client.clone();

        let (tx, rx) = mpsc::channel(1);
        let options = UpdateLoopOptions {
            max_jitter: Duration::from_secs(3600),
            ..UpdateLoopOptions::default()
        };
        let task = tokio::spawn(client.clone().continuously_update(options, Some(rx)));
        let mut hatch = hatch.with_source_updates(tx);
        hatch.initialize().await;

        std::fs::write(&path, r#"{"licenseKey": "from-file"}"#).unwrap();
        assert_eq!(hatch.reconcile().await.unwrap(), Reconciled::FileToStore);
        let cfg = client.try_get().unwrap();
        assert_eq!(cfg.site.license_key.as_deref(), Some("from-file"));
        task.abort();
    }

    #[tokio::test]
    async fn test_store_change_is_written_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("site-config.json");
        let (mut hatch, source) = setup("{}", &path).await;
        hatch.initialize().await;

        source.set_site(r#"{"licenseKey": "new"}"#);
        assert_eq!(hatch.reconcile().await.unwrap(), Reconciled::StoreToFile);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), r#"{"licenseKey": "new"}"#);
    }

    #[tokio::test]
    async fn test_file_edit_wins_over_stale_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("site-config.json");
        let (mut hatch, source) = setup("{}", &path).await;
        hatch.initialize().await;

        source.set_site(r#"{"licenseKey": "db"}"#);
        std::fs::write(&path, r#"{"licenseKey": "file"}"#).unwrap();
        assert_eq!(hatch.reconcile().await.unwrap(), Reconciled::FileToStore);
        assert_eq!(source.current().site, r#"{"licenseKey": "file"}"#);
    }

    #[tokio::test]
    async fn test_invalid_file_is_not_applied() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("site-config.json");
        let (mut hatch, source) = setup("{}", &path).await;
        hatch.initialize().await;

        std::fs::write(&path, "{ oops").unwrap();
        assert_eq!(hatch.reconcile().await.unwrap(), Reconciled::RejectedFile);
        assert_eq!(source.current().site, "{}");
        assert_eq!(hatch.reconcile().await.unwrap(), Reconciled::Unchanged);
    }

    #[tokio::test]
    async fn test_deleted_file_is_restored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("site-config.json");
        let (mut hatch, _) = setup(r#"{"licenseKey": "k"}"#, &path).await;
        hatch.initialize().await;

        std::fs::remove_file(&path).unwrap();
        assert_eq!(hatch.reconcile().await.unwrap(), Reconciled::StoreToFile);
        assert!(path.exists());
    }
}
