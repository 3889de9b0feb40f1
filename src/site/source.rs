//! Configuration sources.
//!
//! # Responsibilities
//! - Define the `RawSource` boundary between the core and its backing store
//! - Provide the backing store used by the server role (`FileDbSource`)
//! - Provide the network source used by the client role (`InternalApiSource`)
//! - Provide in-memory and static sources for tests and the `empty` role
//!
//! # Design Decisions
//! - `id` is an opaque optimistic-concurrency token: writes name the id they edited
//! - Read-only sources reject writes with `ConfError::ReadOnly`

use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::site::error::{ConfError, ConfResult};
use crate::site::types::{RawConfig, ServiceConnections};

/// Path of the internal endpoint serving the raw configuration.
pub const INTERNAL_CONFIGURATION_PATH: &str = "/.internal/configuration";

/// Site document installed when a backing store has no history yet.
pub const DEFAULT_SITE_CONFIG: &str = "{}";

/// Supplier of serialized configuration.
#[async_trait]
pub trait RawSource: Send + Sync {
    /// Read the current configuration.
    async fn read(&self) -> ConfResult<RawConfig>;

    /// Persist `input.site` as a new version.
    ///
    /// Fails with [`ConfError::Conflict`] when `last_id` is not the latest id.
    async fn write(&self, input: &RawConfig, last_id: i32, author_user_id: i32) -> ConfResult<()>;
}

/// In-memory source with the same concurrency rules as a real backing store.
#[derive(Debug)]
pub struct MemorySource {
    current: RwLock<RawConfig>,
}

impl MemorySource {
    pub fn new(site: impl Into<String>) -> Self {
        Self {
            current: RwLock::new(RawConfig {
                site: site.into(),
                service_connections: ServiceConnections::default(),
                id: 1,
            }),
        }
    }

    /// Replace the stored site document as an out-of-band edit would, bumping the id.
    pub fn set_site(&self, site: impl Into<String>) {
        let mut current = self.current.write().expect("memory source lock poisoned");
        current.site = site.into();
        current.id += 1;
    }

    /// Snapshot of the stored value.
    pub fn current(&self) -> RawConfig {
        self.current.read().expect("memory source lock poisoned").clone()
    }
}

#[async_trait]
impl RawSource for MemorySource {
    async fn read(&self) -> ConfResult<RawConfig> {
        Ok(self.current())
    }

    async fn write(&self, input: &RawConfig, last_id: i32, _author_user_id: i32) -> ConfResult<()> {
        let mut current = self.current.write().expect("memory source lock poisoned");
        if current.id != last_id {
            return Err(ConfError::Conflict {
                expected: last_id,
                actual: current.id,
            });
        }
        current.site = input.site.clone();
        current.id += 1;
        Ok(())
    }
}

/// Source that always serves an empty site configuration.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptySource;

#[async_trait]
impl RawSource for EmptySource {
    async fn read(&self) -> ConfResult<RawConfig> {
        Ok(RawConfig::from_site(DEFAULT_SITE_CONFIG))
    }

    async fn write(&self, _input: &RawConfig, _last_id: i32, _author_user_id: i32) -> ConfResult<()> {
        Err(ConfError::ReadOnly)
    }
}

/// One stored version of the site configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SiteConfigVersion {
    pub id: i32,
    pub contents: String,
    /// Zero when the edit did not come from a user (e.g. the escape hatch).
    pub author_user_id: i32,
    /// Seconds since the Unix epoch.
    pub created_at: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SiteConfigHistory {
    versions: Vec<SiteConfigVersion>,
}

/// Backing store keeping the version history of the site configuration in a JSON file.
pub struct FileDbSource {
    path: PathBuf,
    service_connections: ServiceConnections,
    lock: Mutex<()>,
}

impl FileDbSource {
    pub fn new(path: impl Into<PathBuf>, service_connections: ServiceConnections) -> Self {
        Self {
            path: path.into(),
            service_connections,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All stored versions, oldest first.
    pub async fn history(&self) -> ConfResult<Vec<SiteConfigVersion>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.versions)
    }

    async fn load(&self) -> ConfResult<SiteConfigHistory> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SiteConfigHistory::default()),
            Err(e) => Err(ConfError::Io(e)),
        }
    }

    async fn persist(&self, history: &SiteConfigHistory) -> ConfResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(history)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    fn append(history: &mut SiteConfigHistory, contents: String, author_user_id: i32) -> i32 {
        let id = history.versions.last().map(|v| v.id + 1).unwrap_or(1);
        history.versions.push(SiteConfigVersion {
            id,
            contents,
            author_user_id,
            created_at: unix_now(),
        });
        id
    }
}

#[async_trait]
impl RawSource for FileDbSource {
    async fn read(&self) -> ConfResult<RawConfig> {
        let _guard = self.lock.lock().await;
        let mut history = self.load().await?;
        if history.versions.is_empty() {
            Self::append(&mut history, DEFAULT_SITE_CONFIG.to_string(), 0);
            self.persist(&history).await?;
            tracing::info!(path = %self.path.display(), "Initialized site configuration store");
        }
        let latest = history
            .versions
            .last()
            .ok_or_else(|| ConfError::Source("site configuration history is empty".into()))?;
        Ok(RawConfig {
            site: latest.contents.clone(),
            service_connections: self.service_connections.clone(),
            id: latest.id,
        })
    }

    async fn write(&self, input: &RawConfig, last_id: i32, author_user_id: i32) -> ConfResult<()> {
        let _guard = self.lock.lock().await;
        let mut history = self.load().await?;
        let latest_id = history.versions.last().map(|v| v.id).unwrap_or(0);
        if latest_id != last_id {
            return Err(ConfError::Conflict {
                expected: last_id,
                actual: latest_id,
            });
        }
        let id = Self::append(&mut history, input.site.clone(), author_user_id);
        self.persist(&history).await?;
        tracing::info!(id, author_user_id, "Stored new site configuration version");
        Ok(())
    }
}

/// Read-only source polling the internal API of the server-role process.
pub struct InternalApiSource {
    endpoint: String,
    http: reqwest::Client,
}

impl InternalApiSource {
    /// Build a source for the server reachable at `base_url`.
    pub fn new(base_url: &str, timeout: Duration) -> ConfResult<Self> {
        let base = url::Url::parse(base_url)
            .map_err(|e| ConfError::InvalidConfig(format!("invalid internal API URL '{}': {}", base_url, e)))?;
        let endpoint = base
            .join(INTERNAL_CONFIGURATION_PATH)
            .map_err(|e| ConfError::InvalidConfig(format!("invalid internal API URL '{}': {}", base_url, e)))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfError::Source(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            endpoint: endpoint.to_string(),
            http,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl RawSource for InternalApiSource {
    async fn read(&self) -> ConfResult<RawConfig> {
        let response = self
            .http
            .get(&self.endpoint)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if status == reqwest::StatusCode::SERVICE_UNAVAILABLE {
            return Err(ConfError::Unreachable(format!("{} returned {}", self.endpoint, status)));
        }
        if !status.is_success() {
            return Err(ConfError::Source(format!("{} returned {}", self.endpoint, status)));
        }

        response
            .json::<RawConfig>()
            .await
            .map_err(|e| ConfError::Source(format!("invalid configuration payload: {}", e)))
    }

    async fn write(&self, _input: &RawConfig, _last_id: i32, _author_user_id: i32) -> ConfResult<()> {
        Err(ConfError::ReadOnly)
    }
}

fn classify_transport_error(e: reqwest::Error) -> ConfError {
    if e.is_connect() || e.is_timeout() {
        ConfError::Unreachable(e.to_string())
    } else {
        ConfError::Source(e.to_string())
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
