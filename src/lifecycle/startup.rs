//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the site configuration stack for the configured role
//! - Start the background update loop (and, for the server role, the escape hatch)
//! - Hand one `SiteConf` to every consumer in the process
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - No process-wide singleton; `SiteConf` is built once and passed down
//! - Nothing here waits for the first configuration; reads do

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::schema::{ConfigurationMode, ServiceConfig};
use crate::config::ConfigError;
use crate::site::client::{Client, UpdateLoopOptions};
use crate::site::error::ConfError;
use crate::site::escape_hatch::{resolve_path, EscapeHatchOptions};
use crate::site::server::Server;
use crate::site::source::{EmptySource, FileDbSource, InternalApiSource, RawSource};
use crate::site::store::Store;
use crate::site::types::{ServiceConnections, Unified};
use crate::site::validate::ValidatorRegistry;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("settings: {0}")]
    Config(#[from] ConfigError),

    #[error("configuration source: {0}")]
    Source(#[from] ConfError),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

/// The site configuration stack of one process.
#[derive(Clone)]
pub struct SiteConf {
    pub client: Client,
    /// Present in the server role only.
    pub server: Option<Arc<Server>>,
    pub registry: Arc<ValidatorRegistry>,
}

/// Build the stack for `settings.mode`.
pub async fn init(settings: &ServiceConfig, registry: ValidatorRegistry) -> Result<SiteConf, StartupError> {
    tracing::info!(mode = %settings.mode, deploy_type = %settings.deploy_type, "Initializing site configuration");
    match settings.mode {
        ConfigurationMode::Server => {
            let source = FileDbSource::new(&settings.storage.db_path, ServiceConnections::from_env());
            Ok(init_server(Arc::new(source), settings, registry))
        }
        ConfigurationMode::Client => init_client(settings, registry),
        ConfigurationMode::Empty => init_empty(registry).await,
    }
}

/// Server role: owns `source`, accepts writes, runs the escape hatch.
pub fn init_server(source: Arc<dyn RawSource>, settings: &ServiceConfig, registry: ValidatorRegistry) -> SiteConf {
    let deadlock_timeout = settings.updates.deadlock_timeout(settings.deploy_type);
    let client = Client::new(Arc::clone(&source), Store::new(Some(deadlock_timeout)));
    let (server, updates) = Server::new(source, client.clone());

    tokio::spawn(client.clone().continuously_update(update_options(settings), Some(updates)));

    let registry = Arc::new(registry);
    spawn_problem_logger(client.clone(), Arc::clone(&registry));

    let server = Arc::new(server);
    server.start(escape_hatch_options(settings));

    SiteConf {
        client,
        server: Some(server),
        registry,
    }
}

/// Client role: polls the server role's internal API.
pub fn init_client(settings: &ServiceConfig, registry: ValidatorRegistry) -> Result<SiteConf, StartupError> {
    let source = InternalApiSource::new(&settings.internal_api.url, settings.internal_api.timeout())?;
    tracing::info!(endpoint = %source.endpoint(), "Reading site configuration from internal API");

    let client = Client::new(Arc::new(source), Store::new(None));
    tokio::spawn(client.clone().continuously_update(update_options(settings), None));

    Ok(SiteConf {
        client,
        server: None,
        registry: Arc::new(registry),
    })
}

/// Empty role: `{}` forever.
pub async fn init_empty(registry: ValidatorRegistry) -> Result<SiteConf, StartupError> {
    let client = Client::new(Arc::new(EmptySource), Store::new(None));
    client.fetch_and_update().await?;
    Ok(SiteConf {
        client,
        server: None,
        registry: Arc::new(registry),
    })
}

pub fn update_options(settings: &ServiceConfig) -> UpdateLoopOptions {
    UpdateLoopOptions {
        max_jitter: Duration::from_millis(settings.updates.max_jitter_ms),
        delay_before_unreachable_log: Duration::from_secs(settings.updates.unreachable_grace_secs),
    }
}

/// Escape hatch settings, or `None` when it is disabled.
pub fn escape_hatch_options(settings: &ServiceConfig) -> Option<EscapeHatchOptions> {
    let hatch = &settings.escape_hatch;
    if !hatch.enabled {
        return None;
    }
    Some(EscapeHatchOptions {
        path: resolve_path(hatch.path.as_deref(), |name| std::env::var(name).ok()),
        poll_interval: Duration::from_millis(hatch.poll_interval_ms),
        retry_delay: Duration::from_millis(hatch.retry_delay_ms),
    })
}

fn spawn_problem_logger(client: Client, registry: Arc<ValidatorRegistry>) {
    tokio::spawn(async move {
        let handle = client.watch(move |cfg| log_problems(&registry, &cfg)).await;
        tracing::debug!(watcher = handle.id(), "Problem logger registered");
    });
}

fn log_problems(registry: &ValidatorRegistry, cfg: &Unified) {
    let problems = registry.run_validators(cfg);
    for problem in problems.iter() {
        tracing::warn!(kind = ?problem.kind, "Site configuration problem: {}", problem);
    }
    for warning in registry.warnings(cfg).iter() {
        tracing::info!("Site configuration warning: {}", warning);
    }
}
