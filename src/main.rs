//! `siteconf`: site configuration service.
//!
//! # Architecture Overview
//!
//! ```text
//!   server role                                 client role
//!  ┌──────────────────────────────────┐        ┌──────────────────────────┐
//!  │ FileDbSource ◀── Server::write   │        │ InternalApiSource        │
//!  │      │              ▲           │  HTTP  │      │                   │
//!  │      ▼              │ admin API │◀───────┼──────┘                   │
//!  │ Client loop ──▶ Store ──▶ watchers        │ Client loop ──▶ Store     │
//!  │      ▲                           │        └──────────────────────────┘
//!  │ escape hatch ◀──▶ site-config.json│
//!  └──────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use siteconf::config::{load_config, ConfigurationMode};
use siteconf::lifecycle::{shutdown::Shutdown, signals::wait_for_shutdown_signal, startup};
use siteconf::observability::{logging::init_logging, metrics::init_metrics};
use siteconf::site::ValidatorRegistry;
use siteconf::HttpServer;

#[derive(Parser)]
#[command(name = "siteconf", version, about = "Site configuration service")]
struct Args {
    /// Settings file (TOML). Defaults apply when omitted.
    #[arg(short, long, env = "SITECONF_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let settings = load_config(args.config.as_deref())?;

    init_logging(&settings.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), mode = %settings.mode, "siteconf starting");

    if settings.observability.metrics_enabled {
        match settings.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %settings.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let registry = ValidatorRegistry::with_builtin(settings.deploy_type);
    let conf = startup::init(&settings, registry).await?;

    match settings.mode {
        ConfigurationMode::Server | ConfigurationMode::Empty => {
            let listener = TcpListener::bind(&settings.listener.bind_address)
                .await
                .map_err(|source| startup::StartupError::Bind {
                    address: settings.listener.bind_address.clone(),
                    source,
                })?;

            let shutdown = Shutdown::new();
            let server = HttpServer::new(conf, &settings);
            let serve = tokio::spawn(server.run(listener, shutdown.subscribe()));

            wait_for_shutdown_signal().await;
            shutdown.trigger();
            serve.await??;
        }
        ConfigurationMode::Client => {
            let handle = conf
                .client
                .watch(|cfg| {
                    tracing::info!(
                        external_url = siteconf::site::computed::external_url(&cfg).unwrap_or("<unset>"),
                        "Active site configuration"
                    );
                })
                .await;
            wait_for_shutdown_signal().await;
            handle.unsubscribe();
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
