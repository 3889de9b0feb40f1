//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with all handlers
//! - Wire up middleware (tracing, timeouts, request ID)
//! - Serve the raw configuration to client-role processes
//! - Bind server to listener and stop on shutdown

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::{HeaderName, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::admin::setup_admin_router;
use crate::config::schema::ServiceConfig;
use crate::lifecycle::startup::SiteConf;
use crate::site::source::INTERNAL_CONFIGURATION_PATH;

pub const X_REQUEST_ID: &str = "x-request-id";

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub conf: SiteConf,
    pub admin_api_key: Arc<str>,
}

/// HTTP server for the internal and admin APIs.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(conf: SiteConf, settings: &ServiceConfig) -> Self {
        let state = AppState {
            conf,
            admin_api_key: Arc::from(settings.admin.api_key.as_str()),
        };
        let router = build_router(state, Duration::from_secs(settings.timeouts.request_secs));
        Self { router }
    }

    /// Run the server until `shutdown` fires.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Build the Axum router with all middleware layers.
#[allow(deprecated)]
pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    let request_id = HeaderName::from_static(X_REQUEST_ID);

    Router::new()
        .route(INTERNAL_CONFIGURATION_PATH, get(internal_configuration))
        .route("/healthz", get(healthz))
        .with_state(state.clone())
        .merge(setup_admin_router(state))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
}

/// The raw configuration, for client-role processes.
///
/// Answers 503 until the first configuration is loaded, which clients treat as
/// "not reachable yet".
async fn internal_configuration(State(state): State<AppState>) -> Response {
    match state.conf.client.store().try_raw() {
        Some(raw) => Json(raw).into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "site configuration not loaded yet").into_response(),
    }
}

async fn healthz(State(state): State<AppState>) -> Response {
    if state.conf.client.store().is_ready() {
        (StatusCode::OK, "ok").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "initializing").into_response()
    }
}
