//! Admin API for the site configuration.
//!
//! All routes require `Authorization: Bearer <admin.api_key>`.

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;

pub fn setup_admin_router(state: AppState) -> Router {
    Router::new()
        .route("/site-config", get(get_site_config).put(put_site_config))
        .route("/site-config/validate", post(validate_site_config))
        .route("/site-config/problems", get(get_problems))
        .route("/site-config/restart-required", get(get_restart_required))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
