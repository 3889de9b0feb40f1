use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::http::server::AppState;
use crate::site::error::ConfError;
use crate::site::types::RawConfig;
use crate::site::validate::Problems;

/// Error body of every admin route: `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_ready() -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: "site configuration not loaded yet".to_string(),
        }
    }
}

impl From<ConfError> for ApiError {
    fn from(e: ConfError) -> Self {
        let status = match &e {
            ConfError::InvalidConfig(_) | ConfError::Parse(_) => StatusCode::BAD_REQUEST,
            ConfError::Conflict { .. } => StatusCode::CONFLICT,
            ConfError::ReadOnly => StatusCode::METHOD_NOT_ALLOWED,
            ConfError::Unreachable(_) | ConfError::Closed => StatusCode::SERVICE_UNAVAILABLE,
            ConfError::Source(_) | ConfError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, error = %self.message, "Admin request failed");
        }
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SiteConfigResponse {
    pub id: i32,
    pub site: String,
    #[serde(rename = "restartRequired")]
    pub restart_required: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WriteRequest {
    #[serde(rename = "lastID")]
    pub last_id: i32,
    pub contents: String,
    #[serde(rename = "authorUserID", default)]
    pub author_user_id: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProblemsResponse {
    pub problems: Problems,
    #[serde(default)]
    pub warnings: Problems,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RestartRequiredResponse {
    #[serde(rename = "restartRequired")]
    pub restart_required: bool,
}

fn restart_required(state: &AppState) -> bool {
    match &state.conf.server {
        Some(server) => server.need_server_restart(),
        None => state.conf.client.need_restart(),
    }
}

pub async fn get_site_config(State(state): State<AppState>) -> Result<Json<SiteConfigResponse>, ApiError> {
    let raw = state.conf.client.store().try_raw().ok_or_else(ApiError::not_ready)?;
    Ok(Json(SiteConfigResponse {
        id: raw.id,
        site: raw.site,
        restart_required: restart_required(&state),
    }))
}

pub async fn put_site_config(
    State(state): State<AppState>,
    Json(req): Json<WriteRequest>,
) -> Result<Json<SiteConfigResponse>, ApiError> {
    let server = state.conf.server.as_ref().ok_or(ConfError::ReadOnly)?;
    let input = RawConfig::from_site(req.contents);
    server.write(&input, req.last_id, req.author_user_id).await?;

    let raw = state.conf.client.raw().await;
    Ok(Json(SiteConfigResponse {
        id: raw.id,
        site: raw.site,
        restart_required: server.need_server_restart(),
    }))
}

/// Validate the request body as a site document without saving it.
pub async fn validate_site_config(
    State(state): State<AppState>,
    body: String,
) -> Result<Json<ProblemsResponse>, ApiError> {
    let input = RawConfig::from_site(body);
    let problems = state.conf.registry.validate(&input)?;
    let warnings = match crate::site::parse::parse_site(&input.site) {
        Ok(site) => state.conf.registry.warnings(&site),
        Err(_) => Problems::new(),
    };
    Ok(Json(ProblemsResponse { problems, warnings }))
}

/// Problems and warnings of the active configuration.
pub async fn get_problems(State(state): State<AppState>) -> Result<Json<ProblemsResponse>, ApiError> {
    let raw = state.conf.client.store().try_raw().ok_or_else(ApiError::not_ready)?;
    let cfg = state.conf.client.try_get().ok_or_else(ApiError::not_ready)?;
    let problems = state.conf.registry.validate(&raw)?;
    let warnings = state.conf.registry.warnings(&*cfg);
    Ok(Json(ProblemsResponse { problems, warnings }))
}

pub async fn get_restart_required(State(state): State<AppState>) -> Json<RestartRequiredResponse> {
    Json(RestartRequiredResponse {
        restart_required: restart_required(&state),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        let status = |e: ConfError| ApiError::from(e).status;
        assert_eq!(status(ConfError::InvalidConfig("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status(ConfError::Conflict { expected: 1, actual: 2 }), StatusCode::CONFLICT);
        assert_eq!(status(ConfError::Unreachable("down".into())), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status(ConfError::ReadOnly), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(status(ConfError::Source("boom".into())), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_write_request_wire_names() {
        let req: WriteRequest =
            serde_json::from_str(r#"{"lastID": 3, "contents": "{}", "authorUserID": 9}"#).unwrap();
        assert_eq!((req.last_id, req.author_user_id), (3, 9));
    }
}
