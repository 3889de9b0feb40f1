//! Settings validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Check role-specific requirements (client role needs an internal API URL)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServiceConfig → Result<(), Vec<ValidationError>>

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{ConfigurationMode, ServiceConfig};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.mode != ConfigurationMode::Client && config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    if config.mode == ConfigurationMode::Client {
        match url::Url::parse(&config.internal_api.url) {
            Ok(u) if u.scheme() == "http" || u.scheme() == "https" => {}
            _ => errors.push(ValidationError::new(
                "internal_api.url",
                format!("'{}' is not an http(s) URL", config.internal_api.url),
            )),
        }
        if config.internal_api.timeout_secs == 0 {
            errors.push(ValidationError::new("internal_api.timeout_secs", "must be greater than 0"));
        }
    }

    if config.mode == ConfigurationMode::Server && config.storage.db_path.trim().is_empty() {
        errors.push(ValidationError::new("storage.db_path", "must not be empty"));
    }

    if config.escape_hatch.enabled {
        if config.escape_hatch.poll_interval_ms == 0 {
            errors.push(ValidationError::new("escape_hatch.poll_interval_ms", "must be greater than 0"));
        }
        if config.escape_hatch.path.as_deref().is_some_and(|p| p.trim().is_empty()) {
            errors.push(ValidationError::new("escape_hatch.path", "must not be empty when set"));
        }
    }

    if config.updates.deadlock_timeout_secs == Some(0) {
        errors.push(ValidationError::new("updates.deadlock_timeout_secs", "must be greater than 0"));
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    // Every role that binds the listener also serves the admin routes.
    if config.mode != ConfigurationMode::Client && config.admin.api_key.trim().is_empty() {
        errors.push(ValidationError::new("admin.api_key", "must not be empty"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
