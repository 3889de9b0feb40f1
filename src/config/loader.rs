//! Settings loading from disk and the environment.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::ServiceConfig;
use crate::config::validation::{validate_config, ValidationError};
use crate::deploy::DEPLOY_TYPE_ENV;
use crate::site::escape_hatch::{ESCAPE_HATCH_PATH_ENV, NO_ESCAPE_HATCH_ENV};

/// Environment variable selecting the process role.
pub const CONFIGURATION_MODE_ENV: &str = "CONFIGURATION_MODE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid environment: {0}")]
    Env(String),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

/// Load settings: the TOML file (if any), then environment overrides, then validation.
pub fn load_config(path: Option<&Path>) -> Result<ServiceConfig, ConfigError> {
    let mut config = match path {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        }
        None => ServiceConfig::default(),
    };

    apply_env_overrides_from(&mut config, |name| std::env::var(name).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Apply `CONFIGURATION_MODE`, `DEPLOY_TYPE`, `SITE_CONFIG_ESCAPE_HATCH_PATH` and
/// `NO_SITE_CONFIG_ESCAPE_HATCH` from `lookup`.
pub fn apply_env_overrides_from(
    config: &mut ServiceConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    if let Some(mode) = lookup(CONFIGURATION_MODE_ENV) {
        config.mode = mode
            .parse()
            .map_err(|e| ConfigError::Env(format!("{}: {}", CONFIGURATION_MODE_ENV, e)))?;
    }

    if let Some(deploy_type) = lookup(DEPLOY_TYPE_ENV) {
        config.deploy_type = deploy_type
            .parse()
            .map_err(|e| ConfigError::Env(format!("{}: {}", DEPLOY_TYPE_ENV, e)))?;
    }

    if let Some(path) = lookup(ESCAPE_HATCH_PATH_ENV).filter(|p| !p.is_empty()) {
        config.escape_hatch.path = Some(path);
    }

    if lookup(NO_ESCAPE_HATCH_ENV).as_deref() == Some("1") {
        config.escape_hatch.enabled = false;
    }

    Ok(())
}
