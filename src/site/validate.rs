//! Site configuration validation.
//!
//! # Responsibilities
//! - Structural validation against the JSON schema of [`SiteConfiguration`]
//! - Run validators and warnings contributed by other subsystems
//! - Report findings as [`Problems`] for administrators
//!
//! # Design Decisions
//! - Problems are values, not errors: an active configuration may carry problems
//! - Contributions take `&mut self`, so registration is finished before the registry
//!   is shared
//! - Validators are pure functions of the configuration

use std::fmt;

use jsonschema::{Draft, JSONSchema};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::deploy::DeployType;
use crate::site::error::{ConfError, ConfResult};
use crate::site::types::{RawConfig, SiteConfiguration, Unified};
use crate::site::validators;

/// Which document a problem refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProblemKind {
    #[serde(rename = "SiteConfig")]
    Site,
    #[serde(rename = "ExternalService")]
    ExternalService,
}

/// A single configuration problem shown to site administrators.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Problem {
    pub kind: ProblemKind,
    pub description: String,
}

impl Problem {
    pub fn site(description: impl Into<String>) -> Self {
        Self {
            kind: ProblemKind::Site,
            description: description.into(),
        }
    }

    pub fn external_service(description: impl Into<String>) -> Self {
        Self {
            kind: ProblemKind::ExternalService,
            description: description.into(),
        }
    }

    pub fn is_site(&self) -> bool {
        self.kind == ProblemKind::Site
    }

    pub fn is_external_service(&self) -> bool {
        self.kind == ProblemKind::ExternalService
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}

/// An ordered list of problems.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Problems(Vec<Problem>);

impl Problems {
    pub fn new() -> Self {
        Self::default()
    }

    /// Site problems from plain messages.
    pub fn from_site_messages<I, S>(messages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        messages.into_iter().map(Problem::site).collect()
    }

    pub fn push(&mut self, problem: Problem) {
        self.0.push(problem);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Problem> {
        self.0.iter()
    }

    /// Descriptions of every problem, in order.
    pub fn messages(&self) -> Vec<String> {
        self.0.iter().map(|p| p.description.clone()).collect()
    }

    /// Only the site configuration problems.
    pub fn site(&self) -> Problems {
        self.0.iter().filter(|p| p.is_site()).cloned().collect()
    }

    /// Only the external service problems.
    pub fn external_service(&self) -> Problems {
        self.0.iter().filter(|p| p.is_external_service()).cloned().collect()
    }
}

impl FromIterator<Problem> for Problems {
    fn from_iter<I: IntoIterator<Item = Problem>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<Problem> for Problems {
    fn extend<I: IntoIterator<Item = Problem>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

impl IntoIterator for Problems {
    type Item = Problem;
    type IntoIter = std::vec::IntoIter<Problem>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Read access to a site configuration, as handed to validators.
pub trait SiteConfigQuerier {
    fn site_config(&self) -> &SiteConfiguration;
}

impl SiteConfigQuerier for Unified {
    fn site_config(&self) -> &SiteConfiguration {
        &self.site
    }
}

impl SiteConfigQuerier for SiteConfiguration {
    fn site_config(&self) -> &SiteConfiguration {
        self
    }
}

/// A contributed validation or warning function.
pub type ValidatorFn = Box<dyn Fn(&dyn SiteConfigQuerier) -> Problems + Send + Sync>;

/// Registry of contributed validators and warnings.
#[derive(Default)]
pub struct ValidatorRegistry {
    validators: Vec<ValidatorFn>,
    warnings: Vec<ValidatorFn>,
}

impl ValidatorRegistry {
    /// An empty registry: schema validation only.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in validators for the given deployment type.
    pub fn with_builtin(deploy_type: DeployType) -> Self {
        let mut registry = Self::new();
        registry.contribute_validator(move |cfg| validators::validate_external_url(cfg, deploy_type));
        registry.contribute_validator(validators::validate_auth_providers);
        registry.contribute_validator(validators::validate_rollout_windows);
        registry.contribute_warning(validators::warn_email_address);
        registry
    }

    /// Add a validator run on every validation.
    pub fn contribute_validator<F>(&mut self, f: F)
    where
        F: Fn(&dyn SiteConfigQuerier) -> Problems + Send + Sync + 'static,
    {
        self.validators.push(Box::new(f));
    }

    /// Add a warning check, reported by [`ValidatorRegistry::warnings`].
    pub fn contribute_warning<F>(&mut self, f: F)
    where
        F: Fn(&dyn SiteConfigQuerier) -> Problems + Send + Sync + 'static,
    {
        self.warnings.push(Box::new(f));
    }

    /// Validate a raw configuration.
    ///
    /// Fails only when the site document is not JSON at all.
    pub fn validate(&self, input: &RawConfig) -> ConfResult<Problems> {
        let site_json: Value = serde_json::from_str(&input.site)?;
        let mut problems = Problems::from_site_messages(schema_problems(&site_json));

        match serde_json::from_value::<SiteConfiguration>(site_json) {
            Ok(site) => problems.extend(self.run_validators(&site)),
            Err(e) if problems.is_empty() => return Err(ConfError::Parse(e)),
            Err(e) => {
                tracing::debug!(error = %e, "Skipping contributed validators for ill-typed configuration");
            }
        }
        Ok(problems)
    }

    /// Validate a site document, returning only the problem messages.
    pub fn validate_site(&self, site: &str) -> ConfResult<Vec<String>> {
        Ok(self.validate(&RawConfig::from_site(site))?.messages())
    }

    /// Run the contributed validators against a typed configuration.
    pub fn run_validators(&self, cfg: &dyn SiteConfigQuerier) -> Problems {
        self.validators.iter().flat_map(|f| f(cfg)).collect()
    }

    /// Run the contributed warning checks.
    pub fn warnings(&self, cfg: &dyn SiteConfigQuerier) -> Problems {
        self.warnings.iter().flat_map(|f| f(cfg)).collect()
    }
}

impl fmt::Debug for ValidatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatorRegistry")
            .field("validators", &self.validators.len())
            .field("warnings", &self.warnings.len())
            .finish()
    }
}

static SITE_SCHEMA: Lazy<Result<JSONSchema, String>> = Lazy::new(|| {
    let schema = serde_json::to_value(schemars::schema_for!(SiteConfiguration))
        .map_err(|e| format!("schema serialize: {}", e))?;
    JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(&schema)
        .map_err(|e| format!("schema compile: {}", e))
});

/// Structural problems of a site document against the site schema.
pub fn schema_problems(site: &Value) -> Vec<String> {
    let schema = match SITE_SCHEMA.as_ref() {
        Ok(schema) => schema,
        Err(e) => {
            tracing::error!(error = %e, "Site configuration schema unavailable");
            return vec![format!("unable to validate site configuration: {}", e)];
        }
    };

    match schema.validate(site) {
        Ok(()) => Vec::new(),
        Err(errors) => errors
            .map(|err| {
                let path = err.instance_path.to_string();
                let path = if path.is_empty() { "(root)".to_string() } else { path };
                format!("{}: {}", path, err)
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_problem_wire_shape() {
        let json = serde_json::to_value(Problem::site("x")).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "SiteConfig", "description": "x"}));
        let json = serde_json::to_value(Problem::external_service("y")).unwrap();
        assert_eq!(json["kind"], "ExternalService");
    }

    #[test]
    fn test_problems_filters() {
        let problems: Problems = vec![
            Problem::site("a"),
            Problem::external_service("b"),
            Problem::site("c"),
        ]
        .into_iter()
        .collect();
        assert_eq!(problems.site().messages(), vec!["a", "c"]);
        assert_eq!(problems.external_service().messages(), vec!["b"]);
    }

    #[test]
    fn test_contributed_validators_are_concatenated() {
        let mut registry = ValidatorRegistry::new();
        registry.contribute_validator(|_| Problems::from_site_messages(["x"]));
        registry.contribute_validator(|_| Problems::new());

        let problems = registry.validate(&RawConfig::from_site("{}")).unwrap();
        assert_eq!(problems.len(), 1);
        assert_eq!(problems.messages(), vec!["x"]);
        assert!(problems.iter().all(Problem::is_site));
    }

    #[test]
    fn test_validators_see_the_typed_config() {
        let mut registry = ValidatorRegistry::new();
        registry.contribute_validator(|cfg| {
            if cfg.site_config().license_key.is_none() {
                Problems::from_site_messages(["licenseKey missing"])
            } else {
                Problems::new()
            }
        });
        assert_eq!(registry.validate_site("{}").unwrap(), vec!["licenseKey missing"]);
        assert!(registry.validate_site(r#"{"licenseKey": "abc"}"#).unwrap().is_empty());
    }

    #[test]
    fn test_schema_reports_type_errors() {
        let registry = ValidatorRegistry::new();
        let problems = registry.validate_site(r#"{"externalURL": 5}"#).unwrap();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].starts_with("/externalURL"), "{:?}", problems);
    }

    #[test]
    fn test_schema_reports_unknown_keys() {
        let registry = ValidatorRegistry::new();
        let problems = registry.validate_site(r#"{"notARealSetting": true}"#).unwrap();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("notARealSetting"), "{:?}", problems);
    }

    #[test]
    fn test_schema_accepts_valid_document() {
        let registry = ValidatorRegistry::new();
        let site = r#"{
            "externalURL": "https://sourcegraph.example.com",
            "auth.providers": [{"type": "builtin", "allowSignup": false}],
            "log": {"auditLog": {"internalTraffic": false, "graphQL": true, "gitserverAccess": false}},
            "experimentalFeatures": {"searchJobs": true}
        }"#;
        assert!(registry.validate_site(site).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        let registry = ValidatorRegistry::new();
        assert!(matches!(registry.validate_site("{"), Err(ConfError::Parse(_))));
    }

    #[test]
    fn test_warnings_run_separately() {
        let mut registry = ValidatorRegistry::new();
        registry.contribute_warning(|_| Problems::from_site_messages(["consider setting email.address"]));
        assert!(registry.validate_site("{}").unwrap().is_empty());
        let warnings = registry.warnings(&SiteConfiguration::default());
        assert_eq!(warnings.messages(), vec!["consider setting email.address"]);
    }
}
