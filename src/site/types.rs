//! Site configuration data model.
//!
//! `RawConfig` is what sources hand out; `Unified` is its parsed form. The JSON
//! key names of [`SiteConfiguration`] follow the site schema (dotted names such as
//! `auth.providers`), and the same names drive diffs and schema problems.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Serialized configuration as stored by a source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawConfig {
    /// The site configuration JSON document.
    pub site: String,

    /// Connection endpoints of the deployment's services.
    #[serde(default)]
    pub service_connections: ServiceConnections,

    /// Optimistic concurrency token of the stored version.
    #[serde(default)]
    pub id: i32,
}

impl RawConfig {
    /// A raw config holding just a site document.
    pub fn from_site(site: impl Into<String>) -> Self {
        Self {
            site: site.into(),
            ..Self::default()
        }
    }
}

/// Service endpoints known to the process that owns the configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceConnections {
    pub git_servers: Vec<String>,
    #[serde(rename = "postgresDSN")]
    pub postgres_dsn: String,
    #[serde(rename = "codeIntelPostgresDSN")]
    pub code_intel_postgres_dsn: String,
    #[serde(rename = "codeInsightsDSN")]
    pub code_insights_dsn: String,
    pub searchers: Vec<String>,
    pub symbols: Vec<String>,
    pub zoekts: Vec<String>,
}

impl ServiceConnections {
    /// Read service endpoints from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read service endpoints through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let list = |key: &str| -> Vec<String> {
            lookup(key)
                .map(|v| v.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default()
        };
        Self {
            git_servers: list("SRC_GIT_SERVERS"),
            postgres_dsn: lookup("PGDATASOURCE").unwrap_or_default(),
            code_intel_postgres_dsn: lookup("CODEINTEL_PGDATASOURCE").unwrap_or_default(),
            code_insights_dsn: lookup("CODEINSIGHTS_PGDATASOURCE").unwrap_or_default(),
            searchers: list("SEARCHER_URL"),
            symbols: list("SYMBOLS_URL"),
            zoekts: list("INDEXED_SEARCH_SERVERS"),
        }
    }
}

/// Parsed site configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Unified {
    pub site: SiteConfiguration,
    pub service_connections: ServiceConnections,
}

/// Typed view of the site configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
#[schemars(deny_unknown_fields)]
pub struct SiteConfiguration {
    /// Externally accessible URL of the deployment.
    #[serde(rename = "externalURL", skip_serializing_if = "String::is_empty")]
    pub external_url: String,

    #[serde(rename = "auth.providers", skip_serializing_if = "Vec::is_empty")]
    pub auth_providers: Vec<AuthProvider>,

    /// Session lifetime, e.g. `"2160h"`.
    #[serde(rename = "auth.sessionExpiry", skip_serializing_if = "Option::is_none")]
    pub auth_session_expiry: Option<String>,

    #[serde(rename = "log", skip_serializing_if = "Option::is_none")]
    pub log: Option<Log>,

    #[serde(rename = "experimentalFeatures", skip_serializing_if = "Option::is_none")]
    pub experimental_features: Option<ExperimentalFeatures>,

    #[serde(
        rename = "insights.query.worker.concurrency",
        skip_serializing_if = "Option::is_none"
    )]
    pub insights_query_worker_concurrency: Option<i32>,

    #[serde(
        rename = "insights.commit.indexer.interval",
        skip_serializing_if = "Option::is_none"
    )]
    pub insights_commit_indexer_interval: Option<i32>,

    #[serde(
        rename = "permissions.syncUsersMaxConcurrency",
        skip_serializing_if = "Option::is_none"
    )]
    pub permissions_sync_users_max_concurrency: Option<i32>,

    #[serde(rename = "gitHubApp", skip_serializing_if = "Option::is_none")]
    pub github_app: Option<GitHubApp>,

    /// `release` or `none`.
    #[serde(rename = "update.channel", skip_serializing_if = "Option::is_none")]
    pub update_channel: Option<String>,

    #[serde(rename = "search.index.enabled", skip_serializing_if = "Option::is_none")]
    pub search_index_enabled: Option<bool>,

    #[serde(rename = "observability.tracing", skip_serializing_if = "Option::is_none")]
    pub observability_tracing: Option<ObservabilityTracing>,

    #[serde(rename = "batchChanges.enabled", skip_serializing_if = "Option::is_none")]
    pub batch_changes_enabled: Option<bool>,

    #[serde(
        rename = "batchChanges.rolloutWindows",
        skip_serializing_if = "Option::is_none"
    )]
    pub batch_changes_rollout_windows: Option<Vec<RolloutWindow>>,

    #[serde(rename = "email.address", skip_serializing_if = "Option::is_none")]
    pub email_address: Option<String>,

    #[serde(rename = "licenseKey", skip_serializing_if = "Option::is_none")]
    pub license_key: Option<String>,
}

/// An authentication provider entry, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type")]
pub enum AuthProvider {
    #[serde(rename = "builtin")]
    Builtin(BuiltinAuthProvider),
    #[serde(rename = "openidconnect")]
    OpenIdConnect(OpenIdConnectAuthProvider),
    #[serde(rename = "github")]
    GitHub(GitHubAuthProvider),
    #[serde(rename = "http-header")]
    HttpHeader(HttpHeaderAuthProvider),
}

impl AuthProvider {
    /// The `type` discriminator as written in the document.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthProvider::Builtin(_) => "builtin",
            AuthProvider::OpenIdConnect(_) => "openidconnect",
            AuthProvider::GitHub(_) => "github",
            AuthProvider::HttpHeader(_) => "http-header",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct BuiltinAuthProvider {
    pub allow_signup: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct OpenIdConnectAuthProvider {
    pub issuer: String,
    #[serde(rename = "clientID")]
    pub client_id: String,
    pub client_secret: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(rename = "configID", skip_serializing_if = "Option::is_none")]
    pub config_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct GitHubAuthProvider {
    pub url: String,
    #[serde(rename = "clientID")]
    pub client_id: String,
    pub client_secret: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub allow_signup: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpHeaderAuthProvider {
    pub username_header: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_header: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct Log {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_log: Option<AuditLog>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_event_log: Option<SecurityEventLog>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct AuditLog {
    #[serde(rename = "internalTraffic")]
    pub internal_traffic: bool,
    #[serde(rename = "graphQL")]
    pub graphql: bool,
    #[serde(rename = "gitserverAccess")]
    pub gitserver_access: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SecurityEventLog {
    /// `none`, `auditlog`, `database` or `all`.
    pub location: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct ExperimentalFeatures {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_jobs: Option<bool>,
    /// `enabled` or `disabled`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structural_search: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub perforce: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub go_packages: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct GitHubApp {
    pub app_id: String,
    #[serde(rename = "clientID")]
    pub client_id: String,
    pub client_secret: String,
    pub private_key: String,
    pub slug: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct ObservabilityTracing {
    /// `opentelemetry` or `none`.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url_template: Option<String>,
}

/// A time window during which batch changes may publish changesets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct RolloutWindow {
    /// `unlimited` or `<n>/<unit>`.
    pub rate: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub days: Vec<String>,
    /// `HH:MM`, UTC.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    /// `HH:MM`, UTC.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
}
