//! Accessors over the site configuration with their defaults applied.

use std::time::Duration;

use crate::site::types::{AuthProvider, Unified};

/// Default for `auth.sessionExpiry`.
pub const DEFAULT_SESSION_EXPIRY: Duration = Duration::from_secs(2160 * 60 * 60);

/// `externalURL` without a trailing slash, if set.
pub fn external_url(cfg: &Unified) -> Option<&str> {
    let url = cfg.site.external_url.trim().trim_end_matches('/');
    (!url.is_empty()).then_some(url)
}

/// `update.channel`, defaulting to `release`.
pub fn update_channel(cfg: &Unified) -> &str {
    cfg.site.update_channel.as_deref().unwrap_or("release")
}

/// `search.index.enabled`, defaulting to on.
pub fn search_index_enabled(cfg: &Unified) -> bool {
    cfg.site.search_index_enabled.unwrap_or(true)
}

/// `batchChanges.enabled`, defaulting to on.
pub fn batch_changes_enabled(cfg: &Unified) -> bool {
    cfg.site.batch_changes_enabled.unwrap_or(true)
}

/// `auth.sessionExpiry`, falling back to the default when unset or unparsable.
pub fn session_expiry(cfg: &Unified) -> Duration {
    match cfg.site.auth_session_expiry.as_deref() {
        Some(value) => humantime::parse_duration(value).unwrap_or_else(|e| {
            tracing::warn!(value, error = %e, "Invalid auth.sessionExpiry, using default");
            DEFAULT_SESSION_EXPIRY
        }),
        None => DEFAULT_SESSION_EXPIRY,
    }
}

/// Whether the builtin auth provider lets new users sign up.
pub fn auth_builtin_signup_allowed(cfg: &Unified) -> bool {
    cfg.site.auth_providers.iter().any(|p| match p {
        AuthProvider::Builtin(builtin) => builtin.allow_signup,
        _ => false,
    })
}

/// Whether the named experimental feature is turned on.
///
/// Boolean features are on when `true`; string features when `"enabled"`.
pub fn experimental_feature_enabled(cfg: &Unified, name: &str) -> bool {
    let Some(features) = &cfg.site.experimental_features else {
        return false;
    };
    match name {
        "searchJobs" => features.search_jobs.unwrap_or(false),
        "structuralSearch" => features.structural_search.as_deref() == Some("enabled"),
        "perforce" => features.perforce.as_deref() == Some("enabled"),
        "goPackages" => features.go_packages.as_deref() == Some("enabled"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::parse::parse_site;

    fn cfg(site: &str) -> Unified {
        Unified {
            site: parse_site(site).unwrap(),
            ..Unified::default()
        }
    }

    #[test]
    fn test_defaults() {
        let c = cfg("{}");
        assert_eq!(external_url(&c), None);
        assert_eq!(update_channel(&c), "release");
        assert!(search_index_enabled(&c));
        assert!(batch_changes_enabled(&c));
        assert_eq!(session_expiry(&c), DEFAULT_SESSION_EXPIRY);
        assert!(!auth_builtin_signup_allowed(&c));
        assert!(!experimental_feature_enabled(&c, "searchJobs"));
    }

    #[test]
    fn test_overrides() {
        let c = cfg(
            r#"{
                "externalURL": "https://sg.example.com/",
                "update.channel": "none",
                "search.index.enabled": false,
                "auth.sessionExpiry": "8h",
                "auth.providers": [{"type": "builtin", "allowSignup": true}],
                "experimentalFeatures": {"structuralSearch": "enabled", "searchJobs": true}
            }"#,
        );
        assert_eq!(external_url(&c), Some("https://sg.example.com"));
        assert_eq!(update_channel(&c), "none");
        assert!(!search_index_enabled(&c));
        assert_eq!(session_expiry(&c), Duration::from_secs(8 * 3600));
        assert!(auth_builtin_signup_allowed(&c));
        assert!(experimental_feature_enabled(&c, "structuralSearch"));
        assert!(experimental_feature_enabled(&c, "searchJobs"));
        assert!(!experimental_feature_enabled(&c, "perforce"));
    }

    #[test]
    fn test_invalid_session_expiry_falls_back() {
        let c = cfg(r#"{"auth.sessionExpiry": "forever"}"#);
        assert_eq!(session_expiry(&c), DEFAULT_SESSION_EXPIRY);
    }
}
