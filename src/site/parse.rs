//! Parsing of raw configuration into its typed form.

use crate::site::error::{ConfError, ConfResult};
use crate::site::types::{RawConfig, SiteConfiguration, Unified};

/// Decode a site configuration document.
///
/// Unknown keys are ignored here; schema validation reports them separately.
pub fn parse_site(site: &str) -> ConfResult<SiteConfiguration> {
    if site.trim().is_empty() {
        return Err(ConfError::InvalidConfig(
            "site configuration document is empty".to_string(),
        ));
    }
    Ok(serde_json::from_str(site)?)
}

/// Parse a raw configuration into a [`Unified`] value.
pub fn parse_config(raw: &RawConfig) -> ConfResult<Unified> {
    Ok(Unified {
        site: parse_site(&raw.site)?,
        service_connections: raw.service_connections.clone(),
    })
}

/// Serialize a typed site configuration back to its document form.
pub fn render_site(site: &SiteConfiguration) -> String {
    serde_json::to_string_pretty(site).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_site() {
        let site = parse_site(r#"{"externalURL": "https://sg.example.com"}"#).unwrap();
        assert_eq!(site.external_url, "https://sg.example.com");
    }

    #[test]
    fn test_parse_rejects_malformed_json() {
        let err = parse_site(r#"{"externalURL": "#).unwrap_err();
        assert!(matches!(err, ConfError::Parse(_)));
    }

    #[test]
    fn test_parse_rejects_empty_document() {
        assert!(matches!(parse_site("  "), Err(ConfError::InvalidConfig(_))));
    }

    #[test]
    fn test_parse_ignores_unknown_keys() {
        let site = parse_site(r#"{"someFutureSetting": 1, "update.channel": "none"}"#).unwrap();
        assert_eq!(site.update_channel.as_deref(), Some("none"));
    }

    #[test]
    fn test_render_round_trips_through_parse() {
        let site = parse_site(r#"{"search.index.enabled": false}"#).unwrap();
        assert_eq!(parse_site(&render_site(&site)).unwrap(), site);
    }
}
