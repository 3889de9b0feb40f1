//! Built-in validators contributed to the [`ValidatorRegistry`](crate::site::validate::ValidatorRegistry).

use crate::deploy::DeployType;
use crate::site::types::{AuthProvider, RolloutWindow};
use crate::site::validate::{Problem, Problems, SiteConfigQuerier};

const WEEKDAYS: &[&str] = &[
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
    "mon",
    "tue",
    "wed",
    "thu",
    "fri",
    "sat",
    "sun",
];

/// `externalURL` must be set (except in single-container deployments) and parse as a URL.
pub fn validate_external_url(cfg: &dyn SiteConfigQuerier, deploy_type: DeployType) -> Problems {
    if deploy_type.is_single_docker_container() {
        return Problems::new();
    }

    let external_url = cfg.site_config().external_url.trim();
    if external_url.is_empty() {
        return Problems::from_site_messages([
            "`externalURL` is required to be set for many features to work correctly.",
        ]);
    }

    match url::Url::parse(external_url) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => Problems::new(),
        Ok(url) => Problems::from_site_messages([format!(
            "`externalURL` must use http or https, found scheme `{}`.",
            url.scheme()
        )]),
        Err(e) => Problems::from_site_messages([format!(
            "`externalURL` is not a valid URL: {}.",
            e
        )]),
    }
}

/// At least one auth provider, and at most one builtin provider.
pub fn validate_auth_providers(cfg: &dyn SiteConfigQuerier) -> Problems {
    let providers = &cfg.site_config().auth_providers;
    let mut problems = Problems::new();

    if providers.is_empty() {
        problems.push(Problem::site(
            "no auth providers set in `auth.providers` (all access will be denied); \
             add a builtin provider to allow sign-in",
        ));
    }

    let builtin = providers
        .iter()
        .filter(|p| matches!(p, AuthProvider::Builtin(_)))
        .count();
    if builtin > 1 {
        problems.push(Problem::site(format!(
            "`auth.providers` may contain at most one builtin provider, found {}",
            builtin
        )));
    }

    problems
}

/// Every `batchChanges.rolloutWindows` entry must be well-formed.
pub fn validate_rollout_windows(cfg: &dyn SiteConfigQuerier) -> Problems {
    let Some(windows) = &cfg.site_config().batch_changes_rollout_windows else {
        return Problems::new();
    };

    windows
        .iter()
        .enumerate()
        .flat_map(|(i, window)| rollout_window_errors(window).into_iter().map(move |msg| (i, msg)))
        .map(|(i, msg)| Problem::site(format!("`batchChanges.rolloutWindows[{}]`: {}", i, msg)))
        .collect()
}

fn rollout_window_errors(window: &RolloutWindow) -> Vec<String> {
    let mut errors = Vec::new();

    if !is_valid_rate(&window.rate) {
        errors.push(format!(
            "invalid rate `{}`, expected `unlimited` or `<n>/<sec|min|hour>`",
            window.rate
        ));
    }

    for day in &window.days {
        if !WEEKDAYS.contains(&day.to_ascii_lowercase().as_str()) {
            errors.push(format!("unknown day `{}`", day));
        }
    }

    match (&window.start, &window.end) {
        (Some(start), Some(end)) => {
            for (name, value) in [("start", start), ("end", end)] {
                if parse_hh_mm(value).is_none() {
                    errors.push(format!("`{}` must be HH:MM, found `{}`", name, value));
                }
            }
        }
        (None, None) => {}
        _ => errors.push("`start` and `end` must be set together".to_string()),
    }

    errors
}

fn is_valid_rate(rate: &str) -> bool {
    if rate == "unlimited" {
        return true;
    }
    let Some((count, unit)) = rate.split_once('/') else {
        return false;
    };
    count.parse::<u32>().is_ok()
        && matches!(unit, "s" | "sec" | "second" | "m" | "min" | "minute" | "h" | "hr" | "hour")
}

fn parse_hh_mm(value: &str) -> Option<(u8, u8)> {
    let (h, m) = value.split_once(':')?;
    if h.len() != 2 || m.len() != 2 {
        return None;
    }
    let h: u8 = h.parse().ok()?;
    let m: u8 = m.parse().ok()?;
    (h < 24 && m < 60).then_some((h, m))
}

/// Warn when no admin contact address is configured.
pub fn warn_email_address(cfg: &dyn SiteConfigQuerier) -> Problems {
    match cfg.site_config().email_address.as_deref().map(str::trim) {
        Some(addr) if !addr.is_empty() => Problems::new(),
        _ => Problems::from_site_messages([
            "`email.address` is not set; outgoing emails will have no sender address",
        ]),
    }
}
