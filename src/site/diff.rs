//! Field-level diffs between two configurations.
//!
//! Fields are named by their JSON keys. `experimentalFeatures` is expanded into
//! `experimentalFeatures::<key>` entries and service connection fields carry a
//! `serviceConnections::` prefix.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use serde_json::Value;

use crate::site::types::Unified;

/// Fields whose change only takes effect after the server restarts.
pub const RESTART_REQUIRED_FIELDS: &[&str] = &[
    "auth.providers",
    "insights.query.worker.concurrency",
    "insights.commit.indexer.interval",
    "permissions.syncUsersMaxConcurrency",
    "gitHubApp",
];

const EXPERIMENTAL_FEATURES: &str = "experimentalFeatures";

/// Names of every field that differs between `before` and `after`.
pub fn diff(before: &Unified, after: &Unified) -> BTreeSet<String> {
    let mut changed = diff_fields(&before.site, &after.site, "");
    changed.extend(diff_fields(
        &before.service_connections,
        &after.service_connections,
        "serviceConnections::",
    ));
    changed
}

/// Whether moving from `before` to `after` touches a restart-required field.
pub fn need_restart_to_apply(before: &Unified, after: &Unified) -> bool {
    diff(before, after)
        .iter()
        .any(|field| RESTART_REQUIRED_FIELDS.contains(&field.as_str()))
}

fn diff_fields<T: Serialize>(before: &T, after: &T, prefix: &str) -> BTreeSet<String> {
    let before = json_fields(before, prefix);
    let after = json_fields(after, prefix);

    before
        .keys()
        .chain(after.keys())
        .filter(|name| before.get(*name) != after.get(*name))
        .cloned()
        .collect()
}

fn json_fields<T: Serialize>(value: &T, prefix: &str) -> BTreeMap<String, Value> {
    match serde_json::to_value(value) {
        Ok(value) => flatten(value, prefix),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to serialize configuration for diff");
            BTreeMap::new()
        }
    }
}

fn flatten(value: Value, prefix: &str) -> BTreeMap<String, Value> {
    let mut fields = BTreeMap::new();
    let Value::Object(map) = value else {
        return fields;
    };
    for (name, value) in map {
        if name == EXPERIMENTAL_FEATURES && value.is_object() {
            let nested = format!("{}{}::", prefix, EXPERIMENTAL_FEATURES);
            fields.extend(flatten(value, &nested));
        } else {
            fields.insert(format!("{}{}", prefix, name), value);
        }
    }
    fields
}

/// Sticky flag recording that an observed change needs a restart.
#[derive(Debug, Default)]
pub struct RestartTracker {
    needed: AtomicBool,
}

impl RestartTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a configuration change. Once set, the flag stays set.
    pub fn observe(&self, before: &Unified, after: &Unified) {
        if need_restart_to_apply(before, after) && !self.needed.swap(true, Ordering::SeqCst) {
            tracing::warn!("Site configuration change requires a server restart to apply");
        }
    }

    pub fn needed(&self) -> bool {
        self.needed.load(Ordering::SeqCst)
    }
}
