//! Metrics collection and exposition.
//!
//! # Metrics
//! - `siteconf_fetch_total` (counter): source reads by outcome (`changed`, `unchanged`, `error`)
//! - `siteconf_config_changes_total` (counter): configurations installed into the store
//! - `siteconf_watchers` (gauge): registered watchers
//! - `siteconf_writes_total` (counter): server writes by outcome
//! - `siteconf_escape_hatch_syncs_total` (counter): escape-hatch syncs by direction
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed, so library users and tests
//!   pay nothing
//! - Prometheus exposition through its own HTTP listener

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_fetch(outcome: &'static str) {
    counter!("siteconf_fetch_total", "outcome" => outcome).increment(1);
}

pub fn record_config_change() {
    counter!("siteconf_config_changes_total").increment(1);
}

pub fn record_watchers(count: usize) {
    gauge!("siteconf_watchers").set(count as f64);
}

pub fn record_write(outcome: &'static str) {
    counter!("siteconf_writes_total", "outcome" => outcome).increment(1);
}

pub fn record_escape_hatch_sync(direction: &'static str) {
    counter!("siteconf_escape_hatch_syncs_total", "direction" => direction).increment(1);
}
