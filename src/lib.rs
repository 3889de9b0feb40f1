//! Site configuration synchronization.
//!
//! A process-wide site configuration that is read concurrently, refreshed in the
//! background, validated on write and mirrored to an on-disk escape hatch file.

pub mod admin;
pub mod config;
pub mod deploy;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod site;

pub use config::schema::ServiceConfig;
pub use http::HttpServer;
pub use lifecycle::shutdown::Shutdown;
pub use lifecycle::startup::SiteConf;
pub use site::{Client, Server, ValidatorRegistry};
