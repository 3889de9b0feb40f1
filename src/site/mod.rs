//! Site configuration: sources, the in-memory store, the client and server roles,
//! validation, and the escape hatch file.

pub mod client;
pub mod computed;
pub mod diff;
pub mod error;
pub mod escape_hatch;
pub mod parse;
pub mod server;
pub mod source;
pub mod store;
pub mod types;
pub mod validate;
pub mod validators;

pub use client::{Cached, Client, UpdateLoopOptions, WatchHandle};
pub use error::{ConfError, ConfResult};
pub use server::Server;
pub use source::RawSource;
pub use store::Store;
pub use types::{RawConfig, ServiceConnections, SiteConfiguration, Unified};
pub use validate::{Problem, ProblemKind, Problems, ValidatorRegistry};
