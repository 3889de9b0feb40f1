//! HTTP API subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, trace, timeout)
//!     → /.internal/configuration, /healthz
//!     → admin routes (bearer auth) → Server::write, ValidatorRegistry
//! ```

pub mod server;

pub use server::{build_router, AppState, HttpServer, X_REQUEST_ID};
