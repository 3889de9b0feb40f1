//! Error type for the site configuration core.

use thiserror::Error;

/// Errors produced while reading, parsing, or persisting site configuration.
#[derive(Debug, Error)]
pub enum ConfError {
    /// The raw configuration cannot be used at all (e.g. an empty document).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The site configuration document is not well-formed.
    #[error("failed to parse site configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// The configuration source could not be reached (server still starting, network down).
    #[error("configuration source unreachable: {0}")]
    Unreachable(String),

    /// The configuration source answered with an error.
    #[error("configuration source error: {0}")]
    Source(String),

    /// Optimistic concurrency check failed on write.
    #[error("site configuration was modified concurrently (expected id {expected}, latest is {actual})")]
    Conflict { expected: i32, actual: i32 },

    /// The source does not accept writes.
    #[error("configuration source is read-only")]
    ReadOnly,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The update loop that acknowledges writes is gone.
    #[error("configuration update loop is not running")]
    Closed,
}

impl ConfError {
    /// Whether this error means the source is not reachable yet.
    ///
    /// The update loop keeps these quiet for a grace window after startup.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, ConfError::Unreachable(_))
    }
}

/// Result type for site configuration operations.
pub type ConfResult<T> = Result<T, ConfError>;
