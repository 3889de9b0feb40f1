//! Resilience helpers.
//!
//! # Design Decisions
//! - Background loops never give up: failures are logged and retried
//! - Polling intervals are jittered to avoid synchronized load on the source

pub mod backoff;
