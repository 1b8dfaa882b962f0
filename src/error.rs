//! Crate-level error types.
//!
//! The registry construction boundary — a genuine external boundary where
//! caller-supplied configuration can be malformed — gets a small
//! `thiserror` enum, matching the teacher's use of `thiserror`-style typed
//! errors at its own library seams. Every other fallible path in this
//! crate (the tolerant parser, the provider adapters' stream bodies) is
//! designed to never fail outward at all — they resolve to a best-effort
//! value or a `StreamChunk` carrying an error string — so there is no
//! remaining internal plumbing that needs a catch-all error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("duplicate provider name '{0}'")]
    DuplicateName(String),
}
