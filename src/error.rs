//! Crate-wide error taxonomy.
//!
//! Only [`AdapterError::Config`] and [`AdapterError::BackendUnavailable`] are
//! fatal at startup; an [`AdapterError::Unexpected`] escaping the event loop
//! is also fatal. Every other variant is recoverable: it is surfaced through
//! the CSP config document's `errors` field and retried on the next tick.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    /// Malformed config, missing mandatory field, or a structurally invalid
    /// tier. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// No plug-in registered for a required capability. Fatal at startup.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The sampling backend failed to produce a usage record this tick.
    #[error("usage sampling error: {0}")]
    Sample(String),

    /// A storage read/write failed.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// The metering backend reported a submission failure.
    #[error("metering submission error: {0}")]
    Submission(String),

    /// A metric's billable usage fell outside all of its declared tiers.
    #[error("no matching volume dimension for metric '{metric}' with value {value}")]
    NoMatchingVolumeDimension { metric: String, value: i64 },

    /// An error that does not fit any recoverable category. Fatal.
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AdapterError {
    /// Process exit code this error maps to when it escapes the event loop
    /// driver. `0` is never returned here; graceful shutdown is a distinct
    /// (non-error) path.
    pub fn exit_code(&self) -> i32 {
        match self {
            AdapterError::Config(_) | AdapterError::BackendUnavailable(_) => 2,
            _ => 1,
        }
    }

    /// Whether this error kind terminates the process when it escapes a
    /// single event loop tick, as opposed to being recorded and retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AdapterError::Config(_) | AdapterError::BackendUnavailable(_) | AdapterError::Unexpected(_)
        )
    }
}
