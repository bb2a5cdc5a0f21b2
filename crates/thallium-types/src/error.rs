//! Error taxonomy (spec §7). Every fallible operation in the workspace
//! surfaces one of these variants, wrapped in an `error_stack::Report` at
//! the crate boundary that observed the failure.

use thiserror::Error;

/// Convenience alias matching the teacher's `error_stack::Result<T, E>` usage.
pub type Result<T, E = ThalliumError> = error_stack::Result<T, E>;

#[derive(Debug, Error)]
pub enum ThalliumError {
    #[error("engine initialization failed: {reason}")]
    EngineInit { reason: String },

    #[error("operation attempted on a finalized or expired engine")]
    EngineInvalid,

    #[error("transport fault in `{op}`: {code}")]
    TransportFault { code: String, op: &'static str },

    #[error("operation timed out")]
    Timeout,

    #[error("operation was cancelled")]
    Cancelled,

    #[error("failed to decode value: expected `{expected}`, got `{got}`")]
    DecodeError { expected: String, got: String },

    #[error("asked for a value from a non-responding procedure")]
    EmptyResponse,

    #[error("threading fault in `{op}`: {code}")]
    ThreadingFault { code: String, op: &'static str },

    #[error("execution stream destroyed before all its units were joined")]
    MissingJoin,

    #[error("invalid configuration at `{path}`: {reason}")]
    ConfigInvalid { path: String, reason: String },
}

impl ThalliumError {
    /// Whether a caller-visible retry loop should treat this as a retryable
    /// deadline miss rather than a fatal failure (spec §7: "`Timeout` is
    /// always separately identifiable").
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}
