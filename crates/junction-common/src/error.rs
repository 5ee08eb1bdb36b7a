//! Error taxonomy for the gateway.
//!
//! Every failure in the request-to-submission pipeline is one of a small set
//! of kinds, and the orchestrator decides propagation per kind:
//!
//! - [`GatewayError::Validation`] - malformed inbound payload, reported
//!   synchronously to the caller, no state mutation.
//! - [`GatewayError::Routing`] - a named target that is not configured;
//!   fatal, never retried.
//! - [`GatewayError::Transient`] - infrastructure trouble (persistence or
//!   downstream timeouts); retried, and only surfaced once retries are
//!   exhausted.
//! - [`GatewayError::Data`] - unparseable metadata, missing derivative,
//!   unresolvable collection; fatal to the single request.
//! - [`GatewayError::Rejected`] - the downstream repository answered with a
//!   non-200 status; terminal, the body is kept verbatim for diagnosis.

use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Main error type for the gateway pipeline
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("routing error: {0}")]
    Routing(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("data error: {0}")]
    Data(String),

    #[error("downstream rejected submission with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("not found: {0}")]
    NotFound(String),
}

impl GatewayError {
    /// True for failures the retry policy is allowed to retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Transient(_))
    }

    /// Shorthand for a data error with a formatted message.
    pub fn data(message: impl Into<String>) -> Self {
        GatewayError::Data(message.into())
    }

    /// Shorthand for a transient error with a formatted message.
    pub fn transient(message: impl Into<String>) -> Self {
        GatewayError::Transient(message.into())
    }
}
