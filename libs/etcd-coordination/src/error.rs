//! Error types for coordination-service operations.
//!
//! Provides typed error variants so that the store can distinguish between
//! transport failures, timeouts, TLS setup problems and codec issues without
//! leaking etcd client internals.

use thiserror::Error;

use crate::backend::LeaseId;

/// Top-level error type for the etcd-coordination crate.
#[derive(Debug, Error)]
pub enum CoordinationError {
    /// Connection or transport-level failure talking to the service.
    #[error("transport error: {0}")]
    Transport(String),

    /// Operation or dial timed out.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Certificate material could not be loaded or parsed.
    #[error("tls error: {0}")]
    Tls(String),

    /// A stored key or value is not valid text.
    #[error("codec error: {0}")]
    Codec(String),

    /// Configuration error (e.g. bad pool name or endpoint).
    #[error("configuration error: {0}")]
    Config(String),

    /// The lease does not exist, either never granted or already expired.
    #[error("lease {0} not found")]
    LeaseNotFound(LeaseId),
}

impl CoordinationError {
    /// Returns true if this error indicates a transient failure that may
    /// succeed on retry (transport or timeout).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoordinationError::Transport(_) | CoordinationError::Timeout(_)
        )
    }

    /// Returns true if this error is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, CoordinationError::Timeout(_))
    }
}

/// Shorthand result alias for coordination operations.
pub type CoordinationResult<T> = Result<T, CoordinationError>;
