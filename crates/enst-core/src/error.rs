//! Error type shared by the configuration and loading boundary.
//!
//! Derivations never fail: missing inputs surface as `None` or
//! [`crate::cost::Amount::Unbounded`]. Only configuration, policy and file
//! loading return [`EnstError`].

use thiserror::Error;

/// Errors raised at the boundary between collaborators and the engine.
#[derive(Debug, Error)]
pub enum EnstError {
    /// Work-units mode string was neither `infra` nor `domain`.
    #[error("invalid work units mode '{0}' (expected 'infra' or 'domain')")]
    InvalidMode(String),

    /// Policy object failed validation.
    #[error("invalid policy: {0}")]
    InvalidPolicy(String),

    /// Pipeline configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A single input record could not be decoded.
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EnstError>;
