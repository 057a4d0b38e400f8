//! Errors raised by the export and schedule domain rules.

use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// Deterministic rule failures. Storage and transport errors live in the
/// layers that own them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Rejected definition, e.g. a blank schedule name or a webhook
    /// delivery with no webhook.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Illegal job status move.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// Stale `expected_version`.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
}
