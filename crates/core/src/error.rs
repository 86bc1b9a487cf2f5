//! Errors raised by aggregates while deciding a command.

use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// Deterministic business failure: the same command against the same history
/// always fails the same way. Storage and transport errors live in the
/// infrastructure layer.
///
/// Window data never produces one of these: a missing, unreadable or inverted
/// publish window is a valid state of a product.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Rejected input, e.g. an empty product name.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The command addresses a stream it does not belong to.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// No history for the addressed aggregate.
    #[error("not found")]
    NotFound,

    /// The command contradicts current state (duplicate create, publishing
    /// something already published).
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

    pub fn not_found() -> Self {
        Self::NotFound
    }
}
