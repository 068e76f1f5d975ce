//! Event model error types.

use thiserror::Error;

/// Errors raised while decoding stored event fields.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainEventError {
    /// Topic name is not part of the closed topic set
    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    /// Status name is not a known lifecycle state
    #[error("Unknown event status: {0}")]
    UnknownStatus(String),
}

/// Result type alias using DomainEventError.
pub type DomainEventResult<T> = Result<T, DomainEventError>;
