//! Database error types.

use domain_events::DomainEventError;
use thiserror::Error;

/// Database error type.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Executor connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored value could not be decoded
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Stored topic or status is not recognised
    #[error("Invalid event field: {0}")]
    DomainEvent(#[from] DomainEventError),

    /// A publication carrying failures was inserted without yielding an id,
    /// so its failures cannot be attached. The audit trail is incomplete.
    #[error("Failed to save new publication for event {event_id} at {published_at}")]
    SaveNewPublicationFailed {
        event_id: String,
        published_at: String,
    },
}

/// Result type alias using DatabaseError.
pub type DatabaseResult<T> = Result<T, DatabaseError>;
