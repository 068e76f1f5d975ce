//! Crawler error types.

use outbox_database::DatabaseError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CrawlerError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Invalid crawler configuration: {0}")]
    InvalidConfig(String),
}

pub type CrawlerResult<T> = Result<T, CrawlerError>;
