//! Shared configuration, logging and error types for outbox processes.

mod config;
mod error;
mod logging;

pub use config::{
    Config, CrawlerSettings, DEFAULT_DATABASE_PATH, DEFAULT_LOG_LEVEL, ENV_DATABASE_PATH,
    ENV_LOG_LEVEL,
};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, init_logging_with_format, LogFormat};
