//! SQLite persistence for the transactional outbox.
//!
//! This crate provides:
//! - `AsyncDatabase`: single-thread async executor over rusqlite
//! - Schema provisioning (`migrations`)
//! - `queries`: free functions over `&rusqlite::Connection`, usable inside
//!   a caller's own transaction alongside business writes
//! - `OutboxRepository` / `OutboxQueries`: the async contracts, and
//!   `SqliteOutbox` implementing both
//!
//! # Storage layout
//!
//! ```text
//! outbox ─┬─< outbox_publications ─┬─< outbox_failures
//!         └──────── view_outbox (LEFT JOIN of all three) ────────┘
//! ```

mod error;
mod executor;
mod migrations;
mod models;
pub mod queries;
mod reader;
mod sqlite_outbox;
mod writer;

pub use error::{DatabaseError, DatabaseResult};
pub use executor::AsyncDatabase;
pub use migrations::{run_migrations, CURRENT_VERSION};
pub use models::{format_timestamp, parse_timestamp};
pub use reader::OutboxQueries;
pub use sqlite_outbox::SqliteOutbox;
pub use writer::OutboxRepository;
