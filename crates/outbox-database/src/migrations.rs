//! Database migrations.
//!
//! Provisions the outbox tables and the denormalised read view.
//! Migrations are run in order and tracked in the `migrations` table.

use crate::DatabaseResult;
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 1;

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> DatabaseResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM migrations",
        [],
        |row| row.get(0),
    )?;

    info!(current_version, target_version = CURRENT_VERSION, "Running migrations");

    if current_version < 1 {
        migrate_v1_outbox(conn)?;
    }

    info!("Migrations complete");
    Ok(())
}

fn record_migration(conn: &Connection, version: i32, name: &str) -> DatabaseResult<()> {
    conn.execute(
        "INSERT INTO migrations (version, name) VALUES (?1, ?2)",
        rusqlite::params![version, name],
    )?;
    debug!(version, name, "Migration applied");
    Ok(())
}

/// V1: outbox events, publication attempts, per-subscriber failures.
fn migrate_v1_outbox(conn: &Connection) -> DatabaseResult<()> {
    info!("Applying migration v1: outbox");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS outbox (
            id TEXT PRIMARY KEY,
            topic TEXT NOT NULL,
            payload TEXT NOT NULL,
            occurred_at TEXT NOT NULL,
            was_quarantined INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'never-published',
            priority INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_outbox_status_occurred_at
            ON outbox(status, occurred_at);
        CREATE INDEX IF NOT EXISTS idx_outbox_occurred_at
            ON outbox(occurred_at);

        CREATE TABLE IF NOT EXISTS outbox_publications (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT NOT NULL REFERENCES outbox(id) ON DELETE CASCADE,
            published_at TEXT NOT NULL,
            UNIQUE(event_id, published_at)
        );

        CREATE INDEX IF NOT EXISTS idx_outbox_publications_event_id
            ON outbox_publications(event_id, published_at);

        CREATE TABLE IF NOT EXISTS outbox_failures (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            publication_id INTEGER NOT NULL REFERENCES outbox_publications(id) ON DELETE CASCADE,
            subscription_id TEXT NOT NULL,
            error_message TEXT NOT NULL,
            UNIQUE(publication_id, subscription_id)
        );

        CREATE VIEW IF NOT EXISTS view_outbox AS
            SELECT
                o.id,
                o.topic,
                o.payload,
                o.occurred_at,
                o.was_quarantined,
                o.status,
                o.priority,
                p.id AS publication_id,
                p.published_at,
                f.subscription_id,
                f.error_message
            FROM outbox o
            LEFT JOIN outbox_publications p ON p.event_id = o.id
            LEFT JOIN outbox_failures f ON f.publication_id = p.id;
        ",
    )?;

    record_migration(conn, 1, "outbox")?;
    Ok(())
}
