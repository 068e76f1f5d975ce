//! Standalone query functions that work with any Connection.
//!
//! Each function takes a `&Connection` as its first parameter. Work that
//! spans several statements runs under a savepoint, so these functions can
//! be called on a `Transaction` that also carries the caller's business
//! writes. Outside a transaction the savepoint commits on its own.

use chrono::{DateTime, Utc};
use domain_events::{DomainEvent, EventFailure, EventId, EventPublication, EventStatus};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::models::{assemble_events, format_timestamp, OutboxRow, VIEW_COLUMNS};
use crate::{DatabaseError, DatabaseResult};

/// Ids per `IN (...)` list.
const ID_CHUNK_SIZE: usize = 500;

/// Events per multi-row insert (7 bound parameters each).
const INSERT_CHUNK_SIZE: usize = 100;

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

/// Runs `f` under `SAVEPOINT name`, released on success and rolled back on
/// error. Nests inside an open transaction instead of failing like `BEGIN`.
fn with_savepoint<T>(
    conn: &Connection,
    name: &str,
    f: impl FnOnce(&Connection) -> DatabaseResult<T>,
) -> DatabaseResult<T> {
    conn.execute_batch(&format!("SAVEPOINT {name}"))?;
    match f(conn) {
        Ok(value) => {
            conn.execute_batch(&format!("RELEASE {name}"))?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = conn.execute_batch(&format!("ROLLBACK TO {name}; RELEASE {name}")) {
                warn!(savepoint = name, error = %rollback, "Failed to roll back savepoint");
            }
            Err(e)
        }
    }
}

// ==========================================
// Reads
// ==========================================

/// Get one event with its full publication history.
pub fn get_event(conn: &Connection, id: &EventId) -> DatabaseResult<Option<DomainEvent>> {
    let sql = format!(
        "SELECT {VIEW_COLUMNS} FROM view_outbox v
         WHERE v.id = ?1
         ORDER BY v.published_at ASC, v.subscription_id ASC"
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt
        .query_map(params![id.as_str()], OutboxRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(assemble_events(rows)?.into_iter().next())
}

/// Load full events for the given ids, returned in the order of `ids`.
fn load_events(conn: &Connection, ids: &[String]) -> DatabaseResult<Vec<DomainEvent>> {
    let mut rows = Vec::new();
    for chunk in ids.chunks(ID_CHUNK_SIZE) {
        let sql = format!(
            "SELECT {VIEW_COLUMNS} FROM view_outbox v
             WHERE v.id IN ({})
             ORDER BY v.occurred_at ASC, v.published_at ASC, v.subscription_id ASC",
            placeholders(chunk.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let chunk_rows = stmt
            .query_map(params_from_iter(chunk.iter()), OutboxRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.extend(chunk_rows);
    }

    Ok(order_by_ids(assemble_events(rows)?, ids))
}

/// Orders `events` like `ids`. Ids with no loaded event are dropped.
fn order_by_ids(events: Vec<DomainEvent>, ids: &[String]) -> Vec<DomainEvent> {
    let mut by_id: HashMap<String, DomainEvent> = events
        .into_iter()
        .map(|event| (event.id.as_str().to_string(), event))
        .collect();

    ids.iter()
        .filter_map(|id| {
            let event = by_id.remove(id);
            if event.is_none() {
                debug!(event_id = %id, "Selected event no longer matches, skipping");
            }
            event
        })
        .collect()
}

/// Events awaiting first-time or requeued delivery.
///
/// Prioritised events come first (lowest value first), then oldest first.
pub fn get_events_to_publish(conn: &Connection, limit: usize) -> DatabaseResult<Vec<DomainEvent>> {
    with_savepoint(conn, "outbox_read", |conn| select_events_to_publish(conn, limit))
}

fn select_events_to_publish(conn: &Connection, limit: usize) -> DatabaseResult<Vec<DomainEvent>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id FROM outbox
         WHERE status IN ('never-published', 'to-republish')
           AND was_quarantined = 0
         ORDER BY priority IS NULL ASC, priority ASC, occurred_at ASC
         LIMIT ?1",
    )?;
    let ids = stmt
        .query_map(params![limit as i64], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    debug!(count = ids.len(), limit, "Selected events to publish");
    load_events(conn, &ids)
}

const RANKED_PUBLICATIONS: &str = "
    WITH ranked_publications AS (
        SELECT
            id,
            event_id,
            published_at,
            RANK() OVER (PARTITION BY event_id ORDER BY published_at DESC) AS publication_rank
        FROM outbox_publications
    )";

/// Non-quarantined events whose latest publication recorded failures.
///
/// Each event carries only its latest publication, with the failures to
/// retry. Older attempts are history and are not replayed.
pub fn get_failed_events(conn: &Connection, limit: usize) -> DatabaseResult<Vec<DomainEvent>> {
    with_savepoint(conn, "outbox_read", |conn| select_failed_events(conn, limit))
}

fn select_failed_events(conn: &Connection, limit: usize) -> DatabaseResult<Vec<DomainEvent>> {
    let sql = format!(
        "{RANKED_PUBLICATIONS}
         SELECT o.id FROM outbox o
         JOIN ranked_publications rp
           ON rp.event_id = o.id AND rp.publication_rank = 1
         WHERE o.was_quarantined = 0
           AND EXISTS (SELECT 1 FROM outbox_failures f WHERE f.publication_id = rp.id)
         ORDER BY o.occurred_at ASC, rp.published_at ASC
         LIMIT ?1"
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let ids = stmt
        .query_map(params![limit as i64], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut rows = Vec::new();
    for chunk in ids.chunks(ID_CHUNK_SIZE) {
        let sql = format!(
            "{RANKED_PUBLICATIONS}
             SELECT {VIEW_COLUMNS} FROM view_outbox v
             JOIN ranked_publications rp
               ON rp.id = v.publication_id AND rp.publication_rank = 1
             WHERE v.id IN ({})
               AND v.subscription_id IS NOT NULL
             ORDER BY v.occurred_at ASC, v.published_at ASC, v.subscription_id ASC",
            placeholders(chunk.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let chunk_rows = stmt
            .query_map(params_from_iter(chunk.iter()), OutboxRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.extend(chunk_rows);
    }

    debug!(count = ids.len(), limit, "Selected failed events");
    Ok(order_by_ids(assemble_events(rows)?, &ids))
}

/// Count events in a given status.
pub fn count_events_by_status(conn: &Connection, status: EventStatus) -> DatabaseResult<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM outbox WHERE status = ?1",
        params![status.as_str()],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

// ==========================================
// Writes
// ==========================================

fn insert_event_row(conn: &Connection, event: &DomainEvent) -> DatabaseResult<()> {
    conn.execute(
        "INSERT INTO outbox (id, topic, payload, occurred_at, was_quarantined, status, priority)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.id.as_str(),
            event.topic.as_str(),
            serde_json::to_string(&event.payload)?,
            format_timestamp(&event.occurred_at),
            event.was_quarantined,
            event.status.as_str(),
            event.priority,
        ],
    )?;
    Ok(())
}

fn insert_failures(
    conn: &Connection,
    publication_id: i64,
    failures: &[&EventFailure],
) -> DatabaseResult<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO outbox_failures (publication_id, subscription_id, error_message)
         VALUES (?1, ?2, ?3)",
    )?;
    for failure in failures {
        stmt.execute(params![
            publication_id,
            failure.subscription_id.as_str(),
            failure.error_message,
        ])?;
    }
    Ok(())
}

fn insert_publication(
    conn: &Connection,
    event_id: &EventId,
    published_at: &str,
    failures: &[&EventFailure],
) -> DatabaseResult<()> {
    let publication_id: Option<i64> = conn
        .query_row(
            "INSERT INTO outbox_publications (event_id, published_at)
             VALUES (?1, ?2)
             ON CONFLICT(event_id, published_at) DO NOTHING
             RETURNING id",
            params![event_id.as_str(), published_at],
            |row| row.get(0),
        )
        .optional()?;

    if failures.is_empty() {
        return Ok(());
    }

    let publication_id = publication_id.ok_or_else(|| DatabaseError::SaveNewPublicationFailed {
        event_id: event_id.to_string(),
        published_at: published_at.to_string(),
    })?;

    insert_failures(conn, publication_id, failures)
}

/// Folds publications sharing a `published_at` into one entry, keeping the
/// first failure per subscription. Order of first appearance is kept.
fn coalesce_publications(publications: &[EventPublication]) -> Vec<(String, Vec<&EventFailure>)> {
    let mut merged: Vec<(String, Vec<&EventFailure>)> = Vec::new();
    let mut slots: HashMap<String, usize> = HashMap::new();

    for publication in publications {
        let key = format_timestamp(&publication.published_at);
        let slot = *slots.entry(key.clone()).or_insert_with(|| {
            merged.push((key, Vec::new()));
            merged.len() - 1
        });

        let failures = &mut merged[slot].1;
        for failure in &publication.failures {
            if !failures.iter().any(|f| f.subscription_id == failure.subscription_id) {
                failures.push(failure);
            }
        }
    }
    merged
}

fn find_publication_id(
    conn: &Connection,
    event_id: &EventId,
    published_at: &str,
) -> DatabaseResult<i64> {
    conn.query_row(
        "SELECT id FROM outbox_publications WHERE event_id = ?1 AND published_at = ?2",
        params![event_id.as_str(), published_at],
        |row| row.get(0),
    )
    .map_err(DatabaseError::from)
}

/// Inserts publications unknown to `stored` and merges unseen failures
/// into publications it already has. Returns the number inserted.
fn append_new_publications(
    conn: &Connection,
    event: &DomainEvent,
    stored: Option<&DomainEvent>,
) -> DatabaseResult<usize> {
    let stored: HashMap<String, &EventPublication> = stored
        .into_iter()
        .flat_map(|p| p.publications.iter())
        .map(|p| (format_timestamp(&p.published_at), p))
        .collect();

    let mut appended = 0usize;
    for (key, failures) in coalesce_publications(&event.publications) {
        match stored.get(&key) {
            None => {
                insert_publication(conn, &event.id, &key, &failures)?;
                appended += 1;
            }
            Some(existing) => {
                let known: HashSet<&str> = existing
                    .failures
                    .iter()
                    .map(|f| f.subscription_id.as_str())
                    .collect();
                let unseen: Vec<&EventFailure> = failures
                    .into_iter()
                    .filter(|f| !known.contains(f.subscription_id.as_str()))
                    .collect();
                if !unseen.is_empty() {
                    let publication_id = find_publication_id(conn, &event.id, &key)?;
                    insert_failures(conn, publication_id, &unseen)?;
                }
            }
        }
    }
    Ok(appended)
}

/// Create or reconcile an event and its publication history.
///
/// A new event is inserted with all of its publications. For an existing
/// event only `was_quarantined` and `status` are updated, publications
/// unseen by the store (matched on `published_at`) are appended, and
/// failures are merged into publications already stored.
///
/// Returns the state stored before this call, if any.
pub fn append_event(conn: &Connection, event: &DomainEvent) -> DatabaseResult<Option<DomainEvent>> {
    let (previous, appended) = with_savepoint(conn, "outbox_append", |conn| {
        let previous = get_event(conn, &event.id)?;
        match &previous {
            None => insert_event_row(conn, event)?,
            Some(_) => {
                conn.execute(
                    "UPDATE outbox SET was_quarantined = ?1, status = ?2 WHERE id = ?3",
                    params![event.was_quarantined, event.status.as_str(), event.id.as_str()],
                )?;
            }
        }

        let appended = append_new_publications(conn, event, previous.as_ref())?;
        Ok((previous, appended))
    })?;

    debug!(
        event_id = %event.id,
        status = %event.status,
        created = previous.is_none(),
        appended_publications = appended,
        "Appended event"
    );
    Ok(previous)
}

/// Insert brand-new events in bulk, without publications.
///
/// Ids already present are skipped. Returns the number of inserted events.
pub fn append_events_batch(conn: &Connection, events: &[DomainEvent]) -> DatabaseResult<usize> {
    if events.is_empty() {
        return Ok(0);
    }

    let inserted = with_savepoint(conn, "outbox_append_batch", |conn| {
        let mut inserted = 0usize;
        for chunk in events.chunks(INSERT_CHUNK_SIZE) {
            let values = vec!["(?, ?, ?, ?, ?, ?, ?)"; chunk.len()].join(", ");
            let sql = format!(
                "INSERT INTO outbox (id, topic, payload, occurred_at, was_quarantined, status, priority)
                 VALUES {values}
                 ON CONFLICT(id) DO NOTHING"
            );

            let mut bound: Vec<Value> = Vec::with_capacity(chunk.len() * 7);
            for event in chunk {
                bound.push(Value::Text(event.id.as_str().to_string()));
                bound.push(Value::Text(event.topic.as_str().to_string()));
                bound.push(Value::Text(serde_json::to_string(&event.payload)?));
                bound.push(Value::Text(format_timestamp(&event.occurred_at)));
                bound.push(Value::Integer(i64::from(event.was_quarantined)));
                bound.push(Value::Text(event.status.as_str().to_string()));
                bound.push(event.priority.map(Value::Integer).unwrap_or(Value::Null));
            }

            inserted += conn.execute(&sql, params_from_iter(bound))?;
        }
        Ok(inserted)
    })?;
    debug!(requested = events.len(), inserted, "Appended event batch");
    Ok(inserted)
}

/// Set `in-process` on the given events.
pub fn mark_events_in_process(conn: &Connection, ids: &[EventId]) -> DatabaseResult<usize> {
    if ids.is_empty() {
        return Ok(0);
    }

    with_savepoint(conn, "outbox_claim", |conn| {
        let mut updated = 0usize;
        for chunk in ids.chunks(ID_CHUNK_SIZE) {
            let sql = format!(
                "UPDATE outbox SET status = 'in-process' WHERE id IN ({})",
                placeholders(chunk.len())
            );
            updated += conn.execute(&sql, params_from_iter(chunk.iter().map(EventId::as_str)))?;
        }
        Ok(updated)
    })
}

/// Move stale, non-quarantined `in-process` events to `to-republish`.
pub fn requeue_stale_in_process_events(
    conn: &Connection,
    before: DateTime<Utc>,
) -> DatabaseResult<usize> {
    let count = conn.execute(
        "UPDATE outbox
         SET status = 'to-republish'
         WHERE status = 'in-process'
           AND was_quarantined = 0
           AND occurred_at < ?1",
        params![format_timestamp(&before)],
    )?;
    Ok(count)
}
