//! Row shapes read from `view_outbox` and their conversion to domain events.

use chrono::{DateTime, SecondsFormat, Utc};
use domain_events::{
    DomainEvent, EventFailure, EventId, EventPublication, EventStatus, SubscriptionId, Topic,
};
use std::collections::HashMap;

use crate::{DatabaseError, DatabaseResult};

/// Columns selected from `view_outbox`, in `OutboxRow::from_row` order.
pub(crate) const VIEW_COLUMNS: &str = "v.id, v.topic, v.payload, v.occurred_at, v.was_quarantined, v.status, v.priority, v.published_at, v.subscription_id, v.error_message";

/// One joined row: an event, optionally one of its publications and
/// optionally one failure of that publication.
#[derive(Debug, Clone)]
pub(crate) struct OutboxRow {
    pub id: String,
    pub topic: String,
    pub payload: String,
    pub occurred_at: String,
    pub was_quarantined: bool,
    pub status: String,
    pub priority: Option<i64>,
    pub published_at: Option<String>,
    pub subscription_id: Option<String>,
    pub error_message: Option<String>,
}

impl OutboxRow {
    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            topic: row.get(1)?,
            payload: row.get(2)?,
            occurred_at: row.get(3)?,
            was_quarantined: row.get(4)?,
            status: row.get(5)?,
            priority: row.get(6)?,
            published_at: row.get(7)?,
            subscription_id: row.get(8)?,
            error_message: row.get(9)?,
        })
    }
}

/// Formats a timestamp as fixed-width RFC 3339 UTC with microseconds.
///
/// Fixed width keeps lexical order equal to chronological order in SQL.
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> DatabaseResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::InvalidData(format!("timestamp {raw:?}: {e}")))
}

/// Folds joined rows into events.
///
/// Events keep the order in which they first appear. Publications are
/// sorted by `published_at` and failures by `subscription_id`.
pub(crate) fn assemble_events(rows: Vec<OutboxRow>) -> DatabaseResult<Vec<DomainEvent>> {
    let mut events: Vec<DomainEvent> = Vec::new();
    let mut index_by_id: HashMap<String, usize> = HashMap::new();

    for row in rows {
        let index = match index_by_id.get(&row.id) {
            Some(index) => *index,
            None => {
                let event = DomainEvent {
                    id: EventId::from_string(row.id.clone()),
                    topic: row.topic.parse::<Topic>()?,
                    payload: serde_json::from_str(&row.payload)?,
                    occurred_at: parse_timestamp(&row.occurred_at)?,
                    status: row.status.parse::<EventStatus>()?,
                    was_quarantined: row.was_quarantined,
                    priority: row.priority,
                    publications: Vec::new(),
                };
                events.push(event);
                index_by_id.insert(row.id.clone(), events.len() - 1);
                events.len() - 1
            }
        };

        let Some(published_at) = row.published_at.as_deref() else {
            continue;
        };
        let published_at = parse_timestamp(published_at)?;
        let event = &mut events[index];

        let publication = match event
            .publications
            .iter()
            .position(|p| p.published_at == published_at)
        {
            Some(position) => &mut event.publications[position],
            None => {
                event.publications.push(EventPublication {
                    published_at,
                    failures: Vec::new(),
                });
                let last = event.publications.len() - 1;
                &mut event.publications[last]
            }
        };

        if let Some(subscription_id) = row.subscription_id {
            publication.failures.push(EventFailure {
                subscription_id: SubscriptionId::from_string(subscription_id),
                error_message: row.error_message.unwrap_or_default(),
            });
        }
    }

    for event in &mut events {
        event.publications.sort_by_key(|p| p.published_at);
        for publication in &mut event.publications {
            publication
                .failures
                .sort_by(|a, b| a.subscription_id.cmp(&b.subscription_id));
        }
    }

    Ok(events)
}
