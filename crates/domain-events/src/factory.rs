//! Event construction for business use cases.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;

use crate::clock::{truncate_to_micros, Clock};
use crate::types::{DomainEvent, EventId, EventPublication, EventStatus, Topic};

/// Topics whose events are always quarantined for human review.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuarantinePolicy {
    topics: HashSet<Topic>,
}

impl QuarantinePolicy {
    pub fn new(topics: impl IntoIterator<Item = Topic>) -> Self {
        Self {
            topics: topics.into_iter().collect(),
        }
    }

    /// A policy that quarantines nothing.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_quarantined(&self, topic: Topic) -> bool {
        self.topics.contains(&topic)
    }

    pub fn topics(&self) -> impl Iterator<Item = &Topic> {
        self.topics.iter()
    }
}

/// Overrides for `EventFactory::create_event`.
///
/// Every field defaults to what a fresh event gets. Overrides exist for
/// deterministic tests and data imports.
#[derive(Debug, Clone, Default)]
pub struct CreateEventOptions {
    pub id: Option<EventId>,
    pub status: Option<EventStatus>,
    pub publications: Vec<EventPublication>,
    pub priority: Option<i64>,
    pub occurred_at: Option<DateTime<Utc>>,
}

/// Builds `DomainEvent`s with fresh ids and timestamps.
#[derive(Clone)]
pub struct EventFactory {
    clock: Arc<dyn Clock>,
    quarantine: QuarantinePolicy,
}

impl EventFactory {
    pub fn new(clock: Arc<dyn Clock>, quarantine: QuarantinePolicy) -> Self {
        Self { clock, quarantine }
    }

    pub fn quarantine_policy(&self) -> &QuarantinePolicy {
        &self.quarantine
    }

    /// Creates an event ready to be appended to the outbox.
    pub fn create_event(
        &self,
        topic: Topic,
        payload: serde_json::Value,
        options: CreateEventOptions,
    ) -> DomainEvent {
        let mut publications = options.publications;
        publications.sort_by_key(|p| p.published_at);

        DomainEvent {
            id: options.id.unwrap_or_default(),
            topic,
            payload,
            occurred_at: options
                .occurred_at
                .map(truncate_to_micros)
                .unwrap_or_else(|| self.clock.now()),
            status: options.status.unwrap_or_default(),
            was_quarantined: self.quarantine.is_quarantined(topic),
            priority: options.priority,
            publications,
        }
    }
}

impl std::fmt::Debug for EventFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventFactory")
            .field("quarantine", &self.quarantine)
            .finish_non_exhaustive()
    }
}
