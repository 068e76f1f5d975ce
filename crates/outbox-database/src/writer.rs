//! Write-side contract of the outbox.
//!
//! Every operation is atomic: it either commits completely or leaves the
//! store untouched.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain_events::{DomainEvent, EventId, EventStatus};

use crate::DatabaseResult;

/// Durable storage for domain events and their delivery history.
#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// Creates the event, or reconciles it with what is already stored.
    ///
    /// For a stored event only `was_quarantined` and `status` change, and
    /// publications not yet stored (by `published_at`) are appended.
    /// Returns the state stored before the call.
    async fn append(&self, event: &DomainEvent) -> DatabaseResult<Option<DomainEvent>>;

    /// Inserts brand-new events without their publications.
    ///
    /// Returns the number of events inserted. Empty input is a no-op.
    async fn append_batch(&self, events: &[DomainEvent]) -> DatabaseResult<usize>;

    /// Marks the given events `in-process` before delivery starts.
    async fn claim(&self, ids: &[EventId]) -> DatabaseResult<usize>;

    /// Moves non-quarantined `in-process` events that occurred before
    /// `before` back to `to-republish`.
    async fn requeue_stale(&self, before: DateTime<Utc>) -> DatabaseResult<usize>;

    async fn count_by_status(&self, status: EventStatus) -> DatabaseResult<usize>;

    /// Reads one event with its full publication history.
    async fn get_by_id(&self, id: &EventId) -> DatabaseResult<Option<DomainEvent>>;
}
