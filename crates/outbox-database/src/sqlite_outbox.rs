//! `OutboxRepository` and `OutboxQueries` backed by `AsyncDatabase`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain_events::{DomainEvent, EventId, EventStatus};
use tracing::debug;

use crate::queries;
use crate::{AsyncDatabase, DatabaseResult, OutboxQueries, OutboxRepository};

/// SQLite outbox. Cheap to clone; clones share one executor thread.
#[derive(Clone)]
pub struct SqliteOutbox {
    db: AsyncDatabase,
}

impl SqliteOutbox {
    pub fn new(db: AsyncDatabase) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &AsyncDatabase {
        &self.db
    }
}

#[async_trait]
impl OutboxRepository for SqliteOutbox {
    async fn append(&self, event: &DomainEvent) -> DatabaseResult<Option<DomainEvent>> {
        let event = event.clone();
        self.db.call(move |conn| queries::append_event(conn, &event)).await
    }

    async fn append_batch(&self, events: &[DomainEvent]) -> DatabaseResult<usize> {
        if events.is_empty() {
            return Ok(0);
        }
        let events = events.to_vec();
        self.db
            .call(move |conn| queries::append_events_batch(conn, &events))
            .await
    }

    async fn claim(&self, ids: &[EventId]) -> DatabaseResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let ids = ids.to_vec();
        let claimed = self
            .db
            .call(move |conn| queries::mark_events_in_process(conn, &ids))
            .await?;
        debug!(claimed, "Claimed events");
        Ok(claimed)
    }

    async fn requeue_stale(&self, before: DateTime<Utc>) -> DatabaseResult<usize> {
        self.db
            .call(move |conn| queries::requeue_stale_in_process_events(conn, before))
            .await
    }

    async fn count_by_status(&self, status: EventStatus) -> DatabaseResult<usize> {
        self.db
            .call(move |conn| queries::count_events_by_status(conn, status))
            .await
    }

    async fn get_by_id(&self, id: &EventId) -> DatabaseResult<Option<DomainEvent>> {
        let id = id.clone();
        self.db.call(move |conn| queries::get_event(conn, &id)).await
    }
}

#[async_trait]
impl OutboxQueries for SqliteOutbox {
    async fn events_to_publish(&self, limit: usize) -> DatabaseResult<Vec<DomainEvent>> {
        self.db
            .call(move |conn| queries::get_events_to_publish(conn, limit))
            .await
    }

    async fn failed_events(&self, limit: usize) -> DatabaseResult<Vec<DomainEvent>> {
        self.db
            .call(move |conn| queries::get_failed_events(conn, limit))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use domain_events::{
        Clock, CreateEventOptions, EventFactory, EventFailure, EventPublication, FixedClock,
        QuarantinePolicy, SubscriptionId, Topic,
    };
    use std::sync::Arc;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
    }

    async fn setup() -> (SqliteOutbox, EventFactory, Arc<FixedClock>) {
        let db = AsyncDatabase::open_in_memory().await.unwrap();
        let clock = Arc::new(FixedClock::new(start()));
        let factory = EventFactory::new(clock.clone(), QuarantinePolicy::none());
        (SqliteOutbox::new(db), factory, clock)
    }

    #[tokio::test]
    async fn test_append_batch_then_select() {
        let (outbox, factory, clock) = setup().await;
        let first = factory.create_event(Topic::AgencyActivated, serde_json::json!({ "a": 1 }), Default::default());
        clock.advance(Duration::seconds(1));
        let second = factory.create_event(Topic::AgencyRejected, serde_json::json!({ "a": 2 }), Default::default());

        assert_eq!(outbox.append_batch(&[]).await.unwrap(), 0);
        assert_eq!(outbox.append_batch(&[second.clone(), first.clone()]).await.unwrap(), 2);

        let pending = outbox.events_to_publish(10).await.unwrap();
        assert_eq!(pending, vec![first, second]);
    }

    #[tokio::test]
    async fn test_claim_removes_events_from_queue() {
        let (outbox, factory, _) = setup().await;
        let event = factory.create_event(Topic::AgencyUpdated, serde_json::json!({}), Default::default());
        outbox.append(&event).await.unwrap();

        assert_eq!(outbox.claim(&[]).await.unwrap(), 0);
        assert_eq!(outbox.claim(&[event.id.clone()]).await.unwrap(), 1);

        assert!(outbox.events_to_publish(10).await.unwrap().is_empty());
        assert_eq!(outbox.count_by_status(EventStatus::InProcess).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_requeue_stale_returns_event_to_queue() {
        let (outbox, factory, clock) = setup().await;
        let event = factory.create_event(Topic::AgencyUpdated, serde_json::json!({}), Default::default());
        outbox.append(&event).await.unwrap();
        outbox.claim(&[event.id.clone()]).await.unwrap();

        clock.advance(Duration::hours(2));
        let requeued = outbox
            .requeue_stale(clock.now() - Duration::hours(1))
            .await
            .unwrap();

        assert_eq!(requeued, 1);
        let stored = outbox.get_by_id(&event.id).await.unwrap().unwrap();
        assert_eq!(stored.status, EventStatus::ToRepublish);
        assert_eq!(outbox.events_to_publish(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_events_through_trait() {
        let (outbox, factory, clock) = setup().await;
        let event = factory.create_event(
            Topic::NotificationAdded,
            serde_json::json!({}),
            CreateEventOptions {
                status: Some(EventStatus::FailedButWillRetry),
                publications: vec![EventPublication::new(
                    clock.now(),
                    vec![EventFailure::new("sendEmail", "smtp down")],
                )],
                ..Default::default()
            },
        );
        outbox.append(&event).await.unwrap();

        let failed = outbox.failed_events(10).await.unwrap();
        assert_eq!(failed, vec![event.clone()]);
        assert_eq!(failed[0].subscriptions_to_retry(), vec![SubscriptionId::from("sendEmail")]);
    }

    #[tokio::test]
    async fn test_get_by_id_missing() {
        let (outbox, _, _) = setup().await;
        assert!(outbox.get_by_id(&EventId::new()).await.unwrap().is_none());
    }
}
