//! The publisher: delivers events to subscribers and records the outcome.

use chrono::Duration;
use domain_events::{
    Clock, DomainEvent, EventFailure, EventId, EventPublication, EventStatus, QuarantinePolicy,
    SubscriptionId,
};
use futures_util::future::join_all;
use futures_util::stream::{self, StreamExt};
use futures_util::FutureExt;
use outbox_database::OutboxRepository;
use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::subscriptions::TopicSubscriptions;
use crate::EventBusResult;

/// Publishes events to their topic's subscribers.
///
/// Every call appends exactly one `EventPublication` to the event and
/// persists it through the repository before returning.
#[derive(Clone)]
pub struct EventBus {
    repository: Arc<dyn OutboxRepository>,
    subscriptions: Arc<TopicSubscriptions>,
    clock: Arc<dyn Clock>,
    quarantine: QuarantinePolicy,
}

impl EventBus {
    pub fn new(
        repository: Arc<dyn OutboxRepository>,
        subscriptions: TopicSubscriptions,
        clock: Arc<dyn Clock>,
        quarantine: QuarantinePolicy,
    ) -> Self {
        Self {
            repository,
            subscriptions: Arc::new(subscriptions),
            clock,
            quarantine,
        }
    }

    pub fn subscriptions(&self) -> &TopicSubscriptions {
        &self.subscriptions
    }

    /// Delivers `event` and persists the new publication.
    ///
    /// When the latest publication recorded failures only those
    /// subscriptions are invoked again. Subscriber errors and panics are
    /// recorded, never returned. Persistence errors are returned.
    pub async fn publish(&self, mut event: DomainEvent) -> EventBusResult<DomainEvent> {
        let retry: HashSet<SubscriptionId> = event.subscriptions_to_retry().into_iter().collect();

        let targets: Vec<_> = self
            .subscriptions
            .subscriptions_for(event.topic)
            .filter(|(id, _)| retry.is_empty() || retry.contains(*id))
            .collect();

        debug!(
            event_id = %event.id,
            topic = %event.topic,
            targets = targets.len(),
            retrying = !retry.is_empty(),
            "Publishing event"
        );

        let outcomes = join_all(targets.into_iter().map(|(subscription_id, subscriber)| {
            let event = &event;
            async move {
                let outcome = AssertUnwindSafe(subscriber.handle(event))
                    .catch_unwind()
                    .await;
                (subscription_id.clone(), outcome)
            }
        }))
        .await;

        let mut failures = Vec::new();
        for (subscription_id, outcome) in outcomes {
            let error_message = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => format!("{err:#}"),
                Err(panic) => panic_message(panic.as_ref()),
            };
            warn!(
                event_id = %event.id,
                topic = %event.topic,
                subscription_id = %subscription_id,
                error = %error_message,
                "Subscriber failed"
            );
            failures.push(EventFailure::new(subscription_id, error_message));
        }

        let published_at = self.next_published_at(&event);
        let publication = EventPublication::new(published_at, failures);

        event.status = if publication.is_success() {
            EventStatus::Published
        } else {
            EventStatus::FailedButWillRetry
        };
        event.was_quarantined = event.was_quarantined || self.quarantine.is_quarantined(event.topic);
        let failure_count = publication.failures.len();
        event.record_publication(publication);

        self.repository.append(&event).await?;

        info!(
            event_id = %event.id,
            topic = %event.topic,
            status = %event.status,
            failures = failure_count,
            was_quarantined = event.was_quarantined,
            "Recorded publication"
        );
        Ok(event)
    }

    /// Publishes several events with at most `concurrency` in flight.
    ///
    /// Results come back in completion order, one per input event.
    pub async fn publish_batch(
        &self,
        events: Vec<DomainEvent>,
        concurrency: usize,
    ) -> Vec<(EventId, EventBusResult<DomainEvent>)> {
        stream::iter(events)
            .map(|event| async move {
                let id = event.id.clone();
                (id, self.publish(event).await)
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await
    }

    /// Publication timestamps must be unique per event, so a clock that has
    /// not moved past the latest attempt is nudged forward.
    fn next_published_at(&self, event: &DomainEvent) -> chrono::DateTime<chrono::Utc> {
        let now = self.clock.now();
        match event.latest_publication() {
            Some(latest) if latest.published_at >= now => {
                latest.published_at + Duration::microseconds(1)
            }
            _ => now,
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriptions", &self.subscriptions)
            .field("quarantine", &self.quarantine)
            .finish_non_exhaustive()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("subscriber panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("subscriber panicked: {message}")
    } else {
        "subscriber panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use domain_events::{CreateEventOptions, EventFactory, FixedClock, Topic};
    use outbox_database::{AsyncDatabase, DatabaseError, DatabaseResult, SqliteOutbox};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    struct Harness {
        outbox: Arc<SqliteOutbox>,
        clock: Arc<FixedClock>,
        factory: EventFactory,
    }

    impl Harness {
        async fn new(quarantine: QuarantinePolicy) -> Self {
            let db = AsyncDatabase::open_in_memory().await.unwrap();
            let clock = Arc::new(FixedClock::new(start()));
            Self {
                outbox: Arc::new(SqliteOutbox::new(db)),
                factory: EventFactory::new(clock.clone(), quarantine),
                clock,
            }
        }

        fn bus(&self, subscriptions: TopicSubscriptions) -> EventBus {
            EventBus::new(
                self.outbox.clone(),
                subscriptions,
                self.clock.clone(),
                self.factory.quarantine_policy().clone(),
            )
        }

        async fn stored_event(&self, topic: Topic) -> DomainEvent {
            let event = self
                .factory
                .create_event(topic, serde_json::json!({ "a": 1 }), Default::default());
            self.outbox.append(&event).await.unwrap();
            event
        }
    }

    fn counting(subscriptions: &mut TopicSubscriptions, topic: Topic, id: &str) -> Arc<AtomicUsize> {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        subscriptions
            .subscribe_fn(topic, id, move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap();
        calls
    }

    #[tokio::test]
    async fn test_publish_success_marks_published() {
        let harness = Harness::new(QuarantinePolicy::none()).await;
        let mut subscriptions = TopicSubscriptions::new();
        let calls = counting(&mut subscriptions, Topic::AgencyActivated, "notify");
        let bus = harness.bus(subscriptions);

        let event = harness.stored_event(Topic::AgencyActivated).await;
        let published = bus.publish(event.clone()).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(published.status, EventStatus::Published);
        assert_eq!(published.publications.len(), 1);
        assert!(published.publications[0].is_success());
        assert_eq!(published.publications[0].published_at, start());

        let stored = harness.outbox.get_by_id(&event.id).await.unwrap().unwrap();
        assert_eq!(stored, published);
    }

    struct PanickingSubscriber;

    #[async_trait]
    impl crate::Subscriber for PanickingSubscriber {
        async fn handle(&self, _: &DomainEvent) -> anyhow::Result<()> {
            panic!("handler exploded")
        }
    }

    #[tokio::test]
    async fn test_failing_subscriber_does_not_block_others() {
        let harness = Harness::new(QuarantinePolicy::none()).await;
        let mut subscriptions = TopicSubscriptions::new();
        let ok_calls = counting(&mut subscriptions, Topic::AgencyUpdated, "a-ok");
        subscriptions
            .subscribe_fn(Topic::AgencyUpdated, "c-error", |_| async {
                Err(anyhow::anyhow!("boom"))
            })
            .unwrap();
        subscriptions
            .subscribe(Topic::AgencyUpdated, "b-panic", Arc::new(PanickingSubscriber))
            .unwrap();
        let bus = harness.bus(subscriptions);

        let event = harness.stored_event(Topic::AgencyUpdated).await;
        let published = bus.publish(event).await.unwrap();

        assert_eq!(ok_calls.load(Ordering::SeqCst), 1);
        assert_eq!(published.status, EventStatus::FailedButWillRetry);
        let failures = &published.publications[0].failures;
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].subscription_id.as_str(), "b-panic");
        assert!(failures[0].error_message.contains("handler exploded"));
        assert_eq!(failures[1], EventFailure::new("c-error", "boom"));
    }

    #[tokio::test]
    async fn test_retry_targets_only_failed_subscriptions() {
        let harness = Harness::new(QuarantinePolicy::none()).await;
        let mut subscriptions = TopicSubscriptions::new();
        let a_calls = counting(&mut subscriptions, Topic::NotificationAdded, "a");
        let b_calls = counting(&mut subscriptions, Topic::NotificationAdded, "b");
        let bus = harness.bus(subscriptions);

        let event = harness.factory.create_event(
            Topic::NotificationAdded,
            serde_json::json!({}),
            CreateEventOptions {
                status: Some(EventStatus::FailedButWillRetry),
                publications: vec![EventPublication::new(
                    start() - Duration::minutes(5),
                    vec![EventFailure::new("b", "timeout")],
                )],
                ..Default::default()
            },
        );
        harness.outbox.append(&event).await.unwrap();

        let published = bus.publish(event).await.unwrap();

        assert_eq!(a_calls.load(Ordering::SeqCst), 0);
        assert_eq!(b_calls.load(Ordering::SeqCst), 1);
        assert_eq!(published.status, EventStatus::Published);
        assert_eq!(published.publications.len(), 2);
        assert!(published.latest_publication().unwrap().is_success());
    }

    #[tokio::test]
    async fn test_quarantine_flag_is_sticky() {
        let harness = Harness::new(QuarantinePolicy::new([Topic::ApiConsumerSaved])).await;
        let bus = harness.bus(TopicSubscriptions::new());

        let quarantined = harness.stored_event(Topic::ApiConsumerSaved).await;
        assert!(quarantined.was_quarantined);
        let published = bus.publish(quarantined).await.unwrap();
        assert!(published.was_quarantined);

        let mut flagged = harness.stored_event(Topic::AgencyUpdated).await;
        flagged.was_quarantined = true;
        let published = bus.publish(flagged).await.unwrap();
        assert!(published.was_quarantined);
        let stored = harness.outbox.get_by_id(&published.id).await.unwrap().unwrap();
        assert!(stored.was_quarantined);
    }

    #[tokio::test]
    async fn test_published_at_is_unique_with_frozen_clock() {
        let harness = Harness::new(QuarantinePolicy::none()).await;
        let mut subscriptions = TopicSubscriptions::new();
        subscriptions
            .subscribe_fn(Topic::AgencyUpdated, "flaky", |_| async { Err(anyhow::anyhow!("nope")) })
            .unwrap();
        let bus = harness.bus(subscriptions);

        let event = harness.stored_event(Topic::AgencyUpdated).await;
        let first = bus.publish(event).await.unwrap();
        let second = bus.publish(first).await.unwrap();

        assert_eq!(second.publications.len(), 2);
        assert!(second.publications[0].published_at < second.publications[1].published_at);
        let stored = harness.outbox.get_by_id(&second.id).await.unwrap().unwrap();
        assert_eq!(stored.publications.len(), 2);
    }

    struct BrokenRepository;

    #[async_trait]
    impl OutboxRepository for BrokenRepository {
        async fn append(&self, _: &DomainEvent) -> DatabaseResult<Option<DomainEvent>> {
            Err(DatabaseError::Connection("disk unplugged".to_string()))
        }
        async fn append_batch(&self, _: &[DomainEvent]) -> DatabaseResult<usize> {
            Ok(0)
        }
        async fn claim(&self, _: &[EventId]) -> DatabaseResult<usize> {
            Ok(0)
        }
        async fn requeue_stale(&self, _: DateTime<Utc>) -> DatabaseResult<usize> {
            Ok(0)
        }
        async fn count_by_status(&self, _: EventStatus) -> DatabaseResult<usize> {
            Ok(0)
        }
        async fn get_by_id(&self, _: &EventId) -> DatabaseResult<Option<DomainEvent>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_persistence_error_propagates() {
        let clock = Arc::new(FixedClock::new(start()));
        let factory = EventFactory::new(clock.clone(), QuarantinePolicy::none());
        let bus = EventBus::new(
            Arc::new(BrokenRepository),
            TopicSubscriptions::new(),
            clock,
            QuarantinePolicy::none(),
        );

        let event = factory.create_event(Topic::AgencyUpdated, serde_json::json!({}), Default::default());
        let err = bus.publish(event).await.unwrap_err();

        assert!(matches!(err, crate::EventBusError::Persistence(_)));
    }

    #[tokio::test]
    async fn test_publish_batch_returns_one_result_per_event() {
        let harness = Harness::new(QuarantinePolicy::none()).await;
        let mut subscriptions = TopicSubscriptions::new();
        let calls = counting(&mut subscriptions, Topic::AgencyUpdated, "count");
        let bus = harness.bus(subscriptions);

        let mut events = Vec::new();
        for _ in 0..5 {
            events.push(harness.stored_event(Topic::AgencyUpdated).await);
        }

        let results = bus.publish_batch(events, 2).await;

        assert_eq!(results.len(), 5);
        assert!(results.iter().all(|(_, result)| result.is_ok()));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(
            harness.outbox.count_by_status(EventStatus::Published).await.unwrap(),
            5
        );
    }
}
