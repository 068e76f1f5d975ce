//! Read-side contract: selecting work for the publisher.

use async_trait::async_trait;
use domain_events::DomainEvent;

use crate::DatabaseResult;

#[async_trait]
pub trait OutboxQueries: Send + Sync {
    /// Non-quarantined events that are `never-published` or `to-republish`,
    /// prioritised first and then oldest first, with full history.
    async fn events_to_publish(&self, limit: usize) -> DatabaseResult<Vec<DomainEvent>>;

    /// Non-quarantined events whose latest publication recorded failures,
    /// whatever their status.
    ///
    /// Each event carries only that latest publication, so its failures
    /// name exactly the subscriptions to retry.
    async fn failed_events(&self, limit: usize) -> DatabaseResult<Vec<DomainEvent>>;
}
