//! Event bus error types.

use domain_events::{SubscriptionId, Topic};
use outbox_database::DatabaseError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EventBusError {
    /// A subscription id may only be registered once per topic
    #[error("Subscription {subscription_id} is already registered for topic {topic}")]
    DuplicateSubscription {
        topic: Topic,
        subscription_id: SubscriptionId,
    },

    /// Recording the publication failed; the attempt is not persisted
    #[error("Failed to persist publication: {0}")]
    Persistence(#[from] DatabaseError),
}

pub type EventBusResult<T> = Result<T, EventBusError>;
