//! Core types for domain events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::DomainEventError;

/// Unique identifier for a domain event (UUID string).
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub String);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Creates an event ID from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Returns the event ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for EventId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EventId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of one subscriber registered on a topic.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub String);

impl SubscriptionId {
    /// Creates a subscription ID from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Returns the subscription ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SubscriptionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SubscriptionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Business occurrence kinds. Determines which subscriptions receive an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    // Conventions
    ConventionSubmittedByBeneficiary,
    ConventionSubmittedAfterModification,
    ConventionPartiallySigned,
    ConventionFullySigned,
    ConventionAcceptedByCounsellor,
    ConventionAcceptedByValidator,
    ConventionRejected,
    ConventionCancelled,
    ConventionDeprecated,
    ConventionRequiresModification,
    ConventionReminderRequired,
    // Agencies
    NewAgencyAdded,
    AgencyActivated,
    AgencyRejected,
    AgencyUpdated,
    // Establishments
    FormEstablishmentAdded,
    FormEstablishmentEdited,
    ContactRequestedByBeneficiary,
    EstablishmentDeleted,
    // Platform
    NotificationAdded,
    ApiConsumerSaved,
    UserAuthenticatedSuccessfully,
}

impl Topic {
    /// All topics, in declaration order.
    pub const ALL: [Topic; 22] = [
        Self::ConventionSubmittedByBeneficiary,
        Self::ConventionSubmittedAfterModification,
        Self::ConventionPartiallySigned,
        Self::ConventionFullySigned,
        Self::ConventionAcceptedByCounsellor,
        Self::ConventionAcceptedByValidator,
        Self::ConventionRejected,
        Self::ConventionCancelled,
        Self::ConventionDeprecated,
        Self::ConventionRequiresModification,
        Self::ConventionReminderRequired,
        Self::NewAgencyAdded,
        Self::AgencyActivated,
        Self::AgencyRejected,
        Self::AgencyUpdated,
        Self::FormEstablishmentAdded,
        Self::FormEstablishmentEdited,
        Self::ContactRequestedByBeneficiary,
        Self::EstablishmentDeleted,
        Self::NotificationAdded,
        Self::ApiConsumerSaved,
        Self::UserAuthenticatedSuccessfully,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConventionSubmittedByBeneficiary => "ConventionSubmittedByBeneficiary",
            Self::ConventionSubmittedAfterModification => "ConventionSubmittedAfterModification",
            Self::ConventionPartiallySigned => "ConventionPartiallySigned",
            Self::ConventionFullySigned => "ConventionFullySigned",
            Self::ConventionAcceptedByCounsellor => "ConventionAcceptedByCounsellor",
            Self::ConventionAcceptedByValidator => "ConventionAcceptedByValidator",
            Self::ConventionRejected => "ConventionRejected",
            Self::ConventionCancelled => "ConventionCancelled",
            Self::ConventionDeprecated => "ConventionDeprecated",
            Self::ConventionRequiresModification => "ConventionRequiresModification",
            Self::ConventionReminderRequired => "ConventionReminderRequired",
            Self::NewAgencyAdded => "NewAgencyAdded",
            Self::AgencyActivated => "AgencyActivated",
            Self::AgencyRejected => "AgencyRejected",
            Self::AgencyUpdated => "AgencyUpdated",
            Self::FormEstablishmentAdded => "FormEstablishmentAdded",
            Self::FormEstablishmentEdited => "FormEstablishmentEdited",
            Self::ContactRequestedByBeneficiary => "ContactRequestedByBeneficiary",
            Self::EstablishmentDeleted => "EstablishmentDeleted",
            Self::NotificationAdded => "NotificationAdded",
            Self::ApiConsumerSaved => "ApiConsumerSaved",
            Self::UserAuthenticatedSuccessfully => "UserAuthenticatedSuccessfully",
        }
    }
}

impl FromStr for Topic {
    type Err = DomainEventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|topic| topic.as_str() == s)
            .ok_or_else(|| DomainEventError::UnknownTopic(s.to_string()))
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Publication lifecycle state of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventStatus {
    NeverPublished,
    InProcess,
    Published,
    FailedButWillRetry,
    ToRepublish,
}

impl Default for EventStatus {
    fn default() -> Self {
        Self::NeverPublished
    }
}

impl EventStatus {
    pub const ALL: [EventStatus; 5] = [
        Self::NeverPublished,
        Self::InProcess,
        Self::Published,
        Self::FailedButWillRetry,
        Self::ToRepublish,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NeverPublished => "never-published",
            Self::InProcess => "in-process",
            Self::Published => "published",
            Self::FailedButWillRetry => "failed-but-will-retry",
            Self::ToRepublish => "to-republish",
        }
    }
}

impl FromStr for EventStatus {
    type Err = DomainEventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "never-published" => Ok(Self::NeverPublished),
            "in-process" => Ok(Self::InProcess),
            "published" => Ok(Self::Published),
            "failed-but-will-retry" => Ok(Self::FailedButWillRetry),
            "to-republish" => Ok(Self::ToRepublish),
            other => Err(DomainEventError::UnknownStatus(other.to_string())),
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One subscriber that failed during a publication attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFailure {
    pub subscription_id: SubscriptionId,
    pub error_message: String,
}

impl EventFailure {
    pub fn new(subscription_id: impl Into<SubscriptionId>, error_message: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            error_message: error_message.into(),
        }
    }
}

/// One delivery attempt of an event across all of its target subscribers.
///
/// An empty `failures` list means every targeted subscriber succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPublication {
    pub published_at: DateTime<Utc>,
    pub failures: Vec<EventFailure>,
}

impl EventPublication {
    pub fn new(published_at: DateTime<Utc>, mut failures: Vec<EventFailure>) -> Self {
        failures.sort_by(|a, b| a.subscription_id.cmp(&b.subscription_id));
        failures.dedup_by(|a, b| a.subscription_id == b.subscription_id);
        Self {
            published_at,
            failures,
        }
    }

    /// Returns true if no subscriber failed during this attempt.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// A business-significant occurrence recorded in the outbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainEvent {
    pub id: EventId,
    pub topic: Topic,
    /// Topic-specific payload, never interpreted by the outbox.
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
    pub status: EventStatus,
    pub was_quarantined: bool,
    pub priority: Option<i64>,
    /// Delivery attempts ordered by `published_at` ascending.
    pub publications: Vec<EventPublication>,
}

impl DomainEvent {
    /// Most recent publication attempt, if any.
    pub fn latest_publication(&self) -> Option<&EventPublication> {
        self.publications.iter().max_by_key(|p| p.published_at)
    }

    /// Subscriptions that failed during the latest attempt.
    ///
    /// Empty when the event was never attempted or the latest attempt
    /// fully succeeded.
    pub fn subscriptions_to_retry(&self) -> Vec<SubscriptionId> {
        self.latest_publication()
            .map(|p| p.failures.iter().map(|f| f.subscription_id.clone()).collect())
            .unwrap_or_default()
    }

    /// Appends a publication attempt, keeping `publications` ordered.
    pub fn record_publication(&mut self, publication: EventPublication) {
        let index = self
            .publications
            .partition_point(|p| p.published_at <= publication.published_at);
        self.publications.insert(index, publication);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn event_with(publications: Vec<EventPublication>) -> DomainEvent {
        DomainEvent {
            id: EventId::from_string("event-1"),
            topic: Topic::ConventionSubmittedByBeneficiary,
            payload: serde_json::json!({ "a": 1 }),
            occurred_at: at(0),
            status: EventStatus::NeverPublished,
            was_quarantined: false,
            priority: None,
            publications,
        }
    }

    #[test]
    fn test_topic_round_trips_through_wire_name() {
        for topic in Topic::ALL {
            assert_eq!(topic.as_str().parse::<Topic>().unwrap(), topic);
        }
    }

    #[test]
    fn test_unknown_topic_is_rejected() {
        assert_eq!(
            "NotATopic".parse::<Topic>(),
            Err(DomainEventError::UnknownTopic("NotATopic".to_string()))
        );
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(EventStatus::NeverPublished.as_str(), "never-published");
        assert_eq!(EventStatus::FailedButWillRetry.as_str(), "failed-but-will-retry");
        for status in EventStatus::ALL {
            assert_eq!(status.as_str().parse::<EventStatus>().unwrap(), status);
        }
        assert!("quarantined".parse::<EventStatus>().is_err());
    }

    #[test]
    fn test_status_serde_matches_wire_name() {
        let json = serde_json::to_string(&EventStatus::ToRepublish).unwrap();
        assert_eq!(json, "\"to-republish\"");
    }

    #[test]
    fn test_publication_failures_sorted_and_unique() {
        let publication = EventPublication::new(
            at(1),
            vec![
                EventFailure::new("subB", "boom"),
                EventFailure::new("subA", "bang"),
                EventFailure::new("subB", "again"),
            ],
        );
        let ids: Vec<_> = publication
            .failures
            .iter()
            .map(|f| f.subscription_id.as_str())
            .collect();
        assert_eq!(ids, vec!["subA", "subB"]);
        assert!(!publication.is_success());
    }

    #[test]
    fn test_subscriptions_to_retry_uses_latest_attempt() {
        let event = event_with(vec![
            EventPublication::new(
                at(1),
                vec![EventFailure::new("A", "a"), EventFailure::new("B", "b")],
            ),
            EventPublication::new(at(2), vec![EventFailure::new("B", "b")]),
        ]);
        assert_eq!(event.subscriptions_to_retry(), vec![SubscriptionId::from("B")]);
    }

    #[test]
    fn test_subscriptions_to_retry_empty_without_attempts() {
        let event = event_with(vec![]);
        assert!(event.latest_publication().is_none());
        assert!(event.subscriptions_to_retry().is_empty());
    }

    #[test]
    fn test_record_publication_keeps_order() {
        let mut event = event_with(vec![EventPublication::new(at(5), vec![])]);
        event.record_publication(EventPublication::new(at(3), vec![]));
        event.record_publication(EventPublication::new(at(9), vec![]));
        let times: Vec<_> = event.publications.iter().map(|p| p.published_at).collect();
        assert_eq!(times, vec![at(3), at(5), at(9)]);
    }
}
