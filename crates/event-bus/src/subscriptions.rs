//! Topic → subscription registry.

use domain_events::{DomainEvent, SubscriptionId, Topic};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;

use crate::subscriber::{FnSubscriber, Subscriber};
use crate::{EventBusError, EventBusResult};

/// Handlers registered per topic, keyed by subscription id.
///
/// Ids are kept sorted so delivery order is deterministic.
#[derive(Default, Clone)]
pub struct TopicSubscriptions {
    by_topic: HashMap<Topic, BTreeMap<SubscriptionId, Arc<dyn Subscriber>>>,
}

impl TopicSubscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `subscriber` under `subscription_id` for `topic`.
    pub fn subscribe(
        &mut self,
        topic: Topic,
        subscription_id: impl Into<SubscriptionId>,
        subscriber: Arc<dyn Subscriber>,
    ) -> EventBusResult<()> {
        let subscription_id = subscription_id.into();
        let handlers = self.by_topic.entry(topic).or_default();
        if handlers.contains_key(&subscription_id) {
            return Err(EventBusError::DuplicateSubscription {
                topic,
                subscription_id,
            });
        }
        handlers.insert(subscription_id, subscriber);
        Ok(())
    }

    /// Registers an async closure.
    pub fn subscribe_fn<F, Fut>(
        &mut self,
        topic: Topic,
        subscription_id: impl Into<SubscriptionId>,
        f: F,
    ) -> EventBusResult<()>
    where
        F: Fn(DomainEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.subscribe(topic, subscription_id, Arc::new(FnSubscriber::new(f)))
    }

    pub fn subscriptions_for(
        &self,
        topic: Topic,
    ) -> impl Iterator<Item = (&SubscriptionId, &Arc<dyn Subscriber>)> {
        self.by_topic.get(&topic).into_iter().flatten()
    }

    pub fn is_subscribed(&self, topic: Topic, subscription_id: &SubscriptionId) -> bool {
        self.by_topic
            .get(&topic)
            .is_some_and(|handlers| handlers.contains_key(subscription_id))
    }

    /// Total number of subscriptions across all topics.
    pub fn len(&self) -> usize {
        self.by_topic.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for TopicSubscriptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (topic, handlers) in &self.by_topic {
            map.entry(topic, &handlers.keys().collect::<Vec<_>>());
        }
        map.finish()
    }
}
