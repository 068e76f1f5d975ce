//! Subscriber handlers.

use async_trait::async_trait;
use domain_events::DomainEvent;
use std::future::Future;

/// A handler reacting to events of one topic.
///
/// Handlers may be invoked more than once for the same event and must
/// tolerate replays.
#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn handle(&self, event: &DomainEvent) -> anyhow::Result<()>;
}

/// Adapts an async closure into a `Subscriber`.
///
/// The closure receives its own copy of the event.
pub struct FnSubscriber<F> {
    f: F,
}

impl<F> FnSubscriber<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Subscriber for FnSubscriber<F>
where
    F: Fn(DomainEvent) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle(&self, event: &DomainEvent) -> anyhow::Result<()> {
        (self.f)(event.clone()).await
    }
}
