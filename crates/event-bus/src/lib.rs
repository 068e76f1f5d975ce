//! Subscriber registry and publisher for outbox events.
//!
//! Subscribers are registered per topic under a stable subscription id.
//! `EventBus::publish` invokes them, records one `EventPublication` with a
//! failure per misbehaving subscriber and persists the result.

mod bus;
mod error;
mod subscriber;
mod subscriptions;

pub use bus::EventBus;
pub use error::{EventBusError, EventBusResult};
pub use subscriber::{FnSubscriber, Subscriber};
pub use subscriptions::TopicSubscriptions;
