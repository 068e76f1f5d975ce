//! Domain events recorded in the transactional outbox.
//!
//! This crate provides:
//! - The event model: `DomainEvent`, `EventPublication`, `EventFailure`
//! - The closed set of business `Topic`s and the `EventStatus` lifecycle
//! - `EventFactory`: the single constructor business use cases call
//! - `Clock`: time source, swappable for deterministic tests
//!
//! # Lifecycle
//!
//! ```text
//! never-published ──claim──▶ in-process ──publish──▶ published
//!                                │   ▲                failed-but-will-retry
//!                     stale      │   │ claim
//!                     reclaim    ▼   │
//!                             to-republish
//! ```
//!
//! `was_quarantined` is orthogonal to the status. Once set it is never
//! cleared, and it removes the event from every automatic selection path.

mod clock;
mod error;
mod factory;
mod types;

pub use clock::{truncate_to_micros, Clock, FixedClock, SystemClock};
pub use error::{DomainEventError, DomainEventResult};
pub use factory::{CreateEventOptions, EventFactory, QuarantinePolicy};
pub use types::{
    DomainEvent, EventFailure, EventId, EventPublication, EventStatus, SubscriptionId, Topic,
};
