//! Background driver for the outbox.
//!
//! Each cycle reclaims stale `in-process` events, selects events to
//! publish and events to retry, claims them and hands them to the
//! `EventBus`. Claiming is a soft lock: concurrent crawlers may deliver
//! the same event twice, so subscribers must tolerate replays.

mod config;
mod crawler;
mod error;

pub use config::CrawlerConfig;
pub use crawler::{CycleReport, OutboxCrawler};
pub use error::{CrawlerError, CrawlerResult};
