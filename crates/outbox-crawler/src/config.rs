use outbox_config_and_utils::CrawlerSettings;
use std::time::Duration;

/// Crawler tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlerConfig {
    /// Upper bound for each of the two selections in a cycle.
    pub batch_limit: usize,
    /// Pause between healthy cycles.
    pub poll_interval: Duration,
    /// How long an event may stay `in-process` before it is reclaimed.
    pub stale_after: Duration,
    /// Events published concurrently within one cycle.
    pub max_concurrent_publications: usize,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            batch_limit: 100,
            poll_interval: Duration::from_secs(10),
            stale_after: Duration::from_secs(60 * 60),
            max_concurrent_publications: 10,
        }
    }
}

impl From<&CrawlerSettings> for CrawlerConfig {
    fn from(settings: &CrawlerSettings) -> Self {
        Self {
            batch_limit: settings.batch_limit,
            poll_interval: settings.poll_interval(),
            stale_after: settings.stale_after(),
            max_concurrent_publications: settings.max_concurrent_publications,
        }
    }
}
