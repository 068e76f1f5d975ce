//! Claim-then-publish cycles over the outbox.

use chrono::TimeDelta;
use domain_events::{Clock, DomainEvent, EventId, EventStatus, SystemClock};
use event_bus::{EventBus, TopicSubscriptions};
use outbox_config_and_utils::Config;
use outbox_database::{OutboxQueries, OutboxRepository, SqliteOutbox};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

use crate::{CrawlerConfig, CrawlerError, CrawlerResult};

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(60);
const BACKOFF_CAP_EXPONENT: u32 = 6;

/// Outcome of one crawler cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Stale `in-process` events moved back to `to-republish`.
    pub requeued: usize,
    /// Events claimed and handed to the publisher.
    pub selected: usize,
    /// Events whose new publication had no failures.
    pub published: usize,
    /// Events whose new publication recorded failures.
    pub failed: usize,
    /// Events whose publication could not be persisted.
    pub errored: usize,
}

/// Drives the outbox: reclaim, select, claim, publish.
#[derive(Clone)]
pub struct OutboxCrawler {
    repository: Arc<dyn OutboxRepository>,
    queries: Arc<dyn OutboxQueries>,
    bus: EventBus,
    clock: Arc<dyn Clock>,
    config: CrawlerConfig,
}

impl OutboxCrawler {
    pub fn new(
        repository: Arc<dyn OutboxRepository>,
        queries: Arc<dyn OutboxQueries>,
        bus: EventBus,
        clock: Arc<dyn Clock>,
        config: CrawlerConfig,
    ) -> Self {
        Self {
            repository,
            queries,
            bus,
            clock,
            config,
        }
    }

    /// Crawler over a SQLite outbox, tuned and quarantined by `config`,
    /// running on the system clock.
    pub fn from_config(
        outbox: Arc<SqliteOutbox>,
        subscriptions: TopicSubscriptions,
        config: &Config,
    ) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let bus = EventBus::new(
            outbox.clone(),
            subscriptions,
            clock.clone(),
            config.quarantine_policy(),
        );
        Self::new(
            outbox.clone(),
            outbox,
            bus,
            clock,
            CrawlerConfig::from(&config.crawler),
        )
    }

    pub fn config(&self) -> &CrawlerConfig {
        &self.config
    }

    /// Runs one cycle.
    ///
    /// Events are claimed before any subscriber runs. Store errors while
    /// reclaiming, selecting or claiming abort the cycle; a failure to
    /// persist one event's publication is logged and counted instead.
    pub async fn run_cycle(&self) -> CrawlerResult<CycleReport> {
        let stale_after = TimeDelta::from_std(self.config.stale_after)
            .map_err(|e| CrawlerError::InvalidConfig(format!("stale_after: {e}")))?;
        let requeued = self
            .repository
            .requeue_stale(self.clock.now() - stale_after)
            .await?;
        if requeued > 0 {
            info!(requeued, "Requeued stale in-process events");
        }

        let batch = self.select_batch().await?;
        let mut report = CycleReport {
            requeued,
            selected: batch.len(),
            ..Default::default()
        };
        if batch.is_empty() {
            debug!("No outbox events to publish");
            return Ok(report);
        }

        let ids: Vec<EventId> = batch.iter().map(|event| event.id.clone()).collect();
        self.repository.claim(&ids).await?;

        let results = self
            .bus
            .publish_batch(batch, self.config.max_concurrent_publications)
            .await;

        for (event_id, result) in results {
            match result {
                Ok(event) if event.status == EventStatus::Published => report.published += 1,
                Ok(_) => report.failed += 1,
                Err(e) => {
                    report.errored += 1;
                    error!(event_id = %event_id, error = %e, "Failed to record publication");
                }
            }
        }

        info!(
            requeued = report.requeued,
            selected = report.selected,
            published = report.published,
            failed = report.failed,
            errored = report.errored,
            "Outbox cycle complete"
        );
        Ok(report)
    }

    /// Events to publish followed by failed events, without duplicates.
    async fn select_batch(&self) -> CrawlerResult<Vec<DomainEvent>> {
        let limit = self.config.batch_limit;
        let to_publish = self.queries.events_to_publish(limit).await?;
        let failed = self.queries.failed_events(limit).await?;

        let mut seen = HashSet::new();
        Ok(to_publish
            .into_iter()
            .chain(failed)
            .filter(|event| seen.insert(event.id.clone()))
            .collect())
    }

    /// Runs cycles in the background until `shutdown` fires.
    ///
    /// Failed cycles are retried with exponential back-off.
    pub fn spawn(self, mut shutdown: oneshot::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut backoff = CrawlerBackoff::default();
            let mut interval = Duration::ZERO;

            loop {
                tokio::select! {
                    _ = &mut shutdown => {
                        info!("Outbox crawler received shutdown signal");
                        break;
                    }
                    _ = sleep(interval) => {
                        match self.run_cycle().await {
                            Ok(_) => {
                                if backoff.failures > 0 {
                                    info!(
                                        previous_failures = backoff.failures,
                                        "Outbox crawler recovered"
                                    );
                                }
                                backoff.reset();
                                interval = self.config.poll_interval;
                            }
                            Err(e) => {
                                interval = backoff.next_delay();
                                warn!(
                                    error = %e,
                                    failure_count = backoff.failures,
                                    next_attempt_ms = interval.as_millis() as u64,
                                    "Outbox cycle failed; backing off"
                                );
                            }
                        }
                    }
                }
            }

            debug!("Outbox crawler task stopped");
        })
    }
}

impl std::fmt::Debug for OutboxCrawler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboxCrawler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct CrawlerBackoff {
    failures: u32,
}

impl CrawlerBackoff {
    fn reset(&mut self) {
        self.failures = 0;
    }

    fn next_delay(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let shift = self.failures.min(BACKOFF_CAP_EXPONENT);
        let delay = BACKOFF_BASE.saturating_mul(1u32 << shift);
        delay.min(BACKOFF_MAX)
    }
}
