//! Configuration for outbox processes.

use domain_events::{QuarantinePolicy, Topic};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{CoreError, CoreResult};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default SQLite database file, relative to the working directory.
pub const DEFAULT_DATABASE_PATH: &str = "outbox.db";

pub const ENV_LOG_LEVEL: &str = "OUTBOX_LOG_LEVEL";
pub const ENV_DATABASE_PATH: &str = "OUTBOX_DATABASE_PATH";

/// Main outbox configuration, stored as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// SQLite database file.
    pub database_path: PathBuf,
    pub crawler: CrawlerSettings,
    /// Topics whose events are always quarantined.
    pub quarantined_topics: Vec<Topic>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            crawler: CrawlerSettings::default(),
            quarantined_topics: Vec::new(),
        }
    }
}

/// Crawler tuning as written in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerSettings {
    pub batch_limit: usize,
    pub poll_interval_ms: u64,
    pub stale_after_secs: u64,
    pub max_concurrent_publications: usize,
}

impl Default for CrawlerSettings {
    fn default() -> Self {
        Self {
            batch_limit: 100,
            poll_interval_ms: 10_000,
            stale_after_secs: 60 * 60,
            max_concurrent_publications: 10,
        }
    }
}

impl CrawlerSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

impl Config {
    /// Load configuration from `path`, falling back to defaults when the
    /// file does not exist. Environment variables are applied last.
    pub fn load(path: &Path) -> CoreResult<Self> {
        let mut config = if path.exists() {
            Self::load_from_file(path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file, creating parent directories.
    pub fn save(&self, path: &Path) -> CoreResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn quarantine_policy(&self) -> QuarantinePolicy {
        QuarantinePolicy::new(self.quarantined_topics.iter().copied())
    }

    /// Reject settings the crawler cannot run with.
    pub fn validate(&self) -> CoreResult<()> {
        if self.crawler.batch_limit == 0 {
            return Err(CoreError::Config("crawler.batch_limit must be positive".to_string()));
        }
        if self.crawler.max_concurrent_publications == 0 {
            return Err(CoreError::Config(
                "crawler.max_concurrent_publications must be positive".to_string(),
            ));
        }
        Ok(())
    }

    fn load_from_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(log_level) = lookup(ENV_LOG_LEVEL).filter(|v| !v.trim().is_empty()) {
            self.log_level = log_level;
        }
        if let Some(path) = lookup(ENV_DATABASE_PATH).filter(|v| !v.trim().is_empty()) {
            self.database_path = PathBuf::from(path);
        }
    }
}
