//! Logging initialization.
//!
//! `RUST_LOG` takes precedence over the configured level.

use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Output format for log lines written to stderr.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable single-line output.
    #[default]
    Compact,
    /// One JSON object per line.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "compact" | "text" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Initialize compact logging at `level`. Same return value as
/// [`init_logging_with_format`].
///
/// ```ignore
/// init_logging("info");
/// tracing::info!("Crawler started");
/// ```
pub fn init_logging(level: &str) -> bool {
    init_logging_with_format(level, LogFormat::Compact)
}

/// Initialize logging with an explicit format.
///
/// Returns `false` when a global subscriber was already installed, in
/// which case the existing one is kept.
pub fn init_logging_with_format(level: &str, format: LogFormat) -> bool {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_writer(std::io::stderr)
        .with_target(true);

    let installed = match format {
        LogFormat::Compact => builder.compact().finish().try_init(),
        LogFormat::Json => builder.json().finish().try_init(),
    };
    installed.is_ok()
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("Compact".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_second_init_is_ignored() {
        init_logging_with_format("debug", LogFormat::Json);
        assert!(!init_logging_with_format("info", LogFormat::Compact));
        assert!(!init_logging("warn"));
    }
}
