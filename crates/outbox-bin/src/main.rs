//! Outbox operator CLI: inspect the queue and run crash recovery.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use outbox_config_and_utils::{init_logging_with_format, Config, LogFormat};
use outbox_database::{AsyncDatabase, SqliteOutbox};

/// Outbox operator command-line interface.
#[derive(Parser)]
#[command(name = "outboxctl")]
#[command(about = "Inspect and maintain the transactional outbox")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error). Overrides the config file
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Log output format (compact, json)
    #[arg(long, default_value = "compact", global = true)]
    log_format: LogFormat,

    /// Path to the JSON config file
    #[arg(short, long, default_value = "outbox.json", global = true)]
    config: PathBuf,

    /// SQLite database file. Overrides the config file
    #[arg(short, long, global = true, env = "OUTBOX_DATABASE_PATH")]
    database: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Count events per status
    Stats,
    /// List events waiting for first or requeued delivery
    Pending {
        /// Defaults to crawler.batch_limit
        #[arg(long)]
        limit: Option<usize>,
    },
    /// List events whose latest delivery attempt failed
    Failed {
        /// Defaults to crawler.batch_limit
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Move stuck in-process events back to the queue
    RequeueStale {
        /// Staleness window; defaults to crawler.stale_after_secs
        #[arg(long)]
        older_than_secs: Option<u64>,
    },
    /// Show one event with its publication history
    Show { event_id: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)?;
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    if let Some(path) = cli.database {
        config.database_path = path;
    }

    init_logging_with_format(&config.log_level, cli.log_format);

    let db = AsyncDatabase::open(&config.database_path).await?;
    let outbox = SqliteOutbox::new(db.clone());
    let mut stdout = std::io::stdout().lock();

    match cli.command {
        Commands::Stats => commands::stats(&outbox, &mut stdout).await?,
        Commands::Pending { limit } => {
            let limit = limit.unwrap_or(config.crawler.batch_limit);
            commands::pending(&outbox, limit, &mut stdout).await?
        }
        Commands::Failed { limit } => {
            let limit = limit.unwrap_or(config.crawler.batch_limit);
            commands::failed(&outbox, limit, &mut stdout).await?
        }
        Commands::RequeueStale { older_than_secs } => {
            let secs = older_than_secs.unwrap_or(config.crawler.stale_after_secs);
            commands::requeue_stale(&outbox, secs, &mut stdout).await?
        }
        Commands::Show { event_id } => commands::show(&outbox, &event_id, &mut stdout).await?,
    }

    db.close().await?;
    Ok(())
}
