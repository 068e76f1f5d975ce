//! Subcommand implementations. Output is JSON on the given writer.

use chrono::TimeDelta;
use domain_events::{Clock, EventId, EventStatus, SystemClock};
use outbox_database::{OutboxQueries, OutboxRepository};
use serde::Serialize;
use std::io::Write;
use tracing::info;

pub type CommandResult = Result<(), Box<dyn std::error::Error>>;

fn write_json<W: Write, T: Serialize + ?Sized>(out: &mut W, value: &T) -> CommandResult {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

pub async fn stats<O, W>(outbox: &O, out: &mut W) -> CommandResult
where
    O: OutboxRepository,
    W: Write,
{
    let mut counts = serde_json::Map::new();
    for status in EventStatus::ALL {
        let count = outbox.count_by_status(status).await?;
        counts.insert(status.as_str().to_string(), count.into());
    }
    write_json(out, &counts)
}

pub async fn pending<O, W>(outbox: &O, limit: usize, out: &mut W) -> CommandResult
where
    O: OutboxQueries,
    W: Write,
{
    let events = outbox.events_to_publish(limit).await?;
    write_json(out, &events)
}

pub async fn failed<O, W>(outbox: &O, limit: usize, out: &mut W) -> CommandResult
where
    O: OutboxQueries,
    W: Write,
{
    let events = outbox.failed_events(limit).await?;
    write_json(out, &events)
}

pub async fn requeue_stale<O, W>(outbox: &O, older_than_secs: u64, out: &mut W) -> CommandResult
where
    O: OutboxRepository,
    W: Write,
{
    let window = i64::try_from(older_than_secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .ok_or_else(|| format!("staleness window of {older_than_secs}s is out of range"))?;
    let before = SystemClock.now() - window;

    let requeued = outbox.requeue_stale(before).await?;
    info!(requeued, older_than_secs, "Requeued stale events");
    write_json(out, &serde_json::json!({ "requeued": requeued }))
}

pub async fn show<O, W>(outbox: &O, event_id: &str, out: &mut W) -> CommandResult
where
    O: OutboxRepository,
    W: Write,
{
    let event = outbox
        .get_by_id(&EventId::from_string(event_id))
        .await?
        .ok_or_else(|| format!("event {event_id} not found"))?;
    write_json(out, &event)
}
