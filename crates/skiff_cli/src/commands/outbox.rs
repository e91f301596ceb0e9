//! Outbox listing.

use super::Context;
use skiff_engine::OutboxLogStore;
use skiff_protocol::SyncLogEntry;

/// Runs the outbox command.
pub async fn run(ctx: &Context, limit: Option<usize>) -> Result<(), Box<dyn std::error::Error>> {
    let outbox = OutboxLogStore::new(ctx.open_store()?);
    let pending = outbox.pending().await?;
    let total = pending.len();
    let shown = limit.unwrap_or(total).min(total);

    for entry in pending.iter().take(shown) {
        println!("{}", format_entry(entry));
    }
    if shown < total {
        println!("... {} more", total - shown);
    }
    println!("{total} pending");

    Ok(())
}

fn format_entry(entry: &SyncLogEntry) -> String {
    let mut line = format!(
        "{}  {:<8} {}/{}  {}",
        entry.created_at.format("%Y-%m-%d %H:%M:%S"),
        entry.operation.as_str(),
        entry.entity_type,
        entry.entity_id,
        if entry.is_binary_payload { "file" } else { "data" },
    );
    if entry.retry_count > 0 {
        line.push_str(&format!("  retries={}", entry.retry_count));
    }
    if let Some(error) = &entry.last_error {
        line.push_str(&format!("  last_error={error:?}"));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use skiff_protocol::SyncOperation;

    #[test]
    fn formats_failed_entry() {
        let at = chrono::Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let mut entry = SyncLogEntry::new("todo", "t1", SyncOperation::Update, "{}", false)
            .with_created_at(at);
        entry.record_failure("HTTP 500", at);

        let line = format_entry(&entry);
        assert!(line.starts_with("2026-03-01 12:00:00  update"));
        assert!(line.contains("todo/t1  data"));
        assert!(line.contains("retries=1"));
        assert!(line.contains("last_error=\"HTTP 500\""));
    }
}
