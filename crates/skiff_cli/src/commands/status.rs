//! Status command implementation.

use super::{format_size, Context};
use chrono::{DateTime, Utc};
use serde::Serialize;
use skiff_engine::{CheckpointStore, DownloadMode, ErrorStore, OutboxLogStore, SyncConfig, SyncResult};
use skiff_storage::KeyValueStore;
use std::sync::Arc;

/// Store summary.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    /// Server base URL.
    pub base_url: String,
    /// Pending outbox entries.
    pub pending: usize,
    /// Pending entries carrying a binary payload.
    pub pending_binary: usize,
    /// Total payload size of pending entries.
    pub pending_bytes: usize,
    /// Creation time of the oldest pending entry.
    pub oldest_pending: Option<DateTime<Utc>>,
    /// Highest retry count among pending entries.
    pub max_retry_count: u32,
    /// Recorded errors.
    pub errors: usize,
    /// Recorded errors not yet reported.
    pub unsent_errors: usize,
    /// Last successful download checkpoint.
    pub checkpoint: Option<DateTime<Utc>>,
    /// Whether the next download would be incremental.
    pub next_download_incremental: bool,
}

/// Collects the summary from `store`.
pub async fn collect(
    store: Arc<dyn KeyValueStore>,
    config: &SyncConfig,
    now: DateTime<Utc>,
) -> SyncResult<StatusReport> {
    let pending = OutboxLogStore::new(store.clone()).pending().await?;
    let errors = ErrorStore::new(store.clone());
    let checkpoint = CheckpointStore::new(store).get().await?;
    let mode = DownloadMode::decide(
        config.use_incremental_sync,
        config.max_incremental_sync_interval,
        checkpoint,
        now,
    );

    Ok(StatusReport {
        base_url: config.base_url.clone(),
        pending: pending.len(),
        pending_binary: pending.iter().filter(|e| e.is_binary_payload).count(),
        pending_bytes: pending.iter().map(|e| e.payload.len()).sum(),
        oldest_pending: pending.first().map(|e| e.created_at),
        max_retry_count: pending.iter().map(|e| e.retry_count).max().unwrap_or(0),
        errors: errors.count().await?,
        unsent_errors: errors.unsent().await?.len(),
        checkpoint,
        next_download_incremental: mode.is_incremental(),
    })
}

/// Runs the status command.
pub async fn run(ctx: &Context, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = ctx.open_store()?;
    let report = collect(store, &ctx.config, Utc::now()).await?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => print_text_output(ctx, &report),
    }

    Ok(())
}

fn print_text_output(ctx: &Context, report: &StatusReport) {
    println!("Skiff Sync Status");
    println!("=================");
    println!();
    println!("Data dir: {}", ctx.data_dir.display());
    println!("Server:   {}", report.base_url);
    println!();
    println!("Outbox:");
    println!("  Pending entries: {}", report.pending);
    println!("  Binary entries:  {}", report.pending_binary);
    println!("  Payload size:    {}", format_size(report.pending_bytes));
    if let Some(oldest) = report.oldest_pending {
        println!("  Oldest entry:    {}", oldest.to_rfc3339());
    }
    println!("  Max retries:     {}", report.max_retry_count);
    println!();
    println!("Errors:");
    println!("  Recorded: {}", report.errors);
    println!("  Unsent:   {}", report.unsent_errors);
    println!();
    println!("Download:");
    match report.checkpoint {
        Some(at) => println!("  Checkpoint: {}", at.to_rfc3339()),
        None => println!("  Checkpoint: none"),
    }
    println!(
        "  Next run:   {}",
        if report.next_download_incremental {
            "incremental"
        } else {
            "full"
        }
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use skiff_protocol::{SyncErrorRecord, SyncOperation};
    use skiff_storage::InMemoryStore;

    #[tokio::test]
    async fn summarizes_store() {
        let store = Arc::new(InMemoryStore::new());
        let outbox = OutboxLogStore::new(store.clone());
        outbox
            .enqueue("todo", "t1", SyncOperation::Create, "{\"a\":1}", false)
            .await
            .unwrap();
        outbox
            .enqueue("photo", "p1", SyncOperation::Create, "AAAA", true)
            .await
            .unwrap();
        ErrorStore::new(store.clone())
            .record(&SyncErrorRecord::new("boom"))
            .await
            .unwrap();

        let config = SyncConfig::default();
        let report = collect(store, &config, Utc::now()).await.unwrap();
        assert_eq!(report.pending, 2);
        assert_eq!(report.pending_binary, 1);
        assert_eq!(report.pending_bytes, 11);
        assert_eq!(report.unsent_errors, 1);
        assert!(report.checkpoint.is_none());
        assert!(!report.next_download_incremental);
    }

    #[tokio::test]
    async fn recent_checkpoint_means_incremental() {
        let store = Arc::new(InMemoryStore::new());
        let now = Utc::now();
        CheckpointStore::new(store.clone())
            .set(now - chrono::Duration::hours(1))
            .await
            .unwrap();

        let report = collect(store, &SyncConfig::default(), now).await.unwrap();
        assert!(report.checkpoint.is_some());
        assert!(report.next_download_incremental);
    }
}
