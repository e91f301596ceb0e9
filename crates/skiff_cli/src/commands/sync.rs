//! Commands that drive the engine: sync, report and reset.

use super::Context;
use skiff_engine::{CycleOutcome, CycleReport};

/// Runs one cycle and prints its outcome.
pub async fn run(ctx: &Context, entities: &[String], force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let engine = ctx.engine(entities)?;
    let outcome = if force {
        engine.force_sync().await
    } else {
        engine.start_sync().await
    };

    match outcome {
        CycleOutcome::Completed(report) => {
            println!("{}", summarize(&report));
            Ok(())
        }
        CycleOutcome::Skipped(reason) => {
            println!("Sync skipped: {reason:?}");
            Ok(())
        }
        CycleOutcome::Failed(err) => {
            let pending = engine.pending_count().await.unwrap_or_default();
            if let Some(message) = engine.snapshot().message {
                eprintln!("{message}");
            }
            eprintln!("{pending} entries still pending");
            Err(err.into())
        }
    }
}

/// Sends unsent error records.
pub async fn report(ctx: &Context) -> Result<(), Box<dyn std::error::Error>> {
    let engine = ctx.engine(&[])?;
    let summary = engine.report_errors().await?;
    println!(
        "Reported {} errors in {} batches ({} left unsent)",
        summary.sent, summary.batches, summary.failed
    );
    Ok(())
}

/// Clears the outbox and counters, and optionally the checkpoint.
pub async fn reset(ctx: &Context, checkpoint: bool) -> Result<(), Box<dyn std::error::Error>> {
    let engine = ctx.engine(&[])?;
    let removed = engine.reset_sync_state().await?;
    println!("Removed {removed} outbox entries");
    if checkpoint {
        engine.checkpoint().clear().await?;
        println!("Checkpoint cleared; next download is a full one");
    }
    Ok(())
}

fn summarize(report: &CycleReport) -> String {
    let mode = if report.download.mode.is_incremental() {
        "incremental"
    } else {
        "full"
    };
    format!(
        "Uploaded {} entries ({} file batches, {} data batches); downloaded {} items ({mode})",
        report.upload.uploaded,
        report.upload.file_batches,
        report.upload.data_batches,
        report.download.items_downloaded,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use skiff_engine::{DownloadMode, DownloadReport, UploadReport};

    #[test]
    fn summary_line() {
        let report = CycleReport {
            upload: UploadReport {
                file_batches: 1,
                data_batches: 2,
                uploaded: 12,
            },
            download: DownloadReport {
                mode: DownloadMode::Incremental { since: Utc::now() },
                items_downloaded: 4,
                deleted: Default::default(),
                media_ids: Vec::new(),
                checkpoint: Utc::now(),
            },
        };
        assert_eq!(
            summarize(&report),
            "Uploaded 12 entries (1 file batches, 2 data batches); downloaded 4 items (incremental)"
        );
    }
}
