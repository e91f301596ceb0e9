//! Error store listing and cleanup.

use super::Context;
use chrono::Utc;
use skiff_engine::ErrorStore;
use skiff_protocol::SyncErrorRecord;

/// Runs the errors command.
pub async fn list(ctx: &Context, unsent_only: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let errors = ErrorStore::new(ctx.open_store()?);
    let records = if unsent_only {
        errors.unsent().await?
    } else {
        errors.all().await?
    };

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        _ => {
            for record in &records {
                println!("{}", format_record(record));
            }
            println!("{} errors", records.len());
        }
    }

    Ok(())
}

/// Runs the clear-errors command.
pub async fn clear(
    ctx: &Context,
    sent_older_than_days: Option<u32>,
    all: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let errors = ErrorStore::new(ctx.open_store()?);
    let removed = match (all, sent_older_than_days) {
        (true, _) => errors.clear_all().await?,
        (false, Some(days)) => errors.clear_sent_older_than(days, Utc::now()).await?,
        (false, None) => errors.clear_sent().await?,
    };
    println!("Removed {removed} error records");
    Ok(())
}

fn format_record(record: &SyncErrorRecord) -> String {
    let mut line = format!(
        "{}  [{}] {}",
        record.timestamp.format("%Y-%m-%d %H:%M:%S"),
        record.category.as_deref().unwrap_or("unknown"),
        record.message
    );
    if let (Some(entity_type), Some(entity_id)) = (&record.entity_type, &record.entity_id) {
        line.push_str(&format!("  ({entity_type}/{entity_id})"));
    }
    if record.is_sent {
        line.push_str("  sent");
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_record() {
        let record = SyncErrorRecord::new("data batch upload failed")
            .with_category("server")
            .with_entity("todo", "t1");
        let line = format_record(&record);
        assert!(line.contains("[server] data batch upload failed"));
        assert!(line.ends_with("(todo/t1)"));
    }

    #[test]
    fn uncategorized_record() {
        let mut record = SyncErrorRecord::new("boom");
        record.is_sent = true;
        let line = format_record(&record);
        assert!(line.contains("[unknown] boom"));
        assert!(line.ends_with("sent"));
    }
}
