//! Durable outbox of pending local mutations.

use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use skiff_protocol::{SyncLogEntry, SyncOperation};
use skiff_storage::KeyValueStore;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const OUTBOX_PREFIX: &str = "outbox:";

fn entry_key(sync_id: &str) -> String {
    format!("{OUTBOX_PREFIX}{sync_id}")
}

pub(crate) fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

/// What a recovery purge removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    /// Entries past the age or retry ceiling.
    pub stale: usize,
    /// Entries that could not be decoded.
    pub corrupt: usize,
}

impl PurgeReport {
    /// Total entries removed.
    pub fn total(&self) -> usize {
        self.stale + self.corrupt
    }
}

/// The outbox log store.
///
/// Each [`SyncLogEntry`] is kept as a JSON string under `outbox:{sync_id}`.
/// Access is per entry or per full pending set; there are no multi-entry
/// transactions, so an entry enqueued during an upload simply shows up in
/// the next drain.
#[derive(Clone)]
pub struct OutboxLogStore {
    store: Arc<dyn KeyValueStore>,
}

impl OutboxLogStore {
    /// Creates an outbox over `store`.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Records a new local mutation and returns the stored entry.
    pub async fn enqueue(
        &self,
        entity_type: &str,
        entity_id: &str,
        operation: SyncOperation,
        payload: impl Into<String>,
        is_binary_payload: bool,
    ) -> SyncResult<SyncLogEntry> {
        let entry = SyncLogEntry::new(entity_type, entity_id, operation, payload, is_binary_payload);
        self.put(&entry).await?;
        debug!(
            sync_id = %entry.sync_id,
            entity_type,
            operation = %entry.operation,
            "enqueued outbox entry"
        );
        Ok(entry)
    }

    /// Writes `entry`, replacing any entry with the same id.
    pub async fn put(&self, entry: &SyncLogEntry) -> SyncResult<()> {
        let json = serde_json::to_string(entry)?;
        self.store.set_string(&entry_key(&entry.sync_id), json).await?;
        Ok(())
    }

    /// Reads one entry.
    pub async fn get(&self, sync_id: &str) -> SyncResult<Option<SyncLogEntry>> {
        let key = entry_key(sync_id);
        match self.store.get_string(&key).await? {
            None => Ok(None),
            Some(json) => decode(&key, &json).map(Some),
        }
    }

    /// Returns all pending entries, oldest first.
    ///
    /// Unreadable entries are skipped with a warning; recovery removes them.
    pub async fn pending(&self) -> SyncResult<Vec<SyncLogEntry>> {
        let mut entries = Vec::new();
        for key in self.store.keys_with_prefix(OUTBOX_PREFIX).await? {
            let Some(json) = self.read_raw(&key).await? else {
                continue;
            };
            match decode(&key, &json) {
                Ok(entry) if entry.is_pending() => entries.push(entry),
                Ok(_) => {}
                Err(err) => warn!(%key, error = %err, "skipping unreadable outbox entry"),
            }
        }
        entries.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.sync_id.cmp(&b.sync_id))
        });
        Ok(entries)
    }

    /// Number of pending entries.
    pub async fn pending_count(&self) -> SyncResult<usize> {
        Ok(self.pending().await?.len())
    }

    /// Removes the given entries. Missing ids are ignored.
    pub async fn remove_many(&self, sync_ids: &[String]) -> SyncResult<()> {
        let unique: HashSet<&String> = sync_ids.iter().collect();
        for sync_id in unique {
            self.store.remove(&entry_key(sync_id)).await?;
        }
        Ok(())
    }

    /// Records a failed attempt on each entry and persists it.
    pub async fn record_failure(
        &self,
        entries: &mut [SyncLogEntry],
        error: &str,
        at: DateTime<Utc>,
    ) -> SyncResult<()> {
        for entry in entries.iter_mut() {
            entry.record_failure(error, at);
            self.put(entry).await?;
        }
        Ok(())
    }

    /// Removes entries older than `max_age`, entries that failed at least
    /// `retry_ceiling` times, and entries that cannot be decoded.
    pub async fn purge_stale(
        &self,
        now: DateTime<Utc>,
        max_age: Duration,
        retry_ceiling: u32,
    ) -> SyncResult<PurgeReport> {
        let max_age = to_chrono(max_age);
        let mut report = PurgeReport::default();
        for key in self.store.keys_with_prefix(OUTBOX_PREFIX).await? {
            let Some(json) = self.read_raw(&key).await? else {
                self.store.remove(&key).await?;
                report.corrupt += 1;
                continue;
            };
            match decode(&key, &json) {
                Ok(entry) if entry.is_stale(now, max_age, retry_ceiling) => {
                    debug!(
                        sync_id = %entry.sync_id,
                        retry_count = entry.retry_count,
                        "purging stale outbox entry"
                    );
                    self.store.remove(&key).await?;
                    report.stale += 1;
                }
                Ok(_) => {}
                Err(_) => {
                    self.store.remove(&key).await?;
                    report.corrupt += 1;
                }
            }
        }
        Ok(report)
    }

    /// Removes every outbox entry and returns how many were removed.
    pub async fn clear(&self) -> SyncResult<usize> {
        let keys = self.store.keys_with_prefix(OUTBOX_PREFIX).await?;
        for key in &keys {
            self.store.remove(key).await?;
        }
        Ok(keys.len())
    }

    /// Reads a raw value, treating a value of the wrong kind as absent.
    async fn read_raw(&self, key: &str) -> SyncResult<Option<String>> {
        match self.store.get_string(key).await {
            Ok(value) => Ok(value),
            Err(skiff_storage::StorageError::TypeMismatch { .. }) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

fn decode(key: &str, json: &str) -> SyncResult<SyncLogEntry> {
    serde_json::from_str(json).map_err(|e| SyncError::CorruptRecord {
        key: key.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use skiff_storage::{InMemoryStore, StoredValue};

    fn outbox() -> (Arc<InMemoryStore>, OutboxLogStore) {
        let store = Arc::new(InMemoryStore::new());
        (store.clone(), OutboxLogStore::new(store))
    }

    #[tokio::test]
    async fn enqueue_and_read_back() {
        let (_, outbox) = outbox();
        let entry = outbox
            .enqueue("todo", "t1", SyncOperation::Create, r#"{"title":"a"}"#, false)
            .await
            .unwrap();

        let read = outbox.get(&entry.sync_id).await.unwrap().unwrap();
        assert_eq!(read, entry);
        assert_eq!(outbox.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn pending_is_ordered_by_creation() {
        let (_, outbox) = outbox();
        let base = Utc::now();
        for offset in [3, 1, 2] {
            let entry = SyncLogEntry::new("todo", format!("t{offset}"), SyncOperation::Update, "{}", false)
                .with_created_at(base + chrono::Duration::seconds(offset));
            outbox.put(&entry).await.unwrap();
        }

        let ids: Vec<_> = outbox
            .pending()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.entity_id)
            .collect();
        assert_eq!(ids, ["t1", "t2", "t3"]);
    }

    #[tokio::test]
    async fn corrupt_entries_are_skipped_then_purged() {
        let (store, outbox) = outbox();
        outbox
            .enqueue("todo", "t1", SyncOperation::Create, "{}", false)
            .await
            .unwrap();
        store
            .set("outbox:broken", StoredValue::Str("not json".into()))
            .await
            .unwrap();
        store.set("outbox:wrong", StoredValue::Int(4)).await.unwrap();

        assert_eq!(outbox.pending().await.unwrap().len(), 1);

        let report = outbox
            .purge_stale(Utc::now(), Duration::from_secs(3600), 5)
            .await
            .unwrap();
        assert_eq!(report, PurgeReport { stale: 0, corrupt: 2 });
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn purge_removes_old_and_exhausted_entries() {
        let (_, outbox) = outbox();
        let now = Utc::now();

        let old = SyncLogEntry::new("todo", "old", SyncOperation::Create, "{}", false)
            .with_created_at(now - chrono::Duration::days(8));
        let mut exhausted = SyncLogEntry::new("todo", "tired", SyncOperation::Update, "{}", false);
        exhausted.retry_count = 5;
        let fresh = SyncLogEntry::new("todo", "fresh", SyncOperation::Update, "{}", false);
        for entry in [&old, &exhausted, &fresh] {
            outbox.put(entry).await.unwrap();
        }

        let report = outbox
            .purge_stale(now, Duration::from_secs(7 * 24 * 3600), 5)
            .await
            .unwrap();
        assert_eq!(report.stale, 2);

        let left = outbox.pending().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].entity_id, "fresh");
    }

    #[tokio::test]
    async fn record_failure_persists() {
        let (_, outbox) = outbox();
        let entry = outbox
            .enqueue("todo", "t1", SyncOperation::Delete, "{}", false)
            .await
            .unwrap();

        let mut batch = vec![entry.clone()];
        outbox
            .record_failure(&mut batch, "HTTP 500", Utc::now())
            .await
            .unwrap();

        let read = outbox.get(&entry.sync_id).await.unwrap().unwrap();
        assert_eq!(read.retry_count, 1);
        assert_eq!(read.last_error.as_deref(), Some("HTTP 500"));
        assert!(read.last_attempt_at.is_some());
    }

    #[tokio::test]
    async fn remove_and_clear() {
        let (_, outbox) = outbox();
        let a = outbox.enqueue("todo", "a", SyncOperation::Create, "{}", false).await.unwrap();
        outbox.enqueue("todo", "b", SyncOperation::Create, "{}", false).await.unwrap();
        outbox.enqueue("todo", "c", SyncOperation::Create, "{}", false).await.unwrap();

        outbox
            .remove_many(&[a.sync_id.clone(), a.sync_id.clone()])
            .await
            .unwrap();
        assert_eq!(outbox.pending_count().await.unwrap(), 2);

        assert_eq!(outbox.clear().await.unwrap(), 2);
        assert_eq!(outbox.pending_count().await.unwrap(), 0);
    }
}
