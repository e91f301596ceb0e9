//! Durable log of captured sync failures.

use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use skiff_protocol::SyncErrorRecord;
use skiff_storage::KeyValueStore;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;

const ERROR_PREFIX: &str = "sync_error:";

fn record_key(id: &str) -> String {
    format!("{ERROR_PREFIX}{id}")
}

/// Append-only store of [`SyncErrorRecord`]s, one JSON string per key.
#[derive(Clone)]
pub struct ErrorStore {
    store: Arc<dyn KeyValueStore>,
}

impl ErrorStore {
    /// Creates an error store over `store`.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Appends a record.
    pub async fn record(&self, record: &SyncErrorRecord) -> SyncResult<()> {
        let json = serde_json::to_string(record)?;
        self.store.set_string(&record_key(&record.id), json).await?;
        Ok(())
    }

    /// Appends a record, logging instead of failing.
    ///
    /// Used on failure paths where a storage error must not mask the error
    /// being recorded.
    pub async fn record_best_effort(&self, record: &SyncErrorRecord) {
        if let Err(err) = self.record(record).await {
            warn!(error = %err, message = %record.message, "failed to persist error record");
        }
    }

    /// All records, newest first.
    pub async fn all(&self) -> SyncResult<Vec<SyncErrorRecord>> {
        let mut records = Vec::new();
        for key in self.store.keys_with_prefix(ERROR_PREFIX).await? {
            let Ok(Some(json)) = self.store.get_string(&key).await else {
                continue;
            };
            match serde_json::from_str::<SyncErrorRecord>(&json) {
                Ok(record) => records.push(record),
                Err(err) => warn!(%key, error = %err, "skipping unreadable error record"),
            }
        }
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
        Ok(records)
    }

    /// Unsent records, newest first.
    pub async fn unsent(&self) -> SyncResult<Vec<SyncErrorRecord>> {
        Ok(self
            .all()
            .await?
            .into_iter()
            .filter(|r| !r.is_sent)
            .collect())
    }

    /// Number of stored records.
    pub async fn count(&self) -> SyncResult<usize> {
        Ok(self.store.keys_with_prefix(ERROR_PREFIX).await?.len())
    }

    /// Flags the given records as sent.
    pub async fn mark_sent(&self, ids: &[String]) -> SyncResult<usize> {
        let ids: HashSet<&String> = ids.iter().collect();
        let mut marked = 0;
        for id in ids {
            let key = record_key(id);
            let Some(json) = self.store.get_string(&key).await? else {
                continue;
            };
            let mut record: SyncErrorRecord =
                serde_json::from_str(&json).map_err(|e| SyncError::CorruptRecord {
                    key: key.clone(),
                    message: e.to_string(),
                })?;
            if !record.is_sent {
                record.is_sent = true;
                self.record(&record).await?;
                marked += 1;
            }
        }
        Ok(marked)
    }

    /// Removes every sent record.
    pub async fn clear_sent(&self) -> SyncResult<usize> {
        self.remove_where(|r| r.is_sent).await
    }

    /// Removes sent records older than `days`.
    pub async fn clear_sent_older_than(&self, days: u32, now: DateTime<Utc>) -> SyncResult<usize> {
        let age = chrono::Duration::days(i64::from(days));
        self.remove_where(|r| r.is_sent && r.is_older_than(now, age))
            .await
    }

    /// Removes all records older than `days`, sent or not.
    pub async fn clear_older_than(&self, days: u32, now: DateTime<Utc>) -> SyncResult<usize> {
        let age = chrono::Duration::days(i64::from(days));
        self.remove_where(|r| r.is_older_than(now, age)).await
    }

    /// Removes every record.
    pub async fn clear_all(&self) -> SyncResult<usize> {
        let keys = self.store.keys_with_prefix(ERROR_PREFIX).await?;
        for key in &keys {
            self.store.remove(key).await?;
        }
        Ok(keys.len())
    }

    async fn remove_where<F>(&self, predicate: F) -> SyncResult<usize>
    where
        F: Fn(&SyncErrorRecord) -> bool + Send,
    {
        let mut removed = 0;
        for record in self.all().await? {
            if predicate(&record) {
                self.store.remove(&record_key(&record.id)).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skiff_storage::InMemoryStore;

    fn errors() -> ErrorStore {
        ErrorStore::new(Arc::new(InMemoryStore::new()))
    }

    #[tokio::test]
    async fn newest_first() {
        let store = errors();
        let now = Utc::now();
        for (i, msg) in ["first", "second", "third"].iter().enumerate() {
            let record = SyncErrorRecord::new(*msg)
                .with_timestamp(now + chrono::Duration::seconds(i as i64));
            store.record(&record).await.unwrap();
        }

        let messages: Vec<_> = store.all().await.unwrap().into_iter().map(|r| r.message).collect();
        assert_eq!(messages, ["third", "second", "first"]);
        assert_eq!(store.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn mark_sent_filters_unsent() {
        let store = errors();
        let a = SyncErrorRecord::new("a");
        let b = SyncErrorRecord::new("b");
        store.record(&a).await.unwrap();
        store.record(&b).await.unwrap();

        assert_eq!(store.mark_sent(&[a.id.clone()]).await.unwrap(), 1);
        // Already sent and unknown ids are no-ops
        assert_eq!(store.mark_sent(&[a.id.clone(), "nope".into()]).await.unwrap(), 0);

        let unsent = store.unsent().await.unwrap();
        assert_eq!(unsent.len(), 1);
        assert_eq!(unsent[0].id, b.id);

        assert_eq!(store.clear_sent().await.unwrap(), 1);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn age_based_cleanup() {
        let store = errors();
        let now = Utc::now();
        let old_sent = SyncErrorRecord::new("old sent").with_timestamp(now - chrono::Duration::days(10));
        let old_unsent =
            SyncErrorRecord::new("old unsent").with_timestamp(now - chrono::Duration::days(10));
        let recent = SyncErrorRecord::new("recent");
        for record in [&old_sent, &old_unsent, &recent] {
            store.record(record).await.unwrap();
        }
        store.mark_sent(&[old_sent.id.clone(), recent.id.clone()]).await.unwrap();

        assert_eq!(store.clear_sent_older_than(7, now).await.unwrap(), 1);
        assert_eq!(store.count().await.unwrap(), 2);

        assert_eq!(store.clear_older_than(7, now).await.unwrap(), 1);
        let left = store.all().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].message, "recent");

        assert_eq!(store.clear_all().await.unwrap(), 1);
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
