//! Download strategy outcomes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Metadata key under which strategies report referenced media IDs.
pub const MEDIA_IDS_KEY: &str = "media_ids";

/// Entity type to the IDs the server reports as removed.
pub type DeletedEntityIds = BTreeMap<String, Vec<String>>;

/// Result of one per-entity download strategy invocation.
///
/// Produced and consumed within a single sync cycle; never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadOutcome {
    /// Whether the strategy completed.
    pub success: bool,
    /// Human-readable summary or failure reason.
    pub message: String,
    /// Number of records fetched.
    pub items_downloaded: u64,
    /// Cross-cutting data, e.g. [`MEDIA_IDS_KEY`].
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// IDs removed on the server, by entity type.
    #[serde(default)]
    pub deleted_entity_ids: DeletedEntityIds,
    /// Echoes the mode the strategy was invoked with.
    pub is_incremental: bool,
}

impl DownloadOutcome {
    /// Creates a successful outcome.
    pub fn success(items_downloaded: u64, is_incremental: bool) -> Self {
        Self {
            success: true,
            message: format!("downloaded {items_downloaded} items"),
            items_downloaded,
            is_incremental,
            ..Self::default()
        }
    }

    /// Creates a failed outcome.
    pub fn failure(message: impl Into<String>, is_incremental: bool) -> Self {
        Self {
            success: false,
            message: message.into(),
            is_incremental,
            ..Self::default()
        }
    }

    /// Adds server-side deletions for an entity type.
    pub fn with_deleted(mut self, entity_type: impl Into<String>, ids: Vec<String>) -> Self {
        self.deleted_entity_ids
            .entry(entity_type.into())
            .or_default()
            .extend(ids);
        self
    }

    /// Adds referenced media IDs.
    pub fn with_media_ids(mut self, ids: Vec<String>) -> Self {
        let list = self
            .metadata
            .entry(MEDIA_IDS_KEY.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(items) = list {
            items.extend(ids.into_iter().map(Value::String));
        }
        self
    }

    /// Returns the media IDs listed in the metadata.
    pub fn media_ids(&self) -> Vec<String> {
        match self.metadata.get(MEDIA_IDS_KEY) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Merges `from` into `into`, keeping first-seen order and dropping duplicates.
pub fn merge_deletions(into: &mut DeletedEntityIds, from: &DeletedEntityIds) {
    for (entity_type, ids) in from {
        let target = into.entry(entity_type.clone()).or_default();
        for id in ids {
            if !target.contains(id) {
                target.push(id.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_and_failure() {
        let ok = DownloadOutcome::success(12, true);
        assert!(ok.success);
        assert_eq!(ok.items_downloaded, 12);
        assert!(ok.is_incremental);

        let err = DownloadOutcome::failure("HTTP 503", false);
        assert!(!err.success);
        assert_eq!(err.message, "HTTP 503");
    }

    #[test]
    fn media_ids_accumulate() {
        let outcome = DownloadOutcome::success(1, false)
            .with_media_ids(vec!["m1".into()])
            .with_media_ids(vec!["m2".into()]);
        assert_eq!(outcome.media_ids(), vec!["m1", "m2"]);
    }

    #[test]
    fn merge_dedups_ids() {
        let mut all = DeletedEntityIds::new();
        let a = DownloadOutcome::success(0, true).with_deleted("todo", vec!["t1".into(), "t2".into()]);
        let b = DownloadOutcome::success(0, true)
            .with_deleted("todo", vec!["t2".into(), "t3".into()])
            .with_deleted("note", vec!["n1".into()]);

        merge_deletions(&mut all, &a.deleted_entity_ids);
        merge_deletions(&mut all, &b.deleted_entity_ids);

        assert_eq!(all["todo"], vec!["t1", "t2", "t3"]);
        assert_eq!(all["note"], vec!["n1"]);
    }
}
