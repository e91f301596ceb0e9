//! Wire payloads exchanged with the sync server.
//!
//! The engine only depends on the shapes below; everything else about the
//! server (authentication, idempotency, routing) is a convention the host
//! and server agree on.

use crate::entry::SyncLogEntry;
use crate::error::ProtocolResult;
use crate::error_record::SyncErrorRecord;
use crate::operation::SyncOperation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One element of a data-batch upload body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataUploadItem {
    /// Outbox entry ID.
    pub sync_id: String,
    /// Entity type tag.
    pub entity_type: String,
    /// Entity ID.
    pub entity_id: String,
    /// Mutation kind.
    pub operation: SyncOperation,
    /// Serialized entity data, passed through untouched.
    pub payload: String,
    /// When the entry was queued.
    pub created_at: DateTime<Utc>,
}

impl From<&SyncLogEntry> for DataUploadItem {
    fn from(entry: &SyncLogEntry) -> Self {
        Self {
            sync_id: entry.sync_id.clone(),
            entity_type: entry.entity_type.clone(),
            entity_id: entry.entity_id.clone(),
            operation: entry.operation.clone(),
            payload: entry.payload.clone(),
            created_at: entry.created_at,
        }
    }
}

/// Per-file metadata in a binary-batch manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileManifestEntry {
    /// Outbox entry ID.
    pub sync_id: String,
    /// Entity type tag.
    pub entity_type: String,
    /// Entity ID.
    pub entity_id: String,
    /// Mutation kind.
    pub operation: SyncOperation,
    /// When the entry was queued.
    pub created_at: DateTime<Utc>,
    /// Name of the multipart file part holding this entry's content.
    pub content_id: String,
    /// Payload fields other than the binary content.
    #[serde(default)]
    pub sidecar: Map<String, Value>,
}

/// The `manifest` part of a binary-batch multipart upload.
///
/// `content_ids` lists file part names in submission order so the server can
/// pair each part with its entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileUploadManifest {
    /// One entry per file part, in order.
    pub entries: Vec<FileManifestEntry>,
    /// File part names, in order.
    pub content_ids: Vec<String>,
}

impl FileUploadManifest {
    /// Appends an entry and returns its content ID.
    pub fn push(&mut self, entry: &SyncLogEntry, sidecar: Map<String, Value>) -> String {
        let content_id = format!("file_{}", self.entries.len());
        self.entries.push(FileManifestEntry {
            sync_id: entry.sync_id.clone(),
            entity_type: entry.entity_type.clone(),
            entity_id: entry.entity_id.clone(),
            operation: entry.operation.clone(),
            created_at: entry.created_at,
            content_id: content_id.clone(),
            sidecar,
        });
        self.content_ids.push(content_id.clone());
        content_id
    }

    /// Encodes to JSON.
    pub fn to_json(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// One page of server changes for an entity type.
///
/// Returned by `GET {base}/sync/{entity}?since=&page=&pageSize=`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityChangesPage {
    /// Records created on the server.
    #[serde(default)]
    pub created: Vec<Value>,
    /// Records updated on the server.
    #[serde(default)]
    pub updated: Vec<Value>,
    /// IDs deleted on the server.
    #[serde(default)]
    pub deleted: Vec<String>,
    /// Whether another page follows.
    #[serde(default)]
    pub has_more: bool,
}

impl EntityChangesPage {
    /// Number of created and updated records in this page.
    pub fn record_count(&self) -> usize {
        self.created.len() + self.updated.len()
    }

    /// Decodes from a JSON body.
    pub fn from_json(body: &[u8]) -> ProtocolResult<Self> {
        Ok(serde_json::from_slice(body)?)
    }
}

/// Body posted to the error-intake endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReportBatch {
    /// Client identifier, if configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// When the batch was sent.
    pub reported_at: DateTime<Utc>,
    /// The records in this batch.
    pub errors: Vec<SyncErrorRecord>,
}
