//! Outbox log entries.

use crate::error::{ProtocolError, ProtocolResult};
use crate::operation::SyncOperation;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field of a binary payload object that carries the base64 content.
pub const BINARY_CONTENT_FIELD: &str = "content";

/// One pending local mutation.
///
/// `SyncLogEntry` is the unit the outbox stores and the upload pipeline
/// drains. The payload is opaque to the engine; for binary entries it
/// follows the [`BinaryPayload`] convention.
///
/// # Invariants
///
/// - An entry is visible to the upload pipeline iff `is_synced == false`
/// - After creation only `is_synced`, `synced_at`, `retry_count`,
///   `last_error` and `last_attempt_at` change
/// - Entries are retired by deletion, never archived
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncLogEntry {
    /// Unique entry ID (UUID v4).
    pub sync_id: String,
    /// Entity type tag (e.g. `"todo"`).
    pub entity_type: String,
    /// ID of the affected entity.
    pub entity_id: String,
    /// The mutation kind.
    pub operation: SyncOperation,
    /// Serialized entity data.
    pub payload: String,
    /// Routes the entry through the file-upload path.
    #[serde(default)]
    pub is_binary_payload: bool,
    /// Set once the server accepted the entry.
    #[serde(default)]
    pub is_synced: bool,
    /// Number of failed send attempts.
    #[serde(default)]
    pub retry_count: u32,
    /// Message of the most recent failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// When the entry was queued.
    pub created_at: DateTime<Utc>,
    /// When a send was last attempted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// When the server accepted the entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<DateTime<Utc>>,
}

impl SyncLogEntry {
    /// Creates a new pending entry stamped with the current time.
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        operation: SyncOperation,
        payload: impl Into<String>,
        is_binary_payload: bool,
    ) -> Self {
        Self {
            sync_id: uuid::Uuid::new_v4().to_string(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            operation,
            payload: payload.into(),
            is_binary_payload,
            is_synced: false,
            retry_count: 0,
            last_error: None,
            created_at: Utc::now(),
            last_attempt_at: None,
            synced_at: None,
        }
    }

    /// Overrides the creation timestamp.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Returns true if the entry still awaits upload.
    pub fn is_pending(&self) -> bool {
        !self.is_synced
    }

    /// Records a failed send attempt.
    pub fn record_failure(&mut self, error: impl Into<String>, at: DateTime<Utc>) {
        self.retry_count = self.retry_count.saturating_add(1);
        self.last_error = Some(error.into());
        self.last_attempt_at = Some(at);
    }

    /// Marks the entry as accepted by the server.
    pub fn mark_synced(&mut self, at: DateTime<Utc>) {
        self.is_synced = true;
        self.synced_at = Some(at);
    }

    /// Returns true if recovery should discard this entry.
    ///
    /// An entry is stale when it is older than `max_age` or has failed at
    /// least `retry_ceiling` times.
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration, retry_ceiling: u32) -> bool {
        self.retry_count >= retry_ceiling || now - self.created_at > max_age
    }

    /// Decodes the payload of a binary entry.
    pub fn binary_payload(&self) -> ProtocolResult<BinaryPayload> {
        BinaryPayload::decode(&self.sync_id, &self.payload)
    }
}

/// Decoded payload of a binary outbox entry.
///
/// On disk a binary payload is a JSON object whose `content` field holds the
/// base64 bytes; every other field is sidecar data sent alongside the file.
/// A payload that is not a JSON object is taken as bare base64 content.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryPayload {
    /// Raw file content.
    pub content: Vec<u8>,
    /// Remaining payload fields, content stripped.
    pub sidecar: Map<String, Value>,
}

impl BinaryPayload {
    /// Creates a payload from raw content and sidecar fields.
    pub fn new(content: Vec<u8>, sidecar: Map<String, Value>) -> Self {
        Self { content, sidecar }
    }

    /// Encodes into the stored payload string.
    pub fn encode(&self) -> ProtocolResult<String> {
        let mut object = self.sidecar.clone();
        object.insert(
            BINARY_CONTENT_FIELD.to_string(),
            Value::String(BASE64.encode(&self.content)),
        );
        Ok(serde_json::to_string(&Value::Object(object))?)
    }

    /// Decodes a stored payload string.
    pub fn decode(sync_id: &str, payload: &str) -> ProtocolResult<Self> {
        let decode_b64 = |text: &str| {
            BASE64
                .decode(text.trim())
                .map_err(|source| ProtocolError::InvalidBase64 {
                    sync_id: sync_id.to_string(),
                    source,
                })
        };

        match serde_json::from_str::<Value>(payload) {
            Ok(Value::Object(mut object)) => {
                let content = match object.remove(BINARY_CONTENT_FIELD) {
                    Some(Value::String(text)) => decode_b64(&text)?,
                    _ => return Err(ProtocolError::MissingContent(sync_id.to_string())),
                };
                Ok(Self {
                    content,
                    sidecar: object,
                })
            }
            Ok(Value::String(text)) => Ok(Self {
                content: decode_b64(&text)?,
                sidecar: Map::new(),
            }),
            _ => Ok(Self {
                content: decode_b64(payload)?,
                sidecar: Map::new(),
            }),
        }
    }
}
