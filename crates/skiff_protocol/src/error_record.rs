//! Captured sync failures.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A failure captured for diagnostics and remote reporting.
///
/// Records are created by any engine component, mutated only to flip
/// `is_sent`, and deleted by explicit cleanup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncErrorRecord {
    /// Unique record ID (UUID v4).
    pub id: String,
    /// Human-readable failure message.
    pub message: String,
    /// Source chain or backtrace, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    /// Structured context (batch index, HTTP status, ...).
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// When the failure was captured.
    pub timestamp: DateTime<Utc>,
    /// Failure category (e.g. `"connectivity"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Entity type involved, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    /// Entity ID involved, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    /// Whether the record reached the error-intake endpoint.
    #[serde(default)]
    pub is_sent: bool,
}

impl SyncErrorRecord {
    /// Creates an unsent record stamped with the current time.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            message: message.into(),
            stack_trace: None,
            metadata: Map::new(),
            timestamp: Utc::now(),
            category: None,
            entity_type: None,
            entity_id: None,
            is_sent: false,
        }
    }

    /// Sets the category.
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Sets the entity this failure concerns.
    pub fn with_entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    /// Adds a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Sets the stack trace.
    pub fn with_stack_trace(mut self, trace: impl Into<String>) -> Self {
        self.stack_trace = Some(trace.into());
        self
    }

    /// Overrides the capture timestamp.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Returns true if the record was captured more than `age` before `now`.
    pub fn is_older_than(&self, now: DateTime<Utc>, age: Duration) -> bool {
        now - self.timestamp > age
    }
}
