//! Outbox operation kinds.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of local mutation recorded in an outbox entry.
///
/// The three standard kinds serialize as `"create"`, `"update"` and
/// `"delete"`. Any other tag is carried verbatim as [`SyncOperation::Custom`],
/// so host applications can queue domain operations the server understands
/// (for example `"archive"`) without the engine knowing about them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SyncOperation {
    /// Entity was created locally.
    Create,
    /// Entity was updated locally.
    Update,
    /// Entity was deleted locally.
    Delete,
    /// Application-defined operation tag.
    Custom(String),
}

impl SyncOperation {
    /// Returns the wire tag for this operation.
    pub fn as_str(&self) -> &str {
        match self {
            SyncOperation::Create => "create",
            SyncOperation::Update => "update",
            SyncOperation::Delete => "delete",
            SyncOperation::Custom(tag) => tag,
        }
    }

    /// Returns true for the delete operation.
    pub fn is_delete(&self) -> bool {
        matches!(self, SyncOperation::Delete)
    }
}

impl From<String> for SyncOperation {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "create" => SyncOperation::Create,
            "update" => SyncOperation::Update,
            "delete" => SyncOperation::Delete,
            _ => SyncOperation::Custom(tag),
        }
    }
}

impl From<&str> for SyncOperation {
    fn from(tag: &str) -> Self {
        SyncOperation::from(tag.to_string())
    }
}

impl From<SyncOperation> for String {
    fn from(op: SyncOperation) -> Self {
        match op {
            SyncOperation::Custom(tag) => tag,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
