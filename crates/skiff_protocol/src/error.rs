//! Error types for protocol payloads.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while decoding or encoding protocol payloads.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// JSON (de)serialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Binary content was not valid base64.
    #[error("invalid base64 content in entry {sync_id}: {source}")]
    InvalidBase64 {
        /// The outbox entry whose payload failed to decode.
        sync_id: String,
        /// The underlying decode error.
        #[source]
        source: base64::DecodeError,
    },

    /// A binary payload object had no content field.
    #[error("binary payload of entry {0} has no content field")]
    MissingContent(String),
}
