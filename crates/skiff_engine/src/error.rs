//! Error types for the sync engine.

use skiff_protocol::ProtocolError;
use skiff_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Low-level cause of a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The request exceeded its timeout.
    Timeout,
    /// Host name resolution failed.
    Dns,
    /// The connection could not be established or was reset.
    Connection,
    /// The host or network is unreachable.
    Unreachable,
    /// Any other transport failure (TLS, malformed URL, ...).
    Other,
}

/// How a failure is routed by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Network-level failure; may lead to temporary offline mode.
    Connectivity,
    /// The server answered but refused the request or sent garbage.
    ServerRejection,
    /// The local durable store failed or holds unreadable records.
    LocalStorage,
    /// Anything else; handled like a degraded-mode failure.
    Unexpected,
}

impl ErrorCategory {
    /// Returns the tag stored on error records.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Connectivity => "connectivity",
            ErrorCategory::ServerRejection => "server_rejection",
            ErrorCategory::LocalStorage => "local_storage",
            ErrorCategory::Unexpected => "unexpected",
        }
    }
}

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error ({kind:?}): {message}")]
    Transport {
        /// What went wrong at the transport level.
        kind: TransportErrorKind,
        /// Error message.
        message: String,
    },

    /// The server answered with a non-2xx status.
    #[error("server rejected request with HTTP {status}: {message}")]
    ServerRejected {
        /// HTTP status code.
        status: u16,
        /// Status message or response excerpt.
        message: String,
    },

    /// Protocol error (malformed request or response payload).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Payload encoding or decoding failed.
    #[error("payload error: {0}")]
    Payload(#[from] ProtocolError),

    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The durable store failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A stored record could not be decoded.
    #[error("corrupt record {key}: {message}")]
    CorruptRecord {
        /// Store key of the record.
        key: String,
        /// Decode failure.
        message: String,
    },

    /// An upload batch failed and aborted the run.
    #[error("{kind} batch {index} ({size} entries) failed: {source}")]
    UploadBatch {
        /// `"file"` or `"data"`.
        kind: &'static str,
        /// Zero-based batch index within its phase.
        index: usize,
        /// Number of entries in the batch.
        size: usize,
        /// What failed.
        #[source]
        source: Box<SyncError>,
    },

    /// A per-entity download strategy reported failure.
    #[error("download strategy {strategy} failed: {message}")]
    DownloadFailed {
        /// Strategy name.
        strategy: String,
        /// Failure message from the outcome.
        message: String,
    },

    /// The host application rejected a local-data step.
    #[error("host data handler failed: {0}")]
    Host(String),

    /// A collaborator is not configured.
    #[error("not configured: {0}")]
    NotConfigured(&'static str),

    /// Configuration could not be loaded.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SyncError {
    /// Creates a transport error.
    pub fn transport(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self::Transport {
            kind,
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::transport(TransportErrorKind::Timeout, message)
    }

    /// Classifies the error for failure routing.
    pub fn category(&self) -> ErrorCategory {
        match self {
            SyncError::Transport { kind, .. } => match kind {
                TransportErrorKind::Other => ErrorCategory::Unexpected,
                _ => ErrorCategory::Connectivity,
            },
            SyncError::ServerRejected { .. } | SyncError::Protocol(_) => {
                ErrorCategory::ServerRejection
            }
            SyncError::Json(_) => ErrorCategory::ServerRejection,
            SyncError::DownloadFailed { .. } => ErrorCategory::ServerRejection,
            SyncError::Storage(_) | SyncError::CorruptRecord { .. } | SyncError::Payload(_) => {
                ErrorCategory::LocalStorage
            }
            SyncError::UploadBatch { source, .. } => source.category(),
            SyncError::Host(_) | SyncError::NotConfigured(_) | SyncError::Config(_) => {
                ErrorCategory::Unexpected
            }
        }
    }

    /// Returns true for timeouts, DNS/socket failures and unreachable hosts.
    pub fn is_connectivity(&self) -> bool {
        self.category() == ErrorCategory::Connectivity
    }

    /// Returns the HTTP status, if the server answered.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            SyncError::ServerRejected { status, .. } => Some(*status),
            SyncError::UploadBatch { source, .. } => source.http_status(),
            _ => None,
        }
    }

    /// Renders the error and its source chain, one cause per line.
    pub fn chain(&self) -> String {
        let mut out = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            out.push_str("\ncaused by: ");
            out.push_str(&cause.to_string());
            source = cause.source();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connectivity_errors() {
        assert!(SyncError::timeout("30s elapsed").is_connectivity());
        assert!(SyncError::transport(TransportErrorKind::Dns, "no such host").is_connectivity());
        assert!(SyncError::transport(TransportErrorKind::Unreachable, "x").is_connectivity());
        assert!(!SyncError::transport(TransportErrorKind::Other, "bad tls").is_connectivity());
    }

    #[test]
    fn categories() {
        let rejected = SyncError::ServerRejected {
            status: 500,
            message: "Internal Server Error".into(),
        };
        assert_eq!(rejected.category(), ErrorCategory::ServerRejection);
        assert_eq!(rejected.http_status(), Some(500));

        let storage = SyncError::Storage(StorageError::Closed);
        assert_eq!(storage.category(), ErrorCategory::LocalStorage);

        assert_eq!(
            SyncError::Host("disk full".into()).category(),
            ErrorCategory::Unexpected
        );
    }

    #[test]
    fn batch_error_delegates_to_source() {
        let err = SyncError::UploadBatch {
            kind: "data",
            index: 0,
            size: 10,
            source: Box::new(SyncError::timeout("slow")),
        };
        assert!(err.is_connectivity());
        assert!(err.chain().contains("caused by: transport error (Timeout): slow"));
    }

    #[test]
    fn error_display() {
        let err = SyncError::DownloadFailed {
            strategy: "todo".into(),
            message: "HTTP 503".into(),
        };
        assert_eq!(err.to_string(), "download strategy todo failed: HTTP 503");
        assert_eq!(ErrorCategory::LocalStorage.as_str(), "local_storage");
    }
}
