//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A key holds a value of a different kind than the one requested.
    #[error("type mismatch for key {key}: expected {expected}, found {found}")]
    TypeMismatch {
        /// The key that was read.
        key: String,
        /// The kind the caller asked for.
        expected: &'static str,
        /// The kind actually stored.
        found: &'static str,
    },

    /// The store file is corrupted.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// Another process holds the store lock.
    #[error("store at {0} is locked by another process")]
    Locked(String),

    /// The store is closed.
    #[error("storage is closed")]
    Closed,
}
