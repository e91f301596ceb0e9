//! # Skiff Protocol
//!
//! Records and wire payloads for the Skiff sync engine.
//!
//! This crate provides:
//! - [`SyncLogEntry`] and [`SyncOperation`] for outbox records
//! - [`BinaryPayload`] for file entries
//! - [`SyncErrorRecord`] for captured failures
//! - [`DownloadOutcome`] returned by per-entity download strategies
//! - Upload, download and error-report payloads (JSON)
//!
//! This is a pure data crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod entry;
mod error;
mod error_record;
mod messages;
mod operation;
mod outcome;

pub use entry::{BinaryPayload, SyncLogEntry, BINARY_CONTENT_FIELD};
pub use error::{ProtocolError, ProtocolResult};
pub use error_record::SyncErrorRecord;
pub use messages::{
    DataUploadItem, EntityChangesPage, ErrorReportBatch, FileManifestEntry, FileUploadManifest,
};
pub use operation::SyncOperation;
pub use outcome::{merge_deletions, DeletedEntityIds, DownloadOutcome, MEDIA_IDS_KEY};
