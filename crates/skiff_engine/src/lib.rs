//! # Skiff Engine
//!
//! Client-side sync orchestration for offline-first applications.
//!
//! This crate provides:
//! - A durable outbox of local mutations ([`OutboxLogStore`])
//! - Ordered, fail-fast batch upload of the outbox ([`UploadStrategy`])
//! - Incremental or full download through per-entity strategies
//!   ([`DownloadStrategy`], [`EntityDownloadStrategy`])
//! - A sync state machine with backoff, recovery and offline mode
//!   ([`SyncOrchestrator`])
//! - Error capture and remote reporting ([`ErrorStore`], [`ErrorReporter`])
//! - Connectivity monitoring ([`ConnectivityMonitor`])
//!
//! ## Architecture
//!
//! A cycle is **upload then download**:
//! 1. Drain the outbox in batches, files first, oldest data first
//! 2. Download server changes, incrementally when the checkpoint allows
//! 3. Hand server deletions to the host, then advance the checkpoint
//!
//! The host supplies the HTTP transport ([`HttpClient`]), the key-value
//! store ([`skiff_storage::KeyValueStore`]) and optional collaborators for
//! local data, notifications and background scheduling ([`host`]).
//!
//! ## Key Invariants
//!
//! - At most one cycle runs at a time
//! - An outbox entry is removed only after the server accepts its batch
//! - A failed batch aborts the cycle; later batches wait for the next one
//! - The checkpoint never advances past a failed download
//! - Delivery is at-least-once; there is no conflict resolution

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod background;
mod config;
mod connectivity;
mod download;
mod error;
mod error_store;
pub mod host;
#[cfg(feature = "reqwest")]
mod http;
mod orchestrator;
mod outbox;
mod reporter;
mod state;
mod timers;
mod transport;
mod upload;

pub use background::{BackgroundSync, MIN_BACKGROUND_INTERVAL, ONE_OFF_TASK, PERIODIC_TASK};
pub use config::{ConnectivityConfig, RecoveryPolicy, ReporterConfig, RetryPolicy, SyncConfig};
pub use connectivity::{ConnectivityMonitor, HttpReachabilityProbe, ReachabilityProbe, StaticProbe};
pub use download::{
    CheckpointStore, DownloadMode, DownloadReport, DownloadStrategy, EntityApplier,
    EntityDownloadStrategy, HttpEntityDownloadStrategy, CHECKPOINT_KEY,
};
pub use error::{ErrorCategory, SyncError, SyncResult, TransportErrorKind};
pub use error_store::ErrorStore;
pub use host::{BackgroundScheduler, LocalDataHandler, Notifier};
#[cfg(feature = "reqwest")]
pub use http::ReqwestHttpClient;
pub use orchestrator::{
    CycleOutcome, CycleReport, SkipReason, SyncOrchestrator, SyncOrchestratorBuilder,
    STATUS_NOTIFICATION_ID,
};
pub use outbox::{OutboxLogStore, PurgeReport};
pub use reporter::{ErrorReporter, ReportSummary};
pub use state::{FailureRoute, SyncSnapshot, SyncStatus};
pub use timers::{TimerSlot, Timers};
pub use transport::{
    HttpClient, HttpMethod, HttpRequest, HttpResponse, MockHttpClient, MockReply, MultipartPart,
    ProgressCallback, RecordedRequest,
};
pub use upload::{UploadReport, UploadStrategy, MANIFEST_PART, UPLOAD_NOTIFICATION_ID};

pub use skiff_protocol::{
    DownloadOutcome, SyncErrorRecord, SyncLogEntry, SyncOperation, MEDIA_IDS_KEY,
};
