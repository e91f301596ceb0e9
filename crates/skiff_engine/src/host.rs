//! Contracts the host application implements.
//!
//! The engine never touches the host's local database, notification shade
//! or OS task scheduler directly. Each concern is a narrow trait with a
//! no-op implementation for hosts that do not need it.

use crate::error::SyncResult;
use async_trait::async_trait;
use skiff_protocol::DeletedEntityIds;
use std::time::Duration;

/// Local-data steps of a download run.
#[async_trait]
pub trait LocalDataHandler: Send + Sync {
    /// Clears locally cached server data before a full download.
    async fn clear_local_data(&self) -> SyncResult<()>;

    /// Removes records the server reports as deleted.
    async fn apply_deletions(&self, deleted: &DeletedEntityIds) -> SyncResult<()>;

    /// Pre-caches referenced media. Failures are logged, never fatal.
    async fn prefetch_media(&self, media_ids: &[String]) -> SyncResult<()>;
}

/// Does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDataHandler;

#[async_trait]
impl LocalDataHandler for NoopDataHandler {
    async fn clear_local_data(&self) -> SyncResult<()> {
        Ok(())
    }

    async fn apply_deletions(&self, _deleted: &DeletedEntityIds) -> SyncResult<()> {
        Ok(())
    }

    async fn prefetch_media(&self, _media_ids: &[String]) -> SyncResult<()> {
        Ok(())
    }
}

/// User-visible notifications. Every call is best-effort.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Shows or replaces notification `id`.
    async fn show(&self, id: u32, title: &str, body: &str) -> SyncResult<()>;

    /// Shows progress `current` of `total` on notification `id`.
    async fn show_progress(&self, id: u32, title: &str, current: u64, total: u64) -> SyncResult<()>;

    /// Dismisses notification `id`.
    async fn cancel(&self, id: u32) -> SyncResult<()>;

    /// Dismisses every notification.
    async fn cancel_all(&self) -> SyncResult<()>;
}

/// Does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn show(&self, _id: u32, _title: &str, _body: &str) -> SyncResult<()> {
        Ok(())
    }

    async fn show_progress(&self, _id: u32, _title: &str, _current: u64, _total: u64) -> SyncResult<()> {
        Ok(())
    }

    async fn cancel(&self, _id: u32) -> SyncResult<()> {
        Ok(())
    }

    async fn cancel_all(&self) -> SyncResult<()> {
        Ok(())
    }
}

/// The host platform's background task scheduler.
///
/// When a registered task fires, the host calls
/// [`crate::SyncOrchestrator::run_background_cycle`].
#[async_trait]
pub trait BackgroundScheduler: Send + Sync {
    /// Registers a periodic task, replacing any task with the same name.
    async fn register_periodic(
        &self,
        name: &str,
        min_interval: Duration,
        requires_network: bool,
    ) -> SyncResult<()>;

    /// Registers a task that runs once as soon as possible.
    async fn register_one_off(&self, name: &str) -> SyncResult<()>;

    /// Cancels a task by name. Unknown names are ignored.
    async fn cancel(&self, name: &str) -> SyncResult<()>;
}

/// Does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopScheduler;

#[async_trait]
impl BackgroundScheduler for NoopScheduler {
    async fn register_periodic(&self, _name: &str, _min_interval: Duration, _requires_network: bool) -> SyncResult<()> {
        Ok(())
    }

    async fn register_one_off(&self, _name: &str) -> SyncResult<()> {
        Ok(())
    }

    async fn cancel(&self, _name: &str) -> SyncResult<()> {
        Ok(())
    }
}
