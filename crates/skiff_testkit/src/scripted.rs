//! Scripted strategies and recording host collaborators.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use skiff_engine::host::{BackgroundScheduler, LocalDataHandler, Notifier};
use skiff_engine::{
    EntityDownloadStrategy, SyncError, SyncResult, TransportErrorKind, CHECKPOINT_KEY,
};
use skiff_protocol::{DeletedEntityIds, DownloadOutcome};
use skiff_storage::KeyValueStore;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One scripted reply of a [`ScriptedDownloadStrategy`].
#[derive(Debug, Clone)]
pub enum Script {
    /// Return this outcome (its `is_incremental` is overwritten with the
    /// mode the strategy was called with).
    Outcome(DownloadOutcome),
    /// Return an unsuccessful outcome with this message.
    Refuse(String),
    /// Fail with a connection error.
    Unreachable,
}

/// A download strategy that replays a script and records its calls.
///
/// When the script runs out it returns an empty success.
pub struct ScriptedDownloadStrategy {
    name: String,
    script: Mutex<VecDeque<Script>>,
    calls: Mutex<Vec<(Option<DateTime<Utc>>, bool)>>,
}

impl ScriptedDownloadStrategy {
    /// Creates a strategy with an empty script.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Appends a reply.
    pub fn push(&self, step: Script) -> &Self {
        self.script.lock().push_back(step);
        self
    }

    /// The `(since, is_incremental)` arguments of every call.
    pub fn calls(&self) -> Vec<(Option<DateTime<Utc>>, bool)> {
        self.calls.lock().clone()
    }

    /// Number of calls so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl EntityDownloadStrategy for ScriptedDownloadStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    async fn download_data(
        &self,
        since: Option<DateTime<Utc>>,
        is_incremental: bool,
    ) -> SyncResult<DownloadOutcome> {
        self.calls.lock().push((since, is_incremental));
        let step = self.script.lock().pop_front();
        match step {
            None => Ok(DownloadOutcome::success(0, is_incremental)),
            Some(Script::Outcome(mut outcome)) => {
                outcome.is_incremental = is_incremental;
                Ok(outcome)
            }
            Some(Script::Refuse(message)) => Ok(DownloadOutcome::failure(message, is_incremental)),
            Some(Script::Unreachable) => Err(SyncError::transport(
                TransportErrorKind::Connection,
                format!("{} unreachable", self.name),
            )),
        }
    }
}

/// A [`LocalDataHandler`] that records what it is asked to do.
#[derive(Default)]
pub struct RecordingDataHandler {
    clears: AtomicUsize,
    deletions: Mutex<Vec<DeletedEntityIds>>,
    prefetched: Mutex<Vec<Vec<String>>>,
    fail_prefetch: AtomicBool,
    checkpoint_store: Mutex<Option<Arc<dyn KeyValueStore>>>,
    checkpoint_at_deletion: Mutex<Vec<Option<String>>>,
}

impl RecordingDataHandler {
    /// Creates a handler that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the stored checkpoint whenever deletions are applied.
    pub fn watch_checkpoint(&self, store: Arc<dyn KeyValueStore>) {
        *self.checkpoint_store.lock() = Some(store);
    }

    /// Makes `prefetch_media` fail.
    pub fn fail_prefetch(&self, fail: bool) {
        self.fail_prefetch.store(fail, Ordering::SeqCst);
    }

    /// Number of `clear_local_data` calls.
    pub fn clear_count(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }

    /// Every deletion set received.
    pub fn deletions(&self) -> Vec<DeletedEntityIds> {
        self.deletions.lock().clone()
    }

    /// Every media id list received.
    pub fn prefetched(&self) -> Vec<Vec<String>> {
        self.prefetched.lock().clone()
    }

    /// The stored checkpoint as seen by each `apply_deletions` call.
    pub fn checkpoint_at_deletion(&self) -> Vec<Option<String>> {
        self.checkpoint_at_deletion.lock().clone()
    }
}

#[async_trait]
impl LocalDataHandler for RecordingDataHandler {
    async fn clear_local_data(&self) -> SyncResult<()> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn apply_deletions(&self, deleted: &DeletedEntityIds) -> SyncResult<()> {
        let store = self.checkpoint_store.lock().clone();
        if let Some(store) = store {
            let seen = store.get_string(CHECKPOINT_KEY).await?;
            self.checkpoint_at_deletion.lock().push(seen);
        }
        self.deletions.lock().push(deleted.clone());
        Ok(())
    }

    async fn prefetch_media(&self, media_ids: &[String]) -> SyncResult<()> {
        self.prefetched.lock().push(media_ids.to_vec());
        if self.fail_prefetch.load(Ordering::SeqCst) {
            return Err(SyncError::Host("media cache full".into()));
        }
        Ok(())
    }
}

/// A [`Notifier`] that records calls and can be told to fail.
#[derive(Default)]
pub struct RecordingNotifier {
    shown: Mutex<Vec<String>>,
    progress: Mutex<Vec<(u64, u64)>>,
    cancelled: Mutex<Vec<u32>>,
    fail: AtomicBool,
}

impl RecordingNotifier {
    /// Creates a notifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail.
    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Bodies of shown notifications.
    pub fn shown(&self) -> Vec<String> {
        self.shown.lock().clone()
    }

    /// Progress updates as `(current, total)`.
    pub fn progress(&self) -> Vec<(u64, u64)> {
        self.progress.lock().clone()
    }

    /// Ids passed to `cancel`.
    pub fn cancelled(&self) -> Vec<u32> {
        self.cancelled.lock().clone()
    }

    fn check(&self) -> SyncResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            Err(SyncError::Host("notifications disabled".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn show(&self, _id: u32, _title: &str, body: &str) -> SyncResult<()> {
        self.check()?;
        self.shown.lock().push(body.to_string());
        Ok(())
    }

    async fn show_progress(&self, _id: u32, _title: &str, current: u64, total: u64) -> SyncResult<()> {
        self.check()?;
        self.progress.lock().push((current, total));
        Ok(())
    }

    async fn cancel(&self, id: u32) -> SyncResult<()> {
        self.check()?;
        self.cancelled.lock().push(id);
        Ok(())
    }

    async fn cancel_all(&self) -> SyncResult<()> {
        self.check()
    }
}

/// A [`BackgroundScheduler`] that records registrations.
#[derive(Default)]
pub struct RecordingScheduler {
    periodic: Mutex<Vec<(String, Duration, bool)>>,
    one_off: Mutex<Vec<String>>,
    cancelled: Mutex<Vec<String>>,
}

impl RecordingScheduler {
    /// Creates a scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Periodic registrations as `(name, min_interval, requires_network)`.
    pub fn periodic(&self) -> Vec<(String, Duration, bool)> {
        self.periodic.lock().clone()
    }

    /// One-off registrations.
    pub fn one_off(&self) -> Vec<String> {
        self.one_off.lock().clone()
    }

    /// Cancelled task names.
    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().clone()
    }
}

#[async_trait]
impl BackgroundScheduler for RecordingScheduler {
    async fn register_periodic(
        &self,
        name: &str,
        min_interval: Duration,
        requires_network: bool,
    ) -> SyncResult<()> {
        self.periodic
            .lock()
            .push((name.to_string(), min_interval, requires_network));
        Ok(())
    }

    async fn register_one_off(&self, name: &str) -> SyncResult<()> {
        self.one_off.lock().push(name.to_string());
        Ok(())
    }

    async fn cancel(&self, name: &str) -> SyncResult<()> {
        self.cancelled.lock().push(name.to_string());
        Ok(())
    }
}
