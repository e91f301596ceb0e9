//! The sync orchestrator.
//!
//! Owns the status snapshot and decides when cycles run. A cycle uploads the
//! outbox and then downloads server changes; its result is routed through
//! [`FailureRoute`] to pick the next status and the next timer.
//!
//! ## Timers
//!
//! Three timer slots exist: periodic, backoff and reconnect poll. Timer
//! tasks hold a weak reference to the engine, only sleep, and spawn the
//! cycle on its own task. Re-arming or cancelling a slot therefore never
//! aborts a cycle that is already running.
//!
//! ## Single flight
//!
//! At most one cycle runs at a time. A request arriving while one is in
//! flight returns [`CycleOutcome::Skipped`] without touching any state.

use crate::background::BackgroundSync;
use crate::config::SyncConfig;
use crate::connectivity::{ConnectivityMonitor, HttpReachabilityProbe, ReachabilityProbe};
use crate::download::{CheckpointStore, DownloadReport, DownloadStrategy, EntityDownloadStrategy};
use crate::error::{SyncError, SyncResult};
use crate::error_store::ErrorStore;
use crate::host::{
    BackgroundScheduler, LocalDataHandler, NoopDataHandler, NoopNotifier, NoopScheduler, Notifier,
};
use crate::outbox::OutboxLogStore;
use crate::reporter::{ErrorReporter, ReportSummary};
use crate::state::{FailureRoute, SyncSnapshot, SyncStatus};
use crate::timers::Timers;
use crate::transport::HttpClient;
use crate::upload::{UploadReport, UploadStrategy};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use skiff_protocol::{SyncLogEntry, SyncOperation};
use skiff_storage::KeyValueStore;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Notification id used for sync status alerts.
pub const STATUS_NOTIFICATION_ID: u32 = 1000;

const HALTED_MESSAGE: &str = "Too many failures; automatic sync disabled";

/// What started a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Manual,
    Timer,
    Reconnect,
    Background,
}

impl Trigger {
    fn is_automatic(self) -> bool {
        self != Trigger::Manual
    }
}

/// Why a cycle did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another cycle is in flight.
    AlreadyRunning,
    /// The device is offline.
    Offline,
    /// Automatic sync is halted after too many failures.
    Halted,
}

/// Counts from a completed cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    /// Upload phase.
    pub upload: UploadReport,
    /// Download phase.
    pub download: DownloadReport,
}

/// Result of asking for a cycle.
#[derive(Debug)]
pub enum CycleOutcome {
    /// Upload and download both finished.
    Completed(CycleReport),
    /// The cycle ran and failed; the failure has been routed.
    Failed(SyncError),
    /// The cycle did not run.
    Skipped(SkipReason),
}

impl CycleOutcome {
    /// Returns true for completed cycles.
    pub fn is_completed(&self) -> bool {
        matches!(self, CycleOutcome::Completed(_))
    }

    /// Returns the skip reason, if skipped.
    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            CycleOutcome::Skipped(reason) => Some(*reason),
            _ => None,
        }
    }
}

/// Holds the single-flight flag for the duration of a cycle.
struct FlightGuard<'a> {
    running: &'a AtomicBool,
    done: &'a Notify,
}

impl<'a> FlightGuard<'a> {
    fn acquire(running: &'a AtomicBool, done: &'a Notify) -> Option<Self> {
        running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { running, done })
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        self.done.notify_waiters();
    }
}

struct Inner {
    config: SyncConfig,
    outbox: OutboxLogStore,
    errors: ErrorStore,
    checkpoint: CheckpointStore,
    upload: UploadStrategy,
    download: DownloadStrategy,
    reporter: Option<Arc<ErrorReporter>>,
    monitor: Arc<ConnectivityMonitor>,
    notifier: Arc<dyn Notifier>,
    background: BackgroundSync,
    snapshot: watch::Sender<SyncSnapshot>,
    running: AtomicBool,
    cycle_done: Notify,
    failures: AtomicU32,
    halted: AtomicBool,
    offline_mode: AtomicBool,
    started: AtomicBool,
    last_sync: Mutex<Option<DateTime<Utc>>>,
    timers: Timers,
    listener: Mutex<Option<JoinHandle<()>>>,
}

/// The sync orchestrator. Cheap to clone; clones share one engine.
#[derive(Clone)]
pub struct SyncOrchestrator {
    inner: Arc<Inner>,
}

impl SyncOrchestrator {
    /// Starts building an orchestrator.
    pub fn builder(config: SyncConfig, store: Arc<dyn KeyValueStore>) -> SyncOrchestratorBuilder {
        SyncOrchestratorBuilder::new(config, store)
    }

    /// Starts automatic sync.
    ///
    /// Begins connectivity polling, listens for connectivity transitions,
    /// arms the periodic timer and spawns an initial cycle.
    pub async fn start(&self) {
        let inner = &self.inner;
        if inner.started.swap(true, Ordering::SeqCst) {
            debug!("orchestrator already started");
            return;
        }
        match inner.checkpoint.get().await {
            Ok(Some(at)) => {
                let mut last = inner.last_sync.lock();
                if last.is_none() {
                    *last = Some(at);
                }
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, "failed to read checkpoint"),
        }

        inner.monitor.start();
        let listener = Inner::spawn_listener(inner);
        if let Some(previous) = inner.listener.lock().replace(listener) {
            previous.abort();
        }
        Inner::arm_periodic(inner);
        info!(interval_secs = inner.config.sync_interval.as_secs(), "sync started");
        Inner::spawn_cycle(inner.clone(), Trigger::Timer);
    }

    /// Stops automatic sync and cancels every timer.
    ///
    /// A cycle already in flight runs to completion.
    pub fn stop(&self) {
        let inner = &self.inner;
        inner.started.store(false, Ordering::SeqCst);
        inner.timers.cancel_all();
        inner.monitor.stop();
        if let Some(listener) = inner.listener.lock().take() {
            listener.abort();
        }
        info!("sync stopped");
    }

    /// Runs one cycle now, unless one is already running.
    pub async fn start_sync(&self) -> CycleOutcome {
        self.inner.run_cycle(Trigger::Manual).await
    }

    /// Clears offline mode, the halt and the failure counter, then runs a
    /// cycle.
    pub async fn force_sync(&self) -> CycleOutcome {
        let inner = &self.inner;
        inner.halted.store(false, Ordering::SeqCst);
        inner.offline_mode.store(false, Ordering::SeqCst);
        inner.failures.store(0, Ordering::SeqCst);
        inner.timers.backoff.cancel();
        inner.timers.reconnect.cancel();
        info!("forced sync");
        inner.run_cycle(Trigger::Manual).await
    }

    /// Clears timers, counters and the entire outbox.
    pub async fn reset_sync_state(&self) -> SyncResult<usize> {
        let inner = &self.inner;
        inner.timers.cancel_all();
        inner.failures.store(0, Ordering::SeqCst);
        inner.halted.store(false, Ordering::SeqCst);
        inner.offline_mode.store(false, Ordering::SeqCst);
        let removed = inner.outbox.clear().await?;
        inner.publish(SyncStatus::Idle, "Sync state reset", Some(0));
        info!(removed, "sync state reset");
        Ok(removed)
    }

    /// Entry point for the host's background trigger. Runs one normal
    /// cycle.
    pub async fn run_background_cycle(&self) -> CycleOutcome {
        self.inner.run_cycle(Trigger::Background).await
    }

    /// Records a local mutation in the outbox.
    pub async fn add_to_queue(
        &self,
        entity_type: &str,
        entity_id: &str,
        operation: SyncOperation,
        payload: impl Into<String>,
        is_binary_payload: bool,
    ) -> SyncResult<SyncLogEntry> {
        let entry = self
            .inner
            .outbox
            .enqueue(entity_type, entity_id, operation, payload, is_binary_payload)
            .await?;
        if let Ok(count) = self.inner.outbox.pending_count().await {
            self.inner.snapshot.send_modify(|s| s.pending_items = Some(count));
        }
        Ok(entry)
    }

    /// Number of pending outbox entries.
    pub async fn pending_count(&self) -> SyncResult<usize> {
        self.inner.outbox.pending_count().await
    }

    /// Sends unsent error records now.
    pub async fn report_errors(&self) -> SyncResult<ReportSummary> {
        match &self.inner.reporter {
            Some(reporter) => reporter.report_pending().await,
            None => Err(SyncError::NotConfigured("error report url")),
        }
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> SyncSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    /// Subscribes to snapshot changes.
    pub fn subscribe(&self) -> watch::Receiver<SyncSnapshot> {
        self.inner.snapshot.subscribe()
    }

    /// Subscribes to online-flag transitions.
    pub fn subscribe_online(&self) -> watch::Receiver<bool> {
        self.inner.monitor.subscribe()
    }

    /// The cached online flag.
    pub fn is_online(&self) -> bool {
        self.inner.monitor.is_online()
    }

    /// The connectivity monitor.
    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.inner.monitor
    }

    /// Consecutive failed cycles.
    pub fn failure_count(&self) -> u32 {
        self.inner.failures.load(Ordering::SeqCst)
    }

    /// Returns true when automatic sync is halted.
    pub fn is_halted(&self) -> bool {
        self.inner.halted.load(Ordering::SeqCst)
    }

    /// Returns true while in temporary offline mode.
    pub fn is_offline_mode(&self) -> bool {
        self.inner.offline_mode.load(Ordering::SeqCst)
    }

    /// Returns true while a cycle runs.
    pub fn is_syncing(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Waits until no cycle is running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.cycle_done.notified();
            if !self.is_syncing() {
                return;
            }
            notified.await;
        }
    }

    /// The outbox.
    pub fn outbox(&self) -> &OutboxLogStore {
        &self.inner.outbox
    }

    /// The error store.
    pub fn error_store(&self) -> &ErrorStore {
        &self.inner.errors
    }

    /// The download checkpoint.
    pub fn checkpoint(&self) -> &CheckpointStore {
        &self.inner.checkpoint
    }

    /// Registers periodic background sync with the host.
    pub async fn start_background_sync(&self) -> SyncResult<()> {
        self.inner.background.start().await
    }

    /// Cancels periodic background sync.
    pub async fn stop_background_sync(&self) -> SyncResult<()> {
        self.inner.background.stop().await
    }

    /// Asks the host to run a background cycle now.
    pub async fn trigger_background_sync_now(&self) -> SyncResult<()> {
        self.inner.background.trigger_now().await
    }

    /// Returns true if periodic background sync is registered.
    pub async fn is_background_sync_active(&self) -> SyncResult<bool> {
        self.inner.background.is_active().await
    }
}

impl Inner {
    #[instrument(skip(self))]
    async fn run_cycle(self: &Arc<Self>, trigger: Trigger) -> CycleOutcome {
        if trigger.is_automatic() && self.halted.load(Ordering::SeqCst) {
            debug!("automatic sync halted; skipping");
            return CycleOutcome::Skipped(SkipReason::Halted);
        }
        let Some(_guard) = FlightGuard::acquire(&self.running, &self.cycle_done) else {
            debug!("cycle already in flight; dropping request");
            return CycleOutcome::Skipped(SkipReason::AlreadyRunning);
        };
        if !self.monitor.is_online() {
            self.publish(SyncStatus::Offline, "No network connection", None);
            return CycleOutcome::Skipped(SkipReason::Offline);
        }

        let pending = self.outbox.pending_count().await.ok();
        self.publish(SyncStatus::Syncing, "Syncing", pending);

        match self.cycle().await {
            Ok(report) => {
                self.on_success(&report).await;
                CycleOutcome::Completed(report)
            }
            Err(err) => {
                self.on_failure(&err).await;
                CycleOutcome::Failed(err)
            }
        }
    }

    async fn cycle(&self) -> SyncResult<CycleReport> {
        let upload = self.upload.run().await?;
        let download = self.download.run().await?;
        Ok(CycleReport { upload, download })
    }

    async fn on_success(self: &Arc<Self>, report: &CycleReport) {
        self.failures.store(0, Ordering::SeqCst);
        self.halted.store(false, Ordering::SeqCst);
        self.offline_mode.store(false, Ordering::SeqCst);
        let now = Utc::now();
        *self.last_sync.lock() = Some(now);

        // Connectivity dropped while the cycle was in flight
        if !self.monitor.is_online() {
            info!(uploaded = report.upload.uploaded, "sync cycle complete after connection loss");
            Inner::wait_offline(self, "Connection lost; waiting to reconnect");
            return;
        }

        self.timers.backoff.cancel();
        self.timers.reconnect.cancel();
        if self.started.load(Ordering::SeqCst) {
            Inner::arm_periodic(self);
        }

        let pending = self.outbox.pending_count().await.ok();
        info!(
            uploaded = report.upload.uploaded,
            downloaded = report.download.items_downloaded,
            incremental = report.download.mode.is_incremental(),
            "sync cycle complete"
        );
        self.publish(SyncStatus::Success, "Sync complete", pending);
    }

    async fn on_failure(self: &Arc<Self>, err: &SyncError) {
        let failures = self.failures.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        let policy = &self.config.retry;
        warn!(failures, category = err.category().as_str(), error = %err, "sync cycle failed");

        let route = FailureRoute::for_failure(policy, failures, err.category());
        if route != FailureRoute::Halt && !self.monitor.is_online() {
            Inner::wait_offline(self, "No network connection; waiting to reconnect");
            return;
        }

        match route {
            FailureRoute::Halt => {
                self.halted.store(true, Ordering::SeqCst);
                self.timers.cancel_all();
                error!(failures, "automatic sync halted");
                self.publish(SyncStatus::Error, HALTED_MESSAGE, None);
                self.notify(HALTED_MESSAGE).await;
                Inner::schedule_report(self);
            }
            FailureRoute::OfflineMode => {
                Inner::enter_offline_mode(self, "Server unreachable; waiting to reconnect");
            }
            FailureRoute::Recovery => {
                self.publish(SyncStatus::Recovery, "Cleaning up outbox after repeated failures", None);
                let recovery = &self.config.recovery;
                match self
                    .outbox
                    .purge_stale(Utc::now(), recovery.offline_timeout, recovery.entry_retry_ceiling)
                    .await
                {
                    Ok(purged) => {
                        info!(stale = purged.stale, corrupt = purged.corrupt, "outbox recovery finished");
                        self.degrade(failures, err).await;
                        Inner::schedule_report(self);
                    }
                    Err(purge_err) => {
                        error!(error = %purge_err, "outbox recovery failed");
                        Inner::enter_offline_mode(self, "Recovery failed; waiting to reconnect");
                    }
                }
            }
            FailureRoute::Degraded => self.degrade(failures, err).await,
        }
    }

    async fn degrade(self: &Arc<Self>, failures: u32, err: &SyncError) {
        let delay = self.config.retry.delay_for_failure(failures);
        Inner::arm_backoff(self, delay);
        let pending = self.outbox.pending_count().await.ok();
        self.publish(
            SyncStatus::Degraded,
            format!(
                "Sync failed: {err}; retrying in {}s (attempt {failures} of {})",
                delay.as_secs(),
                self.config.retry.max_consecutive_failures
            ),
            pending,
        );
    }

    fn enter_offline_mode(this: &Arc<Self>, message: &str) {
        this.offline_mode.store(true, Ordering::SeqCst);
        Inner::wait_offline(this, message);
    }

    /// Cancels every timer and waits for the reconnect poll.
    ///
    /// Unlike offline mode this keeps the failure counter across the
    /// reconnect.
    fn wait_offline(this: &Arc<Self>, message: &str) {
        this.timers.cancel_all();
        this.publish(SyncStatus::Offline, message, None);
        Inner::arm_reconnect_poll(this);
    }

    fn on_connectivity_lost(&self) {
        self.timers.cancel_all();
        self.publish(SyncStatus::Offline, "Connection lost", None);
    }

    async fn on_connectivity_restored(self: &Arc<Self>) {
        if self.halted.load(Ordering::SeqCst) {
            debug!("connectivity restored while halted; staying halted");
            return;
        }
        if self.monitor.probe().await {
            if self.offline_mode.swap(false, Ordering::SeqCst) {
                self.failures.store(0, Ordering::SeqCst);
            }
            self.timers.reconnect.cancel();
            self.publish(SyncStatus::Idle, "Connection restored; resuming sync", None);
            if self.started.load(Ordering::SeqCst) {
                Inner::arm_periodic(self);
            }
            Inner::spawn_cycle(self.clone(), Trigger::Reconnect);
        } else {
            Inner::enter_offline_mode(self, "Network available but server unreachable");
        }
    }

    fn spawn_listener(this: &Arc<Self>) -> JoinHandle<()> {
        let mut rx = this.monitor.subscribe();
        let weak = Arc::downgrade(this);
        tokio::spawn(async move {
            let mut was_online = *rx.borrow_and_update();
            while rx.changed().await.is_ok() {
                let online = *rx.borrow_and_update();
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                match (was_online, online) {
                    (true, false) => inner.on_connectivity_lost(),
                    (false, true) => inner.on_connectivity_restored().await,
                    _ => {}
                }
                was_online = online;
            }
        })
    }

    fn spawn_cycle(this: Arc<Self>, trigger: Trigger) {
        tokio::spawn(async move {
            this.run_cycle(trigger).await;
        });
    }

    fn arm_periodic(this: &Arc<Self>) {
        let weak = Arc::downgrade(this);
        let interval = this.config.sync_interval;
        this.timers.periodic.arm(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if inner.monitor.is_online() && !inner.offline_mode.load(Ordering::SeqCst) {
                    Inner::spawn_cycle(inner, Trigger::Timer);
                }
            }
        });
    }

    fn arm_backoff(this: &Arc<Self>, delay: std::time::Duration) {
        this.timers.periodic.cancel();
        let weak = Arc::downgrade(this);
        this.timers.backoff.arm(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                Inner::spawn_cycle(inner, Trigger::Timer);
            }
        });
        debug!(delay_secs = delay.as_secs(), "backoff retry armed");
    }

    fn arm_reconnect_poll(this: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(this);
        let interval = this.config.connectivity.reconnect_poll_interval;
        this.timers.reconnect.arm(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if inner.monitor.is_online() && inner.monitor.probe().await {
                    if inner.offline_mode.swap(false, Ordering::SeqCst) {
                        inner.failures.store(0, Ordering::SeqCst);
                    }
                    info!("reconnected");
                    inner.publish(SyncStatus::Idle, "Reconnected; resuming sync", None);
                    if inner.started.load(Ordering::SeqCst) {
                        Inner::arm_periodic(&inner);
                    }
                    Inner::spawn_cycle(inner, Trigger::Reconnect);
                    return;
                }
                debug!("still offline");
            }
        });
    }

    fn schedule_report(this: &Arc<Self>) {
        let Some(reporter) = this.reporter.clone() else {
            return;
        };
        tokio::spawn(async move {
            if let Err(err) = reporter.report_pending().await {
                warn!(error = %err, "scheduled error report failed");
            }
        });
    }

    async fn notify(&self, message: &str) {
        if let Err(err) = self.notifier.show(STATUS_NOTIFICATION_ID, "Sync", message).await {
            debug!(error = %err, "failed to show notification");
        }
    }

    fn publish(&self, status: SyncStatus, message: impl Into<String>, pending: Option<usize>) {
        let message = message.into();
        let pending = pending.or_else(|| self.snapshot.borrow().pending_items);
        let snapshot = SyncSnapshot::new(status, message.clone())
            .with_last_sync(*self.last_sync.lock())
            .with_pending(pending);
        debug!(%status, %message, "status changed");
        self.snapshot.send_replace(snapshot);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.timers.cancel_all();
        if let Some(listener) = self.listener.get_mut().take() {
            listener.abort();
        }
    }
}

/// Builder for [`SyncOrchestrator`].
pub struct SyncOrchestratorBuilder {
    config: SyncConfig,
    store: Arc<dyn KeyValueStore>,
    client: Option<Arc<dyn HttpClient>>,
    strategies: Vec<Arc<dyn EntityDownloadStrategy>>,
    data_handler: Arc<dyn LocalDataHandler>,
    notifier: Arc<dyn Notifier>,
    scheduler: Arc<dyn BackgroundScheduler>,
    probe: Option<Arc<dyn ReachabilityProbe>>,
    monitor: Option<Arc<ConnectivityMonitor>>,
}

impl SyncOrchestratorBuilder {
    /// Creates a builder with no-op host collaborators.
    pub fn new(config: SyncConfig, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            config,
            store,
            client: None,
            strategies: Vec::new(),
            data_handler: Arc::new(NoopDataHandler),
            notifier: Arc::new(NoopNotifier),
            scheduler: Arc::new(NoopScheduler),
            probe: None,
            monitor: None,
        }
    }

    /// Sets the HTTP client. Required.
    pub fn with_http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Appends a download strategy. Strategies run in the order added.
    pub fn with_strategy(mut self, strategy: Arc<dyn EntityDownloadStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    /// Sets the host's local-data handler.
    pub fn with_data_handler(mut self, handler: Arc<dyn LocalDataHandler>) -> Self {
        self.data_handler = handler;
        self
    }

    /// Sets the notifier.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Sets the background scheduler.
    pub fn with_scheduler(mut self, scheduler: Arc<dyn BackgroundScheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Sets the reachability probe used by the default monitor.
    pub fn with_probe(mut self, probe: Arc<dyn ReachabilityProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Uses an existing connectivity monitor.
    pub fn with_monitor(mut self, monitor: Arc<ConnectivityMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Builds the orchestrator.
    pub fn build(self) -> SyncResult<SyncOrchestrator> {
        self.config.validate()?;
        let client = self.client.ok_or(SyncError::NotConfigured("http client"))?;
        let config = self.config;

        let outbox = OutboxLogStore::new(self.store.clone());
        let errors = ErrorStore::new(self.store.clone());
        let checkpoint = CheckpointStore::new(self.store.clone());

        let monitor = match self.monitor {
            Some(monitor) => monitor,
            None => {
                let probe = self.probe.unwrap_or_else(|| {
                    Arc::new(HttpReachabilityProbe::new(client.clone(), &config.connectivity))
                });
                Arc::new(ConnectivityMonitor::new(probe, config.connectivity.poll_interval))
            }
        };

        let upload = UploadStrategy::new(config.clone(), client.clone(), outbox.clone(), errors.clone())
            .with_notifier(self.notifier.clone());
        let download = DownloadStrategy::new(
            &config,
            self.strategies,
            self.data_handler,
            checkpoint.clone(),
            errors.clone(),
        );
        let reporter = config.error_report_url.as_ref().map(|url| {
            Arc::new(
                ErrorReporter::new(errors.clone(), client.clone(), url.clone(), config.reporter.clone())
                    .with_client_id(config.client_id.clone())
                    .with_timeout(config.request_timeout),
            )
        });
        let background = BackgroundSync::new(self.scheduler, self.store.clone(), config.sync_interval);
        let (snapshot, _) = watch::channel(SyncSnapshot::idle());

        Ok(SyncOrchestrator {
            inner: Arc::new(Inner {
                config,
                outbox,
                errors,
                checkpoint,
                upload,
                download,
                reporter,
                monitor,
                notifier: self.notifier,
                background,
                snapshot,
                running: AtomicBool::new(false),
                cycle_done: Notify::new(),
                failures: AtomicU32::new(0),
                halted: AtomicBool::new(false),
                offline_mode: AtomicBool::new(false),
                started: AtomicBool::new(false),
                last_sync: Mutex::new(None),
                timers: Timers::new(),
                listener: Mutex::new(None),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::connectivity::StaticProbe;
    use crate::transport::{MockHttpClient, MockReply};
    use skiff_storage::InMemoryStore;
    use std::time::Duration;

    fn build(client: Arc<MockHttpClient>) -> SyncOrchestrator {
        build_with(SyncConfig::new("https://api.example.com"), client)
    }

    fn build_with(config: SyncConfig, client: Arc<MockHttpClient>) -> SyncOrchestrator {
        SyncOrchestrator::builder(config, Arc::new(InMemoryStore::new()))
            .with_http_client(client)
            .with_probe(Arc::new(StaticProbe::new(true)))
            .build()
            .unwrap()
    }

    #[test]
    fn build_requires_client() {
        let result = SyncOrchestrator::builder(SyncConfig::default(), Arc::new(InMemoryStore::new())).build();
        assert!(matches!(result, Err(SyncError::NotConfigured("http client"))));
    }

    #[tokio::test]
    async fn successful_cycle_resets_counter() {
        let client = Arc::new(MockHttpClient::new());
        let engine = build(client.clone());
        engine
            .add_to_queue("todo", "t1", SyncOperation::Create, "{}", false)
            .await
            .unwrap();
        assert_eq!(engine.snapshot().pending_items, Some(1));

        let outcome = engine.start_sync().await;
        assert!(outcome.is_completed());

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.status, SyncStatus::Success);
        assert_eq!(snapshot.pending_items, Some(0));
        assert!(snapshot.last_sync.is_some());
        assert_eq!(engine.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_degrades_with_attempt_count() {
        let client = Arc::new(MockHttpClient::new());
        client.set_default(MockReply::status(500));
        let engine = build(client.clone());
        engine
            .add_to_queue("todo", "t1", SyncOperation::Create, "{}", false)
            .await
            .unwrap();

        assert!(matches!(engine.start_sync().await, CycleOutcome::Failed(_)));
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.status, SyncStatus::Degraded);
        let message = snapshot.message.unwrap();
        assert!(message.contains("(attempt 1 of 10)"), "{message}");
        assert_eq!(engine.failure_count(), 1);
        assert!(engine.inner.timers.backoff.is_armed());
    }

    #[tokio::test]
    async fn offline_monitor_skips_cycle() {
        let client = Arc::new(MockHttpClient::new());
        let engine = build(client.clone());
        engine.monitor().set_online(false);

        let outcome = engine.start_sync().await;
        assert_eq!(outcome.skip_reason(), Some(SkipReason::Offline));
        assert_eq!(engine.snapshot().status, SyncStatus::Offline);
        assert!(client.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn ceiling_reached_while_offline_still_halts() {
        let client = Arc::new(MockHttpClient::new());
        client.set_default(MockReply::status(500));
        let config = SyncConfig::new("https://api.example.com")
            .with_retry(RetryPolicy::default().with_max_consecutive_failures(2));
        let engine = build_with(config, client.clone());
        engine
            .add_to_queue("todo", "t1", SyncOperation::Create, "{}", false)
            .await
            .unwrap();
        assert!(matches!(engine.start_sync().await, CycleOutcome::Failed(_)));
        assert_eq!(engine.failure_count(), 1);

        // Second failure lands after the flag went down
        engine.monitor().set_online(false);
        engine
            .inner
            .on_failure(&SyncError::Host("upload interrupted".into()))
            .await;

        assert!(engine.is_halted());
        assert_eq!(engine.snapshot().status, SyncStatus::Error);
        assert!(!engine.inner.timers.reconnect.is_armed());
        assert!(!engine.inner.timers.backoff.is_armed());

        engine.monitor().set_online(true);
        let outcome = engine.inner.run_cycle(Trigger::Timer).await;
        assert_eq!(outcome.skip_reason(), Some(SkipReason::Halted));
        assert_eq!(client.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_while_offline_waits_for_reconnect() {
        let client = Arc::new(MockHttpClient::new());
        let engine = build(client.clone());
        engine
            .add_to_queue("todo", "t1", SyncOperation::Create, "{}", false)
            .await
            .unwrap();

        engine.monitor().set_online(false);
        engine
            .inner
            .on_failure(&SyncError::Host("upload interrupted".into()))
            .await;

        assert_eq!(engine.failure_count(), 1);
        assert_eq!(engine.snapshot().status, SyncStatus::Offline);
        assert!(!engine.is_offline_mode());
        assert!(!engine.inner.timers.backoff.is_armed());
        assert!(!engine.inner.timers.periodic.is_armed());
        assert!(engine.inner.timers.reconnect.is_armed());

        // Still down after a poll: nothing sent, counter kept
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(client.requests().is_empty());
        assert_eq!(engine.failure_count(), 1);

        // No listener runs here; the reconnect poll resumes on its own
        engine.monitor().set_online(true);
        let mut rx = engine.subscribe();
        tokio::time::timeout(Duration::from_secs(3600), async {
            while rx.borrow_and_update().status != SyncStatus::Success {
                rx.changed().await.unwrap();
            }
        })
        .await
        .unwrap();
        assert_eq!(engine.failure_count(), 0);
        assert_eq!(engine.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reset_clears_outbox() {
        let client = Arc::new(MockHttpClient::new());
        let engine = build(client);
        for id in ["a", "b"] {
            engine
                .add_to_queue("todo", id, SyncOperation::Update, "{}", false)
                .await
                .unwrap();
        }

        assert_eq!(engine.reset_sync_state().await.unwrap(), 2);
        assert_eq!(engine.pending_count().await.unwrap(), 0);
        assert_eq!(engine.snapshot().status, SyncStatus::Idle);
    }

    #[tokio::test]
    async fn report_requires_url() {
        let engine = build(Arc::new(MockHttpClient::new()));
        assert!(matches!(
            engine.report_errors().await,
            Err(SyncError::NotConfigured(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_idle_returns_when_nothing_runs() {
        let engine = build(Arc::new(MockHttpClient::new()));
        tokio::time::timeout(Duration::from_secs(1), engine.wait_idle())
            .await
            .unwrap();
    }
}
