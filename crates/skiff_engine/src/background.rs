//! Background sync registration.

use crate::error::SyncResult;
use crate::host::BackgroundScheduler;
use skiff_storage::KeyValueStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Name of the periodic background task.
pub const PERIODIC_TASK: &str = "skiff.periodic_sync";
/// Name of the one-off background task.
pub const ONE_OFF_TASK: &str = "skiff.sync_now";
/// Shortest interval host schedulers accept for periodic work.
pub const MIN_BACKGROUND_INTERVAL: Duration = Duration::from_secs(15 * 60);

const ACTIVE_KEY: &str = "background:active";

/// Registers engine cycles with the host scheduler.
///
/// Whether background sync is on survives restarts through a flag in the
/// key-value store.
#[derive(Clone)]
pub struct BackgroundSync {
    scheduler: Arc<dyn BackgroundScheduler>,
    store: Arc<dyn KeyValueStore>,
    interval: Duration,
}

impl BackgroundSync {
    /// Creates background control. `interval` is raised to
    /// [`MIN_BACKGROUND_INTERVAL`] if shorter.
    pub fn new(
        scheduler: Arc<dyn BackgroundScheduler>,
        store: Arc<dyn KeyValueStore>,
        interval: Duration,
    ) -> Self {
        Self {
            scheduler,
            store,
            interval: interval.max(MIN_BACKGROUND_INTERVAL),
        }
    }

    /// Registers the periodic task and records it as active.
    pub async fn start(&self) -> SyncResult<()> {
        self.scheduler
            .register_periodic(PERIODIC_TASK, self.interval, true)
            .await?;
        self.store.set_bool(ACTIVE_KEY, true).await?;
        info!(interval_secs = self.interval.as_secs(), "background sync started");
        Ok(())
    }

    /// Cancels the periodic task and records it as inactive.
    pub async fn stop(&self) -> SyncResult<()> {
        self.scheduler.cancel(PERIODIC_TASK).await?;
        self.store.set_bool(ACTIVE_KEY, false).await?;
        info!("background sync stopped");
        Ok(())
    }

    /// Asks the host to run one cycle as soon as possible.
    pub async fn trigger_now(&self) -> SyncResult<()> {
        self.scheduler.register_one_off(ONE_OFF_TASK).await
    }

    /// Returns the persisted flag.
    pub async fn is_active(&self) -> SyncResult<bool> {
        Ok(self.store.get_bool(ACTIVE_KEY).await?.unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use skiff_storage::InMemoryStore;

    #[derive(Default)]
    struct RecordingScheduler {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl BackgroundScheduler for RecordingScheduler {
        async fn register_periodic(&self, name: &str, min_interval: Duration, requires_network: bool) -> SyncResult<()> {
            self.calls
                .lock()
                .push(format!("periodic {name} {} {requires_network}", min_interval.as_secs()));
            Ok(())
        }

        async fn register_one_off(&self, name: &str) -> SyncResult<()> {
            self.calls.lock().push(format!("once {name}"));
            Ok(())
        }

        async fn cancel(&self, name: &str) -> SyncResult<()> {
            self.calls.lock().push(format!("cancel {name}"));
            Ok(())
        }
    }

    #[tokio::test]
    async fn start_stop_trigger() {
        let scheduler = Arc::new(RecordingScheduler::default());
        let store = Arc::new(InMemoryStore::new());
        let background = BackgroundSync::new(scheduler.clone(), store.clone(), Duration::from_secs(60));

        assert!(!background.is_active().await.unwrap());
        background.start().await.unwrap();
        assert!(background.is_active().await.unwrap());
        background.trigger_now().await.unwrap();
        background.stop().await.unwrap();
        assert!(!background.is_active().await.unwrap());

        assert_eq!(
            *scheduler.calls.lock(),
            [
                "periodic skiff.periodic_sync 900 true",
                "once skiff.sync_now",
                "cancel skiff.periodic_sync",
            ]
        );

        // The flag is persisted, not held in memory
        let reopened = BackgroundSync::new(scheduler, store, Duration::from_secs(3600));
        assert!(!reopened.is_active().await.unwrap());
    }
}
