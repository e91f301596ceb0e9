//! Test fixtures and engine helpers.
//!
//! Provides outbox entry builders and a fully wired [`TestEngine`] backed by
//! an in-memory store and a mock HTTP client.

use crate::scripted::{RecordingDataHandler, RecordingNotifier, RecordingScheduler};
use chrono::{DateTime, TimeZone, Utc};
use skiff_engine::{
    EntityDownloadStrategy, MockHttpClient, OutboxLogStore, StaticProbe, SyncConfig,
    SyncOrchestrator,
};
use skiff_protocol::{BinaryPayload, SyncLogEntry, SyncOperation};
use skiff_storage::{FileStore, InMemoryStore};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Base URL used by test configurations.
pub const TEST_BASE_URL: &str = "https://sync.test";

/// A fixed timestamp to build deterministic entries from.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 15, 9, 0, 0)
        .single()
        .expect("valid fixed timestamp")
}

/// A data entry created at `created_at`.
pub fn data_entry(entity_type: &str, entity_id: &str, created_at: DateTime<Utc>) -> SyncLogEntry {
    let payload = serde_json::json!({ "id": entity_id }).to_string();
    SyncLogEntry::new(entity_type, entity_id, SyncOperation::Update, payload, false)
        .with_created_at(created_at)
}

/// `count` data entries one second apart, ids `item-000`, `item-001`, ...
pub fn data_entries(count: usize, start: DateTime<Utc>) -> Vec<SyncLogEntry> {
    (0..count)
        .map(|i| {
            data_entry(
                "item",
                &format!("item-{i:03}"),
                start + chrono::Duration::seconds(i as i64),
            )
        })
        .collect()
}

/// A binary entry whose payload carries `content` and a `fileName` sidecar.
pub fn binary_entry(entity_type: &str, entity_id: &str, content: &[u8]) -> SyncLogEntry {
    let mut sidecar = serde_json::Map::new();
    sidecar.insert("fileName".into(), format!("{entity_id}.bin").into());
    let payload = BinaryPayload::new(content.to_vec(), sidecar)
        .encode()
        .expect("encode binary payload");
    SyncLogEntry::new(entity_type, entity_id, SyncOperation::Create, payload, true)
}

/// A configuration with short timeouts and long automatic intervals.
pub fn test_config() -> SyncConfig {
    let mut config = SyncConfig::new(TEST_BASE_URL)
        .with_request_timeout(Duration::from_secs(5))
        .with_sync_interval(Duration::from_secs(600));
    config.connectivity.reconnect_poll_interval = Duration::from_secs(30);
    config.connectivity.poll_interval = Duration::from_secs(3600);
    config
}

/// A file store in a fresh temporary directory.
///
/// Keep the returned directory alive for as long as the store is used.
pub fn temp_file_store() -> (TempDir, Arc<FileStore>) {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let store = FileStore::open(&dir.path().join("skiff.store")).expect("Failed to open store");
    (dir, Arc::new(store))
}

/// An orchestrator wired to in-memory and recording collaborators.
pub struct TestEngine {
    /// The engine under test.
    pub engine: SyncOrchestrator,
    /// Backing store.
    pub store: Arc<InMemoryStore>,
    /// Mock transport.
    pub client: Arc<MockHttpClient>,
    /// Reachability probe answer.
    pub probe: Arc<StaticProbe>,
    /// Host data handler.
    pub handler: Arc<RecordingDataHandler>,
    /// Host notifier.
    pub notifier: Arc<RecordingNotifier>,
    /// Host scheduler.
    pub scheduler: Arc<RecordingScheduler>,
}

impl TestEngine {
    /// Starts building a test engine.
    pub fn builder() -> TestEngineBuilder {
        TestEngineBuilder::default()
    }

    /// Writes entries straight into the outbox.
    pub async fn seed(&self, entries: &[SyncLogEntry]) {
        let outbox = OutboxLogStore::new(self.store.clone());
        for entry in entries {
            outbox.put(entry).await.expect("seed outbox entry");
        }
    }

    /// The outbox over the test store.
    pub fn outbox(&self) -> OutboxLogStore {
        OutboxLogStore::new(self.store.clone())
    }

    /// Marks the device offline, both flag and probe.
    pub fn go_offline(&self) {
        self.probe.set(false);
        self.client.set_offline(true);
        self.engine.monitor().set_online(false);
    }

    /// Restores the probe and transport, then raises the online flag.
    pub fn go_online(&self) {
        self.probe.set(true);
        self.client.set_offline(false);
        self.engine.monitor().set_online(true);
    }
}

/// Builder for [`TestEngine`].
pub struct TestEngineBuilder {
    config: SyncConfig,
    strategies: Vec<Arc<dyn EntityDownloadStrategy>>,
    client: Arc<MockHttpClient>,
    watch_checkpoint: bool,
}

impl Default for TestEngineBuilder {
    fn default() -> Self {
        Self {
            config: test_config(),
            strategies: Vec::new(),
            client: Arc::new(MockHttpClient::new()),
            watch_checkpoint: false,
        }
    }
}

impl TestEngineBuilder {
    /// Replaces the configuration.
    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Adds a download strategy.
    pub fn strategy(mut self, strategy: Arc<dyn EntityDownloadStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    /// Uses a prepared mock client.
    pub fn client(mut self, client: Arc<MockHttpClient>) -> Self {
        self.client = client;
        self
    }

    /// Records the stored checkpoint when deletions are applied.
    pub fn watch_checkpoint(mut self) -> Self {
        self.watch_checkpoint = true;
        self
    }

    /// Builds the engine.
    pub fn build(self) -> TestEngine {
        let store = Arc::new(InMemoryStore::new());
        let probe = Arc::new(StaticProbe::new(true));
        let handler = Arc::new(RecordingDataHandler::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let scheduler = Arc::new(RecordingScheduler::new());
        if self.watch_checkpoint {
            handler.watch_checkpoint(store.clone());
        }

        let mut builder = SyncOrchestrator::builder(self.config, store.clone())
            .with_http_client(self.client.clone())
            .with_probe(probe.clone())
            .with_data_handler(handler.clone())
            .with_notifier(notifier.clone())
            .with_scheduler(scheduler.clone());
        for strategy in self.strategies {
            builder = builder.with_strategy(strategy);
        }

        TestEngine {
            engine: builder.build().expect("build test engine"),
            store,
            client: self.client,
            probe,
            handler,
            notifier,
            scheduler,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skiff_storage::KeyValueStore;

    #[test]
    fn entries_are_spaced_and_named() {
        let entries = data_entries(3, base_time());
        assert_eq!(entries[2].entity_id, "item-002");
        assert_eq!(entries[2].created_at - entries[0].created_at, chrono::Duration::seconds(2));
        assert!(entries.iter().all(|e| !e.is_binary_payload));
    }

    #[test]
    fn binary_entry_decodes() {
        let entry = binary_entry("photo", "p1", b"abc");
        let payload = entry.binary_payload().unwrap();
        assert_eq!(payload.content, b"abc");
        assert_eq!(payload.sidecar["fileName"], "p1.bin");
    }

    #[tokio::test]
    async fn temp_store_is_writable() {
        let (_dir, store) = temp_file_store();
        store.set_bool("k", true).await.unwrap();
        assert_eq!(store.get_bool("k").await.unwrap(), Some(true));
    }

    #[tokio::test]
    async fn seeded_entries_are_pending() {
        let t = TestEngine::builder().build();
        t.seed(&data_entries(4, base_time())).await;
        assert_eq!(t.engine.pending_count().await.unwrap(), 4);
    }
}
