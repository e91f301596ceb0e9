//! CLI command implementations.

pub mod errors;
pub mod outbox;
pub mod status;
pub mod sync;

use async_trait::async_trait;
use skiff_engine::{
    EntityApplier, HttpClient, HttpEntityDownloadStrategy, HttpReachabilityProbe,
    ReqwestHttpClient, SyncConfig, SyncOrchestrator, SyncResult,
};
use skiff_protocol::EntityChangesPage;
use skiff_storage::FileStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// File name of the store inside the data directory.
pub const STORE_FILE: &str = "skiff.store";

/// Shared command context.
pub struct Context {
    /// Directory holding the store.
    pub data_dir: PathBuf,
    /// Effective configuration.
    pub config: SyncConfig,
}

impl Context {
    /// Loads the configuration file, if any, and validates it.
    pub fn load(data_dir: PathBuf, config: Option<&Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let config = match config {
            Some(path) => SyncConfig::from_json_file(path)?,
            None => SyncConfig::default(),
        };
        config.validate()?;
        Ok(Self { data_dir, config })
    }

    /// Opens the store, creating the data directory when missing.
    pub fn open_store(&self) -> Result<Arc<FileStore>, Box<dyn std::error::Error>> {
        std::fs::create_dir_all(&self.data_dir)?;
        let store = FileStore::open(&self.data_dir.join(STORE_FILE))?;
        Ok(Arc::new(store))
    }

    /// Builds an engine over the store with one HTTP download strategy per
    /// entity type.
    pub fn engine(&self, entities: &[String]) -> Result<SyncOrchestrator, Box<dyn std::error::Error>> {
        let store = self.open_store()?;
        let client: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new()?);
        let probe = Arc::new(HttpReachabilityProbe::new(client.clone(), &self.config.connectivity));

        let mut builder = SyncOrchestrator::builder(self.config.clone(), store)
            .with_http_client(client.clone())
            .with_probe(probe);
        for entity in entities {
            let strategy =
                HttpEntityDownloadStrategy::new(entity.as_str(), &self.config, client.clone(), Arc::new(LogApplier));
            builder = builder.with_strategy(Arc::new(strategy));
        }
        Ok(builder.build()?)
    }
}

/// Logs downloaded pages instead of applying them.
struct LogApplier;

#[async_trait]
impl EntityApplier for LogApplier {
    async fn apply_page(
        &self,
        entity_type: &str,
        page: &EntityChangesPage,
        is_incremental: bool,
    ) -> SyncResult<()> {
        info!(
            entity_type,
            records = page.record_count(),
            deleted = page.deleted.len(),
            is_incremental,
            "received page"
        );
        Ok(())
    }
}

/// Formats a byte count for display.
pub fn format_size(bytes: usize) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
