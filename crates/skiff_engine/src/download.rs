//! Incremental and full download.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::error_store::ErrorStore;
use crate::host::LocalDataHandler;
use crate::outbox::to_chrono;
use crate::transport::HttpClient;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use skiff_protocol::{
    merge_deletions, DeletedEntityIds, DownloadOutcome, EntityChangesPage, SyncErrorRecord,
};
use skiff_storage::KeyValueStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Store key of the last successful download.
pub const CHECKPOINT_KEY: &str = "checkpoint:last_sync";

/// Downloads one entity type from the server.
///
/// `since` is the checkpoint for incremental runs and `None` for full runs.
/// Transport failures should be returned as errors so they are classified as
/// connectivity problems; anything the server refuses can be reported as an
/// unsuccessful [`DownloadOutcome`].
#[async_trait]
pub trait EntityDownloadStrategy: Send + Sync {
    /// Name used in logs and error records.
    fn name(&self) -> &str;

    /// Fetches and applies server changes.
    async fn download_data(
        &self,
        since: Option<DateTime<Utc>>,
        is_incremental: bool,
    ) -> SyncResult<DownloadOutcome>;
}

/// Persists the download checkpoint.
#[derive(Clone)]
pub struct CheckpointStore {
    store: Arc<dyn KeyValueStore>,
}

impl CheckpointStore {
    /// Creates a checkpoint store over `store`.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Reads the checkpoint. An unparsable value reads as absent.
    pub async fn get(&self) -> SyncResult<Option<DateTime<Utc>>> {
        let Some(text) = self.store.get_string(CHECKPOINT_KEY).await? else {
            return Ok(None);
        };
        match DateTime::parse_from_rfc3339(&text) {
            Ok(at) => Ok(Some(at.with_timezone(&Utc))),
            Err(err) => {
                warn!(value = %text, error = %err, "ignoring unreadable checkpoint");
                Ok(None)
            }
        }
    }

    /// Writes the checkpoint.
    pub async fn set(&self, at: DateTime<Utc>) -> SyncResult<()> {
        self.store
            .set_string(CHECKPOINT_KEY, at.to_rfc3339_opts(SecondsFormat::Millis, true))
            .await?;
        Ok(())
    }

    /// Removes the checkpoint, forcing the next download to be full.
    pub async fn clear(&self) -> SyncResult<()> {
        self.store.remove(CHECKPOINT_KEY).await?;
        Ok(())
    }
}

/// How a download run fetches data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadMode {
    /// Only changes since the checkpoint.
    Incremental {
        /// The checkpoint.
        since: DateTime<Utc>,
    },
    /// Everything, after clearing local data.
    Full,
}

impl DownloadMode {
    /// Chooses the mode for a run at `now`.
    ///
    /// Incremental requires incremental sync to be enabled and a checkpoint
    /// no older than `max_interval`. A checkpoint in the future (clock moved
    /// back) forces a full run.
    pub fn decide(
        use_incremental: bool,
        max_interval: Duration,
        checkpoint: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        match checkpoint {
            Some(since) if use_incremental && since <= now && now - since <= to_chrono(max_interval) => {
                DownloadMode::Incremental { since }
            }
            _ => DownloadMode::Full,
        }
    }

    /// Returns true for incremental runs.
    pub fn is_incremental(&self) -> bool {
        matches!(self, DownloadMode::Incremental { .. })
    }

    /// The `since` argument handed to strategies.
    pub fn since(&self) -> Option<DateTime<Utc>> {
        match self {
            DownloadMode::Incremental { since } => Some(*since),
            DownloadMode::Full => None,
        }
    }
}

/// Aggregate of one download run.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadReport {
    /// Mode the run used.
    pub mode: DownloadMode,
    /// Records fetched across strategies.
    pub items_downloaded: u64,
    /// Server-side deletions handed to the host.
    pub deleted: DeletedEntityIds,
    /// Media ids handed to prefetch.
    pub media_ids: Vec<String>,
    /// New checkpoint.
    pub checkpoint: DateTime<Utc>,
}

/// Runs the registered per-entity strategies.
pub struct DownloadStrategy {
    use_incremental: bool,
    max_interval: Duration,
    strategies: Vec<Arc<dyn EntityDownloadStrategy>>,
    handler: Arc<dyn LocalDataHandler>,
    checkpoint: CheckpointStore,
    errors: ErrorStore,
}

impl DownloadStrategy {
    /// Creates a download strategy.
    pub fn new(
        config: &SyncConfig,
        strategies: Vec<Arc<dyn EntityDownloadStrategy>>,
        handler: Arc<dyn LocalDataHandler>,
        checkpoint: CheckpointStore,
        errors: ErrorStore,
    ) -> Self {
        Self {
            use_incremental: config.use_incremental_sync,
            max_interval: config.max_incremental_sync_interval,
            strategies,
            handler,
            checkpoint,
            errors,
        }
    }

    /// Number of registered strategies.
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    /// Returns true if no strategy is registered.
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Runs every strategy in registration order.
    ///
    /// The first failure aborts the run and leaves the checkpoint untouched.
    /// Deletions reach the host before the checkpoint advances.
    #[instrument(skip(self))]
    pub async fn run(&self) -> SyncResult<DownloadReport> {
        let started = Utc::now();
        let mode = DownloadMode::decide(
            self.use_incremental,
            self.max_interval,
            self.checkpoint.get().await?,
            started,
        );
        let is_incremental = mode.is_incremental();
        info!(is_incremental, strategies = self.strategies.len(), "starting download");

        if !is_incremental {
            if let Err(err) = self.handler.clear_local_data().await {
                return Err(self.fail("clear_local_data", is_incremental, err).await);
            }
        }

        let mut items_downloaded = 0;
        let mut deleted = DeletedEntityIds::new();
        let mut media_ids: Vec<String> = Vec::new();

        for strategy in &self.strategies {
            let name = strategy.name().to_string();
            let outcome = match strategy.download_data(mode.since(), is_incremental).await {
                Ok(outcome) if outcome.success => outcome,
                Ok(outcome) => {
                    let err = SyncError::DownloadFailed {
                        strategy: name.clone(),
                        message: outcome.message,
                    };
                    return Err(self.fail(&name, is_incremental, err).await);
                }
                Err(err) => return Err(self.fail(&name, is_incremental, err).await),
            };
            debug!(strategy = %name, items = outcome.items_downloaded, "strategy finished");

            items_downloaded += outcome.items_downloaded;
            merge_deletions(&mut deleted, &outcome.deleted_entity_ids);
            for id in outcome.media_ids() {
                if !media_ids.contains(&id) {
                    media_ids.push(id);
                }
            }
        }

        if !deleted.is_empty() {
            if let Err(err) = self.handler.apply_deletions(&deleted).await {
                return Err(self.fail("apply_deletions", is_incremental, err).await);
            }
        }

        if !media_ids.is_empty() {
            if let Err(err) = self.handler.prefetch_media(&media_ids).await {
                warn!(count = media_ids.len(), error = %err, "media prefetch failed");
            }
        }

        self.checkpoint.set(started).await?;
        info!(items_downloaded, is_incremental, "download finished");

        Ok(DownloadReport {
            mode,
            items_downloaded,
            deleted,
            media_ids,
            checkpoint: started,
        })
    }

    async fn fail(&self, step: &str, is_incremental: bool, err: SyncError) -> SyncError {
        warn!(step, error = %err, "download failed");
        let record = SyncErrorRecord::new(format!("download step {step} failed: {err}"))
            .with_category(err.category().as_str())
            .with_metadata("strategy", step)
            .with_metadata("isIncremental", is_incremental)
            .with_stack_trace(err.chain());
        self.errors.record_best_effort(&record).await;
        err
    }
}

/// Applies pages fetched by [`HttpEntityDownloadStrategy`] to local data.
#[async_trait]
pub trait EntityApplier: Send + Sync {
    /// Applies one page of changes for `entity_type`.
    async fn apply_page(
        &self,
        entity_type: &str,
        page: &EntityChangesPage,
        is_incremental: bool,
    ) -> SyncResult<()>;
}

/// Pages through `GET {base}/sync/{entity}?since=&page=&pageSize=`.
pub struct HttpEntityDownloadStrategy {
    entity_type: String,
    base_url: String,
    client: Arc<dyn HttpClient>,
    applier: Arc<dyn EntityApplier>,
    page_size: usize,
    timeout: Duration,
    media_field: Option<String>,
}

impl HttpEntityDownloadStrategy {
    /// Creates a strategy for `entity_type`.
    pub fn new(
        entity_type: impl Into<String>,
        config: &SyncConfig,
        client: Arc<dyn HttpClient>,
        applier: Arc<dyn EntityApplier>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            base_url: config.base_url.clone(),
            client,
            applier,
            page_size: 100,
            timeout: config.request_timeout,
            media_field: None,
        }
    }

    /// Sets the page size.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Collects the string field `field` of every record as a media id.
    pub fn with_media_field(mut self, field: impl Into<String>) -> Self {
        self.media_field = Some(field.into());
        self
    }

    fn page_url(&self, since: Option<DateTime<Utc>>, page: u32) -> String {
        let mut url = format!(
            "{}/sync/{}?page={page}&pageSize={}",
            self.base_url, self.entity_type, self.page_size
        );
        if let Some(since) = since {
            url.push_str("&since=");
            url.push_str(&since.to_rfc3339_opts(SecondsFormat::Millis, true));
        }
        url
    }
}

#[async_trait]
impl EntityDownloadStrategy for HttpEntityDownloadStrategy {
    fn name(&self) -> &str {
        &self.entity_type
    }

    async fn download_data(
        &self,
        since: Option<DateTime<Utc>>,
        is_incremental: bool,
    ) -> SyncResult<DownloadOutcome> {
        let mut items = 0u64;
        let mut deleted = Vec::new();
        let mut media_ids = Vec::new();
        let mut page_number = 1u32;

        loop {
            let response = self.client.get(&self.page_url(since, page_number), self.timeout).await?;
            if !response.is_success() {
                return Ok(DownloadOutcome::failure(
                    format!("HTTP {} fetching {} page {page_number}", response.status, self.entity_type),
                    is_incremental,
                ));
            }
            let page = EntityChangesPage::from_json(&response.body)
                .map_err(|e| SyncError::Protocol(format!("{} page {page_number}: {e}", self.entity_type)))?;

            self.applier
                .apply_page(&self.entity_type, &page, is_incremental)
                .await?;

            items += page.record_count() as u64;
            deleted.extend(page.deleted.iter().cloned());
            if let Some(field) = &self.media_field {
                media_ids.extend(
                    page.created
                        .iter()
                        .chain(page.updated.iter())
                        .filter_map(|record| record.get(field).and_then(|v| v.as_str()))
                        .map(str::to_string),
                );
            }

            if !page.has_more {
                break;
            }
            if page.record_count() == 0 && page.deleted.is_empty() {
                warn!(entity = %self.entity_type, page = page_number, "empty page claims more; stopping");
                break;
            }
            page_number += 1;
        }

        let mut outcome = DownloadOutcome::success(items, is_incremental);
        if !deleted.is_empty() {
            outcome = outcome.with_deleted(self.entity_type.clone(), deleted);
        }
        if !media_ids.is_empty() {
            outcome = outcome.with_media_ids(media_ids);
        }
        Ok(outcome)
    }
}
