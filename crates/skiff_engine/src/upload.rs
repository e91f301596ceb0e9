//! Outbox upload pipeline.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::error_store::ErrorStore;
use crate::host::{NoopNotifier, Notifier};
use crate::outbox::OutboxLogStore;
use crate::transport::{HttpClient, MultipartPart};
use chrono::Utc;
use skiff_protocol::{DataUploadItem, FileUploadManifest, SyncErrorRecord, SyncLogEntry};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Notification id used for upload progress.
pub const UPLOAD_NOTIFICATION_ID: u32 = 1001;

/// Name of the multipart part carrying the file manifest.
pub const MANIFEST_PART: &str = "manifest";

/// Counts from one upload run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadReport {
    /// File batches accepted.
    pub file_batches: usize,
    /// Data batches accepted.
    pub data_batches: usize,
    /// Entries accepted and removed from the outbox.
    pub uploaded: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchKind {
    File,
    Data,
}

impl BatchKind {
    fn as_str(self) -> &'static str {
        match self {
            BatchKind::File => "file",
            BatchKind::Data => "data",
        }
    }
}

/// Drains the outbox in ordered batches.
///
/// Binary entries go first as multipart file batches, then data entries as
/// JSON batches, oldest first. Batches are strictly sequential. The first
/// failed batch aborts the run: every entry in it gets an error record and
/// a retry increment, and no later batch is attempted.
pub struct UploadStrategy {
    config: SyncConfig,
    client: Arc<dyn HttpClient>,
    outbox: OutboxLogStore,
    errors: ErrorStore,
    notifier: Arc<dyn Notifier>,
}

impl UploadStrategy {
    /// Creates an upload strategy.
    pub fn new(
        config: SyncConfig,
        client: Arc<dyn HttpClient>,
        outbox: OutboxLogStore,
        errors: ErrorStore,
    ) -> Self {
        Self {
            config,
            client,
            outbox,
            errors,
            notifier: Arc::new(NoopNotifier),
        }
    }

    /// Sets the notifier used for progress.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Uploads every pending entry.
    #[instrument(skip(self))]
    pub async fn run(&self) -> SyncResult<UploadReport> {
        let (files, data): (Vec<SyncLogEntry>, Vec<SyncLogEntry>) = self
            .outbox
            .pending()
            .await?
            .into_iter()
            .partition(|entry| entry.is_binary_payload);

        let mut report = UploadReport::default();
        let total = (files.len() + data.len()) as u64;
        if total == 0 {
            debug!("outbox empty; nothing to upload");
            return Ok(report);
        }
        info!(files = files.len(), data = data.len(), "uploading outbox");

        let drained = self.drain(&files, &data, total, &mut report).await;
        if let Err(err) = self.notifier.cancel(UPLOAD_NOTIFICATION_ID).await {
            debug!(error = %err, "failed to dismiss upload notification");
        }
        drained?;
        info!(uploaded = report.uploaded, "outbox drained");
        Ok(report)
    }

    async fn drain(
        &self,
        files: &[SyncLogEntry],
        data: &[SyncLogEntry],
        total: u64,
        report: &mut UploadReport,
    ) -> SyncResult<()> {
        for (index, batch) in files.chunks(self.config.binary_batch_size.max(1)).enumerate() {
            self.process(BatchKind::File, index, batch).await?;
            report.file_batches += 1;
            report.uploaded += batch.len();
            self.progress(report.uploaded as u64, total).await;
            tokio::task::yield_now().await;
        }

        for (index, batch) in data.chunks(self.config.data_batch_size.max(1)).enumerate() {
            self.process(BatchKind::Data, index, batch).await?;
            report.data_batches += 1;
            report.uploaded += batch.len();
            self.progress(report.uploaded as u64, total).await;
            tokio::task::yield_now().await;
        }
        Ok(())
    }

    async fn process(&self, kind: BatchKind, index: usize, batch: &[SyncLogEntry]) -> SyncResult<()> {
        debug!(kind = kind.as_str(), index, size = batch.len(), "sending batch");
        let sent = match kind {
            BatchKind::File => self.send_files(batch).await,
            BatchKind::Data => self.send_data(batch).await,
        };
        match sent {
            Ok(()) => {
                let ids: Vec<String> = batch.iter().map(|e| e.sync_id.clone()).collect();
                self.outbox.remove_many(&ids).await?;
                Ok(())
            }
            Err(err) => Err(self.fail_batch(kind, index, batch, err).await),
        }
    }

    async fn send_files(&self, batch: &[SyncLogEntry]) -> SyncResult<()> {
        let mut manifest = FileUploadManifest::default();
        let mut parts = Vec::with_capacity(batch.len() + 1);
        for entry in batch {
            let payload = entry.binary_payload()?;
            let content_id = manifest.push(entry, payload.sidecar);
            parts.push(MultipartPart::file(content_id, entry.sync_id.clone(), payload.content));
        }
        parts.push(MultipartPart::text(MANIFEST_PART, manifest.to_json()?));

        self.client
            .upload_multipart(
                &self.config.file_upload_url(),
                parts,
                self.config.upload_timeout,
                None,
            )
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn send_data(&self, batch: &[SyncLogEntry]) -> SyncResult<()> {
        let items: Vec<DataUploadItem> = batch.iter().map(DataUploadItem::from).collect();
        let body = serde_json::to_vec(&items)?;
        self.client
            .post_json(&self.config.data_upload_url(), body, self.config.request_timeout)
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn fail_batch(
        &self,
        kind: BatchKind,
        index: usize,
        batch: &[SyncLogEntry],
        err: SyncError,
    ) -> SyncError {
        let now = Utc::now();
        let message = err.to_string();
        warn!(kind = kind.as_str(), index, size = batch.len(), error = %message, "batch failed");

        for entry in batch {
            let mut record = SyncErrorRecord::new(format!("{} batch upload failed: {message}", kind.as_str()))
                .with_category(err.category().as_str())
                .with_entity(&entry.entity_type, &entry.entity_id)
                .with_metadata("syncId", entry.sync_id.clone())
                .with_metadata("batchType", kind.as_str())
                .with_metadata("batchIndex", index)
                .with_metadata("batchSize", batch.len())
                .with_metadata("timestamp", now.to_rfc3339())
                .with_stack_trace(err.chain())
                .with_timestamp(now);
            if let Some(status) = err.http_status() {
                record = record.with_metadata("httpStatus", status);
            }
            self.errors.record_best_effort(&record).await;
        }

        let mut entries = batch.to_vec();
        if let Err(store_err) = self.outbox.record_failure(&mut entries, &message, now).await {
            warn!(error = %store_err, "failed to record retry on outbox entries");
        }

        SyncError::UploadBatch {
            kind: kind.as_str(),
            index,
            size: batch.len(),
            source: Box::new(err),
        }
    }

    async fn progress(&self, done: u64, total: u64) {
        if let Err(err) = self
            .notifier
            .show_progress(UPLOAD_NOTIFICATION_ID, "Uploading changes", done, total)
            .await
        {
            debug!(error = %err, "failed to show upload progress");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockHttpClient, MockReply};
    use skiff_protocol::{BinaryPayload, SyncOperation};
    use skiff_storage::InMemoryStore;

    struct Fixture {
        outbox: OutboxLogStore,
        errors: ErrorStore,
        client: Arc<MockHttpClient>,
        upload: UploadStrategy,
    }

    fn fixture(data_batch: usize, file_batch: usize) -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let outbox = OutboxLogStore::new(store.clone());
        let errors = ErrorStore::new(store);
        let client = Arc::new(MockHttpClient::new());
        let config = SyncConfig::new("https://api.example.com")
            .with_data_batch_size(data_batch)
            .with_binary_batch_size(file_batch);
        let upload = UploadStrategy::new(config, client.clone(), outbox.clone(), errors.clone());
        Fixture {
            outbox,
            errors,
            client,
            upload,
        }
    }

    async fn add_file(outbox: &OutboxLogStore, id: &str, bytes: &[u8]) {
        let mut sidecar = serde_json::Map::new();
        sidecar.insert("mimeType".into(), "image/png".into());
        let payload = BinaryPayload::new(bytes.to_vec(), sidecar).encode().unwrap();
        outbox
            .enqueue("photo", id, SyncOperation::Create, payload, true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn empty_outbox_sends_nothing() {
        let f = fixture(10, 5);
        assert_eq!(f.upload.run().await.unwrap(), UploadReport::default());
        assert!(f.client.requests().is_empty());
    }

    #[tokio::test]
    async fn files_go_first_with_manifest() {
        let f = fixture(10, 5);
        f.outbox
            .enqueue("todo", "t1", SyncOperation::Update, r#"{"done":true}"#, false)
            .await
            .unwrap();
        add_file(&f.outbox, "p1", b"\x89PNG one").await;
        add_file(&f.outbox, "p2", b"\x89PNG two").await;

        let report = f.upload.run().await.unwrap();
        assert_eq!(report, UploadReport { file_batches: 1, data_batches: 1, uploaded: 3 });

        let requests = f.client.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].url.ends_with("/sync/upload/files"));
        assert!(requests[1].url.ends_with("/sync/upload"));

        let parts = &requests[0].parts;
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].name, "file_0");
        assert_eq!(parts[0].data.as_ref(), b"\x89PNG one");
        assert_eq!(parts[2].name, MANIFEST_PART);

        let manifest: serde_json::Value = serde_json::from_slice(&parts[2].data).unwrap();
        assert_eq!(manifest["contentIds"], serde_json::json!(["file_0", "file_1"]));
        assert_eq!(manifest["entries"][0]["sidecar"]["mimeType"], "image/png");
        assert!(manifest["entries"][0]["sidecar"].get("content").is_none());

        assert_eq!(f.outbox.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn file_failure_skips_data_phase() {
        let f = fixture(10, 5);
        add_file(&f.outbox, "p1", b"bytes").await;
        f.outbox
            .enqueue("todo", "t1", SyncOperation::Create, "{}", false)
            .await
            .unwrap();
        f.client.enqueue_for("/files", MockReply::status(413));

        let err = f.upload.run().await.unwrap_err();
        assert!(matches!(err, SyncError::UploadBatch { kind: "file", index: 0, size: 1, .. }));
        assert_eq!(err.http_status(), Some(413));
        assert_eq!(f.client.requests().len(), 1);

        let pending = f.outbox.pending().await.unwrap();
        assert_eq!(pending.len(), 2);
        let file = pending.iter().find(|e| e.is_binary_payload).unwrap();
        assert_eq!(file.retry_count, 1);
        let data = pending.iter().find(|e| !e.is_binary_payload).unwrap();
        assert_eq!(data.retry_count, 0);

        let records = f.errors.all().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].metadata["batchType"], "file");
        assert_eq!(records[0].metadata["httpStatus"], 413);
        assert_eq!(records[0].category.as_deref(), Some("server_rejection"));
    }

    #[tokio::test]
    async fn undecodable_file_fails_its_batch() {
        let f = fixture(10, 5);
        f.outbox
            .enqueue("photo", "p1", SyncOperation::Create, "%%% not base64", true)
            .await
            .unwrap();

        let err = f.upload.run().await.unwrap_err();
        assert_eq!(err.category(), crate::ErrorCategory::LocalStorage);
        assert!(f.client.requests().is_empty());
        assert_eq!(f.outbox.pending().await.unwrap()[0].retry_count, 1);
    }
}
