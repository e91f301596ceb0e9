//! Forwards captured errors to the remote error-intake endpoint.

use crate::config::ReporterConfig;
use crate::error::SyncResult;
use crate::error_store::ErrorStore;
use crate::transport::HttpClient;
use chrono::Utc;
use skiff_protocol::{ErrorReportBatch, SyncErrorRecord};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Result of one reporting pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportSummary {
    /// Batches attempted.
    pub batches: usize,
    /// Records accepted and marked sent.
    pub sent: usize,
    /// Records left unsent after exhausting retries.
    pub failed: usize,
}

/// Error reporter.
///
/// Each batch is posted up to `max_attempts` times with a fixed delay in
/// between. A batch that never succeeds stays unsent and does not stop
/// later batches.
pub struct ErrorReporter {
    errors: ErrorStore,
    client: Arc<dyn HttpClient>,
    url: String,
    client_id: Option<String>,
    timeout: Duration,
    config: ReporterConfig,
}

impl ErrorReporter {
    /// Creates a reporter posting to `url`.
    pub fn new(
        errors: ErrorStore,
        client: Arc<dyn HttpClient>,
        url: impl Into<String>,
        config: ReporterConfig,
    ) -> Self {
        Self {
            errors,
            client,
            url: url.into(),
            client_id: None,
            timeout: Duration::from_secs(30),
            config,
        }
    }

    /// Sets the client id sent with each batch.
    pub fn with_client_id(mut self, client_id: Option<String>) -> Self {
        self.client_id = client_id;
        self
    }

    /// Sets the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sends all unsent records.
    #[instrument(skip(self), fields(url = %self.url))]
    pub async fn report_pending(&self) -> SyncResult<ReportSummary> {
        let unsent = self.errors.unsent().await?;
        let mut summary = ReportSummary::default();
        if unsent.is_empty() {
            return Ok(summary);
        }

        for batch in unsent.chunks(self.config.batch_size.max(1)) {
            summary.batches += 1;
            if self.send_with_retry(batch).await {
                let ids: Vec<String> = batch.iter().map(|r| r.id.clone()).collect();
                self.errors.mark_sent(&ids).await?;
                summary.sent += batch.len();
            } else {
                summary.failed += batch.len();
            }
        }

        if summary.sent > 0 {
            let cleared = self
                .errors
                .clear_sent_older_than(self.config.retention_days, Utc::now())
                .await?;
            debug!(cleared, "cleared old sent error records");
        }

        info!(
            batches = summary.batches,
            sent = summary.sent,
            failed = summary.failed,
            "error report finished"
        );
        Ok(summary)
    }

    async fn send_with_retry(&self, batch: &[SyncErrorRecord]) -> bool {
        let body = ErrorReportBatch {
            client_id: self.client_id.clone(),
            reported_at: Utc::now(),
            errors: batch.to_vec(),
        };
        let body = match serde_json::to_vec(&body) {
            Ok(body) => body,
            Err(err) => {
                warn!(error = %err, "failed to encode error report");
                return false;
            }
        };

        let attempts = self.config.max_attempts.max(1);
        for attempt in 1..=attempts {
            let result = self
                .client
                .post_json(&self.url, body.clone(), self.timeout)
                .await
                .and_then(|response| response.error_for_status());
            match result {
                Ok(_) => return true,
                Err(err) => {
                    warn!(attempt, attempts, error = %err, "error report batch failed");
                    if attempt < attempts {
                        tokio::time::sleep(self.config.retry_delay).await;
                    }
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportErrorKind;
    use crate::transport::{MockHttpClient, MockReply};
    use skiff_storage::InMemoryStore;

    const URL: &str = "https://errors.example.com/intake";

    async fn setup(records: usize) -> (ErrorStore, Arc<MockHttpClient>) {
        let errors = ErrorStore::new(Arc::new(InMemoryStore::new()));
        for i in 0..records {
            errors
                .record(&SyncErrorRecord::new(format!("failure {i}")))
                .await
                .unwrap();
        }
        (errors, Arc::new(MockHttpClient::new()))
    }

    fn config(batch_size: usize) -> ReporterConfig {
        ReporterConfig {
            batch_size,
            max_attempts: 3,
            retry_delay: Duration::from_secs(2),
            retention_days: 7,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sends_in_batches_and_marks_sent() {
        let (errors, client) = setup(5).await;
        let reporter = ErrorReporter::new(errors.clone(), client.clone(), URL, config(2))
            .with_client_id(Some("device-1".into()));

        let summary = reporter.report_pending().await.unwrap();
        assert_eq!(summary, ReportSummary { batches: 3, sent: 5, failed: 0 });
        assert!(errors.unsent().await.unwrap().is_empty());

        let requests = client.requests();
        assert_eq!(requests.len(), 3);
        let body = requests[0].json_body().unwrap();
        assert_eq!(body["clientId"], "device-1");
        assert_eq!(body["errors"].as_array().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_batch_does_not_block_later_batches() {
        let (errors, client) = setup(4).await;
        for _ in 0..3 {
            client.enqueue(MockReply::status(503));
        }
        let reporter = ErrorReporter::new(errors.clone(), client.clone(), URL, config(2));

        let summary = reporter.report_pending().await.unwrap();
        assert_eq!(summary, ReportSummary { batches: 2, sent: 2, failed: 2 });
        assert_eq!(errors.unsent().await.unwrap().len(), 2);
        // Three attempts on the first batch, one on the second
        assert_eq!(client.requests().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_after_transport_error() {
        let (errors, client) = setup(1).await;
        client.enqueue(MockReply::Fail(TransportErrorKind::Timeout, "slow".into()));
        let reporter = ErrorReporter::new(errors.clone(), client.clone(), URL, config(10));

        let started = tokio::time::Instant::now();
        let summary = reporter.report_pending().await.unwrap();
        assert_eq!(summary.sent, 1);
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn nothing_to_send() {
        let (errors, client) = setup(0).await;
        let reporter = ErrorReporter::new(errors, client.clone(), URL, config(10));

        assert_eq!(reporter.report_pending().await.unwrap(), ReportSummary::default());
        assert!(client.requests().is_empty());
    }
}
