//! Configuration for the sync engine.
//!
//! All durations (de)serialize as whole seconds so a config file reads
//! `"syncInterval": 900` rather than a nested struct.

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// Configuration for sync operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    /// Server base URL, without trailing slash.
    pub base_url: String,
    /// Path of the data-batch endpoint.
    pub data_upload_path: String,
    /// Path of the multipart file-batch endpoint.
    pub file_upload_path: String,
    /// Absolute URL of the error-intake endpoint; reporting is disabled when unset.
    pub error_report_url: Option<String>,
    /// Identifier sent with error reports.
    pub client_id: Option<String>,
    /// Maximum entries per data batch.
    pub data_batch_size: usize,
    /// Maximum entries per file batch.
    pub binary_batch_size: usize,
    /// Timeout for ordinary requests.
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,
    /// Timeout for multipart uploads.
    #[serde(with = "duration_secs")]
    pub upload_timeout: Duration,
    /// Period of the automatic sync timer.
    #[serde(with = "duration_secs")]
    pub sync_interval: Duration,
    /// Whether downloads may be incremental.
    pub use_incremental_sync: bool,
    /// Maximum checkpoint age for an incremental download.
    #[serde(with = "duration_secs")]
    pub max_incremental_sync_interval: Duration,
    /// Cycle retry policy.
    pub retry: RetryPolicy,
    /// Outbox purge policy.
    pub recovery: RecoveryPolicy,
    /// Reachability probing.
    pub connectivity: ConnectivityConfig,
    /// Error reporting.
    pub reporter: ReporterConfig,
}

impl SyncConfig {
    /// Creates a configuration for the given server.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            data_upload_path: "/sync/upload".into(),
            file_upload_path: "/sync/upload/files".into(),
            error_report_url: None,
            client_id: None,
            data_batch_size: 50,
            binary_batch_size: 5,
            request_timeout: Duration::from_secs(30),
            upload_timeout: Duration::from_secs(120),
            sync_interval: Duration::from_secs(15 * 60),
            use_incremental_sync: true,
            max_incremental_sync_interval: Duration::from_secs(7 * 24 * 60 * 60),
            retry: RetryPolicy::default(),
            recovery: RecoveryPolicy::default(),
            connectivity: ConnectivityConfig::default(),
            reporter: ReporterConfig::default(),
        }
    }

    /// Loads a configuration from a JSON file. Missing fields take defaults.
    pub fn from_json_file(path: &Path) -> SyncResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("{}: {e}", path.display())))?;
        let mut config: SyncConfig = serde_json::from_str(&text)
            .map_err(|e| SyncError::Config(format!("{}: {e}", path.display())))?;
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        config.validate()?;
        Ok(config)
    }

    /// Checks values the engine cannot run with.
    pub fn validate(&self) -> SyncResult<()> {
        if self.data_batch_size == 0 || self.binary_batch_size == 0 {
            return Err(SyncError::Config("batch sizes must be at least 1".into()));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(SyncError::Config(
                "backoff multiplier must be at least 1.0".into(),
            ));
        }
        Ok(())
    }

    /// Full URL of the data-batch endpoint.
    pub fn data_upload_url(&self) -> String {
        format!("{}{}", self.base_url, self.data_upload_path)
    }

    /// Full URL of the file-batch endpoint.
    pub fn file_upload_url(&self) -> String {
        format!("{}{}", self.base_url, self.file_upload_path)
    }

    /// Sets the data batch size.
    pub fn with_data_batch_size(mut self, size: usize) -> Self {
        self.data_batch_size = size;
        self
    }

    /// Sets the file batch size.
    pub fn with_binary_batch_size(mut self, size: usize) -> Self {
        self.binary_batch_size = size;
        self
    }

    /// Sets the error-intake URL.
    pub fn with_error_report_url(mut self, url: impl Into<String>) -> Self {
        self.error_report_url = Some(url.into());
        self
    }

    /// Sets the client id sent with error reports.
    pub fn with_client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the automatic sync interval.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Enables or disables incremental downloads.
    pub fn with_incremental_sync(mut self, enabled: bool, max_interval: Duration) -> Self {
        self.use_incremental_sync = enabled;
        self.max_incremental_sync_interval = max_interval;
        self
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the recovery policy.
    pub fn with_recovery(mut self, recovery: RecoveryPolicy) -> Self {
        self.recovery = recovery;
        self
    }

    /// Sets the connectivity configuration.
    pub fn with_connectivity(mut self, connectivity: ConnectivityConfig) -> Self {
        self.connectivity = connectivity;
        self
    }

    /// Sets the reporter configuration.
    pub fn with_reporter(mut self, reporter: ReporterConfig) -> Self {
        self.reporter = reporter;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("http://localhost:8080")
    }
}

/// Retry behavior after failed cycles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Failures tolerated before recovery kicks in.
    pub max_retries: u32,
    /// Failures past which automatic sync halts.
    pub max_consecutive_failures: u32,
    /// Extra connectivity failures beyond `max_retries` before offline mode.
    pub offline_margin: u32,
    /// Delay after the first failure.
    #[serde(with = "duration_secs")]
    pub initial_backoff: Duration,
    /// Upper bound for any backoff delay.
    #[serde(with = "duration_secs")]
    pub max_backoff: Duration,
    /// Growth factor per failure.
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_consecutive_failures: 10,
            offline_margin: 2,
            initial_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(15 * 60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Sets the normal retry budget.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the absolute failure ceiling.
    pub fn with_max_consecutive_failures(mut self, ceiling: u32) -> Self {
        self.max_consecutive_failures = ceiling;
        self
    }

    /// Sets the initial and maximum backoff.
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    /// Delay before retrying after `failures` consecutive failures.
    ///
    /// `initial * multiplier^(failures - 1)`, capped at `max_backoff`. Zero
    /// failures means no delay. Non-decreasing in `failures`.
    pub fn delay_for_failure(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(failures - 1).unwrap_or(i32::MAX);
        let secs = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = secs.min(self.max_backoff.as_secs_f64());
        if capped.is_finite() {
            Duration::from_secs_f64(capped.max(0.0))
        } else {
            self.max_backoff
        }
    }
}

/// Outbox purge rules applied in recovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RecoveryPolicy {
    /// Entries older than this are purged.
    #[serde(with = "duration_secs")]
    pub offline_timeout: Duration,
    /// Entries that failed this many times are purged.
    pub entry_retry_ceiling: u32,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            offline_timeout: Duration::from_secs(7 * 24 * 60 * 60),
            entry_retry_ceiling: 5,
        }
    }
}

/// Reachability probing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectivityConfig {
    /// URLs probed in order; the first HTTP answer wins.
    pub probe_urls: Vec<String>,
    /// Timeout per probe request.
    #[serde(with = "duration_secs")]
    pub probe_timeout: Duration,
    /// Poll period of the monitor.
    #[serde(with = "duration_secs")]
    pub poll_interval: Duration,
    /// Poll period while in temporary offline mode.
    #[serde(with = "duration_secs")]
    pub reconnect_poll_interval: Duration,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            probe_urls: vec![
                "https://www.google.com/generate_204".into(),
                "https://cloudflare.com/cdn-cgi/trace".into(),
            ],
            probe_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_secs(60),
            reconnect_poll_interval: Duration::from_secs(30),
        }
    }
}

/// Error reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReporterConfig {
    /// Records per report request.
    pub batch_size: usize,
    /// Attempts per batch.
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    #[serde(with = "duration_secs")]
    pub retry_delay: Duration,
    /// Sent records older than this many days are cleared after a report.
    pub retention_days: u32,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            max_attempts: 3,
            retry_delay: Duration::from_secs(2),
            retention_days: 7,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builder() {
        let config = SyncConfig::new("https://sync.example.com/")
            .with_data_batch_size(10)
            .with_binary_batch_size(2)
            .with_error_report_url("https://errors.example.com/intake");

        assert_eq!(config.base_url, "https://sync.example.com");
        assert_eq!(config.data_upload_url(), "https://sync.example.com/sync/upload");
        assert_eq!(config.data_batch_size, 10);
        assert_eq!(config.binary_batch_size, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let config = SyncConfig::default().with_data_batch_size(0);
        assert!(matches!(config.validate(), Err(SyncError::Config(_))));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy::default()
            .with_backoff(Duration::from_secs(10), Duration::from_secs(60));

        assert_eq!(policy.delay_for_failure(0), Duration::ZERO);
        assert_eq!(policy.delay_for_failure(1), Duration::from_secs(10));
        assert_eq!(policy.delay_for_failure(2), Duration::from_secs(20));
        assert_eq!(policy.delay_for_failure(3), Duration::from_secs(40));
        assert_eq!(policy.delay_for_failure(4), Duration::from_secs(60));
        assert_eq!(policy.delay_for_failure(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn json_uses_seconds_and_defaults() {
        let config: SyncConfig = serde_json::from_str(
            r#"{"baseUrl": "https://api.example.com", "syncInterval": 60, "retry": {"maxRetries": 5}}"#,
        )
        .unwrap();

        assert_eq!(config.sync_interval, Duration::from_secs(60));
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.max_consecutive_failures, 10);
        assert_eq!(config.data_batch_size, 50);
    }

    #[test]
    fn from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skiff.json");
        std::fs::write(&path, r#"{"baseUrl": "https://api.example.com/", "dataBatchSize": 20}"#)
            .unwrap();

        let config = SyncConfig::from_json_file(&path).unwrap();
        assert_eq!(config.base_url, "https://api.example.com");
        assert_eq!(config.data_batch_size, 20);

        let missing = SyncConfig::from_json_file(&dir.path().join("nope.json"));
        assert!(matches!(missing, Err(SyncError::Config(_))));
    }

    proptest::proptest! {
        #[test]
        fn backoff_is_non_decreasing(n in 0u32..200) {
            let policy = RetryPolicy::default();
            let a = policy.delay_for_failure(n);
            let b = policy.delay_for_failure(n + 1);
            proptest::prop_assert!(a <= b);
            proptest::prop_assert!(b <= policy.max_backoff);
        }
    }
}
