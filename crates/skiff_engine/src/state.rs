//! Sync status, snapshots and failure routing.

use crate::config::RetryPolicy;
use crate::error::ErrorCategory;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The current status of the orchestrator.
///
/// There is no terminal status. `Error` halts automatic retries until a
/// forced sync or a reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Nothing running.
    Idle,
    /// A cycle is in flight.
    Syncing,
    /// The last cycle completed.
    Success,
    /// Too many failures; automatic sync is disabled.
    Error,
    /// The device or server is unreachable.
    Offline,
    /// The last cycle failed; a backoff retry is armed.
    Degraded,
    /// Purging stale outbox entries after repeated failures.
    Recovery,
}

impl SyncStatus {
    /// Returns the lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Success => "success",
            SyncStatus::Error => "error",
            SyncStatus::Offline => "offline",
            SyncStatus::Degraded => "degraded",
            SyncStatus::Recovery => "recovery",
        }
    }

    /// Returns true while a cycle runs.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncStatus::Syncing)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What observers see. Replaced as a whole on every change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSnapshot {
    /// Current status.
    pub status: SyncStatus,
    /// Human-readable explanation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Time of the last successful cycle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,
    /// Pending outbox entries, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_items: Option<usize>,
}

impl SyncSnapshot {
    /// Creates a snapshot with a message.
    pub fn new(status: SyncStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: Some(message.into()),
            last_sync: None,
            pending_items: None,
        }
    }

    /// The initial snapshot.
    pub fn idle() -> Self {
        Self {
            status: SyncStatus::Idle,
            message: None,
            last_sync: None,
            pending_items: None,
        }
    }

    /// Sets the last sync time.
    pub fn with_last_sync(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.last_sync = at;
        self
    }

    /// Sets the pending count.
    pub fn with_pending(mut self, pending: Option<usize>) -> Self {
        self.pending_items = pending;
        self
    }
}

impl Default for SyncSnapshot {
    fn default() -> Self {
        Self::idle()
    }
}

/// Where a failed cycle leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureRoute {
    /// Absolute ceiling reached; stop automatic retries.
    Halt,
    /// Stop timers and poll for connectivity.
    OfflineMode,
    /// Purge the outbox, then retry with backoff.
    Recovery,
    /// Retry with backoff.
    Degraded,
}

impl FailureRoute {
    /// Routes a failure given the consecutive failure count, including
    /// this one.
    ///
    /// Rules are checked in order: the absolute ceiling, then connectivity
    /// failures past `max_retries + offline_margin`, then any failure past
    /// `max_retries`.
    pub fn for_failure(policy: &RetryPolicy, failures: u32, category: ErrorCategory) -> Self {
        let offline_threshold = policy.max_retries.saturating_add(policy.offline_margin);
        if failures >= policy.max_consecutive_failures {
            FailureRoute::Halt
        } else if category == ErrorCategory::Connectivity && failures > offline_threshold {
            FailureRoute::OfflineMode
        } else if failures > policy.max_retries {
            FailureRoute::Recovery
        } else {
            FailureRoute::Degraded
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_names() {
        assert_eq!(SyncStatus::Degraded.to_string(), "degraded");
        assert!(SyncStatus::Syncing.is_active());
        assert!(!SyncStatus::Offline.is_active());
        assert_eq!(serde_json::to_string(&SyncStatus::Recovery).unwrap(), "\"recovery\"");
    }

    #[test]
    fn snapshot_json() {
        let snapshot = SyncSnapshot::new(SyncStatus::Success, "Sync complete").with_pending(Some(0));
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["pendingItems"], 0);
        assert!(json.get("lastSync").is_none());
    }

    #[test]
    fn routing_with_defaults() {
        let policy = RetryPolicy::default();
        let route = |n, c| FailureRoute::for_failure(&policy, n, c);

        for n in 1..=3 {
            assert_eq!(route(n, ErrorCategory::Connectivity), FailureRoute::Degraded);
            assert_eq!(route(n, ErrorCategory::ServerRejection), FailureRoute::Degraded);
        }
        // Past the retry budget but within the offline margin
        assert_eq!(route(4, ErrorCategory::Connectivity), FailureRoute::Recovery);
        assert_eq!(route(5, ErrorCategory::Connectivity), FailureRoute::Recovery);
        assert_eq!(route(6, ErrorCategory::Connectivity), FailureRoute::OfflineMode);
        assert_eq!(route(6, ErrorCategory::ServerRejection), FailureRoute::Recovery);
        assert_eq!(route(9, ErrorCategory::Unexpected), FailureRoute::Recovery);
        assert_eq!(route(10, ErrorCategory::Connectivity), FailureRoute::Halt);
        assert_eq!(route(10, ErrorCategory::LocalStorage), FailureRoute::Halt);
    }

    proptest::proptest! {
        #[test]
        fn ceiling_always_halts(extra in 0u32..1000) {
            let policy = RetryPolicy::default();
            let n = policy.max_consecutive_failures + extra;
            proptest::prop_assert_eq!(
                FailureRoute::for_failure(&policy, n, ErrorCategory::Connectivity),
                FailureRoute::Halt
            );
        }
    }
}
