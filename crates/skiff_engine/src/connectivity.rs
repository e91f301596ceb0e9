//! Connectivity monitoring.

use crate::config::ConnectivityConfig;
use crate::transport::HttpClient;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// A live reachability check.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// Returns true if the sync server is believed reachable.
    async fn probe(&self) -> bool;
}

/// Probes well-known URLs over HTTP.
///
/// Any HTTP answer, whatever its status, counts as reachable. The first URL
/// that answers wins.
pub struct HttpReachabilityProbe {
    client: Arc<dyn HttpClient>,
    urls: Vec<String>,
    timeout: Duration,
}

impl HttpReachabilityProbe {
    /// Creates a probe for the configured endpoints.
    pub fn new(client: Arc<dyn HttpClient>, config: &ConnectivityConfig) -> Self {
        Self {
            client,
            urls: config.probe_urls.clone(),
            timeout: config.probe_timeout,
        }
    }
}

#[async_trait]
impl ReachabilityProbe for HttpReachabilityProbe {
    async fn probe(&self) -> bool {
        for url in &self.urls {
            match self.client.get(url, self.timeout).await {
                Ok(response) => {
                    debug!(%url, status = response.status, "probe answered");
                    return true;
                }
                Err(err) => debug!(%url, error = %err, "probe failed"),
            }
        }
        false
    }
}

/// A probe with a fixed answer, settable at runtime.
#[derive(Debug)]
pub struct StaticProbe {
    reachable: AtomicBool,
}

impl StaticProbe {
    /// Creates a probe answering `reachable`.
    pub fn new(reachable: bool) -> Self {
        Self {
            reachable: AtomicBool::new(reachable),
        }
    }

    /// Changes the answer.
    pub fn set(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }
}

#[async_trait]
impl ReachabilityProbe for StaticProbe {
    async fn probe(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }
}

/// Tracks whether the device is online.
///
/// The cached flag is held in a `watch` channel. Writes that do not change
/// the flag are dropped, so subscribers only observe transitions.
pub struct ConnectivityMonitor {
    probe: Arc<dyn ReachabilityProbe>,
    online: watch::Sender<bool>,
    poll_interval: Duration,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectivityMonitor {
    /// Creates a monitor. The device is assumed online until told otherwise.
    pub fn new(probe: Arc<dyn ReachabilityProbe>, poll_interval: Duration) -> Self {
        let (online, _) = watch::channel(true);
        Self {
            probe,
            online,
            poll_interval,
            poller: Mutex::new(None),
        }
    }

    /// Returns the cached flag.
    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    /// Runs the probe without touching the cached flag.
    pub async fn probe(&self) -> bool {
        self.probe.probe().await
    }

    /// Runs the probe and stores the result.
    pub async fn check_now(&self) -> bool {
        let online = self.probe.probe().await;
        self.set_online(online);
        online
    }

    /// Stores a reachability change pushed by the host platform.
    ///
    /// Returns true if the flag changed.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.online.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!(online, "connectivity changed");
        }
        changed
    }

    /// Subscribes to transitions of the online flag.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }

    /// Starts polling the probe at the configured interval.
    pub fn start(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let interval = self.poll_interval;
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(monitor) = weak.upgrade() else {
                    break;
                };
                monitor.check_now().await;
            }
        });
        if let Some(previous) = self.poller.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Stops polling.
    pub fn stop(&self) {
        if let Some(handle) = self.poller.lock().take() {
            handle.abort();
        }
    }

    /// Returns true while the poll task runs.
    pub fn is_polling(&self) -> bool {
        self.poller
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for ConnectivityMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportErrorKind;
    use crate::transport::{MockHttpClient, MockReply};

    #[tokio::test]
    async fn http_probe_accepts_any_status() {
        let client = Arc::new(MockHttpClient::new());
        client.enqueue(MockReply::Fail(TransportErrorKind::Dns, "no host".into()));
        client.enqueue(MockReply::status(503));
        let config = ConnectivityConfig {
            probe_urls: vec!["https://a.example".into(), "https://b.example".into()],
            ..ConnectivityConfig::default()
        };

        let probe = HttpReachabilityProbe::new(client.clone(), &config);
        assert!(probe.probe().await);
        assert_eq!(client.requests().len(), 2);

        client.set_offline(true);
        assert!(!probe.probe().await);
    }

    #[tokio::test]
    async fn subscribers_only_see_transitions() {
        let monitor = ConnectivityMonitor::new(Arc::new(StaticProbe::new(true)), Duration::from_secs(60));
        let mut rx = monitor.subscribe();

        assert!(!monitor.set_online(true));
        assert!(!rx.has_changed().unwrap());

        assert!(monitor.set_online(false));
        assert!(rx.has_changed().unwrap());
        assert!(!*rx.borrow_and_update());
        assert!(!monitor.is_online());

        assert!(!monitor.set_online(false));
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn polling_updates_flag() {
        let probe = Arc::new(StaticProbe::new(true));
        let monitor = Arc::new(ConnectivityMonitor::new(probe.clone(), Duration::from_secs(10)));
        let mut rx = monitor.subscribe();
        monitor.start();
        assert!(monitor.is_polling());

        probe.set(false);
        tokio::time::sleep(Duration::from_secs(11)).await;
        rx.changed().await.unwrap();
        assert!(!monitor.is_online());

        monitor.stop();
        assert!(!monitor.is_polling());
    }

    #[tokio::test]
    async fn check_now_stores_result() {
        let probe = Arc::new(StaticProbe::new(false));
        let monitor = ConnectivityMonitor::new(probe.clone(), Duration::from_secs(10));

        assert!(!monitor.check_now().await);
        assert!(!monitor.is_online());

        probe.set(true);
        assert!(monitor.probe().await);
        // probe() alone leaves the cached flag untouched
        assert!(!monitor.is_online());
    }
}
