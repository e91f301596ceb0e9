//! Cancellable timer slots.

use parking_lot::Mutex;
use std::future::Future;
use tokio::task::JoinHandle;

/// Holds at most one timer task.
///
/// Arming aborts the task already in the slot. Timer futures should only
/// wait and then hand work to a separate task, so aborting a timer never
/// interrupts that work.
#[derive(Debug, Default)]
pub struct TimerSlot {
    name: &'static str,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TimerSlot {
    /// Creates an empty slot.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            handle: Mutex::new(None),
        }
    }

    /// Spawns `timer` into the slot, aborting the previous one.
    pub fn arm<F>(&self, timer: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(timer);
        if let Some(previous) = self.handle.lock().replace(handle) {
            previous.abort();
        }
        tracing::trace!(timer = self.name, "armed");
    }

    /// Aborts the timer, if any.
    pub fn cancel(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
            tracing::trace!(timer = self.name, "cancelled");
        }
    }

    /// Returns true if a timer is pending.
    pub fn is_armed(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// The orchestrator's three timers.
#[derive(Debug)]
pub struct Timers {
    /// Periodic automatic sync.
    pub periodic: TimerSlot,
    /// Backoff retry after a failure.
    pub backoff: TimerSlot,
    /// Connectivity poll in offline mode.
    pub reconnect: TimerSlot,
}

impl Timers {
    /// Creates empty slots.
    pub fn new() -> Self {
        Self {
            periodic: TimerSlot::new("periodic"),
            backoff: TimerSlot::new("backoff"),
            reconnect: TimerSlot::new("reconnect"),
        }
    }

    /// Cancels every timer.
    pub fn cancel_all(&self) {
        self.periodic.cancel();
        self.backoff.cancel();
        self.reconnect.cancel();
    }
}

impl Default for Timers {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn rearming_replaces_previous_timer() {
        let fired = Arc::new(AtomicUsize::new(0));
        let slot = TimerSlot::new("test");

        for _ in 0..3 {
            let fired = fired.clone();
            slot.arm(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert!(slot.is_armed());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!slot.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_stops_every_slot() {
        let fired = Arc::new(AtomicUsize::new(0));
        let timers = Timers::new();
        for slot in [&timers.periodic, &timers.backoff, &timers.reconnect] {
            let fired = fired.clone();
            slot.arm(async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }

        timers.cancel_all();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(!timers.backoff.is_armed());
    }
}
