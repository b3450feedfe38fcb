//! One-shot, resettable readiness signal.
//!
//! The advertisement path signals the gate; the coordinator's `wait_ready`
//! waits on it. The gate stays set once signalled until [`ReadinessGate::reset`]
//! re-arms it, which happens when the device becomes unavailable.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;

/// A resettable "at least one usable reading" signal.
#[derive(Debug, Default)]
pub struct ReadinessGate {
    set: AtomicBool,
    notify: Notify,
}

impl ReadinessGate {
    /// Create an unset gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the gate and wake every waiter.
    ///
    /// Returns `true` if this call set the gate, `false` if it was already set.
    pub fn signal(&self) -> bool {
        let was_set = self.set.swap(true, Ordering::SeqCst);
        if !was_set {
            self.notify.notify_waiters();
        }
        !was_set
    }

    /// Clear the gate so a later wait needs a fresh signal.
    pub fn reset(&self) {
        self.set.store(false, Ordering::SeqCst);
    }

    /// Check whether the gate is set.
    pub fn is_set(&self) -> bool {
        self.set.load(Ordering::SeqCst)
    }

    /// Wait until the gate is set or the timeout elapses.
    ///
    /// Returns `true` iff the gate was set before the timeout.
    pub async fn wait(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait_set()).await.is_ok()
    }

    async fn wait_set(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a signal in between is not lost.
            notified.as_mut().enable();

            if self.is_set() {
                return;
            }
            notified.await;
        }
    }
}
