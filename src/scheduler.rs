//! Poll scheduling.
//!
//! Decides, on each advertisement, whether an active connection is worth
//! starting. Every check here is cheap and local; none of them touches the
//! radio.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::trace;

/// Lifecycle phase of the host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum HostPhase {
    /// Host is still starting up.
    Starting = 0,
    /// Host is fully running.
    Running = 1,
    /// Host is shutting down.
    Stopping = 2,
    /// Host has stopped.
    Stopped = 3,
}

impl HostPhase {
    fn from_raw(value: u8) -> Self {
        match value {
            0 => Self::Starting,
            1 => Self::Running,
            2 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

/// Shared, lock-free view of the host's lifecycle phase.
#[derive(Debug)]
pub struct HostLifecycle {
    phase: AtomicU8,
}

impl HostLifecycle {
    /// Create a lifecycle in the given phase.
    pub fn new(phase: HostPhase) -> Self {
        Self {
            phase: AtomicU8::new(phase as u8),
        }
    }

    /// Get the current phase.
    pub fn phase(&self) -> HostPhase {
        HostPhase::from_raw(self.phase.load(Ordering::SeqCst))
    }

    /// Set the current phase.
    pub fn set_phase(&self, phase: HostPhase) {
        self.phase.store(phase as u8, Ordering::SeqCst);
    }

    /// Check if the host is running.
    pub fn is_running(&self) -> bool {
        self.phase() == HostPhase::Running
    }
}

impl Default for HostLifecycle {
    fn default() -> Self {
        Self::new(HostPhase::Running)
    }
}

/// Device-specific decision whether a poll is due.
#[cfg_attr(test, mockall::automock)]
pub trait PollPolicy: Send + Sync {
    /// Whether the device should be polled, given the time since the last
    /// poll started (`None` if it never was).
    fn poll_needed(&self, since_last_poll: Option<Duration>) -> bool;
}

/// Poll whenever otherwise eligible.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysPoll;

impl PollPolicy for AlwaysPoll {
    fn poll_needed(&self, _since_last_poll: Option<Duration>) -> bool {
        true
    }
}

/// Lookup of connectable transport paths.
#[cfg_attr(test, mockall::automock)]
pub trait ConnectablePaths: Send + Sync {
    /// Whether some adapter can currently reach `address` with a connection.
    ///
    /// Must not attempt a connection.
    fn has_connectable_path(&self, address: &str) -> bool;
}

/// Decides when to actively poll the device.
pub struct PollScheduler {
    host: Arc<HostLifecycle>,
    policy: Arc<dyn PollPolicy>,
}

impl PollScheduler {
    /// Create a scheduler.
    pub fn new(host: Arc<HostLifecycle>, policy: Arc<dyn PollPolicy>) -> Self {
        Self { host, policy }
    }

    /// Get the host lifecycle.
    pub fn host(&self) -> &Arc<HostLifecycle> {
        &self.host
    }

    /// Whether a poll should start now.
    ///
    /// `session_idle` is the connectivity machine's answer to "may a new
    /// session begin". All conditions must hold; a missing connectable path
    /// always yields `false`.
    pub fn needs_poll(
        &self,
        address: &str,
        since_last_poll: Option<Duration>,
        session_idle: bool,
        paths: &dyn ConnectablePaths,
    ) -> bool {
        let running = self.host.is_running();
        let needs = running
            && session_idle
            && self.policy.poll_needed(since_last_poll)
            && paths.has_connectable_path(address);

        trace!(
            "needs_poll for {}: running={}, idle={}, result={}",
            address,
            running,
            session_idle,
            needs
        );
        needs
    }
}

impl std::fmt::Debug for PollScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollScheduler")
            .field("host", &self.host.phase())
            .finish()
    }
}
