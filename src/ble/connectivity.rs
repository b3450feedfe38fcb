//! Connectivity state machine.
//!
//! Tracks whether the monitor is absent, advertising, being connected to,
//! connected, or recovering from a lost session, and when the next connection
//! attempt may start.
//!
//! ```text
//!            sighting            poll             subscribed
//!  Absent ───────────► Advertising ─────► Connecting ─────────► Connected
//!                        ▲    ▲               │                   │  │
//!                        │    │ idle          │ failure   failure │  │ session end
//!                        │    └──────────── Lost ◄────────────────┘  │
//!                        │                  │  ▲                     │
//!                        │                  └──┘ retry (Connecting)  │
//!                        └───────────────────────────────────────────┘
//! ```
//!
//! Any state moves to `Absent` when the host stops seeing the device.

use tokio::time::Instant;
use tracing::debug;

use crate::error::{Error, Result};

/// Availability of the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectivityState {
    /// Not seen since start-up or since it became unavailable.
    #[default]
    Absent,
    /// Advertising; no session running.
    Advertising,
    /// A session is connecting and subscribing.
    Connecting,
    /// Subscribed to notifications.
    Connected,
    /// The last session failed; backing off.
    Lost,
}

impl ConnectivityState {
    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if a session currently owns the link.
    pub fn is_in_session(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }

    /// Check if the device has been seen since it was last unavailable.
    pub fn is_present(&self) -> bool {
        !matches!(self, Self::Absent)
    }

    /// Whether `self -> to` is a legal transition.
    pub fn can_transition_to(&self, to: ConnectivityState) -> bool {
        use ConnectivityState::*;
        matches!(
            (self, to),
            (_, Absent)
                | (Absent | Advertising, Advertising)
                | (Advertising, Connecting)
                | (Connecting, Connected)
                | (Connecting | Connected, Lost)
                | (Connected, Advertising)
                | (Lost, Connecting)
                | (Lost, Advertising)
        )
    }
}

impl std::fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Absent => write!(f, "Absent"),
            Self::Advertising => write!(f, "Advertising"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Lost => write!(f, "Lost"),
        }
    }
}

/// Event for connectivity state changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectivityEvent {
    /// The address of the device.
    pub address: String,
    /// The previous state.
    pub from: ConnectivityState,
    /// The new state.
    pub to: ConnectivityState,
}

/// What an advertisement sighting did to the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SightingOutcome {
    /// The state changed.
    pub transitioned: bool,
    /// First sighting since the device was unavailable.
    pub first_since_unavailable: bool,
}

/// The connectivity state machine.
///
/// Pure bookkeeping: it performs no I/O and never sleeps. The coordinator
/// drives it and acts on its answers.
#[derive(Debug, Clone)]
pub struct ConnectivityMachine {
    state: ConnectivityState,
    was_unavailable: bool,
    retry_not_before: Option<Instant>,
}

impl ConnectivityMachine {
    /// Create a machine in the `Absent` state.
    pub fn new() -> Self {
        Self {
            state: ConnectivityState::Absent,
            was_unavailable: true,
            retry_not_before: None,
        }
    }

    /// Get the current state.
    pub fn state(&self) -> ConnectivityState {
        self.state
    }

    /// Earliest instant a new connection attempt may start after a failure.
    pub fn retry_not_before(&self) -> Option<Instant> {
        self.retry_not_before
    }

    /// Move to `to`, rejecting illegal transitions.
    ///
    /// Returns the previous state.
    pub fn transition(&mut self, to: ConnectivityState) -> Result<ConnectivityState> {
        let from = self.state;
        if !from.can_transition_to(to) {
            return Err(Error::InvalidTransition { from, to });
        }
        if from != to {
            debug!("Connectivity state changed: {} -> {}", from, to);
        }
        self.state = to;
        Ok(from)
    }

    /// Record an advertisement from the device.
    ///
    /// `Absent` and `Advertising` move to `Advertising`; a running or backing
    /// off session is left alone.
    pub fn on_sighting(&mut self) -> SightingOutcome {
        let transitioned = match self.state {
            ConnectivityState::Absent => {
                self.state = ConnectivityState::Advertising;
                debug!("Connectivity state changed: Absent -> Advertising");
                true
            }
            _ => false,
        };

        let first_since_unavailable = std::mem::replace(&mut self.was_unavailable, false);

        SightingOutcome {
            transitioned,
            first_since_unavailable,
        }
    }

    /// Start a connection attempt.
    ///
    /// Legal from `Advertising`, and from `Lost` once the backoff has passed.
    pub fn begin_connect(&mut self, now: Instant) -> Result<ConnectivityState> {
        if self.state == ConnectivityState::Lost && !self.backoff_elapsed(now) {
            return Err(Error::InvalidTransition {
                from: self.state,
                to: ConnectivityState::Connecting,
            });
        }
        let from = self.transition(ConnectivityState::Connecting)?;
        self.retry_not_before = None;
        Ok(from)
    }

    /// The notification subscription is in place.
    pub fn on_subscribed(&mut self) -> Result<ConnectivityState> {
        self.transition(ConnectivityState::Connected)
    }

    /// A session ended cleanly and released the link.
    pub fn on_session_end(&mut self) -> Result<ConnectivityState> {
        self.transition(ConnectivityState::Advertising)
    }

    /// A session failed. Blocks new attempts until `retry_not_before`.
    pub fn on_failure(&mut self, retry_not_before: Instant) -> Result<ConnectivityState> {
        let from = self.transition(ConnectivityState::Lost)?;
        self.retry_not_before = Some(retry_not_before);
        Ok(from)
    }

    /// Back off without retrying: `Lost -> Advertising`.
    pub fn go_idle(&mut self) -> Result<ConnectivityState> {
        self.transition(ConnectivityState::Advertising)
    }

    /// The host no longer sees the device.
    pub fn on_unavailable(&mut self) -> ConnectivityState {
        let from = self.state;
        self.state = ConnectivityState::Absent;
        self.was_unavailable = true;
        self.retry_not_before = None;
        if from != ConnectivityState::Absent {
            debug!("Connectivity state changed: {} -> Absent", from);
        }
        from
    }

    /// Whether a new session may start at `now`.
    pub fn can_begin_connect(&self, now: Instant) -> bool {
        match self.state {
            ConnectivityState::Advertising => true,
            ConnectivityState::Lost => self.backoff_elapsed(now),
            _ => false,
        }
    }

    fn backoff_elapsed(&self, now: Instant) -> bool {
        self.retry_not_before.map_or(true, |t| now >= t)
    }
}

impl Default for ConnectivityMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use ConnectivityState::*;

    #[test]
    fn test_state_predicates() {
        assert!(Connected.is_connected());
        assert!(!Connecting.is_connected());
        assert!(Connecting.is_in_session());
        assert!(Connected.is_in_session());
        assert!(!Lost.is_in_session());
        assert!(!Absent.is_present());
        assert!(Lost.is_present());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(format!("{}", Advertising), "Advertising");
        assert_eq!(format!("{}", Lost), "Lost");
    }

    #[test]
    fn test_transition_table() {
        let legal = [
            (Absent, Advertising),
            (Advertising, Advertising),
            (Advertising, Connecting),
            (Connecting, Connected),
            (Connecting, Lost),
            (Connected, Lost),
            (Connected, Advertising),
            (Lost, Connecting),
            (Lost, Advertising),
            (Connected, Absent),
            (Lost, Absent),
        ];
        for (from, to) in legal {
            assert!(from.can_transition_to(to), "{} -> {}", from, to);
        }

        let illegal = [
            (Absent, Connecting),
            (Absent, Connected),
            (Advertising, Connected),
            (Connected, Connecting),
            (Lost, Connected),
            (Absent, Lost),
        ];
        for (from, to) in illegal {
            assert!(!from.can_transition_to(to), "{} -> {}", from, to);
        }
    }

    #[test]
    fn test_first_sighting_flag() {
        let mut machine = ConnectivityMachine::new();

        let first = machine.on_sighting();
        assert!(first.transitioned);
        assert!(first.first_since_unavailable);
        assert_eq!(machine.state(), Advertising);

        let second = machine.on_sighting();
        assert!(!second.transitioned);
        assert!(!second.first_since_unavailable);

        machine.on_unavailable();
        assert_eq!(machine.state(), Absent);
        assert!(machine.on_sighting().first_since_unavailable);
    }

    #[test]
    fn test_sighting_does_not_disturb_session() {
        let mut machine = ConnectivityMachine::new();
        machine.on_sighting();
        machine.begin_connect(Instant::now()).unwrap();
        machine.on_subscribed().unwrap();

        machine.on_sighting();
        assert_eq!(machine.state(), Connected);
    }

    #[test]
    fn test_full_session_cycle() {
        let mut machine = ConnectivityMachine::new();
        let now = Instant::now();

        machine.on_sighting();
        assert_eq!(machine.begin_connect(now).unwrap(), Advertising);
        assert_eq!(machine.on_subscribed().unwrap(), Connecting);
        assert_eq!(machine.on_session_end().unwrap(), Connected);
        assert_eq!(machine.state(), Advertising);
    }

    #[test]
    fn test_backoff_blocks_retry() {
        let mut machine = ConnectivityMachine::new();
        let start = Instant::now();
        let backoff = Duration::from_secs(30);

        machine.on_sighting();
        machine.begin_connect(start).unwrap();
        machine.on_subscribed().unwrap();
        machine.on_failure(start + backoff).unwrap();
        assert_eq!(machine.state(), Lost);
        assert_eq!(machine.retry_not_before(), Some(start + backoff));

        assert!(!machine.can_begin_connect(start + Duration::from_secs(29)));
        assert!(machine
            .begin_connect(start + Duration::from_secs(29))
            .is_err());
        assert_eq!(machine.state(), Lost);

        assert!(machine.can_begin_connect(start + backoff));
        assert_eq!(machine.begin_connect(start + backoff).unwrap(), Lost);
        assert_eq!(machine.retry_not_before(), None);
    }

    #[test]
    fn test_connect_requires_sighting() {
        let mut machine = ConnectivityMachine::new();
        assert!(!machine.can_begin_connect(Instant::now()));
        assert!(matches!(
            machine.begin_connect(Instant::now()),
            Err(Error::InvalidTransition {
                from: Absent,
                to: Connecting
            })
        ));
    }

    #[test]
    fn test_idle_after_failure() {
        let mut machine = ConnectivityMachine::new();
        let now = Instant::now();
        machine.on_sighting();
        machine.begin_connect(now).unwrap();
        machine.on_failure(now).unwrap();

        assert_eq!(machine.go_idle().unwrap(), Lost);
        assert_eq!(machine.state(), Advertising);
    }

    #[test]
    fn test_unavailable_from_any_state() {
        let mut machine = ConnectivityMachine::new();
        let now = Instant::now();
        machine.on_sighting();
        machine.begin_connect(now).unwrap();
        machine.on_subscribed().unwrap();

        assert_eq!(machine.on_unavailable(), Connected);
        assert_eq!(machine.state(), Absent);
        assert!(machine.on_subscribed().is_err());
    }
}
