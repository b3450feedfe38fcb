//! Per-device coordinator.
//!
//! Owns everything known about one monitor: the measurement store, the
//! connectivity machine, the readiness gate and the availability flag. The
//! advertisement path calls [`Coordinator::handle_advertisement`]; the host
//! (or [`DeviceMonitor`](crate::DeviceMonitor)) asks
//! [`Coordinator::needs_poll`] and runs [`Coordinator::poll`] when it says so.
//!
//! A poll runs the session loop: connect, check the link, enable
//! notifications, arm the monitor through its configuration descriptor,
//! listen for the active window, disable notifications, pause, and go again
//! for as long as the device stays available. A failed session is logged and
//! answered with the failure backoff; it never reaches the caller.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::ble::advertising::AdvertisementSighting;
use crate::ble::connectivity::{ConnectivityEvent, ConnectivityMachine, ConnectivityState};
use crate::ble::transport::{BleLink, BleTransport, NotificationEvent};
use crate::config::CoordinatorConfig;
use crate::data::{DeviceSnapshot, MeasurementValue};
use crate::error::{Error, Result};
use crate::protocol::{decode, ActiveUserContext, DecodeResult};
use crate::readiness::ReadinessGate;
use crate::scheduler::{AlwaysPoll, HostLifecycle, PollScheduler};
use crate::store::{CallbackHandle, MeasurementStore};

/// Coordinates one blood pressure monitor.
pub struct Coordinator<T: BleTransport> {
    address: String,
    config: CoordinatorConfig,
    transport: Arc<T>,
    store: MeasurementStore,
    machine: Mutex<ConnectivityMachine>,
    readiness: ReadinessGate,
    available: AtomicBool,
    availability_changed: Notify,
    scheduler: PollScheduler,
    /// Held for the whole life of a session loop.
    session_lock: tokio::sync::Mutex<()>,
    last_poll: Mutex<Option<Instant>>,
    last_seen: Mutex<Option<Instant>>,
    state_tx: broadcast::Sender<ConnectivityEvent>,
}

impl<T: BleTransport> Coordinator<T> {
    /// Create a coordinator for the monitor at `address`.
    ///
    /// The host is assumed to be running and polling is unconditional; use
    /// [`Coordinator::with_scheduler`] to change either.
    pub fn new(address: impl Into<String>, transport: Arc<T>, config: CoordinatorConfig) -> Self {
        let (state_tx, _) = broadcast::channel(32);

        Self {
            address: address.into(),
            config,
            transport,
            store: MeasurementStore::new(),
            machine: Mutex::new(ConnectivityMachine::new()),
            readiness: ReadinessGate::new(),
            available: AtomicBool::new(false),
            availability_changed: Notify::new(),
            scheduler: PollScheduler::new(Arc::new(HostLifecycle::default()), Arc::new(AlwaysPoll)),
            session_lock: tokio::sync::Mutex::new(()),
            last_poll: Mutex::new(None),
            last_seen: Mutex::new(None),
            state_tx,
        }
    }

    /// Replace the poll scheduler.
    pub fn with_scheduler(mut self, scheduler: PollScheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Get the device address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Get the configuration.
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Get the host lifecycle the scheduler consults.
    pub fn host(&self) -> &Arc<HostLifecycle> {
        self.scheduler.host()
    }

    /// Get the measurement store.
    pub fn store(&self) -> &MeasurementStore {
        &self.store
    }

    /// Get the current connectivity state.
    pub fn state(&self) -> ConnectivityState {
        self.machine.lock().state()
    }

    /// Whether the device is currently considered available.
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Last received signal strength, or [`UNKNOWN_RSSI`](crate::data::UNKNOWN_RSSI).
    pub fn rssi(&self) -> i16 {
        self.store.snapshot().rssi()
    }

    /// Current value per channel key.
    pub fn sensor_data(&self) -> BTreeMap<&'static str, Option<MeasurementValue>> {
        self.store.snapshot().sensor_data()
    }

    /// Get the current snapshot.
    pub fn snapshot(&self) -> Arc<DeviceSnapshot> {
        self.store.snapshot()
    }

    /// Register a callback for snapshot changes.
    pub fn subscribe<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&DeviceSnapshot) + Send + Sync + 'static,
    {
        self.store.subscribe(callback)
    }

    /// Subscribe to connectivity state changes.
    pub fn subscribe_state(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.state_tx.subscribe()
    }

    /// Re-seed a channel from a persisted state string.
    pub fn restore(&self, key: &str, state: &str) -> Result<bool> {
        self.store.restore(key, state)
    }

    /// Time since the last poll started, if any did.
    pub fn since_last_poll(&self) -> Option<Duration> {
        self.last_poll.lock().map(|t| t.elapsed())
    }

    /// Instant of the last accepted advertisement.
    pub fn last_seen(&self) -> Option<Instant> {
        *self.last_seen.lock()
    }

    /// Handle an advertisement sighting.
    ///
    /// Returns `false` for advertisements from other devices or without the
    /// configured manufacturer id.
    pub fn handle_advertisement(&self, sighting: &AdvertisementSighting) -> bool {
        if !sighting.address.eq_ignore_ascii_case(&self.address) {
            return false;
        }
        let Some(advertisement) = sighting.parse(self.config.manufacturer_id) else {
            return false;
        };

        *self.last_seen.lock() = Some(Instant::now());
        self.store.apply_advertisement(
            &self.address,
            advertisement.rssi,
            advertisement.manufacturer_id,
            advertisement.manufacturer_data,
        );

        let outcome = self.machine.lock().on_sighting();
        if outcome.transitioned {
            self.emit(ConnectivityState::Absent, ConnectivityState::Advertising);
        }
        if outcome.first_since_unavailable {
            self.readiness.signal();
            self.set_available(true);
            info!("{} ({}) is online", self.config.device_name, self.address);
        }

        true
    }

    /// Whether a poll should start now.
    ///
    /// `since_last_poll` defaults to [`Coordinator::since_last_poll`] when
    /// the host does not track it itself.
    pub fn needs_poll(&self, since_last_poll: Option<Duration>) -> bool {
        let since_last_poll = since_last_poll.or_else(|| self.since_last_poll());
        let idle = self.machine.lock().can_begin_connect(Instant::now())
            && self.session_lock.try_lock().is_ok();

        self.scheduler
            .needs_poll(&self.address, since_last_poll, idle, &*self.transport)
    }

    /// Run the session loop until the device becomes unavailable, the host
    /// stops, or no connectable path is left.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionInProgress`] if another poll is running, and
    /// [`Error::InvalidTransition`] if the connectivity machine refuses the
    /// first connection attempt. Session failures are answered with the
    /// failure backoff here and never returned.
    pub async fn poll(&self) -> Result<()> {
        let _session = self
            .session_lock
            .try_lock()
            .map_err(|_| Error::SessionInProgress {
                address: self.address.clone(),
            })?;

        *self.last_poll.lock() = Some(Instant::now());
        let mut context = ActiveUserContext::new();
        let mut sessions = 0usize;

        while self.is_available() {
            let begun = self.machine.lock().begin_connect(Instant::now());
            match begun {
                Ok(from) => self.emit(from, ConnectivityState::Connecting),
                Err(e) if sessions == 0 => return Err(e),
                Err(_) => break,
            }
            sessions += 1;

            match self.run_session(&mut context).await {
                Ok(()) => {
                    let ended = {
                        let mut machine = self.machine.lock();
                        if machine.state() == ConnectivityState::Connected {
                            machine.on_session_end().ok()
                        } else {
                            None
                        }
                    };
                    let Some(from) = ended else {
                        break;
                    };
                    self.emit(from, ConnectivityState::Advertising);

                    if !self.can_continue() {
                        break;
                    }
                }
                Err(e) => {
                    if !self.is_available() {
                        debug!("Session with {} ended by unavailability: {}", self.address, e);
                        break;
                    }

                    let backoff = self.config.timings.failure_backoff;
                    let retry_at = Instant::now() + backoff;
                    let failed = self.machine.lock().on_failure(retry_at);
                    match failed {
                        Ok(from) => self.emit(from, ConnectivityState::Lost),
                        Err(_) => break,
                    }

                    if e.is_transport_failure() {
                        warn!(
                            "Session with {} failed: {}; retrying in {:?}",
                            self.address, e, backoff
                        );
                    } else {
                        error!(
                            "Session with {} hit a non-transport error: {}; retrying in {:?}",
                            self.address, e, backoff
                        );
                    }

                    if !self.idle_until(retry_at).await {
                        break;
                    }
                    if !self.can_continue() {
                        let idle = self.machine.lock().go_idle();
                        if let Ok(from) = idle {
                            self.emit(from, ConnectivityState::Advertising);
                        }
                        break;
                    }
                }
            }
        }

        debug!("Session loop for {} finished after {} sessions", self.address, sessions);
        Ok(())
    }

    /// Decode one notification and merge it into the store.
    ///
    /// Notifications from other characteristics are ignored.
    pub fn handle_notification(
        &self,
        context: &mut ActiveUserContext,
        event: &NotificationEvent,
    ) -> DecodeResult {
        if event.characteristic != self.config.characteristic {
            return DecodeResult::Ignored;
        }

        let result = decode(context, &event.data);
        if let DecodeResult::Updates(updates) = &result {
            self.store.apply_updates(updates.iter().copied());
        }
        result
    }

    /// The host no longer sees the device.
    ///
    /// Moves to `Absent`, clears availability and re-arms the readiness
    /// gate. A running session loop exits at its next check.
    pub fn handle_unavailable(&self) {
        let from = self.machine.lock().on_unavailable();
        self.set_available(false);
        self.readiness.reset();
        self.emit(from, ConnectivityState::Absent);
        info!("{} ({}) is unavailable", self.config.device_name, self.address);
    }

    /// Wait for the device to become ready, using the configured timeout.
    pub async fn wait_ready(&self) -> bool {
        self.wait_ready_for(self.config.startup_timeout).await
    }

    /// Wait up to `timeout` for the device to become ready.
    ///
    /// Returns `false` on timeout; the device is then treated as not ready
    /// and the caller should retry later.
    pub async fn wait_ready_for(&self, timeout: Duration) -> bool {
        if !self.readiness.wait(timeout).await {
            debug!(
                "{} ({}) not ready after {:?}",
                self.config.device_name, self.address, timeout
            );
            return false;
        }

        self.set_available(true);
        info!("{} ({}) is ready", self.config.device_name, self.address);
        true
    }

    async fn run_session(&self, context: &mut ActiveUserContext) -> Result<()> {
        debug!("Connecting to {}", self.address);
        let link = SessionLink::new(self.transport.connect(&self.address).await?);

        let result = self.drive_session(link.link(), context).await;
        link.release().await;
        result
    }

    async fn drive_session<L: BleLink>(
        &self,
        link: &L,
        context: &mut ActiveUserContext,
    ) -> Result<()> {
        if !link.is_connected().await {
            return Err(Error::NotConnected);
        }

        let characteristic = self.config.characteristic;
        let (tx, mut rx) = mpsc::unbounded_channel();
        link.start_notify(characteristic, tx).await?;

        let subscribed = self.machine.lock().on_subscribed();
        self.emit(subscribed?, ConnectivityState::Connected);
        self.readiness.signal();

        link.write_descriptor(&self.config.config_descriptor, &self.config.config_payload)
            .await?;
        debug!("Armed {}; listening for {:?}", self.address, self.config.timings.active_window);

        let window = tokio::time::sleep(self.config.timings.active_window);
        tokio::pin!(window);
        loop {
            tokio::select! {
                _ = &mut window => break,
                _ = self.wait_unavailable() => break,
                event = rx.recv() => match event {
                    Some(event) => {
                        self.handle_notification(context, &event);
                    }
                    None => break,
                },
            }
        }

        let stopped =
            tokio::time::timeout(self.config.timings.stop_notify_timeout, link.stop_notify(characteristic))
                .await;
        match stopped {
            Ok(result) => result?,
            Err(_) => {
                return Err(Error::Timeout {
                    operation: "stop_notify",
                })
            }
        }

        while let Ok(event) = rx.try_recv() {
            self.handle_notification(context, &event);
        }

        tokio::time::sleep(self.config.timings.pause).await;
        Ok(())
    }

    fn can_continue(&self) -> bool {
        self.scheduler.host().is_running() && self.transport.has_connectable_path(&self.address)
    }

    /// Sleep until `deadline`. Returns `false` if the device became
    /// unavailable first.
    async fn idle_until(&self, deadline: Instant) -> bool {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => self.is_available(),
            _ = self.wait_unavailable() => false,
        }
    }

    async fn wait_unavailable(&self) {
        loop {
            let notified = self.availability_changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !self.is_available() {
                return;
            }
            notified.await;
        }
    }

    fn set_available(&self, available: bool) {
        if self.available.swap(available, Ordering::SeqCst) != available {
            self.availability_changed.notify_waiters();
        }
    }

    fn emit(&self, from: ConnectivityState, to: ConnectivityState) {
        if from == to {
            return;
        }
        self.store.set_active(to.is_connected());
        let _ = self.state_tx.send(ConnectivityEvent {
            address: self.address.clone(),
            from,
            to,
        });
    }
}

impl<T: BleTransport> std::fmt::Debug for Coordinator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("address", &self.address)
            .field("state", &self.state())
            .field("available", &self.is_available())
            .finish()
    }
}

/// Releases the link on every exit path.
///
/// [`SessionLink::release`] disconnects in place; if the session future is
/// dropped instead, the disconnect is spawned onto the runtime.
struct SessionLink<L: BleLink> {
    link: Arc<L>,
    released: bool,
}

impl<L: BleLink> SessionLink<L> {
    fn new(link: L) -> Self {
        Self {
            link: Arc::new(link),
            released: false,
        }
    }

    fn link(&self) -> &L {
        &self.link
    }

    async fn release(mut self) {
        self.released = true;
        if let Err(e) = self.link.disconnect().await {
            debug!("Disconnect failed: {}", e);
        }
    }
}

impl<L: BleLink> Drop for SessionLink<L> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let link = self.link.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = link.disconnect().await {
                    debug!("Disconnect after cancelled session failed: {}", e);
                }
            });
        }
    }
}
