//! Background driver for a coordinator.
//!
//! Feeds advertisement sightings to a [`Coordinator`], starts a poll whenever
//! the coordinator asks for one, and expires the device when it has not been
//! seen for [`CoordinatorConfig::unavailable_after`](crate::CoordinatorConfig).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::ble::advertising::AdvertisementSighting;
use crate::ble::transport::BleTransport;
use crate::coordinator::Coordinator;

/// How often availability expiry is checked.
const EXPIRY_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Runs a coordinator from a stream of advertisement sightings.
pub struct DeviceMonitor<T: BleTransport> {
    coordinator: Arc<Coordinator<T>>,
    background_handle: RwLock<Option<JoinHandle<()>>>,
    poll_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
    is_running: Arc<AtomicBool>,
}

impl<T: BleTransport> DeviceMonitor<T> {
    /// Create a monitor for a coordinator.
    pub fn new(coordinator: Arc<Coordinator<T>>) -> Self {
        Self {
            coordinator,
            background_handle: RwLock::new(None),
            poll_handle: Arc::new(Mutex::new(None)),
            is_running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get the coordinator.
    pub fn coordinator(&self) -> &Arc<Coordinator<T>> {
        &self.coordinator
    }

    /// Check if the monitor is running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Start processing sightings from `sightings`.
    pub fn start(&self, sightings: broadcast::Receiver<AdvertisementSighting>) {
        if self.is_running.swap(true, Ordering::SeqCst) {
            debug!("Monitor already running");
            return;
        }

        info!("Monitoring {}", self.coordinator.address());

        let coordinator = self.coordinator.clone();
        let poll_handle = self.poll_handle.clone();
        let is_running = self.is_running.clone();

        let handle = tokio::spawn(async move {
            let mut rx = sightings;
            let mut expiry = tokio::time::interval(EXPIRY_CHECK_INTERVAL);
            expiry.set_missed_tick_behavior(MissedTickBehavior::Delay);

            while is_running.load(Ordering::SeqCst) {
                tokio::select! {
                    received = rx.recv() => match received {
                        Ok(sighting) => {
                            if coordinator.handle_advertisement(&sighting) {
                                Self::maybe_poll(&coordinator, &poll_handle);
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            debug!("Monitor skipped {} sightings", skipped);
                        }
                        Err(RecvError::Closed) => {
                            info!("Sighting stream closed");
                            if coordinator.is_available() {
                                coordinator.handle_unavailable();
                            }
                            break;
                        }
                    },
                    _ = expiry.tick() => {
                        Self::check_expired(&coordinator);
                    }
                }
            }

            debug!("Monitor background task ended");
        });

        *self.background_handle.write() = Some(handle);
    }

    /// Stop the monitor.
    ///
    /// The device is marked unavailable so a running session loop winds
    /// down, and this waits for it to release the link.
    pub async fn stop(&self) {
        if !self.is_running.swap(false, Ordering::SeqCst) {
            return;
        }

        info!("Stopping monitor for {}", self.coordinator.address());

        let background = self.background_handle.write().take();
        if let Some(handle) = background {
            let _ = handle.await;
        }

        if self.coordinator.is_available() {
            self.coordinator.handle_unavailable();
        }

        let poll = self.poll_handle.lock().take();
        if let Some(handle) = poll {
            let _ = handle.await;
        }
    }

    fn maybe_poll(coordinator: &Arc<Coordinator<T>>, poll_handle: &Mutex<Option<JoinHandle<()>>>) {
        if !coordinator.needs_poll(None) {
            return;
        }

        let coordinator = coordinator.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = coordinator.poll().await {
                debug!("Poll for {} not started: {}", coordinator.address(), e);
            }
        });
        *poll_handle.lock() = Some(handle);
    }

    fn check_expired(coordinator: &Coordinator<T>) {
        if !coordinator.is_available() {
            return;
        }
        let expired = coordinator
            .last_seen()
            .map_or(false, |seen| seen.elapsed() >= coordinator.config().unavailable_after);
        if expired {
            warn!(
                "No advertisement from {} for {:?}",
                coordinator.address(),
                coordinator.config().unavailable_after
            );
            coordinator.handle_unavailable();
        }
    }
}

impl<T: BleTransport> Drop for DeviceMonitor<T> {
    fn drop(&mut self) {
        self.is_running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::connectivity::ConnectivityState;
    use crate::ble::fake::FakeTransport;
    use crate::ble::uuids::ETEKCITY_MANUFACTURER_ID;
    use crate::config::CoordinatorConfig;

    const ADDRESS: &str = "AA:BB:CC:DD:EE:FF";

    fn sighting() -> AdvertisementSighting {
        AdvertisementSighting::new(ADDRESS, Some(-70))
            .with_manufacturer_data(ETEKCITY_MANUFACTURER_ID, vec![0x00u8])
    }

    fn monitor(transport: &FakeTransport, config: CoordinatorConfig) -> DeviceMonitor<FakeTransport> {
        DeviceMonitor::new(Arc::new(Coordinator::new(
            ADDRESS,
            Arc::new(transport.clone()),
            config,
        )))
    }

    #[tokio::test(start_paused = true)]
    async fn test_sighting_starts_session() {
        let transport = FakeTransport::new();
        let monitor = monitor(&transport, CoordinatorConfig::default());
        let (tx, rx) = broadcast::channel(8);

        monitor.start(rx);
        assert!(monitor.is_running());
        tx.send(sighting()).unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(transport.connect_count(), 1);
        assert_eq!(monitor.coordinator().state(), ConnectivityState::Connected);

        // Further sightings do not start a second session.
        tx.send(sighting()).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(transport.connect_count(), 1);

        monitor.stop().await;
        assert!(!monitor.is_running());
        assert_eq!(monitor.coordinator().state(), ConnectivityState::Absent);
        assert_eq!(transport.disconnect_count(), transport.connect_count());
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_expires_without_sightings() {
        let transport = FakeTransport::new();
        transport
            .state
            .connectable
            .store(false, Ordering::SeqCst);
        let monitor = monitor(
            &transport,
            CoordinatorConfig::default().with_unavailable_after(Duration::from_secs(10)),
        );
        let (tx, rx) = broadcast::channel(8);

        monitor.start(rx);
        tx.send(sighting()).unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(monitor.coordinator().is_available());
        assert_eq!(transport.connect_count(), 0);

        tokio::time::sleep(Duration::from_secs(7)).await;
        assert!(!monitor.coordinator().is_available());
        assert_eq!(monitor.coordinator().state(), ConnectivityState::Absent);

        // Seen again: available again.
        tx.send(sighting()).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(monitor.coordinator().is_available());

        monitor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_advertisers_do_not_delay_expiry() {
        let transport = FakeTransport::new();
        transport
            .state
            .connectable
            .store(false, Ordering::SeqCst);
        let monitor = monitor(
            &transport,
            CoordinatorConfig::default().with_unavailable_after(Duration::from_secs(10)),
        );
        let (tx, rx) = broadcast::channel(8);

        monitor.start(rx);
        tx.send(sighting()).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(monitor.coordinator().is_available());

        let neighbour = AdvertisementSighting::new("11:22:33:44:55:66", Some(-50))
            .with_manufacturer_data(ETEKCITY_MANUFACTURER_ID, vec![0x00u8]);
        for _ in 0..60 {
            tx.send(neighbour.clone()).unwrap();
            tokio::time::sleep(Duration::from_millis(500)).await;
        }

        assert!(!monitor.coordinator().is_available());
        assert_eq!(monitor.coordinator().state(), ConnectivityState::Absent);

        monitor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_stream_marks_unavailable() {
        let transport = FakeTransport::new();
        transport
            .state
            .connectable
            .store(false, Ordering::SeqCst);
        let monitor = monitor(&transport, CoordinatorConfig::default());
        let (tx, rx) = broadcast::channel(8);

        monitor.start(rx);
        tx.send(sighting()).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(monitor.coordinator().is_available());

        drop(tx);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!monitor.coordinator().is_available());

        monitor.stop().await;
    }
}
