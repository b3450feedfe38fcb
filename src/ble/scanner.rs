//! BLE scanning functionality.
//!
//! Turns adapter events into [`AdvertisementSighting`]s for advertisers that
//! carry the monitor's manufacturer id, and records their peripherals so the
//! transport can connect to them later.

use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, PeripheralId};
use bytes::Bytes;
use futures::stream::StreamExt;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace};

use crate::ble::advertising::AdvertisementSighting;
use crate::ble::connection::{BtleplugTransport, PeripheralRegistry};
use crate::ble::uuids::{is_supported, ETEKCITY_MANUFACTURER_ID};
use crate::error::{Error, Result};

/// BLE scanner for blood pressure monitors.
pub struct BleScanner {
    /// The BLE adapter to use for scanning.
    adapter: Adapter,
    /// Manufacturer id advertisements are filtered on.
    manufacturer_id: u16,
    /// Whether scanning is currently active.
    is_scanning: Arc<RwLock<bool>>,
    /// Peripherals seen advertising the manufacturer id.
    peripherals: PeripheralRegistry,
    /// Channel for sightings.
    event_tx: broadcast::Sender<AdvertisementSighting>,
    /// Handle to the scanning task.
    scan_handle: RwLock<Option<tokio::task::JoinHandle<()>>>,
}

impl BleScanner {
    /// Create a scanner on the first Bluetooth adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self::with_adapter(adapter))
    }

    /// Create a scanner with a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        let (event_tx, _) = broadcast::channel(100);

        Self {
            adapter,
            manufacturer_id: ETEKCITY_MANUFACTURER_ID,
            is_scanning: Arc::new(RwLock::new(false)),
            peripherals: PeripheralRegistry::default(),
            event_tx,
            scan_handle: RwLock::new(None),
        }
    }

    /// Treat a peripheral as unreachable once it has not advertised for
    /// `freshness`. Defaults to
    /// [`DEFAULT_UNAVAILABLE_AFTER`](crate::config::DEFAULT_UNAVAILABLE_AFTER).
    pub fn with_freshness(mut self, freshness: Duration) -> Self {
        self.peripherals = PeripheralRegistry::new(freshness);
        self
    }

    /// Filter on a different manufacturer id.
    pub fn with_manufacturer_id(mut self, manufacturer_id: u16) -> Self {
        self.manufacturer_id = manufacturer_id;
        self
    }

    /// Start scanning.
    ///
    /// # Errors
    ///
    /// Returns an error if scanning cannot be started.
    pub async fn start_scanning(&self) -> Result<()> {
        if *self.is_scanning.read() {
            debug!("Already scanning, ignoring start request");
            return Ok(());
        }

        info!(
            "Starting BLE scan for manufacturer id 0x{:04X}",
            self.manufacturer_id
        );

        self.adapter.start_scan(ScanFilter::default()).await?;

        *self.is_scanning.write() = true;

        let adapter = self.adapter.clone();
        let manufacturer_id = self.manufacturer_id;
        let is_scanning = self.is_scanning.clone();
        let peripherals = self.peripherals.clone();
        let event_tx = self.event_tx.clone();

        let handle = tokio::spawn(async move {
            let mut eviction =
                tokio::time::interval(peripherals.freshness().max(Duration::from_secs(1)));
            eviction.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut events = match adapter.events().await {
                Ok(events) => events,
                Err(e) => {
                    error!("Failed to get adapter events: {}", e);
                    return;
                }
            };

            while *is_scanning.read() {
                tokio::select! {
                    Some(event) = events.next() => {
                        Self::handle_event(
                            event,
                            &adapter,
                            manufacturer_id,
                            &peripherals,
                            &event_tx,
                        ).await;
                    }
                    _ = eviction.tick() => {
                        let evicted = peripherals.evict_stale();
                        if evicted > 0 {
                            debug!("Evicted {} stale peripherals", evicted);
                        }
                    }
                    _ = tokio::time::sleep(Duration::from_millis(100)) => {}
                }
            }

            debug!("Scan event loop ended");
        });

        *self.scan_handle.write() = Some(handle);

        Ok(())
    }

    /// Stop scanning.
    pub async fn stop_scanning(&self) -> Result<()> {
        if !*self.is_scanning.read() {
            debug!("Not scanning, ignoring stop request");
            return Ok(());
        }

        info!("Stopping BLE scan");

        *self.is_scanning.write() = false;

        self.adapter.stop_scan().await?;

        let handle = self.scan_handle.write().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        Ok(())
    }

    /// Check if currently scanning.
    pub fn is_scanning(&self) -> bool {
        *self.is_scanning.read()
    }

    /// Subscribe to sightings.
    pub fn subscribe(&self) -> broadcast::Receiver<AdvertisementSighting> {
        self.event_tx.subscribe()
    }

    /// A transport that connects to peripherals found by this scanner.
    pub fn transport(&self) -> BtleplugTransport {
        BtleplugTransport::new(self.peripherals.clone())
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    async fn handle_event(
        event: CentralEvent,
        adapter: &Adapter,
        manufacturer_id: u16,
        peripherals: &PeripheralRegistry,
        event_tx: &broadcast::Sender<AdvertisementSighting>,
    ) {
        match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                trace!("Device discovered or updated: {:?}", id);
                Self::process_peripheral(adapter, id, manufacturer_id, peripherals, event_tx)
                    .await;
            }
            CentralEvent::ManufacturerDataAdvertisement {
                id,
                manufacturer_data,
            } => {
                if is_supported(manufacturer_data.keys(), manufacturer_id) {
                    Self::process_peripheral(adapter, id, manufacturer_id, peripherals, event_tx)
                        .await;
                }
            }
            CentralEvent::DeviceDisconnected(id) => {
                debug!("Device disconnected: {:?}", id);
            }
            _ => {}
        }
    }

    async fn process_peripheral(
        adapter: &Adapter,
        id: PeripheralId,
        manufacturer_id: u16,
        peripherals: &PeripheralRegistry,
        event_tx: &broadcast::Sender<AdvertisementSighting>,
    ) {
        let peripheral = match adapter.peripheral(&id).await {
            Ok(p) => p,
            Err(e) => {
                trace!("Failed to get peripheral: {}", e);
                return;
            }
        };

        let properties = match peripheral.properties().await {
            Ok(Some(p)) => p,
            _ => return,
        };

        if !is_supported(properties.manufacturer_data.keys(), manufacturer_id) {
            return;
        }

        let address = properties.address.to_string().to_ascii_uppercase();
        let sighting = properties.manufacturer_data.into_iter().fold(
            AdvertisementSighting::new(address.clone(), properties.rssi),
            |sighting, (id, data)| sighting.with_manufacturer_data(id, Bytes::from(data)),
        );

        peripherals.record(&address, peripheral);

        let _ = event_tx.send(sighting);
    }
}

impl Drop for BleScanner {
    fn drop(&mut self) {
        *self.is_scanning.write() = false;
    }
}
