//! btleplug-backed transport.
//!
//! The scanner registers every peripheral it sees advertising the
//! manufacturer id; [`BtleplugTransport`] connects to those on demand and
//! hands the coordinator a [`BtleplugLink`] for one session.

use async_trait::async_trait;
use btleplug::api::Peripheral as _;
use btleplug::platform::Peripheral;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ble::characteristics::CharacteristicHandler;
use crate::ble::transport::{BleLink, BleTransport, NotificationSink};
use crate::config::{DescriptorRef, DEFAULT_UNAVAILABLE_AFTER};
use crate::error::{Error, Result};
use crate::scheduler::ConnectablePaths;

/// Peripherals the scanner has seen, keyed by upper-case address.
pub(crate) type PeripheralRegistry = Registry<Peripheral>;

struct Entry<P> {
    value: P,
    last_seen: Instant,
}

/// Advertisers keyed by upper-case address, with the time each was last
/// heard. An entry counts as reachable only while it is within the
/// freshness window.
pub(crate) struct Registry<P> {
    entries: Arc<RwLock<HashMap<String, Entry<P>>>>,
    freshness: Duration,
}

impl<P> Clone for Registry<P> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            freshness: self.freshness,
        }
    }
}

impl<P> Default for Registry<P> {
    fn default() -> Self {
        Self::new(DEFAULT_UNAVAILABLE_AFTER)
    }
}

impl<P> Registry<P> {
    pub(crate) fn new(freshness: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            freshness,
        }
    }

    pub(crate) fn freshness(&self) -> Duration {
        self.freshness
    }

    /// Record an advertisement from `address`.
    pub(crate) fn record(&self, address: &str, value: P) {
        self.entries.write().insert(
            address.to_ascii_uppercase(),
            Entry {
                value,
                last_seen: Instant::now(),
            },
        );
    }

    /// Whether `address` advertised within the freshness window.
    pub(crate) fn is_fresh(&self, address: &str) -> bool {
        self.entries
            .read()
            .get(&address.to_ascii_uppercase())
            .map_or(false, |entry| entry.last_seen.elapsed() <= self.freshness)
    }

    /// Drop entries that have not advertised within the freshness window.
    /// Returns how many were removed.
    pub(crate) fn evict_stale(&self) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.last_seen.elapsed() <= self.freshness);
        before - entries.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().len()
    }
}

impl<P: Clone> Registry<P> {
    pub(crate) fn get(&self, address: &str) -> Option<P> {
        self.entries
            .read()
            .get(&address.to_ascii_uppercase())
            .map(|entry| entry.value.clone())
    }
}

/// Connects to monitors found by a [`BleScanner`](crate::ble::BleScanner).
#[derive(Clone)]
pub struct BtleplugTransport {
    peripherals: PeripheralRegistry,
}

impl BtleplugTransport {
    pub(crate) fn new(peripherals: PeripheralRegistry) -> Self {
        Self { peripherals }
    }

    /// Get the peripheral for an address, if it has been seen.
    pub fn peripheral(&self, address: &str) -> Option<Peripheral> {
        self.peripherals.get(address)
    }

    /// Number of known peripherals.
    pub fn peripheral_count(&self) -> usize {
        self.peripherals.len()
    }
}

impl ConnectablePaths for BtleplugTransport {
    fn has_connectable_path(&self, address: &str) -> bool {
        self.peripherals.is_fresh(address)
    }
}

#[async_trait]
impl BleTransport for BtleplugTransport {
    type Link = BtleplugLink;

    async fn connect(&self, address: &str) -> Result<BtleplugLink> {
        let peripheral = self
            .peripheral(address)
            .ok_or_else(|| Error::DeviceNotFound {
                address: address.to_string(),
            })?;

        if peripheral.is_connected().await.unwrap_or(false) {
            debug!("{} already connected at BLE level", address);
        } else {
            peripheral
                .connect()
                .await
                .map_err(|e| Error::ConnectionFailed {
                    reason: e.to_string(),
                })?;
            info!("Connected to {}", address);
        }

        if let Err(e) = peripheral.discover_services().await {
            warn!("Failed to discover services on {}: {}", address, e);
        }

        let handler = CharacteristicHandler::new(peripheral.clone());
        handler.discover_characteristics();

        Ok(BtleplugLink {
            address: address.to_string(),
            peripheral,
            handler,
        })
    }
}

/// A connected monitor.
pub struct BtleplugLink {
    address: String,
    peripheral: Peripheral,
    handler: CharacteristicHandler,
}

impl BtleplugLink {
    /// Get the peripheral.
    pub fn peripheral(&self) -> &Peripheral {
        &self.peripheral
    }

    /// Get the characteristic handler.
    pub fn characteristics(&self) -> &CharacteristicHandler {
        &self.handler
    }
}

#[async_trait]
impl BleLink for BtleplugLink {
    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn start_notify(&self, characteristic: Uuid, sink: NotificationSink) -> Result<()> {
        self.handler.subscribe(&characteristic).await?;
        self.handler.start_forwarding(characteristic, sink).await
    }

    async fn stop_notify(&self, characteristic: Uuid) -> Result<()> {
        self.handler.stop_forwarding();
        self.handler.unsubscribe(&characteristic).await
    }

    async fn write_descriptor(&self, descriptor: &DescriptorRef, data: &[u8]) -> Result<()> {
        self.handler.write_descriptor(descriptor, data).await
    }

    async fn disconnect(&self) -> Result<()> {
        self.handler.stop_forwarding();

        match self.peripheral.disconnect().await {
            Ok(()) => {
                debug!("Disconnected from {}", self.address);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to disconnect from {}: {}", self.address, e);
                Err(Error::Bluetooth(e))
            }
        }
    }
}
