//! GATT characteristic handling.
//!
//! Subscribes to the measurement characteristic, forwards its notifications
//! to a session, and writes the configuration descriptor.

use btleplug::api::{Characteristic, Descriptor, Peripheral as _};
use btleplug::platform::Peripheral;
use futures::stream::StreamExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::task::JoinHandle;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::ble::transport::{NotificationEvent, NotificationSink};
use crate::config::DescriptorRef;
use crate::error::{Error, Result};

/// Handler for GATT characteristics on the monitor.
pub struct CharacteristicHandler {
    /// The peripheral to communicate with.
    peripheral: Peripheral,
    /// Cached characteristics by UUID.
    characteristics: RwLock<HashMap<Uuid, Characteristic>>,
    /// Notification forwarding task.
    forwarder: RwLock<Option<JoinHandle<()>>>,
}

impl CharacteristicHandler {
    /// Create a handler. Services must be discovered before use.
    pub fn new(peripheral: Peripheral) -> Self {
        Self {
            peripheral,
            characteristics: RwLock::new(HashMap::new()),
            forwarder: RwLock::new(None),
        }
    }

    /// Discover and cache all characteristics.
    pub fn discover_characteristics(&self) {
        let mut chars = self.characteristics.write();
        chars.clear();

        for service in self.peripheral.services() {
            for characteristic in service.characteristics {
                trace!(
                    "Found characteristic: {} in service {}",
                    characteristic.uuid,
                    service.uuid
                );
                chars.insert(characteristic.uuid, characteristic);
            }
        }

        debug!("Discovered {} characteristics", chars.len());
    }

    /// Get a characteristic by UUID.
    pub fn get_characteristic(&self, uuid: &Uuid) -> Option<Characteristic> {
        self.characteristics.read().get(uuid).cloned()
    }

    /// Check if a characteristic exists.
    pub fn has_characteristic(&self, uuid: &Uuid) -> bool {
        self.characteristics.read().contains_key(uuid)
    }

    fn require(&self, uuid: &Uuid) -> Result<Characteristic> {
        self.get_characteristic(uuid)
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: uuid.to_string(),
            })
    }

    /// Enable notifications on a characteristic.
    pub async fn subscribe(&self, uuid: &Uuid) -> Result<()> {
        let characteristic = self.require(uuid)?;

        debug!(
            "Subscribing to {}, properties: {:?}",
            uuid, characteristic.properties
        );
        self.peripheral.subscribe(&characteristic).await?;

        Ok(())
    }

    /// Disable notifications on a characteristic.
    pub async fn unsubscribe(&self, uuid: &Uuid) -> Result<()> {
        let characteristic = self.require(uuid)?;
        self.peripheral.unsubscribe(&characteristic).await?;

        debug!("Unsubscribed from notifications from {}", uuid);
        Ok(())
    }

    /// Write a descriptor on its characteristic.
    ///
    /// btleplug addresses descriptors by UUID, so the ATT handle in
    /// `descriptor` is informational only.
    pub async fn write_descriptor(&self, descriptor: &DescriptorRef, data: &[u8]) -> Result<()> {
        let characteristic = self.require(&descriptor.characteristic)?;

        let target: Descriptor = characteristic
            .descriptors
            .iter()
            .find(|d| d.uuid == descriptor.uuid)
            .cloned()
            .ok_or_else(|| Error::DescriptorNotFound {
                uuid: descriptor.uuid.to_string(),
                characteristic: descriptor.characteristic.to_string(),
            })?;

        self.peripheral.write_descriptor(&target, data).await?;

        debug!(
            "Wrote {:02X?} to descriptor {} (handle 0x{:04X})",
            data, descriptor.uuid, descriptor.handle
        );
        Ok(())
    }

    /// Forward notifications from `uuid` to `sink` until stopped.
    pub async fn start_forwarding(&self, uuid: Uuid, sink: NotificationSink) -> Result<()> {
        self.stop_forwarding();

        let mut notifications = self.peripheral.notifications().await?;

        let handle = tokio::spawn(async move {
            debug!("Notification forwarder for {} started", uuid);

            while let Some(notification) = notifications.next().await {
                if notification.uuid != uuid {
                    continue;
                }
                trace!(
                    "Notification from {}: {:02X?}",
                    notification.uuid,
                    notification.value
                );
                if sink
                    .send(NotificationEvent::new(notification.uuid, notification.value))
                    .is_err()
                {
                    break;
                }
            }

            debug!("Notification forwarder for {} stopped", uuid);
        });

        *self.forwarder.write() = Some(handle);
        Ok(())
    }

    /// Stop forwarding notifications.
    pub fn stop_forwarding(&self) {
        if let Some(handle) = self.forwarder.write().take() {
            handle.abort();
        }
    }
}

impl Drop for CharacteristicHandler {
    fn drop(&mut self) {
        if let Some(handle) = self.forwarder.get_mut().take() {
            debug!("Characteristic handler dropped while forwarding");
            handle.abort();
        }
    }
}
