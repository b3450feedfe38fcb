//! Advertisement sightings.
//!
//! An advertisement only tells us the monitor is in range: its manufacturer
//! data is kept as-is and readings arrive over notifications.

use std::collections::HashMap;

use bytes::Bytes;

use crate::ble::uuids::is_supported;

/// One advertisement as delivered by the BLE transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisementSighting {
    /// Bluetooth address of the advertiser.
    pub address: String,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
    /// Manufacturer specific data, keyed by company id.
    pub manufacturer_data: HashMap<u16, Bytes>,
}

impl AdvertisementSighting {
    /// Create a sighting.
    pub fn new(address: impl Into<String>, rssi: Option<i16>) -> Self {
        Self {
            address: address.into(),
            rssi,
            manufacturer_data: HashMap::new(),
        }
    }

    /// Add manufacturer data for a company id.
    pub fn with_manufacturer_data(mut self, id: u16, data: impl Into<Bytes>) -> Self {
        self.manufacturer_data.insert(id, data.into());
        self
    }

    /// Check whether the advertisement carries the given manufacturer id.
    pub fn supported(&self, manufacturer_id: u16) -> bool {
        is_supported(self.manufacturer_data.keys(), manufacturer_id)
    }

    /// Extract the part of the advertisement that belongs to our device.
    ///
    /// Returns `None` for advertisements without the manufacturer id; those
    /// are some other device's data.
    pub fn parse(&self, manufacturer_id: u16) -> Option<DeviceAdvertisement> {
        let data = self.manufacturer_data.get(&manufacturer_id)?;
        Some(DeviceAdvertisement {
            address: self.address.clone(),
            rssi: self.rssi,
            manufacturer_id,
            manufacturer_data: data.clone(),
        })
    }
}

/// Advertisement data recognised as coming from the monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAdvertisement {
    /// Bluetooth address.
    pub address: String,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
    /// The manufacturer id that matched.
    pub manufacturer_id: u16,
    /// Raw manufacturer data.
    pub manufacturer_data: Bytes,
}
