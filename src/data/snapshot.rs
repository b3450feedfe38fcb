//! Device snapshot data structure.

use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::data::measurement::{MeasurementChannel, MeasurementValue};

/// RSSI reported when no advertisement has been seen yet.
pub const UNKNOWN_RSSI: i16 = -127;

/// Latest known state of one monitor.
///
/// Every channel in [`MeasurementChannel::ALL`] is present from construction
/// on. A channel with no reading yet maps to `None`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceSnapshot {
    values: BTreeMap<MeasurementChannel, Option<MeasurementValue>>,
    /// Bluetooth address of the device.
    pub address: Option<String>,
    /// Signal strength of the last advertisement, in dBm.
    pub last_rssi: Option<i16>,
    /// Manufacturer id the advertisement was matched on.
    pub manufacturer_id: Option<u16>,
    /// Raw manufacturer data from the last advertisement.
    pub manufacturer_data: Option<Bytes>,
    /// Whether a live connection to the device is currently held.
    pub active: bool,
    /// Incremented on every change.
    pub version: u64,
    /// When the snapshot last changed.
    pub updated_at: Option<DateTime<Utc>>,
}

impl DeviceSnapshot {
    /// Create an empty snapshot with every channel unknown.
    pub fn new() -> Self {
        Self {
            values: MeasurementChannel::ALL.iter().map(|c| (*c, None)).collect(),
            address: None,
            last_rssi: None,
            manufacturer_id: None,
            manufacturer_data: None,
            active: false,
            version: 0,
            updated_at: None,
        }
    }

    /// Get the value of a channel. `None` means unknown.
    pub fn get(&self, channel: MeasurementChannel) -> Option<MeasurementValue> {
        self.values.get(&channel).copied().flatten()
    }

    /// Iterate over all channels and their values.
    pub fn iter(&self) -> impl Iterator<Item = (MeasurementChannel, Option<MeasurementValue>)> + '_ {
        self.values.iter().map(|(c, v)| (*c, *v))
    }

    /// Values keyed by channel key.
    pub fn sensor_data(&self) -> BTreeMap<&'static str, Option<MeasurementValue>> {
        self.values.iter().map(|(c, v)| (c.key(), *v)).collect()
    }

    /// RSSI, or [`UNKNOWN_RSSI`] before the first advertisement.
    pub fn rssi(&self) -> i16 {
        self.last_rssi.unwrap_or(UNKNOWN_RSSI)
    }

    /// Set a channel value. Returns whether the value changed.
    pub(crate) fn set(&mut self, channel: MeasurementChannel, value: MeasurementValue) -> bool {
        let slot = self.values.entry(channel).or_insert(None);
        if *slot == Some(value) {
            return false;
        }
        *slot = Some(value);
        true
    }

    /// Record a change.
    pub(crate) fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Some(Utc::now());
    }
}

impl Default for DeviceSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::measurement::UserSlot;

    #[test]
    fn test_new_snapshot_has_every_channel() {
        let snapshot = DeviceSnapshot::new();
        assert_eq!(snapshot.iter().count(), MeasurementChannel::ALL.len());
        assert!(snapshot.iter().all(|(_, v)| v.is_none()));
        assert_eq!(snapshot.rssi(), UNKNOWN_RSSI);
        assert_eq!(snapshot.version, 0);
    }

    #[test]
    fn test_set_reports_change() {
        let mut snapshot = DeviceSnapshot::new();
        let channel = MeasurementChannel::Pulse(UserSlot::One);

        assert!(snapshot.set(channel, MeasurementValue::Integer(70)));
        assert!(!snapshot.set(channel, MeasurementValue::Integer(70)));
        assert!(snapshot.set(channel, MeasurementValue::Integer(71)));
        assert_eq!(snapshot.get(channel), Some(MeasurementValue::Integer(71)));
    }

    #[test]
    fn test_sensor_data_keys() {
        let data = DeviceSnapshot::new().sensor_data();
        assert!(data.contains_key("systolic0"));
        assert!(data.contains_key("irregular_heartbeat1"));
        assert!(data.contains_key("display_units"));
        assert!(data.contains_key("rssi"));
    }
}
