//! Data structures for monitor readings.
//!
//! This module contains the measurement channels, decoded values and the
//! device snapshot that holds the latest value per channel.

pub mod measurement;
pub mod snapshot;

pub use measurement::{
    DisplayUnits, MeasurementChannel, MeasurementUpdate, MeasurementValue, UserSlot, ValueKind,
};
pub use snapshot::{DeviceSnapshot, UNKNOWN_RSSI};
