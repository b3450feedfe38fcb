//! Coordinator configuration.
//!
//! Protocol constants default to the values in [`crate::ble::uuids`]; the
//! timings default to the values the monitor is known to tolerate.

use std::time::Duration;

use uuid::Uuid;

use crate::ble::uuids::*;

/// Default time to wait for a device to become ready.
pub const DEVICE_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Default time without an advertisement before a device is unavailable.
pub const DEFAULT_UNAVAILABLE_AFTER: Duration = Duration::from_secs(300);

/// Timings of one connect/subscribe/listen/disconnect session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionTimings {
    /// How long notifications stay enabled per session.
    pub active_window: Duration,
    /// Upper bound on disabling notifications.
    pub stop_notify_timeout: Duration,
    /// Pause after disabling notifications, before releasing the link.
    pub pause: Duration,
    /// Delay after a failed session before the next attempt.
    pub failure_backoff: Duration,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            active_window: Duration::from_secs(5),
            stop_notify_timeout: Duration::from_secs(10),
            pause: Duration::from_secs(1),
            failure_backoff: Duration::from_secs(30),
        }
    }
}

/// Descriptor written to arm the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DescriptorRef {
    /// ATT handle of the descriptor.
    pub handle: u16,
    /// Characteristic the descriptor belongs to.
    pub characteristic: Uuid,
    /// Descriptor UUID.
    pub uuid: Uuid,
}

impl Default for DescriptorRef {
    fn default() -> Self {
        Self {
            handle: CLIENT_CHARACTERISTIC_CONFIG_HANDLE,
            characteristic: BLOOD_PRESSURE_CHARACTERISTIC_UUID,
            uuid: CLIENT_CHARACTERISTIC_CONFIG_UUID,
        }
    }
}

/// Configuration for a [`Coordinator`](crate::Coordinator).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CoordinatorConfig {
    /// Human readable device name used in logs.
    pub device_name: String,
    /// Manufacturer id advertisements are filtered on.
    pub manufacturer_id: u16,
    /// Measurement characteristic to subscribe to.
    pub characteristic: Uuid,
    /// Configuration descriptor written after subscribing.
    pub config_descriptor: DescriptorRef,
    /// Payload written to the configuration descriptor.
    pub config_payload: Vec<u8>,
    /// Session timings.
    pub timings: SessionTimings,
    /// Default timeout for [`Coordinator::wait_ready`](crate::Coordinator::wait_ready).
    pub startup_timeout: Duration,
    /// Time without an advertisement after which the device is unavailable.
    pub unavailable_after: Duration,
}

impl CoordinatorConfig {
    /// Create a configuration with defaults for the given device name.
    pub fn new(device_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            ..Self::default()
        }
    }

    /// Set the session timings.
    pub fn with_timings(mut self, timings: SessionTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Set the manufacturer id filter.
    pub fn with_manufacturer_id(mut self, manufacturer_id: u16) -> Self {
        self.manufacturer_id = manufacturer_id;
        self
    }

    /// Set the measurement characteristic and descriptor.
    pub fn with_characteristic(mut self, characteristic: Uuid, descriptor: DescriptorRef) -> Self {
        self.characteristic = characteristic;
        self.config_descriptor = descriptor;
        self
    }

    /// Set the startup timeout.
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// Set the availability expiry.
    pub fn with_unavailable_after(mut self, after: Duration) -> Self {
        self.unavailable_after = after;
        self
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            device_name: "Etekcity Blood Pressure Monitor".to_string(),
            manufacturer_id: ETEKCITY_MANUFACTURER_ID,
            characteristic: BLOOD_PRESSURE_CHARACTERISTIC_UUID,
            config_descriptor: DescriptorRef::default(),
            config_payload: CLIENT_CHARACTERISTIC_CONFIG_DATA.to_vec(),
            timings: SessionTimings::default(),
            startup_timeout: DEVICE_STARTUP_TIMEOUT,
            unavailable_after: DEFAULT_UNAVAILABLE_AFTER,
        }
    }
}
