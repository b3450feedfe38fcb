//! Error types for the etekcity-bp-ble crate.

use thiserror::Error;

use crate::ble::connectivity::ConnectivityState;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// No peripheral with this address has been seen by the scanner.
    #[error("Device not found: {address}")]
    DeviceNotFound {
        /// The address that was looked up.
        address: String,
    },

    /// The link reported itself as not connected right after connecting.
    #[error("Device not connected")]
    NotConnected,

    /// Failed to establish a connection to the monitor.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// Description of why the connection failed.
        reason: String,
    },

    /// A GATT operation did not complete in time.
    #[error("Operation timed out: {operation}")]
    Timeout {
        /// The operation that timed out.
        operation: &'static str,
    },

    /// Characteristic not found on the device.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// Descriptor not found on the device.
    #[error("Descriptor not found: {uuid} on characteristic {characteristic}")]
    DescriptorNotFound {
        /// The UUID of the descriptor.
        uuid: String,
        /// The characteristic it was expected on.
        characteristic: String,
    },

    /// A session loop is already running for this device.
    #[error("A session is already running for {address}")]
    SessionInProgress {
        /// The device address.
        address: String,
    },

    /// The connectivity state machine refused a transition.
    #[error("Invalid connectivity transition: {from} -> {to}")]
    InvalidTransition {
        /// The state the machine was in.
        from: ConnectivityState,
        /// The requested state.
        to: ConnectivityState,
    },

    /// A restored or supplied channel key is not one of the fixed channels.
    #[error("Unknown measurement channel: {key}")]
    UnknownChannel {
        /// The key that was supplied.
        key: String,
    },

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter {
        /// The name of the parameter.
        name: String,
        /// The invalid value that was provided.
        value: String,
    },
}

impl Error {
    /// Whether this error came from the BLE link rather than from caller misuse.
    ///
    /// The session loop answers every failure with the same backoff. This
    /// only decides whether it is logged as an expected link failure or as
    /// an error.
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            Self::Bluetooth(_)
                | Self::BluetoothUnavailable
                | Self::DeviceNotFound { .. }
                | Self::NotConnected
                | Self::ConnectionFailed { .. }
                | Self::Timeout { .. }
                | Self::CharacteristicNotFound { .. }
                | Self::DescriptorNotFound { .. }
        )
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
