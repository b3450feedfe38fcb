//! BLE communication module.
//!
//! Advertisement handling, the connectivity state machine, the transport
//! seams the coordinator drives, and their btleplug implementation.

pub mod advertising;
pub mod characteristics;
pub mod connection;
pub mod connectivity;
pub mod scanner;
pub mod transport;
pub mod uuids;

#[cfg(test)]
pub(crate) mod fake;

pub use advertising::{AdvertisementSighting, DeviceAdvertisement};
pub use characteristics::CharacteristicHandler;
pub use connection::{BtleplugLink, BtleplugTransport};
pub use connectivity::{ConnectivityEvent, ConnectivityMachine, ConnectivityState};
pub use scanner::BleScanner;
pub use transport::{BleLink, BleTransport, NotificationEvent, NotificationSink};
pub use uuids::*;
