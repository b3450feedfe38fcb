//! BLE protocol constants.
//!
//! Contains the UUIDs, handles and payloads used to talk to the monitor.

use uuid::Uuid;

/// Etekcity's Bluetooth manufacturer ID, used to recognise advertisements.
pub const ETEKCITY_MANUFACTURER_ID: u16 = 0x06D0;

/// Blood pressure measurement characteristic (Notify).
pub const BLOOD_PRESSURE_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x0000_fff1_0000_1000_8000_00805f9b34fb);

/// Standard Client Characteristic Configuration descriptor UUID.
pub const CLIENT_CHARACTERISTIC_CONFIG_UUID: Uuid =
    Uuid::from_u128(0x0000_2902_0000_1000_8000_00805f9b34fb);

/// ATT handle of the client characteristic configuration descriptor.
pub const CLIENT_CHARACTERISTIC_CONFIG_HANDLE: u16 = 0x0013;

/// Payload written to the configuration descriptor to arm notifications.
pub const CLIENT_CHARACTERISTIC_CONFIG_DATA: [u8; 2] = [0x01, 0x00];

/// Check if an advertisement's manufacturer data carries the given id.
pub fn is_supported<'a, I>(manufacturer_ids: I, manufacturer_id: u16) -> bool
where
    I: IntoIterator<Item = &'a u16>,
{
    manufacturer_ids.into_iter().any(|id| *id == manufacturer_id)
}
