//! Seams to the BLE transport.
//!
//! The coordinator never talks to a radio directly. It asks a
//! [`BleTransport`] for a [`BleLink`] and drives the link through one session.
//! The btleplug-backed implementation lives in [`crate::ble::connection`].

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::DescriptorRef;
use crate::error::Result;
use crate::scheduler::ConnectablePaths;

/// Notification event from a characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    /// UUID of the characteristic that sent the notification.
    pub characteristic: Uuid,
    /// The notification payload.
    pub data: Bytes,
}

impl NotificationEvent {
    /// Create a notification event.
    pub fn new(characteristic: Uuid, data: impl Into<Bytes>) -> Self {
        Self {
            characteristic,
            data: data.into(),
        }
    }
}

/// Where a link delivers notifications. Order of arrival is preserved.
pub type NotificationSink = mpsc::UnboundedSender<NotificationEvent>;

/// A source of connections to peripherals.
#[async_trait]
pub trait BleTransport: ConnectablePaths + Send + Sync + 'static {
    /// The connected link type.
    type Link: BleLink;

    /// Connect to the peripheral at `address`.
    async fn connect(&self, address: &str) -> Result<Self::Link>;
}

/// A connection to one peripheral, owned by one session.
#[async_trait]
pub trait BleLink: Send + Sync + 'static {
    /// Whether the link is still up.
    async fn is_connected(&self) -> bool;

    /// Enable notifications on a characteristic, forwarding them to `sink`.
    async fn start_notify(&self, characteristic: Uuid, sink: NotificationSink) -> Result<()>;

    /// Disable notifications on a characteristic.
    async fn stop_notify(&self, characteristic: Uuid) -> Result<()>;

    /// Write a GATT descriptor.
    async fn write_descriptor(&self, descriptor: &DescriptorRef, data: &[u8]) -> Result<()>;

    /// Release the link.
    async fn disconnect(&self) -> Result<()>;
}
