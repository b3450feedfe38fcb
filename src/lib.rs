// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # etekcity-bp-ble
//!
//! A Rust library for reading Etekcity blood pressure monitors over
//! Bluetooth Low Energy.
//!
//! The monitor advertises while it is awake and only reports readings over
//! GATT notifications, so readings are collected by briefly connecting,
//! subscribing, and letting go again. This crate does that bookkeeping:
//!
//! - **Frame decoding**: display units, systolic/diastolic per user, pulse
//!   and irregular heartbeat
//! - **Measurement store**: a versioned snapshot of the latest value per
//!   channel, with change callbacks
//! - **Connectivity**: an explicit state machine with a failure backoff
//! - **Polling**: decides when a connection is worth the monitor's battery
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use etekcity_bp_ble::{BleScanner, Coordinator, CoordinatorConfig, DeviceMonitor, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let scanner = BleScanner::new().await?;
//!     scanner.start_scanning().await?;
//!
//!     let coordinator = Arc::new(Coordinator::new(
//!         "AA:BB:CC:DD:EE:FF",
//!         Arc::new(scanner.transport()),
//!         CoordinatorConfig::default(),
//!     ));
//!     let _handle = coordinator.subscribe(|snapshot| {
//!         for (key, value) in snapshot.sensor_data() {
//!             println!("{}: {:?}", key, value);
//!         }
//!     });
//!
//!     let monitor = DeviceMonitor::new(coordinator.clone());
//!     monitor.start(scanner.subscribe());
//!
//!     if coordinator.wait_ready().await {
//!         tokio::signal::ctrl_c().await.ok();
//!     }
//!
//!     monitor.stop().await;
//!     scanner.stop_scanning().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps. CoreBluetooth hides device
//! addresses, so address filtering only works on Linux and Windows.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data types

// Public modules
pub mod ble;
pub mod config;
pub mod coordinator;
pub mod data;
pub mod error;
pub mod monitor;
pub mod protocol;
pub mod readiness;
pub mod scheduler;
pub mod store;

// Re-exports for convenience
pub use ble::{
    AdvertisementSighting, BleLink, BleScanner, BleTransport, BtleplugTransport,
    ConnectivityEvent, ConnectivityState, NotificationEvent,
};
pub use config::{CoordinatorConfig, DescriptorRef, SessionTimings};
pub use coordinator::Coordinator;
pub use data::{
    DeviceSnapshot, DisplayUnits, MeasurementChannel, MeasurementUpdate, MeasurementValue,
    UserSlot,
};
pub use error::{Error, Result};
pub use monitor::DeviceMonitor;
pub use protocol::{decode, ActiveUserContext, DecodeResult};
pub use readiness::ReadinessGate;
pub use scheduler::{AlwaysPoll, HostLifecycle, HostPhase, PollPolicy, PollScheduler};
pub use store::{CallbackHandle, MeasurementStore};
