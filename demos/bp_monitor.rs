//! Blood pressure monitor example
//!
//! Run with: cargo run --example bp_monitor -- [ADDRESS]
//!
//! Without an address, the first monitor that advertises is used.

use etekcity_bp_ble::{
    BleScanner, Coordinator, CoordinatorConfig, DeviceMonitor, DeviceSnapshot, Error, Result,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("Blood Pressure Monitor");
    println!("======================\n");

    let scanner = BleScanner::new().await?;
    let mut sightings = scanner.subscribe();
    scanner.start_scanning().await?;

    let address = match std::env::args().nth(1) {
        Some(address) => address,
        None => {
            println!("Waiting for a monitor to advertise (press the start button)...");
            let sighting = tokio::time::timeout(Duration::from_secs(60), sightings.recv())
                .await
                .map_err(|_| Error::DeviceNotFound {
                    address: "any".to_string(),
                })?
                .map_err(|_| Error::BluetoothUnavailable)?;
            sighting.address
        }
    };

    println!("Using monitor {}\n", address);

    let coordinator = Arc::new(Coordinator::new(
        address,
        Arc::new(scanner.transport()),
        CoordinatorConfig::default(),
    ));
    let _handle = coordinator.subscribe(print_snapshot);

    let monitor = DeviceMonitor::new(coordinator.clone());
    monitor.start(scanner.subscribe());

    if !coordinator.wait_ready().await {
        println!("Monitor did not become ready; still listening.");
    }

    let mut states = coordinator.subscribe_state();
    println!("Press Ctrl+C to exit.\n");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nExiting...");
                break;
            }
            Ok(event) = states.recv() => {
                println!("Connectivity: {} -> {}", event.from, event.to);
            }
        }
    }

    monitor.stop().await;
    scanner.stop_scanning().await?;

    Ok(())
}

fn print_snapshot(snapshot: &DeviceSnapshot) {
    println!("--- snapshot v{} (RSSI {} dBm) ---", snapshot.version, snapshot.rssi());
    for (key, value) in snapshot.sensor_data() {
        match value {
            Some(value) => println!("  {:<22} {}", key, value),
            None => println!("  {:<22} unknown", key),
        }
    }
}
