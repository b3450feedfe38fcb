//! In-memory measurement store.
//!
//! Holds the latest [`DeviceSnapshot`] and fans out change notifications.
//! Writers build a new snapshot and swap it in under a short write lock, so a
//! reader always sees either the old or the new snapshot, never a mix.
//!
//! Callbacks registered with [`MeasurementStore::subscribe`] run synchronously
//! on the thread that applied the change. A slow callback therefore delays the
//! writer (the BLE notification path). Consumers that may be slow should use
//! [`MeasurementStore::subscribe_channel`] instead, which queues snapshots and
//! never blocks the writer.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::data::{DeviceSnapshot, MeasurementChannel, MeasurementUpdate, MeasurementValue};
use crate::error::Result;

/// Host states that carry no value and are never restored.
const IGNORED_RESTORE_STATES: [&str; 2] = ["unknown", "unavailable"];

type Callback = Arc<dyn Fn(&DeviceSnapshot) + Send + Sync>;

struct Observer {
    id: u64,
    callback: Callback,
}

/// Callback handle for unregistering callbacks.
///
/// The callback is unregistered when the handle is dropped.
pub struct CallbackHandle {
    id: u64,
    unregister_fn: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl CallbackHandle {
    pub(crate) fn new(id: u64, unregister_fn: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            unregister_fn: Some(Box::new(unregister_fn)),
        }
    }

    /// Unregister this callback.
    pub fn unregister(mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }

    /// Get the callback ID.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }
}

impl std::fmt::Debug for CallbackHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackHandle").field("id", &self.id).finish()
    }
}

/// Latest known measurement state with change notification.
pub struct MeasurementStore {
    snapshot: RwLock<Arc<DeviceSnapshot>>,
    /// Held from swap through notify so updates are delivered in version
    /// order. Reentrant so a callback may write to the store.
    publish: ReentrantMutex<()>,
    observers: Arc<Mutex<Vec<Observer>>>,
    callback_counter: AtomicU64,
    snapshot_tx: broadcast::Sender<Arc<DeviceSnapshot>>,
}

impl MeasurementStore {
    /// Capacity of the queued snapshot channel.
    pub const CHANNEL_CAPACITY: usize = 32;

    /// Create a store with every channel unknown.
    pub fn new() -> Self {
        let (snapshot_tx, _) = broadcast::channel(Self::CHANNEL_CAPACITY);

        Self {
            snapshot: RwLock::new(Arc::new(DeviceSnapshot::new())),
            publish: ReentrantMutex::new(()),
            observers: Arc::new(Mutex::new(Vec::new())),
            callback_counter: AtomicU64::new(0),
            snapshot_tx,
        }
    }

    /// Get an immutable view of the current state.
    pub fn snapshot(&self) -> Arc<DeviceSnapshot> {
        self.snapshot.read().clone()
    }

    /// Merge decoded updates into the snapshot.
    ///
    /// Subscribers are notified once after the merge, and only if a value
    /// actually changed. Returns whether anything changed.
    pub fn apply_updates<I>(&self, updates: I) -> bool
    where
        I: IntoIterator<Item = MeasurementUpdate>,
    {
        self.modify(|snapshot| {
            let mut changed = false;
            for (channel, value) in updates {
                if snapshot.set(channel, value) {
                    debug!("Updating {} to {}", channel, value);
                    changed = true;
                }
            }
            changed
        })
    }

    /// Record an advertisement: address, RSSI and manufacturer data.
    pub fn apply_advertisement(
        &self,
        address: &str,
        rssi: Option<i16>,
        manufacturer_id: u16,
        manufacturer_data: Bytes,
    ) -> bool {
        self.modify(|snapshot| {
            let mut changed = false;

            if snapshot.address.as_deref() != Some(address) {
                snapshot.address = Some(address.to_string());
                changed = true;
            }
            if snapshot.manufacturer_id != Some(manufacturer_id) {
                snapshot.manufacturer_id = Some(manufacturer_id);
                changed = true;
            }
            if snapshot.manufacturer_data.as_ref() != Some(&manufacturer_data) {
                snapshot.manufacturer_data = Some(manufacturer_data);
                changed = true;
            }
            if let Some(rssi) = rssi {
                if snapshot.last_rssi != Some(rssi) {
                    snapshot.last_rssi = Some(rssi);
                    changed = true;
                }
                changed |= snapshot.set(
                    MeasurementChannel::SignalStrength,
                    MeasurementValue::Integer(i32::from(rssi)),
                );
            }

            changed
        })
    }

    /// Mark whether a live connection is held.
    pub fn set_active(&self, active: bool) -> bool {
        self.modify(|snapshot| {
            if snapshot.active == active {
                return false;
            }
            snapshot.active = active;
            true
        })
    }

    /// Re-seed a channel from a persisted state string.
    ///
    /// Returns `Ok(false)` when the state is a placeholder or does not parse
    /// for the channel, and an error when the key names no channel.
    pub fn restore(&self, key: &str, state: &str) -> Result<bool> {
        let channel: MeasurementChannel = key.parse()?;

        if IGNORED_RESTORE_STATES.contains(&state) {
            return Ok(false);
        }

        match MeasurementValue::parse_for(channel, state) {
            Some(value) => {
                debug!("Restoring {} to {}", channel, value);
                Ok(self.apply_updates([(channel, value)]))
            }
            None => {
                debug!("Not restoring {}: cannot parse {:?}", channel, state);
                Ok(false)
            }
        }
    }

    /// Register a callback for snapshot changes.
    ///
    /// A panicking callback is logged and does not stop delivery to the
    /// others.
    pub fn subscribe<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&DeviceSnapshot) + Send + Sync + 'static,
    {
        let id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        self.observers.lock().push(Observer {
            id,
            callback: Arc::new(callback),
        });

        let observers: Weak<Mutex<Vec<Observer>>> = Arc::downgrade(&self.observers);
        CallbackHandle::new(id, move || {
            if let Some(observers) = observers.upgrade() {
                observers.lock().retain(|o| o.id != id);
            }
        })
    }

    /// Unregister a callback by id. Returns whether it was registered.
    pub fn unsubscribe(&self, id: u64) -> bool {
        let mut observers = self.observers.lock();
        let before = observers.len();
        observers.retain(|o| o.id != id);
        observers.len() != before
    }

    /// Number of registered callbacks.
    pub fn subscriber_count(&self) -> usize {
        self.observers.lock().len()
    }

    /// Subscribe to a queue of snapshots.
    ///
    /// The writer never waits on this queue; a receiver that falls more than
    /// [`Self::CHANNEL_CAPACITY`] snapshots behind skips the oldest ones.
    pub fn subscribe_channel(&self) -> broadcast::Receiver<Arc<DeviceSnapshot>> {
        self.snapshot_tx.subscribe()
    }

    /// Apply a change to a copy of the snapshot and swap it in.
    fn modify<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut DeviceSnapshot) -> bool,
    {
        let _publishing = self.publish.lock();
        let published = {
            let mut current = self.snapshot.write();
            let mut next = DeviceSnapshot::clone(&current);
            if !f(&mut next) {
                return false;
            }
            next.touch();
            let next = Arc::new(next);
            *current = next.clone();
            next
        };

        self.notify(&published);
        true
    }

    fn notify(&self, snapshot: &Arc<DeviceSnapshot>) {
        // Callbacks may subscribe or unsubscribe; do not hold the lock while
        // calling them.
        let callbacks: Vec<(u64, Callback)> = self
            .observers
            .lock()
            .iter()
            .map(|o| (o.id, o.callback.clone()))
            .collect();

        for (id, callback) in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(snapshot.as_ref()))).is_err() {
                warn!("Subscriber {} panicked while handling an update", id);
            }
        }

        let _ = self.snapshot_tx.send(snapshot.clone());
    }
}

impl Default for MeasurementStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MeasurementStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeasurementStore")
            .field("version", &self.snapshot.read().version)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
