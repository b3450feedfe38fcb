//! In-memory transport used by the coordinator and monitor tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use crate::ble::transport::{BleLink, BleTransport, NotificationEvent, NotificationSink};
use crate::config::DescriptorRef;
use crate::error::{Error, Result};
use crate::scheduler::ConnectablePaths;

#[derive(Default)]
pub(crate) struct FakeState {
    pub connectable: AtomicBool,
    pub fail_connect: AtomicBool,
    pub report_disconnected: AtomicBool,
    pub fail_stop_notify: AtomicBool,
    pub reject_descriptor: AtomicBool,
    pub connects: Mutex<Vec<Instant>>,
    pub disconnects: AtomicUsize,
    pub descriptor_writes: Mutex<Vec<(u16, Vec<u8>)>>,
    /// Frames sent on each `start_notify`, one batch per session.
    pub sessions: Mutex<VecDeque<Vec<NotificationEvent>>>,
    pub sink: Mutex<Option<NotificationSink>>,
}

#[derive(Clone)]
pub(crate) struct FakeTransport {
    pub state: Arc<FakeState>,
}

impl FakeTransport {
    pub fn new() -> Self {
        let state = FakeState::default();
        state.connectable.store(true, Ordering::SeqCst);
        Self {
            state: Arc::new(state),
        }
    }

    pub fn queue_session(&self, characteristic: Uuid, frames: &[&[u8]]) {
        self.state.sessions.lock().push_back(
            frames
                .iter()
                .map(|f| NotificationEvent::new(characteristic, Bytes::copy_from_slice(f)))
                .collect(),
        );
    }

    pub fn connect_times(&self) -> Vec<Instant> {
        self.state.connects.lock().clone()
    }

    pub fn connect_count(&self) -> usize {
        self.state.connects.lock().len()
    }

    pub fn disconnect_count(&self) -> usize {
        self.state.disconnects.load(Ordering::SeqCst)
    }
}

impl ConnectablePaths for FakeTransport {
    fn has_connectable_path(&self, _address: &str) -> bool {
        self.state.connectable.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BleTransport for FakeTransport {
    type Link = FakeLink;

    async fn connect(&self, _address: &str) -> Result<FakeLink> {
        self.state.connects.lock().push(Instant::now());
        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::ConnectionFailed {
                reason: "device did not respond".to_string(),
            });
        }
        Ok(FakeLink {
            state: self.state.clone(),
        })
    }
}

pub(crate) struct FakeLink {
    state: Arc<FakeState>,
}

#[async_trait]
impl BleLink for FakeLink {
    async fn is_connected(&self) -> bool {
        !self.state.report_disconnected.load(Ordering::SeqCst)
    }

    async fn start_notify(&self, _characteristic: Uuid, sink: NotificationSink) -> Result<()> {
        let frames = self.state.sessions.lock().pop_front().unwrap_or_default();
        for frame in frames {
            let _ = sink.send(frame);
        }
        *self.state.sink.lock() = Some(sink);
        Ok(())
    }

    async fn stop_notify(&self, _characteristic: Uuid) -> Result<()> {
        self.state.sink.lock().take();
        if self.state.fail_stop_notify.load(Ordering::SeqCst) {
            return Err(Error::ConnectionFailed {
                reason: "link dropped during stop_notify".to_string(),
            });
        }
        Ok(())
    }

    async fn write_descriptor(&self, descriptor: &DescriptorRef, data: &[u8]) -> Result<()> {
        self.state
            .descriptor_writes
            .lock()
            .push((descriptor.handle, data.to_vec()));
        if self.state.reject_descriptor.load(Ordering::SeqCst) {
            return Err(Error::InvalidParameter {
                name: "descriptor".to_string(),
                value: descriptor.uuid.to_string(),
            });
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.state.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
