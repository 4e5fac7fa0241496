//! In-memory transport for deterministic testing.
//!
//! [`MockTransport`] records every write and lets tests feed bytes back to
//! the connected listener, either directly with [`MockTransport::inject`] or
//! from a hook that answers written frames.
//!
//! ```
//! use std::sync::Arc;
//! use digimesh_rs::frame::Frame;
//! use digimesh_rs::transport::MockTransport;
//! use digimesh_rs::types::{AtCommand, AtStatus, FrameType};
//!
//! let mock = Arc::new(MockTransport::new());
//! // Answer `NI` queries with a fixed identifier.
//! mock.respond_with(|frame| match (frame.frame_type, frame.frame_id) {
//!     (FrameType::AtCommand, Some(id)) if frame.payload.starts_with(b"NI") => {
//!         vec![Frame::at_response(id, AtCommand::NI, AtStatus::Ok, b"base")]
//!     }
//!     _ => Vec::new(),
//! });
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::{Duration, Instant};

use tracing::warn;

use crate::at::DeliveryStatus;
use crate::codec::decode_frames;
use crate::error::{MeshError, Result};
use crate::frame::Frame;
use crate::lock;
use crate::types::{AtCommand, AtStatus, FrameType, MeshAddress};

use super::{LinkEvent, LinkListener, Transport};

type WriteHook = Arc<dyn Fn(&Frame) + Send + Sync>;

/// A [`Transport`] backed by memory.
///
/// Write hooks run synchronously on the writing thread, after the write has
/// been recorded. Responses they inject reach the listener on that thread
/// too, so a radio client's writer thread ends up running receive handlers;
/// frames those handlers send are written inline by the
/// [`Writer`](crate::writer::Writer) rather than queued behind themselves.
#[derive(Default)]
pub struct MockTransport {
    sent: Mutex<Vec<Vec<u8>>>,
    written: Condvar,
    listener: Mutex<Option<Arc<dyn LinkListener>>>,
    hooks: Mutex<Vec<WriteHook>>,
    fail_writes: AtomicBool,
    closed: AtomicBool,
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// All chunks written so far, one per `write_bytes` call.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        lock(&self.sent).clone()
    }

    /// All frames written so far, decoded.
    pub fn sent_frames(&self) -> Vec<Frame> {
        lock(&self.sent)
            .iter()
            .flat_map(|chunk| decode_frames(chunk).0)
            .filter_map(|frame| frame.ok())
            .collect()
    }

    /// Forget recorded writes.
    pub fn clear_sent(&self) {
        lock(&self.sent).clear();
    }

    /// Wait until at least `count` chunks have been written.
    ///
    /// Returns `false` on timeout.
    pub fn wait_for_writes(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut sent = lock(&self.sent);
        while sent.len() < count {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            sent = match self.written.wait_timeout(sent, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }

    /// Deliver bytes to the listener as if read from the link.
    pub fn inject(&self, data: &[u8]) {
        if let Some(listener) = self.listener() {
            listener.on_received(data);
        }
    }

    /// Deliver an encoded frame to the listener.
    pub fn inject_frame(&self, frame: &Frame) {
        match frame.to_bytes() {
            Ok(bytes) => self.inject(&bytes),
            Err(e) => warn!(error = %e, "frame not injected"),
        }
    }

    /// Deliver a lifecycle event to the listener.
    pub fn emit(&self, event: LinkEvent) {
        if let Some(listener) = self.listener() {
            listener.on_link_event(event);
        }
    }

    /// Call `hook` with every frame written from now on.
    pub fn on_write(&self, hook: impl Fn(&Frame) + Send + Sync + 'static) {
        lock(&self.hooks).push(Arc::new(hook));
    }

    /// Answer written frames: each frame returned by `responder` is injected
    /// back into this transport's listener.
    pub fn respond_with(
        self: &Arc<Self>,
        responder: impl Fn(&Frame) -> Vec<Frame> + Send + Sync + 'static,
    ) {
        let me: Weak<Self> = Arc::downgrade(self);
        self.on_write(move |frame| {
            let Some(me) = me.upgrade() else {
                return;
            };
            for reply in responder(frame) {
                me.inject_frame(&reply);
            }
        });
    }

    /// Answer every AT command with an OK status and an empty value.
    pub fn acknowledge_at_commands(self: &Arc<Self>) {
        self.respond_with(|frame| match (frame.frame_type, frame.frame_id) {
            (FrameType::AtCommand, Some(id)) if frame.payload.len() >= 2 => {
                let command = AtCommand([frame.payload[0], frame.payload[1]]);
                vec![Frame::at_response(id, command, AtStatus::Ok, &[])]
            }
            _ => Vec::new(),
        });
    }

    /// Answer every transmit request with a transmit status of `delivery`.
    pub fn acknowledge_transmits(self: &Arc<Self>, delivery: DeliveryStatus) {
        self.respond_with(move |frame| match (frame.frame_type, frame.frame_id) {
            (FrameType::TransmitRequest, Some(id)) => {
                vec![Frame::transmit_status(id, 0, delivery)]
            }
            _ => Vec::new(),
        });
    }

    /// Carry transmit requests written to this transport to `peer`.
    ///
    /// Requests addressed to `peer_addr` or to the broadcast address arrive
    /// at `peer` as receive packets from `own_addr`.
    ///
    /// Delivery runs the peer's receive handlers on this transport's writing
    /// thread. Two linked clients whose writer queues are both full wait on
    /// each other, so keep the traffic of a scenario below the queue
    /// capacity.
    pub fn deliver_to(self: &Arc<Self>, own_addr: MeshAddress, peer: &Arc<Self>, peer_addr: MeshAddress) {
        let peer = Arc::downgrade(peer);
        self.on_write(move |frame| {
            let (Some(dest), Some(data)) = (frame.destination(), frame.transmit_data()) else {
                return;
            };
            if dest != peer_addr && !dest.is_broadcast() {
                return;
            }
            if let Some(peer) = peer.upgrade() {
                peer.inject_frame(&Frame::receive_packet(own_addr, dest.is_broadcast(), data));
            }
        });
    }

    /// Make subsequent writes fail with an I/O error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Check if a listener is attached and the transport is open.
    pub fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && lock(&self.listener).is_some()
    }

    fn listener(&self) -> Option<Arc<dyn LinkListener>> {
        lock(&self.listener).clone()
    }
}

impl Transport for MockTransport {
    fn connect(&self, listener: Arc<dyn LinkListener>) -> Result<()> {
        self.closed.store(false, Ordering::SeqCst);
        *lock(&self.listener) = Some(Arc::clone(&listener));
        listener.on_link_event(LinkEvent::Connected);
        Ok(())
    }

    fn write_bytes(&self, data: &[u8]) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MeshError::ConnectionClosed);
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(MeshError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "mock write failure",
            )));
        }

        lock(&self.sent).push(data.to_vec());
        self.written.notify_all();

        let hooks = lock(&self.hooks).clone();
        if !hooks.is_empty() {
            for frame in decode_frames(data).0.into_iter().flatten() {
                for hook in &hooks {
                    hook(&frame);
                }
            }
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(listener) = lock(&self.listener).take() {
            listener.on_link_event(LinkEvent::Removed);
        }
        Ok(())
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("sent", &lock(&self.sent).len())
            .field("connected", &self.is_connected())
            .finish()
    }
}
