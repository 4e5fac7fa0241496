//! Radio client: AT parameters and application messages over one link.
//!
//! The client owns the [`FrameTable`] correlating requests with responses
//! and the [`Writer`] thread serializing every write. It is the
//! [`LinkListener`] of its transport: received bytes are decoded into frames
//! and each frame is either dispatched to the request holding its frame id
//! or fanned out to the message handlers.
//!
//! ```no_run
//! use std::time::Duration;
//! use digimesh_rs::at::{AtString, NodeDiscovery};
//! use digimesh_rs::{RadioClient, RadioConfig, ResponseBehavior, StreamTransport};
//!
//! # fn main() -> digimesh_rs::Result<()> {
//! let transport = StreamTransport::connect_tcp("127.0.0.1:9750")?;
//! let radio = RadioClient::connect(transport, RadioConfig::default())?;
//!
//! radio.set_parameter("NI", &AtString::new("base"))?;
//! let nodes: Vec<NodeDiscovery> = radio.get_parameter_sync(
//!     "ND",
//!     ResponseBehavior::CollectUntilTimeout(Duration::from_secs(10)),
//! )?;
//! for node in nodes {
//!     println!("{} {}", node.addr, node.node_identifier);
//! }
//! # Ok(())
//! # }
//! ```

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, trace, warn};

use crate::at::{AtValue, TransmitStatus};
use crate::behavior::ResponseBehavior;
use crate::codec::FrameReader;
use crate::config::RadioConfig;
use crate::error::{MeshError, Result};
use crate::event::Multicast;
use crate::frame::Frame;
use crate::lock;
use crate::response::{AtResponse, FrameValue, ModemStatus, ReceivedMessage};
use crate::table::FrameTable;
use crate::transport::{LinkEvent, LinkListener, Transport};
use crate::types::{AtCommand, AtStatus, FrameId, FrameType, MeshAddress};
use crate::writer::Writer;

/// Handler for received application messages.
pub type MessageHandler = dyn Fn(&ReceivedMessage) -> Result<()> + Send + Sync;

/// Handler for per-frame errors.
pub type ErrorHandler = dyn Fn(&MeshError) + Send + Sync;

/// Handler for link lifecycle events.
pub type LinkHandler = dyn Fn(&LinkEvent) + Send + Sync;

thread_local! {
    static IN_RECEIVE: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as dispatching received frames.
struct ReceiveScope {
    previous: bool,
}

impl ReceiveScope {
    fn enter() -> Self {
        Self {
            previous: IN_RECEIVE.with(|flag| flag.replace(true)),
        }
    }

    fn active() -> bool {
        IN_RECEIVE.with(Cell::get)
    }
}

impl Drop for ReceiveScope {
    fn drop(&mut self) {
        IN_RECEIVE.with(|flag| flag.set(self.previous));
    }
}

struct RadioInner {
    transport: Arc<dyn Transport>,
    table: FrameTable<FrameValue>,
    writer: Writer,
    reader: Mutex<FrameReader>,
    message_handlers: Multicast<MessageHandler>,
    error_handlers: Arc<Multicast<ErrorHandler>>,
    link_handlers: Multicast<LinkHandler>,
    config: RadioConfig,
    running: AtomicBool,
}

impl RadioInner {
    fn report(&self, error: MeshError) {
        report_to(&self.error_handlers, error);
    }

    fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let abandoned = self.table.shutdown();
        self.writer.stop();
        if let Err(e) = self.transport.close() {
            warn!(error = %e, "closing transport failed");
        }
        debug!(abandoned, "radio client shut down");
    }
}

impl Drop for RadioInner {
    fn drop(&mut self) {
        self.stop();
    }
}

fn report_to(handlers: &Multicast<ErrorHandler>, error: MeshError) {
    warn!(error = %error, "frame processing failed");
    handlers.for_each(|h| h(&error));
}

/// Forwards transport callbacks without keeping the client alive.
struct ListenerHandle(Weak<RadioInner>);

impl LinkListener for ListenerHandle {
    fn on_received(&self, data: &[u8]) {
        if let Some(inner) = self.0.upgrade() {
            RadioClient { inner }.on_received(data);
        }
    }

    fn on_link_event(&self, event: LinkEvent) {
        if let Some(inner) = self.0.upgrade() {
            RadioClient { inner }.on_link_event(event);
        }
    }
}

/// Client for a radio in API mode.
///
/// Cloning yields another handle to the same connection.
#[derive(Clone)]
pub struct RadioClient {
    inner: Arc<RadioInner>,
}

impl RadioClient {
    /// Start the writer thread and connect to `transport`.
    pub fn connect<T: Transport + 'static>(transport: T, config: RadioConfig) -> Result<Self> {
        Self::connect_shared(Arc::new(transport), config)
    }

    /// Like [`connect`](Self::connect), for a transport the caller keeps a handle to.
    pub fn connect_shared(transport: Arc<dyn Transport>, config: RadioConfig) -> Result<Self> {
        let error_handlers: Arc<Multicast<ErrorHandler>> = Arc::new(Multicast::new());
        let table = FrameTable::new();

        // A frame that never reached the radio will not be answered.
        let sink = Arc::clone(&error_handlers);
        let unanswered = table.clone();
        let writer = Writer::spawn(
            Arc::clone(&transport),
            config.writer_queue_capacity,
            Arc::new(move |id: FrameId, e: MeshError| {
                unanswered.release(id);
                sink.for_each(|h| h(&e));
            }),
        )?;

        let inner = Arc::new(RadioInner {
            transport: Arc::clone(&transport),
            table,
            writer,
            reader: Mutex::new(FrameReader::new()),
            message_handlers: Multicast::new(),
            error_handlers,
            link_handlers: Multicast::new(),
            config,
            running: AtomicBool::new(true),
        });

        transport.connect(Arc::new(ListenerHandle(Arc::downgrade(&inner))))?;
        debug!("radio client connected");
        Ok(Self { inner })
    }

    /// The configuration this client was created with.
    pub fn config(&self) -> &RadioConfig {
        &self.inner.config
    }

    /// Number of frame ids currently awaiting responses.
    pub fn pending_requests(&self) -> usize {
        self.inner.table.in_use()
    }

    /// Send an AT command.
    ///
    /// `completion` receives every response collected under `behavior`. It
    /// is never called if the client shuts down first.
    pub fn send_at_command<F>(
        &self,
        command: AtCommand,
        value: &[u8],
        behavior: ResponseBehavior,
        completion: F,
    ) -> Result<FrameId>
    where
        F: FnOnce(Vec<AtResponse>) + Send + 'static,
    {
        let id = self.reserve_with(behavior, move |values| {
            let responses = values
                .into_iter()
                .filter_map(|value| match value {
                    FrameValue::At(resp) => Some(resp),
                    FrameValue::Transmit(_) => None,
                })
                .collect();
            completion(responses);
        })?;
        self.write(id, Frame::at_command(id, command, value))
    }

    /// Query a parameter and parse every response as `T`.
    ///
    /// Responses with a non-OK status, or that fail to parse, are skipped
    /// and reported to the error handlers.
    pub fn get_parameter<T, F>(&self, code: &str, behavior: ResponseBehavior, callback: F) -> Result<FrameId>
    where
        T: AtValue + Send + 'static,
        F: FnOnce(Vec<T>) + Send + 'static,
    {
        let command = AtCommand::new(code)?;
        let errors = Arc::clone(&self.inner.error_handlers);
        self.send_at_command(command, &[], behavior, move |responses| {
            let mut values = Vec::with_capacity(responses.len());
            for resp in responses {
                if !resp.status.is_ok() {
                    debug!(%command, status = ?resp.status, "skipping failed response");
                    continue;
                }
                match T::from_bytes(&resp.value) {
                    Ok(value) => values.push(value),
                    Err(e) => report_to(&errors, e),
                }
            }
            callback(values);
        })
    }

    /// Query a parameter and wait for the result.
    ///
    /// Blocks until `behavior` completes. With
    /// [`CollectUntilTimeout`](ResponseBehavior::CollectUntilTimeout) an empty
    /// result means nothing answered in time. Fails with
    /// [`MeshError::WouldDeadlock`] when called from a handler running on the
    /// receive path, with [`MeshError::NoResponse`] if the request is dropped
    /// unanswered (response timeout or failed write), and with
    /// [`MeshError::ConnectionClosed`] if the client shuts down while waiting.
    pub fn get_parameter_sync<T>(&self, code: &str, behavior: ResponseBehavior) -> Result<Vec<T>>
    where
        T: AtValue + Send + 'static,
    {
        let command = AtCommand::new(code)?;
        if ReceiveScope::active() {
            return Err(MeshError::WouldDeadlock(command));
        }

        let (tx, rx) = mpsc::channel();
        self.get_parameter::<T, _>(code, behavior, move |values| {
            let _ = tx.send(values);
        })?;
        rx.recv().map_err(|_| {
            if self.is_running() {
                MeshError::NoResponse(command)
            } else {
                MeshError::ConnectionClosed
            }
        })
    }

    /// Set a parameter without waiting for the acknowledgement.
    pub fn set_parameter<T: AtValue>(&self, code: &str, value: &T) -> Result<FrameId> {
        let command = AtCommand::new(code)?;
        let bytes = value.to_bytes()?;
        let id = self.reserve_leased()?;
        self.write(id, Frame::at_command(id, command, &bytes))
    }

    /// Set a parameter; `on_ack` receives the status the radio answers with.
    pub fn set_parameter_with<T, F>(&self, code: &str, value: &T, on_ack: F) -> Result<FrameId>
    where
        T: AtValue,
        F: FnOnce(AtStatus) + Send + 'static,
    {
        let command = AtCommand::new(code)?;
        let bytes = value.to_bytes()?;
        self.send_at_command(
            command,
            &bytes,
            ResponseBehavior::ShutdownFirstResponse,
            move |responses| {
                let status = responses
                    .first()
                    .map(|resp| resp.status)
                    .unwrap_or(AtStatus::Error);
                on_ack(status);
            },
        )
    }

    /// Send application data without tracking delivery.
    pub fn send_message(&self, payload: &[u8], dest: MeshAddress) -> Result<FrameId> {
        let id = self.reserve_leased()?;
        self.write(id, Frame::transmit_request(id, dest, payload))
    }

    /// Send application data to every node.
    pub fn broadcast_message(&self, payload: &[u8]) -> Result<FrameId> {
        self.send_message(payload, MeshAddress::BROADCAST)
    }

    /// Send application data; `on_status` receives the delivery report.
    pub fn send_message_with_status<F>(&self, payload: &[u8], dest: MeshAddress, on_status: F) -> Result<FrameId>
    where
        F: FnOnce(TransmitStatus) + Send + 'static,
    {
        let id = self.reserve_with(ResponseBehavior::ShutdownFirstResponse, move |values| {
            let status = values.into_iter().find_map(|value| match value {
                FrameValue::Transmit(status) => Some(status),
                FrameValue::At(_) => None,
            });
            match status {
                Some(status) => on_status(status),
                None => warn!("transmit request answered by a non-status frame"),
            }
        })?;
        self.write(id, Frame::transmit_request(id, dest, payload))
    }

    /// Register a handler for received application messages.
    ///
    /// Handlers run in registration order on the receive path. An error
    /// returned by one is reported to the error handlers; the others still run.
    pub fn add_message_handler(&self, handler: impl Fn(&ReceivedMessage) -> Result<()> + Send + Sync + 'static) {
        self.inner.message_handlers.add(Arc::new(handler));
    }

    /// Register a handler for per-frame errors.
    pub fn add_error_handler(&self, handler: impl Fn(&MeshError) + Send + Sync + 'static) {
        self.inner.error_handlers.add(Arc::new(handler));
    }

    /// Register a handler for link lifecycle events and modem status.
    pub fn add_link_handler(&self, handler: impl Fn(&LinkEvent) + Send + Sync + 'static) {
        self.inner.link_handlers.add(Arc::new(handler));
    }

    /// Abandon every pending request, stop the writer and close the transport.
    ///
    /// Completion callbacks of abandoned requests are never invoked.
    pub fn shutdown(&self) {
        self.inner.stop();
    }

    /// Check if the client has not been shut down.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Reserve a frame id and register a request on it.
    ///
    /// First-response requests are leased for the response timeout;
    /// collect-until-timeout requests end with their own window.
    fn reserve_with<F>(&self, behavior: ResponseBehavior, completion: F) -> Result<FrameId>
    where
        F: FnOnce(Vec<FrameValue>) + Send + 'static,
    {
        let id = self.inner.table.reserve()?;
        if let Err(e) = self.inner.table.register(id, behavior, Box::new(completion)) {
            self.inner.table.release(id);
            return Err(e);
        }
        if behavior == ResponseBehavior::ShutdownFirstResponse {
            self.inner.table.lease(id, self.inner.config.response_timeout);
        }
        Ok(id)
    }

    /// Reserve a frame id for a frame whose response is not awaited.
    fn reserve_leased(&self) -> Result<FrameId> {
        let id = self.inner.table.reserve()?;
        self.inner.table.lease(id, self.inner.config.response_timeout);
        Ok(id)
    }

    /// Hand an encoded frame to the writer, freeing `id` if that fails.
    fn write(&self, id: FrameId, frame: Frame) -> Result<FrameId> {
        if !self.is_running() {
            self.inner.table.release(id);
            return Err(MeshError::ConnectionClosed);
        }
        trace!(%id, frame_type = ?frame.frame_type, "queueing frame");
        let queued = frame
            .to_bytes()
            .and_then(|bytes| self.inner.writer.send(id, bytes));
        if let Err(e) = queued {
            self.inner.table.release(id);
            return Err(e);
        }
        Ok(id)
    }

    fn handle_frame(&self, frame: Frame) -> Result<()> {
        match frame.frame_type {
            FrameType::AtCommandResponse => {
                let id = frame_id(&frame)?;
                let resp = AtResponse::parse(&frame.payload)?;
                if !resp.status.is_ok() {
                    warn!(%id, command = %resp.command, status = ?resp.status, "AT command failed");
                }
                self.inner.table.dispatch(id, FrameValue::At(resp));
            }
            FrameType::TransmitStatus => {
                let id = frame_id(&frame)?;
                let status = TransmitStatus::from_bytes(&frame.payload)?;
                if !status.is_success() {
                    debug!(%id, delivery = ?status.delivery, "transmission failed");
                }
                self.inner.table.dispatch(id, FrameValue::Transmit(status));
            }
            FrameType::ReceivePacket => {
                let msg = ReceivedMessage::parse(&frame.payload)?;
                trace!(source = %msg.source, len = msg.payload.len(), "message received");
                for handler in self.inner.message_handlers.snapshot() {
                    if let Err(e) = handler(&msg) {
                        self.inner.report(e);
                    }
                }
            }
            FrameType::ModemStatus => {
                let status = ModemStatus::parse(&frame.payload)?;
                debug!(?status, "modem status");
                let event = LinkEvent::ModemStatus(status);
                self.inner.link_handlers.for_each(|h| h(&event));
            }
            FrameType::RemoteAtCommandResponse => {
                debug!("ignoring remote AT command response");
            }
            other => {
                return Err(MeshError::protocol(format!(
                    "radio sent host-only frame type {other:?}"
                )));
            }
        }
        Ok(())
    }
}

fn frame_id(frame: &Frame) -> Result<FrameId> {
    frame
        .frame_id
        .ok_or_else(|| MeshError::malformed(format!("{:?} frame without frame id", frame.frame_type)))
}

impl LinkListener for RadioClient {
    fn on_received(&self, data: &[u8]) {
        let frames = {
            let mut reader = lock(&self.inner.reader);
            reader.feed(data);
            reader.parse_all()
        };
        let _scope = ReceiveScope::enter();
        for frame in frames {
            if let Err(e) = frame.and_then(|frame| self.handle_frame(frame)) {
                self.inner.report(e);
            }
        }
    }

    fn on_link_event(&self, event: LinkEvent) {
        debug!(?event, "link event");
        self.inner.link_handlers.for_each(|h| h(&event));
    }
}

impl std::fmt::Debug for RadioClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RadioClient")
            .field("running", &self.is_running())
            .field("table", &self.inner.table)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::at::{AtString, DeliveryStatus, Empty, Integer, NodeDiscovery};
    use crate::transport::MockTransport;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(2);

    fn at_command(frame: &Frame) -> AtCommand {
        AtCommand([frame.payload[0], frame.payload[1]])
    }

    fn setup() -> (Arc<MockTransport>, RadioClient) {
        let mock = Arc::new(MockTransport::new());
        let radio = RadioClient::connect_shared(mock.clone(), RadioConfig::default()).unwrap();
        (mock, radio)
    }

    fn nd_record(addr: u64, ni: &str) -> Vec<u8> {
        let mut data = vec![0xFF, 0xFE];
        data.extend_from_slice(&addr.to_be_bytes());
        data.extend_from_slice(ni.as_bytes());
        data.push(0);
        data.extend_from_slice(&[0xFF, 0xFE, 0x01, 0x00, 0xC1, 0x05, 0x10, 0x1E]);
        data
    }

    #[test]
    fn test_get_parameter() {
        let (mock, radio) = setup();
        mock.respond_with(|frame| match frame.frame_id {
            Some(id) if frame.frame_type == FrameType::AtCommand => {
                vec![Frame::at_response(id, at_command(frame), AtStatus::Ok, b"3|7")]
            }
            _ => Vec::new(),
        });

        let (tx, rx) = mpsc::channel();
        let id = radio
            .get_parameter::<AtString, _>("NI", ResponseBehavior::ShutdownFirstResponse, move |v| {
                tx.send(v).unwrap();
            })
            .unwrap();

        let values = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(values, vec![AtString::new("3|7")]);
        assert_eq!(radio.pending_requests(), 0);

        let sent = mock.sent_frames();
        assert_eq!(sent[0], Frame::at_command(id, AtCommand::NI, &[]));
    }

    #[test]
    fn test_invalid_command_reserves_nothing() {
        let (_mock, radio) = setup();
        let result = radio.get_parameter::<Empty, _>("NID", ResponseBehavior::ShutdownFirstResponse, |_| {});
        assert!(matches!(result, Err(MeshError::InvalidCommand(_))));
        assert!(matches!(
            radio.set_parameter("", &Empty),
            Err(MeshError::InvalidCommand(_))
        ));
        assert_eq!(radio.pending_requests(), 0);
    }

    #[test]
    fn test_set_parameter_with_ack() {
        let (mock, radio) = setup();
        mock.respond_with(|frame| match frame.frame_id {
            Some(id) if frame.frame_type == FrameType::AtCommand => {
                vec![Frame::at_response(id, at_command(frame), AtStatus::InvalidParameter, &[])]
            }
            _ => Vec::new(),
        });

        let (tx, rx) = mpsc::channel();
        radio
            .set_parameter_with("AP", &Integer(1u8), move |status| tx.send(status).unwrap())
            .unwrap();
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), AtStatus::InvalidParameter);

        let frame = &mock.sent_frames()[0];
        assert_eq!(&frame.payload[..], &[b'A', b'P', 0x01]);
    }

    #[test]
    fn test_set_parameter_fire_and_forget() {
        let (mock, radio) = setup();
        let id = radio.set_parameter("NI", &AtString::new("-")).unwrap();
        assert!(mock.wait_for_writes(1, WAIT));
        assert_eq!(radio.pending_requests(), 1);

        mock.inject_frame(&Frame::at_response(id, AtCommand::NI, AtStatus::Ok, &[]));
        assert_eq!(radio.pending_requests(), 0);
    }

    #[test]
    fn test_receive_only_value_rejected() {
        let (_mock, radio) = setup();
        let status = TransmitStatus::from_bytes(&[0, 0, 0, 0, 0]).unwrap();
        assert!(matches!(
            radio.set_parameter("XX", &status),
            Err(MeshError::Unsupported(_))
        ));
        assert_eq!(radio.pending_requests(), 0);
    }

    #[test]
    fn test_send_message_status() {
        let (mock, radio) = setup();
        let dest = MeshAddress(0x0013_A200_4000_0001);

        let (tx, rx) = mpsc::channel();
        let id = radio
            .send_message_with_status(&[0xAA], dest, move |status| tx.send(status).unwrap())
            .unwrap();
        assert!(mock.wait_for_writes(1, WAIT));

        let frame = &mock.sent_frames()[0];
        assert_eq!(frame.frame_type, FrameType::TransmitRequest);
        assert_eq!(frame.destination(), Some(dest));
        assert_eq!(frame.transmit_data(), Some(&[0xAA][..]));

        mock.inject_frame(&Frame::transmit_status(id, 3, DeliveryStatus::MacAckFailure));
        mock.inject_frame(&Frame::transmit_status(id, 3, DeliveryStatus::Success));

        let status = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(status.delivery, DeliveryStatus::MacAckFailure);
        assert_eq!(status.retry_count, 3);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_broadcast_message() {
        let (mock, radio) = setup();
        let id = radio.broadcast_message(&[1, 2]).unwrap();
        assert!(mock.wait_for_writes(1, WAIT));
        assert_eq!(mock.sent_frames()[0].destination(), Some(MeshAddress::BROADCAST));

        mock.inject_frame(&Frame::transmit_status(id, 0, DeliveryStatus::Success));
        assert_eq!(radio.pending_requests(), 0);
    }

    #[test]
    fn test_message_handlers_in_order() {
        let (mock, radio) = setup();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let errors = Arc::new(Mutex::new(Vec::new()));

        let s = Arc::clone(&seen);
        radio.add_message_handler(move |msg| {
            s.lock().unwrap().push(("first", msg.payload.to_vec()));
            Err(MeshError::protocol("first handler failed"))
        });
        let s = Arc::clone(&seen);
        radio.add_message_handler(move |msg| {
            s.lock().unwrap().push(("second", msg.payload.to_vec()));
            Ok(())
        });
        let e = Arc::clone(&errors);
        radio.add_error_handler(move |err| e.lock().unwrap().push(err.to_string()));

        let source = MeshAddress(0x0013_A200_4000_0002);
        mock.inject_frame(&Frame::receive_packet(source, false, &[9, 8]));

        assert_eq!(
            *seen.lock().unwrap(),
            vec![("first", vec![9, 8]), ("second", vec![9, 8])]
        );
        assert_eq!(errors.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_bad_frame_does_not_stop_processing() {
        let (mock, radio) = setup();
        let received = Arc::new(Mutex::new(0));
        let errors = Arc::new(Mutex::new(Vec::new()));

        let r = Arc::clone(&received);
        radio.add_message_handler(move |_| {
            *r.lock().unwrap() += 1;
            Ok(())
        });
        let e = Arc::clone(&errors);
        radio.add_error_handler(move |err| e.lock().unwrap().push(err.is_recoverable()));

        let mut bytes = Frame::receive_packet(MeshAddress(1), false, &[1]).to_bytes().unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        // Host-only frame type arriving from the radio.
        bytes.extend(Frame::at_command(FrameId(1), AtCommand::NI, &[]).to_bytes().unwrap());
        // Receive packet too short to hold a source address.
        bytes.extend(Frame::new(FrameType::ReceivePacket, None, vec![0u8; 4]).to_bytes().unwrap());
        bytes.extend(Frame::receive_packet(MeshAddress(1), false, &[2]).to_bytes().unwrap());
        mock.inject(&bytes);

        assert_eq!(*received.lock().unwrap(), 1);
        assert_eq!(*errors.lock().unwrap(), vec![true, true, true]);
    }

    #[test]
    fn test_split_delivery() {
        let (mock, radio) = setup();
        let received = Arc::new(Mutex::new(Vec::new()));
        let r = Arc::clone(&received);
        radio.add_message_handler(move |msg| {
            r.lock().unwrap().push(msg.broadcast);
            Ok(())
        });

        let bytes = Frame::receive_packet(MeshAddress(5), true, &[1, 2, 3]).to_bytes().unwrap();
        for byte in &bytes {
            mock.inject(std::slice::from_ref(byte));
        }
        assert_eq!(*received.lock().unwrap(), vec![true]);
    }

    #[test]
    fn test_get_parameter_sync_collects() {
        let (mock, radio) = setup();
        mock.respond_with(|frame| match frame.frame_id {
            Some(id) if at_command(frame) == AtCommand::ND => vec![
                Frame::at_response(id, AtCommand::ND, AtStatus::Ok, &nd_record(0xA, "1|2")),
                Frame::at_response(id, AtCommand::ND, AtStatus::Ok, &nd_record(0xB, "-")),
            ],
            _ => Vec::new(),
        });

        let nodes: Vec<NodeDiscovery> = radio
            .get_parameter_sync("ND", ResponseBehavior::CollectUntilTimeout(Duration::from_millis(100)))
            .unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].addr, MeshAddress(0xA));
        assert_eq!(nodes[0].advertised_ids(), vec![1, 2]);
        assert_eq!(nodes[1].node_identifier, "-");
    }

    #[test]
    fn test_get_parameter_sync_timeout_is_empty() {
        let (_mock, radio) = setup();
        let nodes: Vec<NodeDiscovery> = radio
            .get_parameter_sync("ND", ResponseBehavior::CollectUntilTimeout(Duration::from_millis(30)))
            .unwrap();
        assert!(nodes.is_empty());
        assert_eq!(radio.pending_requests(), 0);
    }

    #[test]
    fn test_sync_query_on_receive_path() {
        let (mock, radio) = setup();
        let outcome = Arc::new(Mutex::new(None));

        let handle = radio.clone();
        let o = Arc::clone(&outcome);
        radio.add_message_handler(move |_| {
            let result = handle.get_parameter_sync::<AtString>("NI", ResponseBehavior::ShutdownFirstResponse);
            *o.lock().unwrap() = Some(matches!(result, Err(MeshError::WouldDeadlock(_))));
            Ok(())
        });

        mock.inject_frame(&Frame::receive_packet(MeshAddress(1), false, &[]));
        assert_eq!(*outcome.lock().unwrap(), Some(true));
        assert_eq!(radio.pending_requests(), 0);
    }

    #[test]
    fn test_shutdown_abandons_waiters() {
        let (mock, radio) = setup();
        let waiter = radio.clone();
        let handle = std::thread::spawn(move || {
            waiter.get_parameter_sync::<AtString>("NI", ResponseBehavior::ShutdownFirstResponse)
        });

        assert!(mock.wait_for_writes(1, WAIT));
        radio.shutdown();

        assert!(matches!(handle.join().unwrap(), Err(MeshError::ConnectionClosed)));
        assert!(!radio.is_running());
        assert!(matches!(
            radio.broadcast_message(&[1]),
            Err(MeshError::ConnectionClosed)
        ));
        assert_eq!(radio.pending_requests(), 0);
    }

    #[test]
    fn test_link_events() {
        let (mock, radio) = setup();
        let events = Arc::new(Mutex::new(Vec::new()));
        let e = Arc::clone(&events);
        radio.add_link_handler(move |event| e.lock().unwrap().push(event.clone()));

        mock.inject_frame(&Frame::new(FrameType::ModemStatus, None, vec![0x00]));
        mock.emit(LinkEvent::Error("cable unplugged".into()));

        assert_eq!(
            *events.lock().unwrap(),
            vec![
                LinkEvent::ModemStatus(ModemStatus::HardwareReset),
                LinkEvent::Error("cable unplugged".into())
            ]
        );
    }

    fn wait_until(what: &str, condition: impl Fn() -> bool) {
        let deadline = std::time::Instant::now() + WAIT;
        while !condition() {
            assert!(std::time::Instant::now() < deadline, "timed out waiting for {what}");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_failed_writes_free_frame_ids() {
        let (mock, radio) = setup();
        let errors = Arc::new(Mutex::new(0));
        let e = Arc::clone(&errors);
        radio.add_error_handler(move |_| *e.lock().unwrap() += 1);
        let reports = Arc::new(Mutex::new(0));

        mock.set_fail_writes(true);
        for _ in 0..crate::types::FRAME_ID_COUNT {
            let r = Arc::clone(&reports);
            radio
                .send_message_with_status(&[0xAA], MeshAddress(0xA), move |_| *r.lock().unwrap() += 1)
                .unwrap();
        }
        wait_until("failed writes", || *errors.lock().unwrap() == crate::types::FRAME_ID_COUNT);
        assert_eq!(radio.pending_requests(), 0);
        assert_eq!(*reports.lock().unwrap(), 0);

        mock.set_fail_writes(false);
        radio.broadcast_message(&[1]).unwrap();
        assert!(mock.wait_for_writes(1, WAIT));
    }

    #[test]
    fn test_failed_write_ends_sync_query() {
        let (mock, radio) = setup();
        mock.set_fail_writes(true);
        let result = radio.get_parameter_sync::<AtString>("NI", ResponseBehavior::ShutdownFirstResponse);
        assert!(matches!(result, Err(MeshError::NoResponse(AtCommand::NI))));
        assert_eq!(radio.pending_requests(), 0);
    }

    #[test]
    fn test_unanswered_requests_expire() {
        let mock = Arc::new(MockTransport::new());
        let config = RadioConfig::default().with_response_timeout(Duration::from_millis(150));
        let radio = RadioClient::connect_shared(mock.clone(), config).unwrap();

        radio.set_parameter("NI", &AtString::new("-")).unwrap();
        radio.broadcast_message(&[1]).unwrap();
        assert_eq!(radio.pending_requests(), 2);
        wait_until("lapsed reservations", || radio.pending_requests() == 0);

        let result = radio.get_parameter_sync::<AtString>("NI", ResponseBehavior::ShutdownFirstResponse);
        assert!(matches!(result, Err(MeshError::NoResponse(AtCommand::NI))));
        assert_eq!(radio.pending_requests(), 0);
        assert!(radio.is_running());
    }

    #[test]
    fn test_oversized_message_rejected() {
        let (mock, radio) = setup();
        let result = radio.send_message(&vec![0u8; 70_000], MeshAddress::BROADCAST);
        assert!(matches!(result, Err(MeshError::FrameTooLarge(_))));
        assert_eq!(radio.pending_requests(), 0);
        assert!(mock.sent().is_empty());
    }

    #[test]
    fn test_queue_full() {
        let (_mock, radio) = setup();
        for _ in 0..crate::types::FRAME_ID_COUNT {
            radio.broadcast_message(&[]).unwrap();
        }
        assert!(matches!(radio.broadcast_message(&[]), Err(MeshError::QueueFull)));
    }
}
