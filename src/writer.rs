//! Dedicated writer thread serializing all frame writes.
//!
//! ```text
//! caller 1 ─┐
//! caller 2 ─┼─► mpsc::SyncSender<Command> ─► writer thread ─► Transport
//! caller N ─┘
//! ```
//!
//! Every frame reaches the transport whole and in queue order, so bytes of
//! concurrent senders never interleave. Each frame travels with the frame id
//! it was reserved under; a failed write hands that id to the error handler
//! so it can be freed.

use std::sync::{Arc, Mutex};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread::{self, JoinHandle, ThreadId};

use tracing::{debug, trace, warn};

use crate::error::{MeshError, Result};
use crate::lock;
use crate::transport::Transport;
use crate::types::FrameId;

/// Called on the writer thread when the frame reserved under an id could
/// not be written.
pub type WriteErrorHandler = Arc<dyn Fn(FrameId, MeshError) + Send + Sync>;

enum Command {
    Write { id: FrameId, frame: Vec<u8> },
    Stop,
}

/// Handle to the writer thread.
pub struct Writer {
    tx: SyncSender<Command>,
    transport: Arc<dyn Transport>,
    thread: ThreadId,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Writer {
    /// Spawn the writer thread.
    ///
    /// At most `capacity` frames wait in the queue; further sends block until
    /// the thread catches up.
    pub fn spawn(
        transport: Arc<dyn Transport>,
        capacity: usize,
        on_error: WriteErrorHandler,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::sync_channel(capacity.max(1));
        let link = Arc::clone(&transport);
        let handle = thread::Builder::new()
            .name("digimesh-writer".to_string())
            .spawn(move || writer_loop(rx, link, on_error))?;
        Ok(Self {
            tx,
            transport,
            thread: handle.thread().id(),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Queue the encoded frame reserved under `id`.
    ///
    /// Called from the writer thread itself (a transport delivering
    /// responses from inside `write_bytes`), the frame is written straight
    /// away instead, since waiting for queue space there would never end.
    pub fn send(&self, id: FrameId, frame: Vec<u8>) -> Result<()> {
        if thread::current().id() == self.thread {
            trace!(%id, len = frame.len(), "writing frame from the writer thread");
            return self.transport.write_bytes(&frame);
        }
        self.tx
            .send(Command::Write { id, frame })
            .map_err(|_| MeshError::ConnectionClosed)
    }

    /// Stop the thread after the frames already queued are written.
    ///
    /// Waits for the thread unless called from the writer thread itself.
    pub fn stop(&self) {
        let _ = self.tx.send(Command::Stop);
        let Some(handle) = lock(&self.handle).take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            warn!("writer thread panicked");
        }
    }
}

impl std::fmt::Debug for Writer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Writer")
            .field("running", &lock(&self.handle).is_some())
            .finish()
    }
}

fn writer_loop(rx: Receiver<Command>, transport: Arc<dyn Transport>, on_error: WriteErrorHandler) {
    debug!("writer thread started");
    while let Ok(command) = rx.recv() {
        match command {
            Command::Write { id, frame } => {
                trace!(%id, len = frame.len(), "writing frame");
                if let Err(e) = transport.write_bytes(&frame) {
                    warn!(%id, error = %e, "frame write failed");
                    on_error(id, e);
                }
            }
            Command::Stop => break,
        }
    }
    debug!("writer thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use crate::transport::MockTransport;
    use crate::types::AtCommand;
    use std::time::Duration;

    fn ignore_errors() -> WriteErrorHandler {
        Arc::new(|_: FrameId, _: MeshError| {})
    }

    #[test]
    fn test_writes_in_order() {
        let transport = Arc::new(MockTransport::new());
        let writer = Writer::spawn(transport.clone(), 4, ignore_errors()).unwrap();

        for i in 0..10u8 {
            writer.send(FrameId(i), vec![0x7E, i]).unwrap();
        }
        writer.stop();

        let sent = transport.sent();
        assert_eq!(sent.len(), 10);
        for (i, chunk) in sent.iter().enumerate() {
            assert_eq!(chunk, &vec![0x7E, i as u8]);
        }
    }

    #[test]
    fn test_concurrent_senders_do_not_interleave() {
        let transport = Arc::new(MockTransport::new());
        let writer = Arc::new(Writer::spawn(transport.clone(), 8, ignore_errors()).unwrap());

        let handles: Vec<_> = (0..4u8)
            .map(|t| {
                let writer = Arc::clone(&writer);
                thread::spawn(move || {
                    for _ in 0..25 {
                        writer.send(FrameId(t), vec![t; 16]).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        writer.stop();

        let sent = transport.sent();
        assert_eq!(sent.len(), 100);
        assert!(sent.iter().all(|chunk| chunk.iter().all(|b| *b == chunk[0])));
    }

    #[test]
    fn test_send_after_stop() {
        let transport = Arc::new(MockTransport::new());
        let writer = Writer::spawn(transport, 1, ignore_errors()).unwrap();
        writer.stop();
        assert!(matches!(
            writer.send(FrameId(1), vec![1]),
            Err(MeshError::ConnectionClosed)
        ));
    }

    #[test]
    fn test_write_error_names_frame_id() {
        let transport = Arc::new(MockTransport::new());
        transport.set_fail_writes(true);

        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        let writer = Writer::spawn(
            transport,
            1,
            Arc::new(move |id: FrameId, e: MeshError| sink.lock().unwrap().push((id, e.to_string()))),
        )
        .unwrap();

        writer.send(FrameId(7), vec![1, 2, 3]).unwrap();
        writer.send(FrameId(8), vec![4]).unwrap();
        writer.stop();
        thread::sleep(Duration::from_millis(10));

        let errors = errors.lock().unwrap();
        assert_eq!(errors.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec![FrameId(7), FrameId(8)]);
    }

    #[test]
    fn test_send_from_writer_thread_does_not_block() {
        let transport = Arc::new(MockTransport::new());
        let writer = Arc::new(Writer::spawn(transport.clone(), 1, ignore_errors()).unwrap());

        // Every NI frame written is answered with a burst of ND frames sent
        // through the same writer, more than its queue holds.
        let slot: Arc<Mutex<Option<Arc<Writer>>>> = Arc::new(Mutex::new(None));
        let hook_writer = Arc::clone(&slot);
        transport.on_write(move |frame| {
            if !frame.payload.starts_with(b"NI") {
                return;
            }
            let Some(writer) = hook_writer.lock().unwrap().clone() else {
                return;
            };
            for i in 0..4u8 {
                let reply = Frame::at_command(FrameId(i), AtCommand::ND, &[]);
                writer.send(FrameId(i), reply.to_bytes().unwrap()).unwrap();
            }
        });
        *slot.lock().unwrap() = Some(Arc::clone(&writer));

        let first = Frame::at_command(FrameId(9), AtCommand::NI, &[]);
        writer.send(FrameId(9), first.to_bytes().unwrap()).unwrap();
        assert!(transport.wait_for_writes(5, Duration::from_secs(2)));

        slot.lock().unwrap().take();
        writer.stop();
        assert_eq!(transport.sent().len(), 5);
    }
}
