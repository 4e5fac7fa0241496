//! Async stream transport.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

use crate::error::{MeshError, Result};
use crate::lock;
use crate::transport::{LinkEvent, LinkListener, Transport};

/// Default size of the read buffer.
pub const DEFAULT_READ_BUFFER: usize = 256;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A [`Transport`] over a tokio byte stream.
///
/// `connect` spawns a reader task and a writer task on the runtime the
/// transport was created with. `write_bytes` only queues: a write error
/// surfaces as [`LinkEvent::Error`] and ends the writer task, after which
/// `write_bytes` fails with [`MeshError::ConnectionClosed`]. Frames still
/// queued at that point are dropped; the radio client frees their frame ids
/// when its response timeout runs out.
pub struct AsyncStreamTransport {
    runtime: Handle,
    halves: Mutex<Option<(BoxedReader, BoxedWriter)>>,
    tx: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    cancel: Arc<Notify>,
    closed: Arc<AtomicBool>,
    read_buffer_size: usize,
}

impl AsyncStreamTransport {
    /// Create a transport over `stream`, running its tasks on `runtime`.
    pub fn new<S>(stream: S, runtime: Handle) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            runtime,
            halves: Mutex::new(Some((Box::new(reader), Box::new(writer)))),
            tx: Mutex::new(None),
            cancel: Arc::new(Notify::new()),
            closed: Arc::new(AtomicBool::new(false)),
            read_buffer_size: DEFAULT_READ_BUFFER,
        }
    }

    /// Connect to a serial-over-TCP bridge from within a runtime.
    pub async fn connect_tcp<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream, Handle::current()))
    }

    /// Set the size of the read buffer.
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }
}

impl Transport for AsyncStreamTransport {
    fn connect(&self, listener: Arc<dyn LinkListener>) -> Result<()> {
        let (mut reader, mut writer) = lock(&self.halves).take().ok_or_else(|| {
            MeshError::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "transport already connected",
            ))
        })?;

        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        *lock(&self.tx) = Some(tx);
        listener.on_link_event(LinkEvent::Connected);

        let write_listener = Arc::clone(&listener);
        self.runtime.spawn(async move {
            while let Some(chunk) = rx.recv().await {
                let written = async {
                    writer.write_all(&chunk).await?;
                    writer.flush().await
                };
                if let Err(e) = written.await {
                    warn!(error = %e, "link write failed");
                    write_listener.on_link_event(LinkEvent::Error(e.to_string()));
                    return;
                }
            }
            if let Err(e) = writer.shutdown().await {
                debug!(error = %e, "shutting down write half failed");
            }
        });

        let cancel = Arc::clone(&self.cancel);
        let closed = Arc::clone(&self.closed);
        let size = self.read_buffer_size;
        self.runtime.spawn(async move {
            let mut buf = vec![0u8; size];
            loop {
                tokio::select! {
                    _ = cancel.notified() => {
                        listener.on_link_event(LinkEvent::Removed);
                        break;
                    }
                    read = reader.read(&mut buf) => match read {
                        Ok(0) => {
                            debug!("link reached end of stream");
                            listener.on_link_event(LinkEvent::Removed);
                            break;
                        }
                        Ok(n) => listener.on_received(&buf[..n]),
                        Err(e) => {
                            if closed.load(Ordering::SeqCst) {
                                listener.on_link_event(LinkEvent::Removed);
                            } else {
                                warn!(error = %e, "link read failed");
                                listener.on_link_event(LinkEvent::Error(e.to_string()));
                            }
                            break;
                        }
                    },
                }
            }
        });
        Ok(())
    }

    fn write_bytes(&self, data: &[u8]) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MeshError::ConnectionClosed);
        }
        match lock(&self.tx).as_ref() {
            Some(tx) => tx
                .send(data.to_vec())
                .map_err(|_| MeshError::ConnectionClosed),
            None => Err(MeshError::ConnectionClosed),
        }
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // The writer task drains what is queued, then shuts the stream down.
        lock(&self.tx).take();
        self.cancel.notify_one();
        Ok(())
    }
}

impl std::fmt::Debug for AsyncStreamTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncStreamTransport")
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .field("read_buffer_size", &self.read_buffer_size)
            .finish()
    }
}
