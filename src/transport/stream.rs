//! Transport over a blocking byte stream.
//!
//! Works with anything that splits into a `Read` half and a `Write` half: a
//! serial port handle, or a TCP connection to a serial bridge.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::error::{MeshError, Result};
use crate::lock;

use super::{LinkEvent, LinkListener, Transport};

/// Default size of the read buffer.
pub const DEFAULT_READ_BUFFER: usize = 256;

type Closer = Box<dyn Fn() -> io::Result<()> + Send + Sync>;

/// A [`Transport`] over a blocking reader and writer.
///
/// `connect` spawns a reader thread that delivers every chunk read to the
/// listener. The thread ends at end of stream or on the first read error,
/// reporting [`LinkEvent::Removed`] or [`LinkEvent::Error`].
pub struct StreamTransport {
    reader: Mutex<Option<Box<dyn Read + Send>>>,
    writer: Mutex<Box<dyn Write + Send>>,
    closer: Option<Closer>,
    closed: Arc<AtomicBool>,
    reader_handle: Mutex<Option<JoinHandle<()>>>,
    read_buffer_size: usize,
}

impl StreamTransport {
    /// Create a transport from the two halves of a stream.
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        Self {
            reader: Mutex::new(Some(Box::new(reader))),
            writer: Mutex::new(Box::new(writer)),
            closer: None,
            closed: Arc::new(AtomicBool::new(false)),
            reader_handle: Mutex::new(None),
            read_buffer_size: DEFAULT_READ_BUFFER,
        }
    }

    /// Connect to a serial-over-TCP bridge.
    pub fn connect_tcp<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        Self::from_tcp(stream)
    }

    /// Create a transport from a connected TCP stream.
    pub fn from_tcp(stream: TcpStream) -> Result<Self> {
        stream.set_nodelay(true)?;
        let reader = stream.try_clone()?;
        let closer = stream.try_clone()?;
        let mut transport = Self::new(reader, stream);
        transport.closer = Some(Box::new(move || closer.shutdown(Shutdown::Both)));
        Ok(transport)
    }

    /// Set the size of the read buffer.
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    /// Wait for the reader thread to finish.
    pub fn join(&self) {
        if let Some(handle) = lock(&self.reader_handle).take() {
            if handle.join().is_err() {
                warn!("reader thread panicked");
            }
        }
    }
}

impl Transport for StreamTransport {
    fn connect(&self, listener: Arc<dyn LinkListener>) -> Result<()> {
        let mut reader = lock(&self.reader).take().ok_or_else(|| {
            MeshError::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "transport already connected",
            ))
        })?;

        let closed = Arc::clone(&self.closed);
        let size = self.read_buffer_size;
        listener.on_link_event(LinkEvent::Connected);

        let handle = thread::Builder::new()
            .name("digimesh-reader".to_string())
            .spawn(move || {
                let mut buf = vec![0u8; size];
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) => {
                            debug!("link reached end of stream");
                            listener.on_link_event(LinkEvent::Removed);
                            break;
                        }
                        Ok(n) => listener.on_received(&buf[..n]),
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => {
                            if closed.load(Ordering::SeqCst) {
                                listener.on_link_event(LinkEvent::Removed);
                            } else {
                                warn!(error = %e, "link read failed");
                                listener.on_link_event(LinkEvent::Error(e.to_string()));
                            }
                            break;
                        }
                    }
                }
            })?;

        *lock(&self.reader_handle) = Some(handle);
        Ok(())
    }

    fn write_bytes(&self, data: &[u8]) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MeshError::ConnectionClosed);
        }
        let mut writer = lock(&self.writer);
        writer.write_all(data)?;
        writer.flush()?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(closer) = &self.closer {
            closer()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for StreamTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamTransport")
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .field("read_buffer_size", &self.read_buffer_size)
            .finish()
    }
}
