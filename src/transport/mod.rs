//! Byte transports carrying API frames to and from the radio.
//!
//! A [`Transport`] moves raw bytes; everything above it (framing, correlation,
//! the overlay) lives in [`RadioClient`](crate::radio::RadioClient), which is
//! the [`LinkListener`] the transport reports to.

pub mod mock;
pub mod stream;

pub use mock::MockTransport;
pub use stream::StreamTransport;

use std::sync::Arc;

use crate::error::Result;
use crate::response::ModemStatus;

/// Notification about the state of the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The transport started delivering bytes.
    Connected,
    /// The link went away (end of stream, device unplugged).
    Removed,
    /// The transport hit an error.
    Error(String),
    /// Free-form status from the transport.
    Update(String),
    /// The radio reported a modem status frame.
    ModemStatus(ModemStatus),
}

/// Receiver of bytes and lifecycle events from a [`Transport`].
pub trait LinkListener: Send + Sync {
    /// Called with each chunk of bytes read from the link.
    ///
    /// Chunks have no relation to frame boundaries.
    fn on_received(&self, data: &[u8]);

    /// Called when the state of the link changes.
    fn on_link_event(&self, event: LinkEvent);
}

/// A bidirectional byte link to the radio.
pub trait Transport: Send + Sync {
    /// Start delivering received bytes and events to `listener`.
    fn connect(&self, listener: Arc<dyn LinkListener>) -> Result<()>;

    /// Write all of `data` to the link.
    ///
    /// Only ever called from one writer thread at a time.
    fn write_bytes(&self, data: &[u8]) -> Result<()>;

    /// Stop the link. Further writes fail.
    fn close(&self) -> Result<()> {
        Ok(())
    }
}
