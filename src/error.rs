//! Error types for DigiMesh operations.

use std::io;
use thiserror::Error;

use crate::types::{AtCommand, ItemId, MeshAddress};

/// Errors that can occur during DigiMesh operations.
#[derive(Error, Debug)]
pub enum MeshError {
    /// I/O error on the underlying link.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A frame or value is shorter than its type requires, or fails its checksum.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Every frame id is currently in use.
    #[error("Frame queue full: all 256 frame ids are in use")]
    QueueFull,

    /// Two different addresses claim the same item id.
    #[error(
        "Duplicate identity: item {id} of component '{component}' is owned by {existing}, {claimed} also claims it"
    )]
    DuplicateIdentity {
        component: String,
        id: ItemId,
        existing: MeshAddress,
        claimed: MeshAddress,
    },

    /// An operation named an item id absent from the directory.
    #[error("Unknown identity: no item {id} in component '{component}'")]
    UnknownIdentity { component: String, id: ItemId },

    /// An operation named a component that was not declared at startup.
    #[error("Unknown component: '{0}'")]
    UnknownComponent(String),

    /// The same component name was declared twice.
    #[error("Component '{0}' declared more than once")]
    DuplicateComponent(String),

    /// The value kind is receive-only.
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    /// Unrecognized frame or packet type, or an unexpected frame.
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// AT command codes are exactly two ASCII characters.
    #[error("Invalid AT command code: {0:?}")]
    InvalidCommand(String),

    /// The connection (or the writer thread) has shut down.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The radio did not answer a request within the response timeout.
    #[error("No response to {0} within the response timeout")]
    NoResponse(AtCommand),

    /// An encoded frame would not fit the 16-bit length field.
    #[error("Frame too large: {0} bytes exceed the 65535-byte length field")]
    FrameTooLarge(usize),

    /// A blocking request was issued from the thread that must deliver its responses.
    #[error("Blocking {0} query issued on the receive thread")]
    WouldDeadlock(AtCommand),
}

/// Result type alias for DigiMesh operations.
pub type Result<T> = std::result::Result<T, MeshError>;

impl MeshError {
    /// Create a new malformed frame error.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedFrame(msg.into())
    }

    /// Create a new protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::ProtocolError(msg.into())
    }

    /// Check a payload is at least `expected` bytes long.
    pub(crate) fn ensure_len(what: &str, data: &[u8], expected: usize) -> Result<()> {
        if data.len() < expected {
            return Err(Self::MalformedFrame(format!(
                "{what}: expected at least {expected} bytes, got {}",
                data.len()
            )));
        }
        Ok(())
    }

    /// Check if this error only affects the frame it was raised for.
    ///
    /// The receive loop logs recoverable errors and carries on with the next
    /// buffered frame.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::MalformedFrame(_)
                | Self::ProtocolError(_)
                | Self::DuplicateIdentity { .. }
                | Self::UnknownIdentity { .. }
                | Self::UnknownComponent(_)
        ) || matches!(
            self,
            Self::Io(e) if e.kind() == io::ErrorKind::WouldBlock
                || e.kind() == io::ErrorKind::TimedOut
                || e.kind() == io::ErrorKind::Interrupted
        )
    }
}
