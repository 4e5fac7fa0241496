//! DigiMesh radio protocol implementation built on std threads.
//!
//! This crate talks to DigiMesh radios in API mode: it frames requests,
//! correlates responses by frame id and carries application data between
//! nodes of the mesh. On top of the radio sits an item overlay that maps
//! ids of named components (vehicles, ground stations, ...) to the radios
//! owning them.
//!
//! # Features
//!
//! - API frame codec with checksum validation and resynchronization
//! - Frame id allocation and request/response correlation
//! - First-response and collect-until-timeout response behaviors
//! - Typed AT parameter values (integers, strings, node discovery records)
//! - Item directories with presence, discovery and removal packets
//! - Blocking stream, in-memory and (with `tokio`) async transports
//!
//! # Example
//!
//! ```no_run
//! use digimesh_rs::{ItemId, MeshOverlay, OverlayConfig, StreamTransport};
//!
//! # fn main() -> digimesh_rs::Result<()> {
//! let transport = StreamTransport::connect_tcp("127.0.0.1:9750")?;
//! let overlay = MeshOverlay::connect(
//!     transport,
//!     OverlayConfig::new(["Vehicle"]).with_advertise_component("Vehicle"),
//! )?;
//!
//! overlay.add_data_handler(|payload, source| {
//!     println!("{} bytes from {source}", payload.len());
//! });
//! overlay.add_item("Vehicle", ItemId(7))?;
//! # Ok(())
//! # }
//! ```
//!
//! # Protocol Overview
//!
//! Every API frame is delimited and checksummed:
//!
//! ```text
//! +------+--------+--------+------+---------+---------+----------+
//! | 0x7E | len Hi | len Lo | type | [id]    | payload | checksum |
//! +------+--------+--------+------+---------+---------+----------+
//!          len counts type..payload     checksum = 0xFF - sum(type..payload)
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod at;
pub mod behavior;
pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod frame;
pub mod overlay;
pub mod radio;
pub mod response;
pub mod table;
pub mod transport;
pub mod types;
pub mod writer;

// Async modules (require tokio feature)
#[cfg(feature = "tokio")]
pub mod transport_async;

// Re-export commonly used types at the crate root
pub use at::{AtString, AtValue, Integer, NodeDiscovery, TransmitStatus};
pub use behavior::ResponseBehavior;
pub use codec::FrameReader;
pub use config::{OverlayConfig, RadioConfig, ScanConfig};
pub use error::{MeshError, Result};
pub use frame::Frame;
pub use overlay::{MeshOverlay, OverlayPacket};
pub use radio::RadioClient;
pub use response::{AtResponse, ReceivedMessage};
pub use transport::{LinkEvent, LinkListener, MockTransport, StreamTransport, Transport};
pub use types::{AtCommand, AtStatus, FrameId, FrameType, ItemId, MeshAddress};

/// Lock a mutex, recovering the data if a panicking thread poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
