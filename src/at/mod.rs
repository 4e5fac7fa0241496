//! Typed AT parameter values.
//!
//! Every value carried in an AT command, an AT response or a transmit status
//! implements [`AtValue`]. Values the radio only ever sends to the host
//! (node discovery records, transmit status) refuse to serialize.

mod integer;
mod node_discovery;
mod string;
mod transmit_status;

pub use integer::{AtInteger, Integer};
pub use node_discovery::NodeDiscovery;
pub use string::AtString;
pub(crate) use string::split_cstr;
pub use transmit_status::{DeliveryStatus, DiscoveryStatus, TransmitStatus};

use crate::error::Result;

/// A value that can be carried in an AT command or response.
pub trait AtValue: Sized {
    /// Serialize the value for an outgoing AT command.
    fn to_bytes(&self) -> Result<Vec<u8>>;

    /// Parse the value from a response payload.
    fn from_bytes(data: &[u8]) -> Result<Self>;
}

/// The empty value.
///
/// Used to query a parameter without a value, and as the result type of a
/// set-parameter acknowledgement. Accepts any payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Empty;

impl AtValue for Empty {
    fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    fn from_bytes(_data: &[u8]) -> Result<Self> {
        Ok(Empty)
    }
}
