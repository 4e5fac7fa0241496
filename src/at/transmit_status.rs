use crate::error::{MeshError, Result};

use super::AtValue;

/// Outcome of a transmit request as reported by the radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryStatus {
    Success,
    MacAckFailure,
    CollisionAvoidanceFailure,
    NetworkAckFailure,
    RouteNotFound,
    InternalResourceError,
    InternalError,
    PayloadTooLarge,
    IndirectMessageRequested,
    /// Any other status code.
    Unknown(u8),
}

impl DeliveryStatus {
    /// Create a DeliveryStatus from a raw byte value.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => Self::Success,
            0x01 => Self::MacAckFailure,
            0x02 => Self::CollisionAvoidanceFailure,
            0x21 => Self::NetworkAckFailure,
            0x25 => Self::RouteNotFound,
            0x31 => Self::InternalResourceError,
            0x32 => Self::InternalError,
            0x74 => Self::PayloadTooLarge,
            0x75 => Self::IndirectMessageRequested,
            other => Self::Unknown(other),
        }
    }

    /// Raw status byte.
    pub fn to_u8(&self) -> u8 {
        match self {
            Self::Success => 0x00,
            Self::MacAckFailure => 0x01,
            Self::CollisionAvoidanceFailure => 0x02,
            Self::NetworkAckFailure => 0x21,
            Self::RouteNotFound => 0x25,
            Self::InternalResourceError => 0x31,
            Self::InternalError => 0x32,
            Self::PayloadTooLarge => 0x74,
            Self::IndirectMessageRequested => 0x75,
            Self::Unknown(other) => *other,
        }
    }
}

/// Whether route discovery was needed for a transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiscoveryStatus {
    NoDiscoveryOverhead,
    RouteDiscovery,
    Unknown(u8),
}

impl DiscoveryStatus {
    /// Create a DiscoveryStatus from a raw byte value.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => Self::NoDiscoveryOverhead,
            0x02 => Self::RouteDiscovery,
            other => Self::Unknown(other),
        }
    }
}

/// Delivery report carried by a transmit status frame.
///
/// Parsed from the payload after the frame id:
/// `reservedAddr(2) | retryCount(1) | deliveryStatus(1) | discoveryStatus(1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransmitStatus {
    pub retry_count: u8,
    pub delivery: DeliveryStatus,
    pub discovery: DiscoveryStatus,
}

impl TransmitStatus {
    /// Check if the transmission was acknowledged.
    pub fn is_success(&self) -> bool {
        self.delivery == DeliveryStatus::Success
    }
}

impl AtValue for TransmitStatus {
    fn to_bytes(&self) -> Result<Vec<u8>> {
        Err(MeshError::Unsupported("transmit status is receive-only"))
    }

    fn from_bytes(data: &[u8]) -> Result<Self> {
        MeshError::ensure_len("transmit status", data, 5)?;
        Ok(Self {
            retry_count: data[2],
            delivery: DeliveryStatus::from_u8(data[3]),
            discovery: DiscoveryStatus::from_u8(data[4]),
        })
    }
}
