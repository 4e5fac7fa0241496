//! Parsed payloads of frames sent by the radio.

use bytes::Bytes;

use crate::at::TransmitStatus;
use crate::error::{MeshError, Result};
use crate::types::{AtCommand, AtStatus, MeshAddress};

/// Receive options bit set when the packet was sent to the broadcast address.
pub const RECEIVE_OPTION_BROADCAST: u8 = 0x02;

/// Response to a local AT command.
///
/// Parsed from the payload after the frame id: `command(2) | status(1) | value(0..N)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtResponse {
    pub command: AtCommand,
    pub status: AtStatus,
    pub value: Bytes,
}

impl AtResponse {
    /// Parse an AT command response payload.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        MeshError::ensure_len("AT command response", payload, 3)?;
        Ok(Self {
            command: AtCommand([payload[0], payload[1]]),
            status: AtStatus::from_u8(payload[2]),
            value: Bytes::copy_from_slice(&payload[3..]),
        })
    }
}

/// Application data received from another node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Address of the sending node.
    pub source: MeshAddress,
    /// Received data.
    pub payload: Bytes,
    /// Whether the packet was addressed to every node.
    pub broadcast: bool,
}

impl ReceivedMessage {
    /// Parse a receive packet payload:
    /// `sourceAddress(8) | reservedNetworkAddr(2) | options(1) | data(0..N)`.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        MeshError::ensure_len("receive packet", payload, 11)?;
        Ok(Self {
            source: MeshAddress::from_be_slice(payload)?,
            payload: Bytes::copy_from_slice(&payload[11..]),
            broadcast: payload[10] & RECEIVE_OPTION_BROADCAST != 0,
        })
    }
}

/// Unsolicited status reported by the radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModemStatus {
    HardwareReset,
    WatchdogReset,
    NetworkWokeUp,
    NetworkWentToSleep,
    Unknown(u8),
}

impl ModemStatus {
    /// Parse a modem status payload.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        MeshError::ensure_len("modem status", payload, 1)?;
        Ok(match payload[0] {
            0x00 => Self::HardwareReset,
            0x01 => Self::WatchdogReset,
            0x0B => Self::NetworkWokeUp,
            0x0C => Self::NetworkWentToSleep,
            other => Self::Unknown(other),
        })
    }
}

/// A correlated response, dispatched to the request holding its frame id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameValue {
    At(AtResponse),
    Transmit(TransmitStatus),
}
