//! DigiMesh API frames.
//!
//! ```text
//! +------+-------+-------+------------+------------+-----------+----------+
//! | 0x7E | lenHi | lenLo | frame type | [frame id] | payload   | checksum |
//! +------+-------+-------+------------+------------+-----------+----------+
//!                        |<------------- len bytes ------------>|
//! ```
//!
//! The length counts everything between the length field and the checksum.
//! The checksum is `0xFF` minus the low byte of the sum of those same bytes.

use bytes::{BufMut, Bytes};

use crate::at::DeliveryStatus;
use crate::error::{MeshError, Result};
use crate::response::RECEIVE_OPTION_BROADCAST;
use crate::types::{AtCommand, AtStatus, FrameId, FrameType, MeshAddress, START_BYTE};

/// Bytes on the wire that are not counted by the length field.
pub const FRAME_OVERHEAD: usize = 4;

/// Largest body the 16-bit length field can describe.
pub const MAX_BODY_LEN: usize = u16::MAX as usize;

/// Reserved 16-bit network address carried in transmit requests.
pub const UNKNOWN_NETWORK_ADDR: u16 = 0xFFFE;

/// Compute the checksum over the bytes covered by the length field.
pub fn checksum(body: &[u8]) -> u8 {
    let sum = body.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    0xFF - sum
}

/// A complete API frame.
///
/// The length field and checksum are derived from the other fields when the
/// frame is serialized and cannot be set independently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame type.
    pub frame_type: FrameType,
    /// Correlation id, for frame types that carry one.
    pub frame_id: Option<FrameId>,
    /// Type-specific payload following the frame id.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(frame_type: FrameType, frame_id: Option<FrameId>, payload: impl Into<Bytes>) -> Self {
        Self {
            frame_type,
            frame_id,
            payload: payload.into(),
        }
    }

    /// Build a local AT command frame: `command(2) | value(0..N)`.
    pub fn at_command(frame_id: FrameId, command: AtCommand, value: &[u8]) -> Self {
        let mut payload = Vec::with_capacity(2 + value.len());
        payload.put_slice(&command.0);
        payload.put_slice(value);
        Self::new(FrameType::AtCommand, Some(frame_id), payload)
    }

    /// Build a transmit request frame.
    ///
    /// `destAddress(8) | reservedNetworkAddr(2) | broadcastRadius(1) | options(1) | data(0..N)`
    pub fn transmit_request(frame_id: FrameId, dest: MeshAddress, data: &[u8]) -> Self {
        let mut payload = Vec::with_capacity(12 + data.len());
        payload.put_slice(&dest.to_be_bytes());
        payload.put_u16(UNKNOWN_NETWORK_ADDR);
        payload.put_u8(0x00); // maximum hops
        payload.put_u8(0x00); // default transmit options
        payload.put_slice(data);
        Self::new(FrameType::TransmitRequest, Some(frame_id), payload)
    }

    /// Build an AT command response frame, as sent by the radio.
    pub fn at_response(frame_id: FrameId, command: AtCommand, status: AtStatus, value: &[u8]) -> Self {
        let mut payload = Vec::with_capacity(3 + value.len());
        payload.put_slice(&command.0);
        payload.put_u8(status.to_u8());
        payload.put_slice(value);
        Self::new(FrameType::AtCommandResponse, Some(frame_id), payload)
    }

    /// Build a transmit status frame, as sent by the radio.
    pub fn transmit_status(frame_id: FrameId, retry_count: u8, delivery: DeliveryStatus) -> Self {
        let mut payload = Vec::with_capacity(5);
        payload.put_u16(UNKNOWN_NETWORK_ADDR);
        payload.put_u8(retry_count);
        payload.put_u8(delivery.to_u8());
        payload.put_u8(0x00); // no discovery overhead
        Self::new(FrameType::TransmitStatus, Some(frame_id), payload)
    }

    /// Build a receive packet frame, as sent by the radio.
    pub fn receive_packet(source: MeshAddress, broadcast: bool, data: &[u8]) -> Self {
        let mut payload = Vec::with_capacity(11 + data.len());
        payload.put_slice(&source.to_be_bytes());
        payload.put_u16(UNKNOWN_NETWORK_ADDR);
        payload.put_u8(if broadcast { RECEIVE_OPTION_BROADCAST } else { 0x01 });
        payload.put_slice(data);
        Self::new(FrameType::ReceivePacket, None, payload)
    }

    /// Destination address of a transmit request.
    pub fn destination(&self) -> Option<MeshAddress> {
        match self.frame_type {
            FrameType::TransmitRequest => MeshAddress::from_be_slice(&self.payload).ok(),
            _ => None,
        }
    }

    /// Application data of a transmit request.
    pub fn transmit_data(&self) -> Option<&[u8]> {
        match self.frame_type {
            FrameType::TransmitRequest if self.payload.len() >= 12 => Some(&self.payload[12..]),
            _ => None,
        }
    }

    /// Number of bytes covered by the length field.
    pub fn body_len(&self) -> usize {
        1 + usize::from(self.frame_id.is_some()) + self.payload.len()
    }

    /// Total number of bytes on the wire.
    pub fn total_size(&self) -> usize {
        self.body_len() + FRAME_OVERHEAD
    }

    /// Serialize the frame to bytes.
    ///
    /// Fails with [`MeshError::FrameTooLarge`] if the body does not fit the
    /// length field.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let len = u16::try_from(self.body_len()).map_err(|_| MeshError::FrameTooLarge(self.body_len()))?;
        let mut buf = Vec::with_capacity(self.total_size());
        buf.put_u8(START_BYTE);
        buf.put_u16(len);
        buf.put_u8(self.frame_type as u8);
        if let Some(id) = self.frame_id {
            buf.put_u8(id.0);
        }
        buf.put_slice(&self.payload);
        let sum = checksum(&buf[3..]);
        buf.put_u8(sum);
        Ok(buf)
    }

    /// Parse one complete wire frame, start byte through checksum.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        MeshError::ensure_len("frame", data, FRAME_OVERHEAD + 1)?;

        if data[0] != START_BYTE {
            return Err(MeshError::malformed(format!(
                "expected start byte 0x7E, got 0x{:02X}",
                data[0]
            )));
        }

        let body_len = u16::from_be_bytes([data[1], data[2]]) as usize;
        let total = body_len + FRAME_OVERHEAD;
        if body_len == 0 || data.len() != total {
            return Err(MeshError::malformed(format!(
                "length field says {body_len} bytes, frame holds {}",
                data.len().saturating_sub(FRAME_OVERHEAD)
            )));
        }

        let body = &data[3..total - 1];
        let expected = checksum(body);
        let actual = data[total - 1];
        if expected != actual {
            return Err(MeshError::malformed(format!(
                "checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}"
            )));
        }

        let frame_type = FrameType::from_u8(body[0])
            .ok_or_else(|| MeshError::protocol(format!("unknown frame type 0x{:02X}", body[0])))?;

        if frame_type.has_frame_id() {
            MeshError::ensure_len("frame id", body, 2)?;
            Ok(Self::new(
                frame_type,
                Some(FrameId(body[1])),
                Bytes::copy_from_slice(&body[2..]),
            ))
        } else {
            Ok(Self::new(frame_type, None, Bytes::copy_from_slice(&body[1..])))
        }
    }
}
