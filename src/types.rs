//! Core DigiMesh types and constants.

use crate::error::{MeshError, Result};

/// Start delimiter of every API frame.
pub const START_BYTE: u8 = 0x7E;

/// Number of frame ids the radio can correlate at once.
pub const FRAME_ID_COUNT: usize = 256;

/// API frame types as defined by the radio firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Local AT command (parameter get/set).
    AtCommand = 0x08,
    /// Response to a local AT command.
    AtCommandResponse = 0x88,
    /// AT command addressed to a remote node.
    RemoteAtCommand = 0x17,
    /// Response to a remote AT command.
    RemoteAtCommandResponse = 0x97,
    /// Unsolicited modem status.
    ModemStatus = 0x8A,
    /// Transmit request carrying application data.
    TransmitRequest = 0x10,
    /// Delivery report for a transmit request.
    TransmitStatus = 0x8B,
    /// Application data received from another node.
    ReceivePacket = 0x90,
}

impl FrameType {
    /// Create a FrameType from a raw byte value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x08 => Some(Self::AtCommand),
            0x88 => Some(Self::AtCommandResponse),
            0x17 => Some(Self::RemoteAtCommand),
            0x97 => Some(Self::RemoteAtCommandResponse),
            0x8A => Some(Self::ModemStatus),
            0x10 => Some(Self::TransmitRequest),
            0x8B => Some(Self::TransmitStatus),
            0x90 => Some(Self::ReceivePacket),
            _ => None,
        }
    }

    /// Check if frames of this type carry a frame id after the type byte.
    pub fn has_frame_id(&self) -> bool {
        !matches!(self, Self::ModemStatus | Self::ReceivePacket)
    }

    /// Check if this frame type is sent by the radio to the host.
    pub fn is_inbound(&self) -> bool {
        (*self as u8) & 0x80 != 0
    }
}

/// Frame id used to correlate a request with its responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct FrameId(pub u8);

impl FrameId {
    /// Slot index of this id in the frame table.
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

/// 64-bit hardware address of a radio node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MeshAddress(pub u64);

impl MeshAddress {
    /// Reserved address meaning "all nodes".
    pub const BROADCAST: MeshAddress = MeshAddress(0x0000_0000_0000_FFFF);

    /// Directory sentinel for items owned by this node.
    pub const LOCAL: MeshAddress = MeshAddress(0);

    /// Check if this is the broadcast address.
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// Check if this is the local sentinel.
    pub fn is_local(&self) -> bool {
        *self == Self::LOCAL
    }

    /// Read a big-endian address from the first 8 bytes of `data`.
    pub fn from_be_slice(data: &[u8]) -> Result<Self> {
        MeshError::ensure_len("mesh address", data, 8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&data[..8]);
        Ok(Self(u64::from_be_bytes(raw)))
    }

    /// Big-endian wire representation.
    pub fn to_be_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl std::fmt::Display for MeshAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

/// Identity of an item within a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct ItemId(pub u32);

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Two-character AT command code, e.g. `NI` or `ND`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AtCommand(pub [u8; 2]);

impl AtCommand {
    /// Node identifier.
    pub const NI: AtCommand = AtCommand(*b"NI");
    /// Network discovery.
    pub const ND: AtCommand = AtCommand(*b"ND");
    /// API mode.
    pub const AP: AtCommand = AtCommand(*b"AP");

    /// Parse a command code, rejecting anything but two ASCII characters.
    pub fn new(code: &str) -> Result<Self> {
        match code.as_bytes() {
            [a, b] if a.is_ascii_graphic() && b.is_ascii_graphic() => Ok(Self([*a, *b])),
            _ => Err(MeshError::InvalidCommand(code.to_string())),
        }
    }

    /// The command as a string slice.
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("??")
    }
}

impl std::fmt::Display for AtCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status byte of an AT command response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtStatus {
    /// Command accepted.
    Ok,
    /// Generic failure.
    Error,
    /// Command code not recognized by the firmware.
    InvalidCommand,
    /// Parameter value out of range.
    InvalidParameter,
    /// Remote command could not be delivered.
    TransmissionFailure,
    /// Any other status code.
    Unknown(u8),
}

impl AtStatus {
    /// Create an AtStatus from a raw byte value.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => Self::Ok,
            0x01 => Self::Error,
            0x02 => Self::InvalidCommand,
            0x03 => Self::InvalidParameter,
            0x04 => Self::TransmissionFailure,
            other => Self::Unknown(other),
        }
    }

    /// Raw status byte.
    pub fn to_u8(&self) -> u8 {
        match self {
            Self::Ok => 0x00,
            Self::Error => 0x01,
            Self::InvalidCommand => 0x02,
            Self::InvalidParameter => 0x03,
            Self::TransmissionFailure => 0x04,
            Self::Unknown(other) => *other,
        }
    }

    /// Check if this status indicates success.
    pub fn is_ok(&self) -> bool {
        *self == Self::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_type_from_u8() {
        assert_eq!(FrameType::from_u8(0x08), Some(FrameType::AtCommand));
        assert_eq!(FrameType::from_u8(0x8B), Some(FrameType::TransmitStatus));
        assert_eq!(FrameType::from_u8(0x90), Some(FrameType::ReceivePacket));
        assert_eq!(FrameType::from_u8(0xFF), None);
    }

    #[test]
    fn test_frame_type_direction() {
        assert!(FrameType::AtCommandResponse.is_inbound());
        assert!(FrameType::ModemStatus.is_inbound());
        assert!(!FrameType::TransmitRequest.is_inbound());
        assert!(!FrameType::AtCommand.is_inbound());
    }

    #[test]
    fn test_frame_type_has_frame_id() {
        assert!(FrameType::AtCommand.has_frame_id());
        assert!(FrameType::TransmitStatus.has_frame_id());
        assert!(!FrameType::ReceivePacket.has_frame_id());
        assert!(!FrameType::ModemStatus.has_frame_id());
    }

    #[test]
    fn test_mesh_address() {
        assert!(MeshAddress::BROADCAST.is_broadcast());
        assert!(MeshAddress::LOCAL.is_local());
        assert_eq!(
            MeshAddress::from_be_slice(&[0, 0x13, 0xA2, 0, 0x41, 0x52, 0x63, 0x74]).unwrap(),
            MeshAddress(0x0013_A200_4152_6374)
        );
        assert!(matches!(
            MeshAddress::from_be_slice(&[0, 1, 2]),
            Err(MeshError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_at_command() {
        assert_eq!(AtCommand::new("NI").unwrap(), AtCommand::NI);
        assert_eq!(AtCommand::NI.to_string(), "NI");
        assert!(matches!(AtCommand::new("N"), Err(MeshError::InvalidCommand(_))));
        assert!(matches!(AtCommand::new("NID"), Err(MeshError::InvalidCommand(_))));
        assert!(matches!(AtCommand::new("é"), Err(MeshError::InvalidCommand(_))));
    }

    #[test]
    fn test_at_status() {
        assert_eq!(AtStatus::from_u8(0x00), AtStatus::Ok);
        assert_eq!(AtStatus::from_u8(0x03), AtStatus::InvalidParameter);
        assert_eq!(AtStatus::from_u8(0x42), AtStatus::Unknown(0x42));
        assert_eq!(AtStatus::Unknown(0x42).to_u8(), 0x42);
        assert!(AtStatus::Ok.is_ok());
        assert!(!AtStatus::Error.is_ok());
    }
}
