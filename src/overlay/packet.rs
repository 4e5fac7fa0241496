//! Overlay packets carried as transmit-request data.
//!
//! ```text
//! DATA                     0x01 | data(0..N)
//! ITEM_PRESENT             0x02 | component\0 | itemId(4, BE)
//! CONTAINED_ITEMS_REQUEST  0x03 | component\0
//! REMOVE_ITEM              0x04 | component\0 | itemId(4, BE)
//! ```

use bytes::{BufMut, Bytes};

use crate::at::split_cstr;
use crate::error::{MeshError, Result};
use crate::types::ItemId;

/// Overlay packet type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Data = 0x01,
    ItemPresent = 0x02,
    ContainedItemsRequest = 0x03,
    RemoveItem = 0x04,
}

impl PacketType {
    /// Create a PacketType from a raw byte value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Data),
            0x02 => Some(Self::ItemPresent),
            0x03 => Some(Self::ContainedItemsRequest),
            0x04 => Some(Self::RemoveItem),
            _ => None,
        }
    }
}

/// A decoded overlay packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverlayPacket {
    /// Application data.
    Data(Bytes),
    /// The sender owns `id` in `component`.
    ItemPresent { component: String, id: ItemId },
    /// Every node should announce the items it owns in `component`.
    ContainedItemsRequest { component: String },
    /// The sender no longer owns `id` in `component`.
    RemoveItem { component: String, id: ItemId },
}

impl OverlayPacket {
    /// The packet type.
    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::Data(_) => PacketType::Data,
            Self::ItemPresent { .. } => PacketType::ItemPresent,
            Self::ContainedItemsRequest { .. } => PacketType::ContainedItemsRequest,
            Self::RemoveItem { .. } => PacketType::RemoveItem,
        }
    }

    /// The component the packet refers to, if any.
    pub fn component(&self) -> Option<&str> {
        match self {
            Self::Data(_) => None,
            Self::ItemPresent { component, .. }
            | Self::ContainedItemsRequest { component }
            | Self::RemoveItem { component, .. } => Some(component),
        }
    }

    /// Serialize the packet to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.put_u8(self.packet_type() as u8);
        match self {
            Self::Data(data) => buf.put_slice(data),
            Self::ItemPresent { component, id } | Self::RemoveItem { component, id } => {
                put_cstr(&mut buf, component);
                buf.put_u32(id.0);
            }
            Self::ContainedItemsRequest { component } => put_cstr(&mut buf, component),
        }
        buf
    }

    /// Parse a packet from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        MeshError::ensure_len("overlay packet", data, 1)?;
        let packet_type = PacketType::from_u8(data[0]).ok_or_else(|| {
            MeshError::protocol(format!("unknown overlay packet type 0x{:02X}", data[0]))
        })?;
        let body = &data[1..];

        match packet_type {
            PacketType::Data => Ok(Self::Data(Bytes::copy_from_slice(body))),
            PacketType::ContainedItemsRequest => {
                let (component, _) = split_cstr("component name", body)?;
                Ok(Self::ContainedItemsRequest {
                    component: component.to_string(),
                })
            }
            PacketType::ItemPresent | PacketType::RemoveItem => {
                let (component, rest) = split_cstr("component name", body)?;
                MeshError::ensure_len("item id", rest, 4)?;
                let id = ItemId(u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]));
                let component = component.to_string();
                Ok(if packet_type == PacketType::ItemPresent {
                    Self::ItemPresent { component, id }
                } else {
                    Self::RemoveItem { component, id }
                })
            }
        }
    }
}

fn put_cstr(buf: &mut Vec<u8>, value: &str) {
    buf.put_slice(value.as_bytes());
    buf.put_u8(0);
}
