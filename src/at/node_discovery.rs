use crate::error::{MeshError, Result};
use crate::types::MeshAddress;

use super::AtValue;
use super::string::split_cstr;

/// One node reported by a network discovery (`ND`) query.
///
/// ```text
/// networkAddr(2) | meshAddr(8) | nodeIdentifier\0 | parentNetworkAddr(2)
///     | deviceType(1) | status(1) | profileId(2) | manufacturerId(2)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDiscovery {
    pub network_addr: u16,
    pub addr: MeshAddress,
    pub node_identifier: String,
    pub parent_network_addr: u16,
    pub device_type: u8,
    pub status: u8,
    pub profile_id: u16,
    pub manufacturer_id: u16,
}

impl NodeDiscovery {
    /// Item ids advertised in the node identifier.
    ///
    /// Ids are joined by `|`; tokens that are not decimal ids (including the
    /// `-` placeholder) are skipped.
    pub fn advertised_ids(&self) -> Vec<u32> {
        self.node_identifier
            .split('|')
            .filter_map(|token| token.trim().parse().ok())
            .collect()
    }
}

impl AtValue for NodeDiscovery {
    fn to_bytes(&self) -> Result<Vec<u8>> {
        Err(MeshError::Unsupported("node discovery records are receive-only"))
    }

    fn from_bytes(data: &[u8]) -> Result<Self> {
        MeshError::ensure_len("node discovery", data, 10)?;
        let network_addr = u16::from_be_bytes([data[0], data[1]]);
        let addr = MeshAddress::from_be_slice(&data[2..10])?;

        let (node_identifier, rest) = split_cstr("node identifier", &data[10..])?;

        MeshError::ensure_len("node discovery trailer", rest, 8)?;
        Ok(Self {
            network_addr,
            addr,
            node_identifier: node_identifier.to_string(),
            parent_network_addr: u16::from_be_bytes([rest[0], rest[1]]),
            device_type: rest[2],
            status: rest[3],
            profile_id: u16::from_be_bytes([rest[4], rest[5]]),
            manufacturer_id: u16::from_be_bytes([rest[6], rest[7]]),
        })
    }
}
