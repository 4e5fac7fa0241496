//! Per-component item directories.
//!
//! An [`AddressDirectory`] maps item ids to the mesh address of the node
//! that owns them. Items owned by this node map to [`MeshAddress::LOCAL`].
//! An id keeps the address it was first inserted with until it is removed,
//! by anyone; a second claim from another address is a
//! [`MeshError::DuplicateIdentity`].

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use crate::at::TransmitStatus;
use crate::error::{MeshError, Result};
use crate::event::Multicast;
use crate::lock;
use crate::types::{ItemId, MeshAddress};

/// Handler for items learned from another node.
pub type NewItemHandler = dyn Fn(ItemId, MeshAddress) + Send + Sync;

/// Handler for items removed by a REMOVE_ITEM packet.
pub type ItemRemovedHandler = dyn Fn(ItemId) + Send + Sync;

/// Handler for data that could not be delivered to an item.
pub type TransmitErrorHandler = dyn Fn(ItemId, TransmitStatus) + Send + Sync;

/// Item id to owner address mapping for one component.
#[derive(Debug, Clone)]
pub struct AddressDirectory {
    component: String,
    entries: BTreeMap<ItemId, MeshAddress>,
}

impl AddressDirectory {
    /// Create an empty directory for `component`.
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            entries: BTreeMap::new(),
        }
    }

    /// The component this directory belongs to.
    pub fn component(&self) -> &str {
        &self.component
    }

    /// Record `id` as owned by this node.
    ///
    /// Fails if `id` is already known, whoever owns it.
    pub fn add_local(&mut self, id: ItemId) -> Result<()> {
        if let Some(existing) = self.entries.get(&id) {
            return Err(self.duplicate(id, *existing, MeshAddress::LOCAL));
        }
        self.entries.insert(id, MeshAddress::LOCAL);
        Ok(())
    }

    /// Record `id` as owned by `addr`.
    ///
    /// Returns `true` if the entry is new. Repeating a known `(id, addr)`
    /// pair is a no-op.
    pub fn add_external(&mut self, id: ItemId, addr: MeshAddress) -> Result<bool> {
        match self.entries.get(&id) {
            None => {
                self.entries.insert(id, addr);
                Ok(true)
            }
            Some(existing) if *existing == addr => Ok(false),
            Some(existing) => Err(self.duplicate(id, *existing, addr)),
        }
    }

    /// Forget `id`, whoever owns it.
    ///
    /// Returns the address it was owned by, or `None` if it was unknown.
    pub fn remove(&mut self, id: ItemId) -> Option<MeshAddress> {
        self.entries.remove(&id)
    }

    /// Put back an entry taken out by [`remove`](Self::remove).
    pub(crate) fn restore(&mut self, id: ItemId, addr: MeshAddress) {
        self.entries.entry(id).or_insert(addr);
    }

    /// Address of the node owning `id`.
    pub fn resolve(&self, id: ItemId) -> Result<MeshAddress> {
        self.entries
            .get(&id)
            .copied()
            .ok_or_else(|| MeshError::UnknownIdentity {
                component: self.component.clone(),
                id,
            })
    }

    /// Check if `id` is known.
    pub fn contains(&self, id: ItemId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Locally owned ids, ascending.
    pub fn local_items(&self) -> Vec<ItemId> {
        self.entries
            .iter()
            .filter(|(_, addr)| addr.is_local())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Every known `(id, owner)` pair, ascending by id.
    pub fn entries(&self) -> Vec<(ItemId, MeshAddress)> {
        self.entries.iter().map(|(id, addr)| (*id, *addr)).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn duplicate(&self, id: ItemId, existing: MeshAddress, claimed: MeshAddress) -> MeshError {
        MeshError::DuplicateIdentity {
            component: self.component.clone(),
            id,
            existing,
            claimed,
        }
    }
}

/// A declared component: its directory and the handlers scoped to it.
pub(crate) struct Component {
    directory: Mutex<AddressDirectory>,
    pub(crate) new_item: Multicast<NewItemHandler>,
    pub(crate) item_removed: Multicast<ItemRemovedHandler>,
    pub(crate) transmit_error: Multicast<TransmitErrorHandler>,
}

impl Component {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            directory: Mutex::new(AddressDirectory::new(name)),
            new_item: Multicast::new(),
            item_removed: Multicast::new(),
            transmit_error: Multicast::new(),
        }
    }

    pub(crate) fn directory(&self) -> MutexGuard<'_, AddressDirectory> {
        lock(&self.directory)
    }
}

impl std::fmt::Debug for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Component")
            .field("directory", &*self.directory())
            .field("new_item", &self.new_item)
            .field("item_removed", &self.item_removed)
            .field("transmit_error", &self.transmit_error)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NODE_A: MeshAddress = MeshAddress(0x0013_A200_4000_0001);
    const NODE_B: MeshAddress = MeshAddress(0x0013_A200_4000_0002);

    #[test]
    fn test_add_local() {
        let mut dir = AddressDirectory::new("Vehicle");
        dir.add_local(ItemId(7)).unwrap();
        assert_eq!(dir.resolve(ItemId(7)).unwrap(), MeshAddress::LOCAL);

        let err = dir.add_local(ItemId(7)).unwrap_err();
        assert!(matches!(err, MeshError::DuplicateIdentity { id: ItemId(7), .. }));
    }

    #[test]
    fn test_add_local_over_external() {
        let mut dir = AddressDirectory::new("Vehicle");
        dir.add_external(ItemId(7), NODE_A).unwrap();
        let err = dir.add_local(ItemId(7)).unwrap_err();
        match err {
            MeshError::DuplicateIdentity { existing, claimed, .. } => {
                assert_eq!(existing, NODE_A);
                assert_eq!(claimed, MeshAddress::LOCAL);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_add_external_idempotent() {
        let mut dir = AddressDirectory::new("Vehicle");
        assert!(dir.add_external(ItemId(3), NODE_A).unwrap());
        assert!(!dir.add_external(ItemId(3), NODE_A).unwrap());
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn test_add_external_conflict() {
        let mut dir = AddressDirectory::new("Vehicle");
        dir.add_external(ItemId(3), NODE_A).unwrap();
        let err = dir.add_external(ItemId(3), NODE_B).unwrap_err();
        assert!(matches!(
            err,
            MeshError::DuplicateIdentity { existing: NODE_A, claimed: NODE_B, .. }
        ));
        assert_eq!(dir.resolve(ItemId(3)).unwrap(), NODE_A);
    }

    #[test]
    fn test_remove_any_owner() {
        let mut dir = AddressDirectory::new("Vehicle");
        dir.add_local(ItemId(1)).unwrap();
        dir.add_external(ItemId(2), NODE_A).unwrap();

        assert_eq!(dir.remove(ItemId(1)), Some(MeshAddress::LOCAL));
        assert_eq!(dir.remove(ItemId(1)), None);
        assert_eq!(dir.remove(ItemId(2)), Some(NODE_A));
        assert_eq!(dir.remove(ItemId(9)), None);
        assert!(dir.is_empty());

        // Removed ids can be claimed again by anyone.
        assert!(dir.add_external(ItemId(2), NODE_B).unwrap());
        dir.add_local(ItemId(1)).unwrap();
    }

    #[test]
    fn test_restore_keeps_newer_entry() {
        let mut dir = AddressDirectory::new("Vehicle");
        dir.add_external(ItemId(2), NODE_A).unwrap();
        let owner = dir.remove(ItemId(2)).unwrap();
        dir.restore(ItemId(2), owner);
        assert_eq!(dir.resolve(ItemId(2)).unwrap(), NODE_A);

        dir.remove(ItemId(2));
        dir.add_external(ItemId(2), NODE_B).unwrap();
        dir.restore(ItemId(2), NODE_A);
        assert_eq!(dir.resolve(ItemId(2)).unwrap(), NODE_B);
    }

    #[test]
    fn test_resolve_unknown() {
        let dir = AddressDirectory::new("Vehicle");
        let err = dir.resolve(ItemId(4)).unwrap_err();
        assert!(matches!(err, MeshError::UnknownIdentity { id: ItemId(4), .. }));
    }

    #[test]
    fn test_local_items_sorted() {
        let mut dir = AddressDirectory::new("Vehicle");
        dir.add_local(ItemId(12)).unwrap();
        dir.add_external(ItemId(5), NODE_A).unwrap();
        dir.add_local(ItemId(3)).unwrap();

        assert_eq!(dir.local_items(), vec![ItemId(3), ItemId(12)]);
        assert_eq!(
            dir.entries(),
            vec![
                (ItemId(3), MeshAddress::LOCAL),
                (ItemId(5), NODE_A),
                (ItemId(12), MeshAddress::LOCAL)
            ]
        );

        dir.clear();
        assert!(dir.is_empty());
    }
}
