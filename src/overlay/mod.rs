//! Item-addressed overlay on top of [`RadioClient`].
//!
//! Nodes own items (vehicles, ground stations, ...) grouped in named
//! components. Ownership is announced with broadcast overlay packets so every
//! node can map an item id to the mesh address of the radio that owns it:
//!
//! ```text
//! Node A                                      Node B
//!   add_item("Vehicle", 7)
//!     ── ITEM_PRESENT "Vehicle" 7 ──────────►   directory: 7 -> addrA
//!                                             send_data("Vehicle", 7, ..)
//!     ◄──────────────── DATA ─────────────────   (TRANSMIT_REQUEST to addrA)
//! ```
//!
//! A node joining late learns existing items by broadcasting a
//! CONTAINED_ITEMS_REQUEST per component at startup. Optionally the node
//! identifier (`NI`) of the radio advertises the ids of one component, which
//! lets a periodic network discovery (`ND`) find items without any overlay
//! traffic.

mod directory;
mod packet;

pub use directory::{AddressDirectory, ItemRemovedHandler, NewItemHandler, TransmitErrorHandler};
pub use packet::{OverlayPacket, PacketType};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::at::{AtString, Integer, NodeDiscovery, TransmitStatus};
use crate::behavior::ResponseBehavior;
use crate::config::{OverlayConfig, ScanConfig};
use crate::error::{MeshError, Result};
use crate::event::Multicast;
use crate::lock;
use crate::radio::RadioClient;
use crate::response::ReceivedMessage;
use crate::transport::Transport;
use crate::types::{AtStatus, ItemId, MeshAddress};

use directory::Component;

/// Node identifier advertised when no item is owned.
pub const NO_ITEMS: &str = "-";

/// Separator between ids in an advertised node identifier.
pub const ID_SEPARATOR: char = '|';

/// Handler for overlay data: `(payload, source)`.
///
/// Loopback deliveries carry [`MeshAddress::LOCAL`] as source.
pub type DataHandler = dyn Fn(&[u8], MeshAddress) + Send + Sync;

/// Catch-all variant of [`NewItemHandler`], told the component name.
pub type GenericNewItemHandler = dyn Fn(&str, ItemId, MeshAddress) + Send + Sync;

/// Catch-all variant of [`ItemRemovedHandler`].
pub type GenericItemRemovedHandler = dyn Fn(&str, ItemId) + Send + Sync;

/// Catch-all variant of [`TransmitErrorHandler`].
pub type GenericTransmitErrorHandler = dyn Fn(&str, ItemId, TransmitStatus) + Send + Sync;

/// Format the node identifier advertising `ids`.
pub fn node_identifier(ids: &[ItemId]) -> String {
    if ids.is_empty() {
        return NO_ITEMS.to_string();
    }
    ids.iter()
        .map(ItemId::to_string)
        .collect::<Vec<_>>()
        .join(&ID_SEPARATOR.to_string())
}

struct Scanner {
    _stop: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

struct OverlayInner {
    radio: RadioClient,
    config: OverlayConfig,
    components: HashMap<String, Arc<Component>>,
    data_handlers: Multicast<DataHandler>,
    generic_new_item: Multicast<GenericNewItemHandler>,
    generic_item_removed: Multicast<GenericItemRemovedHandler>,
    generic_transmit_error: Multicast<GenericTransmitErrorHandler>,
    // Serializes node identifier rewrites so the last one written wins.
    advertising: Mutex<()>,
    scanner: Mutex<Option<Scanner>>,
    running: AtomicBool,
}

/// Overlay node.
///
/// Cloning yields another handle to the same node.
#[derive(Clone)]
pub struct MeshOverlay {
    inner: Arc<OverlayInner>,
}

impl MeshOverlay {
    /// Connect a radio over `transport` and start the overlay on it.
    pub fn connect<T: Transport + 'static>(transport: T, config: OverlayConfig) -> Result<Self> {
        let radio = RadioClient::connect(transport, config.radio.clone())?;
        Self::start(radio, config)
    }

    /// Start the overlay on a connected radio.
    ///
    /// Switches the radio to API mode, writes its node identifier and asks
    /// the network for the items of every declared component.
    pub fn start(radio: RadioClient, config: OverlayConfig) -> Result<Self> {
        let mut components = HashMap::with_capacity(config.components.len());
        for name in &config.components {
            if components
                .insert(name.clone(), Arc::new(Component::new(name)))
                .is_some()
            {
                return Err(MeshError::DuplicateComponent(name.clone()));
            }
        }
        if let Some(advertised) = &config.advertise_component {
            if !components.contains_key(advertised) {
                return Err(MeshError::UnknownComponent(advertised.clone()));
            }
        }
        if config.scan.is_some() && config.advertise_component.is_none() {
            return Err(MeshError::Unsupported(
                "discovery scan requires an advertised component",
            ));
        }

        let inner = Arc::new(OverlayInner {
            radio,
            config,
            components,
            data_handlers: Multicast::new(),
            generic_new_item: Multicast::new(),
            generic_item_removed: Multicast::new(),
            generic_transmit_error: Multicast::new(),
            advertising: Mutex::new(()),
            scanner: Mutex::new(None),
            running: AtomicBool::new(true),
        });

        let weak = Arc::downgrade(&inner);
        inner.radio.add_message_handler(move |msg: &ReceivedMessage| match weak.upgrade() {
            Some(inner) => MeshOverlay { inner }.handle_message(msg),
            None => Ok(()),
        });

        let overlay = Self { inner };
        overlay.initialize()?;
        if let Some(scan) = overlay.inner.config.scan.clone() {
            let scanner = spawn_scanner(Arc::downgrade(&overlay.inner), scan)?;
            *lock(&overlay.inner.scanner) = Some(scanner);
        }
        debug!(components = ?overlay.inner.config.components, "overlay started");
        Ok(overlay)
    }

    fn initialize(&self) -> Result<()> {
        let api_mode = Integer(self.inner.config.radio.api_mode);
        self.inner.radio.set_parameter_with("AP", &api_mode, |status| {
            if !status.is_ok() {
                warn!(?status, "radio refused API mode");
            }
        })?;

        let name = match &self.inner.config.node_name {
            Some(name) => name.clone(),
            None => NO_ITEMS.to_string(),
        };
        self.write_node_identifier(name)?;

        for component in &self.inner.config.components {
            self.request_contained_items(component)?;
        }
        Ok(())
    }

    /// The radio this overlay runs on.
    pub fn radio(&self) -> &RadioClient {
        &self.inner.radio
    }

    /// Declared component names, in declaration order.
    pub fn components(&self) -> &[String] {
        &self.inner.config.components
    }

    /// Check if the overlay has not been shut down.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Claim `id` in `component` for this node and announce it.
    ///
    /// If the announcement cannot be queued the claim is dropped again, so
    /// the call can be retried.
    pub fn add_item(&self, component: &str, id: ItemId) -> Result<()> {
        self.ensure_running()?;
        let comp = self.component(component)?;
        comp.directory().add_local(id)?;

        let announced = self.broadcast_packet(&OverlayPacket::ItemPresent {
            component: component.to_string(),
            id,
        });
        if let Err(e) = announced {
            comp.directory().remove(id);
            debug!(component, %id, error = %e, "announcement failed, claim dropped");
            return Err(e);
        }
        debug!(component, %id, "local item added");
        self.advertise(component)
    }

    /// Forget `id` in `component`, whoever owns it, and announce the removal.
    ///
    /// Returns `false`, sending nothing, if `id` is unknown. If the
    /// announcement cannot be queued the entry is put back.
    pub fn remove_item(&self, component: &str, id: ItemId) -> Result<bool> {
        self.ensure_running()?;
        let comp = self.component(component)?;
        let Some(owner) = comp.directory().remove(id) else {
            trace!(component, %id, "removal of an unknown item ignored");
            return Ok(false);
        };

        let announced = self.broadcast_packet(&OverlayPacket::RemoveItem {
            component: component.to_string(),
            id,
        });
        if let Err(e) = announced {
            comp.directory().restore(id, owner);
            debug!(component, %id, error = %e, "removal announcement failed, entry restored");
            return Err(e);
        }
        debug!(component, %id, %owner, "item removed");

        if owner.is_local() {
            self.advertise(component)?;
        }
        Ok(true)
    }

    /// Record `id` in `component` as owned by the node at `addr`.
    ///
    /// Returns `true` and notifies the new-item handlers if the entry is new.
    pub fn add_external_item(&self, component: &str, id: ItemId, addr: MeshAddress) -> Result<bool> {
        let comp = self.component(component)?;
        let added = comp.directory().add_external(id, addr)?;
        if !added {
            trace!(component, %id, %addr, "item already known");
            return Ok(false);
        }
        debug!(component, %id, %addr, "remote item added");

        let scoped = comp.new_item.snapshot();
        if scoped.is_empty() {
            self.inner.generic_new_item.for_each(|h| h(component, id, addr));
        } else {
            for handler in scoped {
                handler(id, addr);
            }
        }
        Ok(true)
    }

    /// Ask every node to announce the items it owns in `component`.
    pub fn request_contained_items(&self, component: &str) -> Result<()> {
        self.component(component)?;
        self.broadcast_packet(&OverlayPacket::ContainedItemsRequest {
            component: component.to_string(),
        })
    }

    /// Send `payload` to the node owning `dest`.
    ///
    /// Items owned by this node are delivered straight to the data handlers
    /// without touching the radio. A failed delivery is reported to the
    /// transmit-error handlers.
    pub fn send_data(&self, component: &str, dest: ItemId, payload: &[u8]) -> Result<()> {
        self.ensure_running()?;
        let comp = self.component(component)?;
        let addr = comp.directory().resolve(dest)?;

        if addr.is_local() {
            trace!(component, %dest, len = payload.len(), "loopback delivery");
            self.inner
                .data_handlers
                .for_each(|h| h(payload, MeshAddress::LOCAL));
            return Ok(());
        }

        let packet = OverlayPacket::Data(Bytes::copy_from_slice(payload)).to_bytes();
        let weak = Arc::downgrade(&self.inner);
        let name = component.to_string();
        self.inner
            .radio
            .send_message_with_status(&packet, addr, move |status| {
                if status.is_success() {
                    return;
                }
                warn!(component = %name, id = %dest, delivery = ?status.delivery, "data not delivered");
                if let Some(inner) = weak.upgrade() {
                    MeshOverlay { inner }.notify_transmit_error(&name, dest, status);
                }
            })?;
        Ok(())
    }

    /// Send `payload` to every node. Delivery is not tracked.
    pub fn broadcast_data(&self, payload: &[u8]) -> Result<()> {
        self.ensure_running()?;
        self.broadcast_packet(&OverlayPacket::Data(Bytes::copy_from_slice(payload)))
    }

    /// Address of the node owning `id` in `component`.
    pub fn resolve(&self, component: &str, id: ItemId) -> Result<MeshAddress> {
        self.component(component)?.directory().resolve(id)
    }

    /// Ids this node owns in `component`, ascending.
    pub fn local_items(&self, component: &str) -> Result<Vec<ItemId>> {
        Ok(self.component(component)?.directory().local_items())
    }

    /// Every known `(id, owner)` pair of `component`, ascending by id.
    pub fn known_items(&self, component: &str) -> Result<Vec<(ItemId, MeshAddress)>> {
        Ok(self.component(component)?.directory().entries())
    }

    /// Run one network discovery and learn the items advertised by the
    /// node identifiers of the nodes that answer within `timeout`.
    ///
    /// Blocks for `timeout`. Returns the number of newly learned items.
    pub fn discover_items(&self, timeout: Duration) -> Result<usize> {
        let component = self
            .inner
            .config
            .advertise_component
            .as_deref()
            .ok_or(MeshError::Unsupported(
                "discovery requires an advertised component",
            ))?;

        let nodes: Vec<NodeDiscovery> = self
            .inner
            .radio
            .get_parameter_sync("ND", ResponseBehavior::CollectUntilTimeout(timeout))?;

        let mut added = 0;
        for node in &nodes {
            for raw in node.advertised_ids() {
                match self.add_external_item(component, ItemId(raw), node.addr) {
                    Ok(true) => added += 1,
                    Ok(false) => {}
                    Err(e) => warn!(error = %e, node = %node.addr, "discovered item rejected"),
                }
            }
        }
        debug!(nodes = nodes.len(), added, "discovery finished");
        Ok(added)
    }

    /// Register a handler for overlay data.
    pub fn add_data_handler(&self, handler: impl Fn(&[u8], MeshAddress) + Send + Sync + 'static) {
        self.inner.data_handlers.add(Arc::new(handler));
    }

    /// Register a handler for items of `component` learned from other nodes.
    ///
    /// Once a component has its own handlers the generic ones no longer see
    /// its items.
    pub fn add_new_item_handler(
        &self,
        component: &str,
        handler: impl Fn(ItemId, MeshAddress) + Send + Sync + 'static,
    ) -> Result<()> {
        self.component(component)?.new_item.add(Arc::new(handler));
        Ok(())
    }

    /// Register a handler for items of `component` removed by another node.
    pub fn add_item_removed_handler(
        &self,
        component: &str,
        handler: impl Fn(ItemId) + Send + Sync + 'static,
    ) -> Result<()> {
        self.component(component)?.item_removed.add(Arc::new(handler));
        Ok(())
    }

    /// Register a handler for failed deliveries to items of `component`.
    pub fn add_transmit_error_handler(
        &self,
        component: &str,
        handler: impl Fn(ItemId, TransmitStatus) + Send + Sync + 'static,
    ) -> Result<()> {
        self.component(component)?.transmit_error.add(Arc::new(handler));
        Ok(())
    }

    /// Register a new-item handler for components without their own.
    pub fn add_generic_new_item_handler(
        &self,
        handler: impl Fn(&str, ItemId, MeshAddress) + Send + Sync + 'static,
    ) {
        self.inner.generic_new_item.add(Arc::new(handler));
    }

    /// Register an item-removed handler for components without their own.
    pub fn add_generic_item_removed_handler(&self, handler: impl Fn(&str, ItemId) + Send + Sync + 'static) {
        self.inner.generic_item_removed.add(Arc::new(handler));
    }

    /// Register a transmit-error handler for components without their own.
    pub fn add_generic_transmit_error_handler(
        &self,
        handler: impl Fn(&str, ItemId, TransmitStatus) + Send + Sync + 'static,
    ) {
        self.inner.generic_transmit_error.add(Arc::new(handler));
    }

    /// Stop the overlay and the radio beneath it.
    ///
    /// Resets an advertised node identifier to [`NO_ITEMS`], stops the
    /// discovery scan and forgets every directory entry.
    pub fn shutdown(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if self.inner.config.advertises() {
            if let Err(e) = self.write_node_identifier(NO_ITEMS.to_string()) {
                warn!(error = %e, "resetting node identifier failed");
            }
        }

        let scanner = lock(&self.inner.scanner).take();
        // Abandons a discovery in flight, which lets the scanner exit.
        self.inner.radio.shutdown();
        if let Some(scanner) = scanner {
            let Scanner { _stop: stop, handle } = scanner;
            drop(stop);
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!("scan thread panicked");
            }
        }

        for component in self.inner.components.values() {
            component.directory().clear();
        }
        debug!("overlay shut down");
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(MeshError::ConnectionClosed)
        }
    }

    fn component(&self, name: &str) -> Result<Arc<Component>> {
        self.inner
            .components
            .get(name)
            .cloned()
            .ok_or_else(|| MeshError::UnknownComponent(name.to_string()))
    }

    fn broadcast_packet(&self, packet: &OverlayPacket) -> Result<()> {
        trace!(packet_type = ?packet.packet_type(), "broadcasting overlay packet");
        self.inner.radio.broadcast_message(&packet.to_bytes())?;
        Ok(())
    }

    /// Rewrite the node identifier if `component` is the advertised one.
    fn advertise(&self, component: &str) -> Result<()> {
        let config = &self.inner.config;
        if !config.advertises() || config.advertise_component.as_deref() != Some(component) {
            return Ok(());
        }
        let _guard = lock(&self.inner.advertising);
        let ids = self.component(component)?.directory().local_items();
        self.write_node_identifier(node_identifier(&ids))
    }

    fn write_node_identifier(&self, name: String) -> Result<()> {
        debug!(node_identifier = %name, "writing node identifier");
        self.inner
            .radio
            .set_parameter_with("NI", &AtString::new(name), |status: AtStatus| {
                if !status.is_ok() {
                    warn!(?status, "radio refused node identifier");
                }
            })?;
        Ok(())
    }

    fn handle_message(&self, msg: &ReceivedMessage) -> Result<()> {
        match OverlayPacket::from_bytes(&msg.payload)? {
            OverlayPacket::Data(data) => {
                trace!(source = %msg.source, len = data.len(), "overlay data received");
                self.inner.data_handlers.for_each(|h| h(&data[..], msg.source));
                Ok(())
            }
            OverlayPacket::ItemPresent { component, id } => {
                self.add_external_item(&component, id, msg.source)?;
                Ok(())
            }
            OverlayPacket::ContainedItemsRequest { component } => {
                let ids = self.component(&component)?.directory().local_items();
                debug!(component = %component, from = %msg.source, count = ids.len(), "announcing local items");
                for id in ids {
                    self.broadcast_packet(&OverlayPacket::ItemPresent {
                        component: component.clone(),
                        id,
                    })?;
                }
                Ok(())
            }
            OverlayPacket::RemoveItem { component, id } => {
                self.remove_external_item(&component, id, msg.source)
            }
        }
    }

    fn remove_external_item(&self, component: &str, id: ItemId, sender: MeshAddress) -> Result<()> {
        let comp = self.component(component)?;
        let Some(owner) = comp.directory().remove(id) else {
            trace!(component, %id, "removal of an unknown item ignored");
            return Ok(());
        };
        if owner.is_local() {
            warn!(component, %id, %sender, "remote node removed a locally owned item");
        } else if owner != sender {
            debug!(component, %id, %owner, %sender, "item removed by a node other than its owner");
        } else {
            debug!(component, %id, %sender, "remote item removed");
        }

        let scoped = comp.item_removed.snapshot();
        if scoped.is_empty() {
            self.inner.generic_item_removed.for_each(|h| h(component, id));
        } else {
            for handler in scoped {
                handler(id);
            }
        }

        if owner.is_local() {
            self.advertise(component)?;
        }
        Ok(())
    }

    fn notify_transmit_error(&self, component: &str, id: ItemId, status: TransmitStatus) {
        let Some(comp) = self.inner.components.get(component) else {
            return;
        };
        let scoped = comp.transmit_error.snapshot();
        if scoped.is_empty() {
            self.inner
                .generic_transmit_error
                .for_each(|h| h(component, id, status));
        } else {
            for handler in scoped {
                handler(id, status);
            }
        }
    }
}

impl std::fmt::Debug for MeshOverlay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshOverlay")
            .field("components", &self.inner.config.components)
            .field("running", &self.is_running())
            .finish()
    }
}

fn spawn_scanner(overlay: Weak<OverlayInner>, scan: ScanConfig) -> Result<Scanner> {
    let (stop, stopped) = mpsc::channel::<()>();
    let handle = thread::Builder::new()
        .name("digimesh-scan".to_string())
        .spawn(move || {
            debug!(interval = ?scan.interval, "scan thread started");
            loop {
                let Some(inner) = overlay.upgrade() else {
                    break;
                };
                let node = MeshOverlay { inner };
                if !node.is_running() {
                    break;
                }
                if let Err(e) = node.discover_items(scan.discovery_timeout) {
                    if !node.is_running() {
                        break;
                    }
                    warn!(error = %e, "discovery scan failed");
                }
                drop(node);

                match stopped.recv_timeout(scan.interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            debug!("scan thread stopped");
        })?;
    Ok(Scanner { _stop: stop, handle })
}
