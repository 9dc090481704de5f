//! Registry of live nodes
//!
//! The registry owns the map; callers only ever get cloned snapshots back, so a handle
//! held across an `await` can go stale if the node is evicted in the meantime.

use std::collections::HashMap;
use std::time::Instant;

use iobus_common::lss::LssIdentity;
use iobus_common::product::{find_product, ResolvedProduct};

use crate::object_directory::ObjectDirectory;

/// Everything known about one live, configured node
#[derive(Debug, Clone)]
pub struct Node {
    /// Assigned CANopen node id
    pub node_id: u8,
    /// Factory address from LSS discovery
    pub identity: LssIdentity,
    /// Resolved product descriptor (or the generic unknown fallback)
    pub product: ResolvedProduct,
    /// CANopen standard device name object (0x1008), if it answered
    pub device_name: Option<String>,
    /// CANopen standard software version object (0x100A), if it answered
    pub software_version: Option<String>,
    /// CANopen standard hardware version object (0x1009), if it answered
    pub hardware_version: Option<String>,
    /// Typed groups discovered in this node's object directory
    pub directory: ObjectDirectory,
    /// Time this node last answered anything
    pub last_seen: Instant,
}

impl Node {
    /// A human-readable name: the resolved product name, falling back to the raw device name
    pub fn name(&self) -> String {
        let name = self.product.name();
        if name.starts_with("Unknown-") {
            self.device_name.clone().unwrap_or(name)
        } else {
            name
        }
    }
}

/// A node id undergoing LSS configuration and object-directory enumeration
///
/// Held separately from the public map so that SDO replies for this id still route to the
/// in-progress setup, without the node being visible to callers until setup completes.
#[derive(Debug, Clone, Copy)]
pub struct SetupSlot {
    /// The node id assigned, but not yet enumerated
    pub node_id: u8,
    /// The factory address that was just configured onto this id
    pub identity: LssIdentity,
}

/// Registry mapping `node_id -> Node`, plus the in-progress setup slot
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: HashMap<u8, Node>,
    setup: Option<SetupSlot>,
}

impl NodeRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin setup of a freshly-assigned node id
    pub fn begin_setup(&mut self, node_id: u8, identity: LssIdentity) {
        self.setup = Some(SetupSlot { node_id, identity });
    }

    /// The node id currently under setup, if any
    pub fn setup_slot(&self) -> Option<SetupSlot> {
        self.setup
    }

    /// Complete setup for the given node id and publish it to the registry
    ///
    /// No-ops (other than inserting) if setup for a different id was in progress; the caller
    /// is expected to have raced a fresh `begin_setup` already.
    pub fn finish_setup(&mut self, node_id: u8, directory: ObjectDirectory, device_name: Option<String>, software_version: Option<String>, hardware_version: Option<String>) {
        let slot = match self.setup {
            Some(slot) if slot.node_id == node_id => slot,
            _ => return,
        };
        self.setup = None;
        self.nodes.insert(
            node_id,
            Node {
                node_id,
                identity: slot.identity,
                product: find_product(slot.identity),
                device_name,
                software_version,
                hardware_version,
                directory,
                last_seen: Instant::now(),
            },
        );
    }

    /// Abandon an in-progress setup, e.g. because enumeration failed
    pub fn abort_setup(&mut self, node_id: u8) {
        if matches!(self.setup, Some(slot) if slot.node_id == node_id) {
            self.setup = None;
        }
    }

    /// Refresh the liveness timestamp for a node
    pub fn touch(&mut self, node_id: u8) {
        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.last_seen = Instant::now();
        }
    }

    /// Remove a node, e.g. after a liveness timeout
    pub fn remove(&mut self, node_id: u8) -> Option<Node> {
        self.nodes.remove(&node_id)
    }

    /// Insert or replace a node directly, e.g. from a full bus scan
    pub fn insert(&mut self, node: Node) {
        self.nodes.insert(node.node_id, node);
    }

    /// A snapshot of one node
    pub fn get(&self, node_id: u8) -> Option<Node> {
        self.nodes.get(&node_id).cloned()
    }

    /// Look up a node by its resolved human name
    pub fn find_by_name(&self, name: &str) -> Option<Node> {
        self.nodes.values().find(|n| n.name() == name).cloned()
    }

    /// All known node ids, in ascending order
    pub fn node_ids(&self) -> Vec<u8> {
        let mut ids: Vec<u8> = self.nodes.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Snapshots of every known node, sorted by node id
    pub fn list(&self) -> Vec<Node> {
        let mut nodes: Vec<Node> = self.nodes.values().cloned().collect();
        nodes.sort_by_key(|n| n.node_id);
        nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(serial: u32) -> LssIdentity {
        LssIdentity::new(0x507, 2, 3, serial)
    }

    #[test]
    fn setup_slot_is_invisible_until_finished() {
        let mut reg = NodeRegistry::new();
        reg.begin_setup(5, identity(1));
        assert!(reg.get(5).is_none());
        assert_eq!(reg.setup_slot().unwrap().node_id, 5);

        reg.finish_setup(5, ObjectDirectory::default(), Some("node".into()), None, None);
        assert!(reg.get(5).is_some());
        assert!(reg.setup_slot().is_none());
    }

    #[test]
    fn aborted_setup_never_publishes() {
        let mut reg = NodeRegistry::new();
        reg.begin_setup(7, identity(2));
        reg.abort_setup(7);
        reg.finish_setup(7, ObjectDirectory::default(), None, None, None);
        assert!(reg.get(7).is_none());
    }

    #[test]
    fn unknown_product_falls_back_to_device_name() {
        let mut reg = NodeRegistry::new();
        reg.begin_setup(3, LssIdentity::new(0xFFFF, 0xFFFF, 0xFFFF, 9));
        reg.finish_setup(3, ObjectDirectory::default(), Some("my-node".into()), None, None);
        assert_eq!(reg.get(3).unwrap().name(), "my-node");
    }
}
