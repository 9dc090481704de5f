use std::ops::{Deref, DerefMut};
use std::sync::Mutex;
use std::time::Duration;
use std::{collections::HashMap, sync::Arc};

use futures::future::join_all;
use tokio::task::JoinHandle;

use iobus_common::lss::{LssIdentity, LssState};
use iobus_common::traits::{AsyncCanReceiver, AsyncCanSender};

use super::shared_sender::SharedSender;
use crate::discovery_cache::DiscoveryCache;
use crate::node_registry::{Node, NodeRegistry};
use crate::object_directory::ObjectDirectory;
use crate::sdo_client::{SdoClient, SdoClientError};
use crate::{LssError, LssMaster};

use super::shared_receiver::{SharedReceiver, SharedReceiverChannel};

/// The lowest-numbered free node id in `[1, 127] \ {125}`, the reserved ISP bootloader id
fn next_free_node_id(used: &[u8]) -> Option<u8> {
    (1u8..128).find(|id| *id != iobus_common::isp::ISP_NODE_ID && !used.contains(id))
}

async fn scan_node<S: AsyncCanSender + Sync + Send>(
    node_id: u8,
    clients: &SdoClientMutex<S>,
) -> Option<(LssIdentity, Option<String>, Option<String>, Option<String>)> {
    let mut sdo_client = clients.lock(node_id);
    log::info!("Scanning Node {node_id}");
    let identity = match sdo_client.read_identity().await {
        Ok(id) => id,
        Err(SdoClientError::NoResponse) => {
            log::warn!("No response from node {node_id}");
            return None;
        }
        Err(e) => {
            log::error!("SDO error scanning node {node_id} identity: {e}");
            return None;
        }
    };
    let device_name = match sdo_client.read_device_name().await {
        Ok(s) => Some(s),
        Err(e) => {
            log::warn!("SDO error scanning node {node_id} device name: {e}");
            None
        }
    };
    let software_version = match sdo_client.read_software_version().await {
        Ok(s) => Some(s),
        Err(e) => {
            log::warn!("SDO error scanning node {node_id} SW version: {e}");
            None
        }
    };
    let hardware_version = match sdo_client.read_hardware_version().await {
        Ok(s) => Some(s),
        Err(e) => {
            log::warn!("SDO error scanning node {node_id} HW version: {e}");
            None
        }
    };
    Some((identity, device_name, software_version, hardware_version))
}

#[derive(Debug)]
pub struct SdoClientGuard<'a, S, R>
where
    S: AsyncCanSender,
    R: AsyncCanReceiver,
{
    _guard: std::sync::MutexGuard<'a, ()>,
    client: SdoClient<S, R>,
}

impl<S, R> Deref for SdoClientGuard<'_, S, R>
where
    S: AsyncCanSender,
    R: AsyncCanReceiver,
{
    type Target = SdoClient<S, R>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

impl<S, R> DerefMut for SdoClientGuard<'_, S, R>
where
    S: AsyncCanSender,
    R: AsyncCanReceiver,
{
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.client
    }
}

#[derive(Debug)]
struct SdoClientMutex<S>
where
    S: AsyncCanSender + Sync,
{
    sender: SharedSender<S>,
    receiver: SharedReceiverChannel,
    clients: HashMap<u8, Mutex<()>>,
}

impl<S> SdoClientMutex<S>
where
    S: AsyncCanSender + Sync,
{
    pub fn new(sender: SharedSender<S>, receiver: SharedReceiverChannel) -> Self {
        let mut clients = HashMap::new();
        for i in 0u8..128 {
            clients.insert(i, Mutex::new(()));
        }

        Self {
            sender,
            receiver,
            clients,
        }
    }

    pub fn lock(&self, id: u8) -> SdoClientGuard<SharedSender<S>, SharedReceiverChannel> {
        if !(1..=127).contains(&id) {
            panic!("ID {} out of range", id);
        }
        let guard = self.clients.get(&id).unwrap().lock().unwrap();
        let client = SdoClient::new_std(id, self.sender.clone(), self.receiver.clone());
        SdoClientGuard {
            _guard: guard,
            client,
        }
    }
}

/// Manages an IOBus network: node discovery, liveness tracking, and per-node SDO access
#[derive(Debug)]
pub struct BusManager<S: AsyncCanSender + Sync + Send> {
    sender: SharedSender<S>,
    receiver: SharedReceiver,
    nodes: Arc<tokio::sync::Mutex<NodeRegistry>>,
    sdo_clients: SdoClientMutex<S>,
    _liveness_task: JoinHandle<()>,
}

impl<S: AsyncCanSender + Sync + Send + 'static> BusManager<S> {
    /// Create a new bus manager
    ///
    /// # Arguments
    /// - `sender`: An object which implements [`AsyncCanSender`] to be used for sending messages to
    ///   the bus
    /// - `receiver`: An object which implements [`AsyncCanReceiver`] to be used for receiving
    ///   messages from the bus
    /// - `liveness_interval`: how often each registered node is pinged; a node that fails to
    ///   answer one ping is evicted from the registry
    ///
    /// When using socketcan, sender/receiver can be created with [`iobus_util::open_socketcan`].
    pub fn new(
        sender: S,
        receiver: impl AsyncCanReceiver + Sync + 'static,
        liveness_interval: Duration,
    ) -> Self {
        let mut receiver = SharedReceiver::new(receiver);
        let sender = SharedSender::new(Arc::new(tokio::sync::Mutex::new(sender)));
        let sdo_clients = SdoClientMutex::new(sender.clone(), receiver.create_rx());

        let nodes = Arc::new(tokio::sync::Mutex::new(NodeRegistry::new()));

        let liveness_task = {
            let nodes = nodes.clone();
            let live_sender = sender.clone();
            let live_receiver = receiver.create_rx();
            tokio::spawn(Self::liveness_loop(
                nodes,
                live_sender,
                live_receiver,
                liveness_interval,
            ))
        };

        Self {
            sender,
            receiver,
            sdo_clients,
            nodes,
            _liveness_task: liveness_task,
        }
    }

    /// Every `interval`, attempt a trivial read on each registered node: the locator object if
    /// the node's directory advertised it, else the standard device-name object. A timed-out
    /// node is removed from the registry.
    async fn liveness_loop(
        nodes: Arc<tokio::sync::Mutex<NodeRegistry>>,
        sender: SharedSender<S>,
        receiver: SharedReceiverChannel,
        interval: Duration,
    ) {
        loop {
            tokio::time::sleep(interval).await;

            let ids = nodes.lock().await.node_ids();
            for node_id in ids {
                let has_locator = match nodes.lock().await.get(node_id) {
                    Some(n) => n.directory.locator,
                    None => continue,
                };
                let mut sdo = SdoClient::new_std(node_id, sender.clone(), receiver.clone());
                let alive = if has_locator {
                    crate::object_directory::Locator::get(&mut sdo).await.is_ok()
                } else {
                    sdo.read_device_name().await.is_ok()
                };

                let mut registry = nodes.lock().await;
                if alive {
                    registry.touch(node_id);
                } else {
                    log::warn!("Node {node_id} missed liveness ping, evicting");
                    registry.remove(node_id);
                }
            }
        }
    }

    /// Get an SDO client for a particular node
    ///
    /// This function may block if another task is using the required SDO client, as it ensures
    /// exclusive access to each node's SDO server.
    pub fn sdo_client(
        &self,
        node_id: u8,
    ) -> SdoClientGuard<SharedSender<S>, SharedReceiverChannel> {
        self.sdo_clients.lock(node_id)
    }

    /// Get a snapshot list of known nodes
    pub async fn node_list(&self) -> Vec<Node> {
        self.nodes.lock().await.list()
    }

    /// Look up a node by its resolved human name
    pub async fn find_node_by_name(&self, name: &str) -> Option<Node> {
        self.nodes.lock().await.find_by_name(name)
    }

    /// Scan all 127 possible node ids for already-configured nodes
    ///
    /// For every node that responds, enumerates its object directory and publishes it to the
    /// registry (see [`ObjectDirectory::discover`]).
    pub async fn scan_nodes(&mut self) -> Vec<Node> {
        const N_PARALLEL: usize = 10;

        let ids = Vec::from_iter(1..128u8);
        let mut chunks = Vec::new();
        for chunk in ids.chunks(128 / N_PARALLEL) {
            chunks.push(Vec::from_iter(chunk.iter().cloned()));
        }

        let mut futures = Vec::new();
        for block in chunks {
            futures.push(async {
                let mut block_results = Vec::new();
                for id in block {
                    if let Some(found) = scan_node(id, &self.sdo_clients).await {
                        block_results.push((id, found));
                    }
                }
                block_results
            });
        }

        let results = join_all(futures).await;
        let mut found_nodes = Vec::new();

        for block in results {
            for (node_id, (identity, device_name, software_version, hardware_version)) in block {
                let mut sdo = self.sdo_clients.lock(node_id);
                let directory = match ObjectDirectory::discover(&mut sdo).await {
                    Ok(dir) => dir,
                    Err(e) => {
                        log::warn!("Failed enumerating object directory for node {node_id}: {e}");
                        ObjectDirectory::default()
                    }
                };
                drop(sdo);

                let node = Node {
                    node_id,
                    identity,
                    product: iobus_common::product::find_product(identity),
                    device_name,
                    software_version,
                    hardware_version,
                    directory,
                    last_seen: std::time::Instant::now(),
                };
                found_nodes.push(node.clone());

                let mut registry = self.nodes.lock().await;
                registry.insert(node);
            }
        }

        found_nodes
    }

    /// Find all unconfigured devices on the bus
    ///
    /// The LSS fastscan protocol is used to identify devices which do not have an assigned node ID.
    ///
    /// Devices that do have a node ID can be found using [`scan_nodes`](Self::scan_nodes), or by
    /// their heartbeat messages.
    ///
    /// After devices are found, they are all put back into waiting state
    pub async fn lss_fastscan(&mut self, timeout: Duration) -> Vec<LssIdentity> {
        let mut devices = Vec::new();
        let mut lss = LssMaster::new(self.sender.clone(), self.receiver.create_rx());

        // Put all nodes into Waiting state
        lss.set_global_mode(LssState::Waiting).await;

        // Each time a device is completely identified, it goes into Configuring mode and will not
        // respond to further scans. Once all devices are identified, the scan will return None.
        while let Some(id) = lss.fast_scan(timeout).await {
            devices.push(id);
        }

        lss.set_global_mode(LssState::Waiting).await;

        devices
    }

    /// Run one cycle of biased fast-scan discovery: probe for an unconfigured node, and if one
    /// responds, converge on its identity using the cache-derived bias (falling back to a full
    /// search when the cache has nothing to bias against), assign it the lowest free node id,
    /// enumerate its object directory, and publish it to the registry.
    ///
    /// Returns the newly-registered node, if one was found and set up. Newly-seen identities are
    /// recorded into `cache` (not persisted to disk here; see [`DiscoveryCache::save_to_file`]).
    pub async fn discover_one_node(
        &mut self,
        scan_timeout: Duration,
        cache: &mut DiscoveryCache,
    ) -> Option<Node> {
        let mut lss = LssMaster::new(self.sender.clone(), self.receiver.create_rx());

        let (start, mask) = cache.bias().unwrap_or((
            [0, 0, 0, 0],
            // Default family bias: vendor fully unknown, product/revision byte-range, serial
            // 16-bit range. See SPEC_FULL.md 4.3.
            [0x0000_0000, 0x0000_00FF, 0x0000_00FF, 0x0000_FFFF],
        ));

        let identity = lss.fast_scan_biased(scan_timeout, start, mask).await?;

        let used_ids = self.nodes.lock().await.node_ids();
        let node_id = next_free_node_id(&used_ids)?;

        let configured_id = node_id.try_into().ok()?;
        if let Err(e) = lss.set_node_id(configured_id).await {
            log::error!("Failed to assign node id {node_id} during discovery: {e:?}");
            return None;
        }
        lss.set_global_mode(LssState::Waiting).await;

        self.nodes.lock().await.begin_setup(node_id, identity);

        let mut sdo = self.sdo_clients.lock(node_id);
        let device_name = sdo.read_device_name().await.ok();
        let software_version = sdo.read_software_version().await.ok();
        let hardware_version = sdo.read_hardware_version().await.ok();
        let directory = match ObjectDirectory::discover(&mut sdo).await {
            Ok(dir) => dir,
            Err(e) => {
                log::error!("Failed enumerating new node {node_id}: {e}");
                ObjectDirectory::default()
            }
        };
        drop(sdo);

        cache.observe(identity);

        let mut registry = self.nodes.lock().await;
        registry.finish_setup(
            node_id,
            directory,
            device_name,
            software_version,
            hardware_version,
        );
        registry.get(node_id)
    }

    /// Activate a single LSS slave by its identity
    ///
    /// All nodes are put into Waiting mode via the global command, then the specified node is
    /// activates. Will return `Ok(())` if the activated node acknowledges, or an Err otherwise.
    ///
    /// The identity consists of the four u32 values from the 0x1018 object, which should uniquely
    /// identify a device on the bus. If they are not known, they can be found using
    /// [`lss_fastscan()`](Self::lss_fastscan).
    pub async fn lss_activate(&mut self, ident: LssIdentity) -> Result<(), LssError> {
        let mut lss = LssMaster::new(self.sender.clone(), self.receiver.create_rx());
        lss.set_global_mode(LssState::Waiting).await;
        lss.enter_config_by_identity(
            ident.vendor_id,
            ident.product_code,
            ident.revision,
            ident.serial,
        )
        .await
    }

    /// Set the node ID of LSS slave in Configuration mode
    ///
    /// It is required that one node has been put into Configuration mode already when this is
    /// called, e.g. using [`lss_activate`](Self::lss_activate)
    pub async fn lss_set_node_id(&mut self, node_id: iobus_common::NodeId) -> Result<(), LssError> {
        let mut lss = LssMaster::new(self.sender.clone(), self.receiver.create_rx());
        lss.set_node_id(node_id).await?;
        Ok(())
    }

    /// Command the node in Configuration mode to store its configuration
    ///
    /// It is required that one node has been put into Configuration mode already when this is
    /// called, e.g. using [`lss_activate`](Self::lss_activate)
    pub async fn lss_store_config(&mut self) -> Result<(), LssError> {
        let mut lss = LssMaster::new(self.sender.clone(), self.receiver.create_rx());
        lss.store_config().await
    }

    /// Send a command to put all devices into the specified LSS state
    pub async fn lss_set_global_mode(&mut self, mode: LssState) {
        let mut lss = LssMaster::new(self.sender.clone(), self.receiver.create_rx());
        lss.set_global_mode(mode).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_free_id_skips_isp_reserved_id() {
        assert_eq!(next_free_node_id(&[]), Some(1));
        assert_eq!(next_free_node_id(&(1..125).collect::<Vec<_>>()), Some(126));
    }
}
