//! A host-side controller for IOBus nodes
//!
//! The crate provides:
//!
//! - An [SDO client](SdoClient) for reading/writing a node's object dictionary via its SDO server
//! - An [LSS master](LssMaster) for discovering and configuring un-configured nodes with IDs
//! - A [BusManager] which is intended to be the engine behind an application, keeping track of
//!   nodes, running discovery and liveness loops, and providing an API for managing them
//! - An [ObjectDirectory](object_directory::ObjectDirectory) of typed wrappers for the runtime PDO
//!   groups a node advertises
//! - An [IspFlasher](isp_flasher::IspFlasher) for reprogramming a node's application flash via its
//!   bootloader
//!
//! This library is built on tokio/async.
//!
//! This should be considered very alpha, with important missing features, and potentially frequent
//! breaking API changes.
#![warn(
    missing_docs,
    missing_debug_implementations,
    missing_copy_implementations
)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod bus_manager;
pub mod config;
pub mod discovery_cache;
pub mod error;
pub mod isp_flasher;
mod lss_master;
pub mod node_registry;
pub mod object_directory;
mod sdo_client;

pub use bus_manager::BusManager;
pub use config::{ConfigError, MasterConfig};
pub use discovery_cache::{CacheError, DiscoveryCache};
pub use error::MasterError;
pub use isp_flasher::{IspError, IspFlasher, Region};
pub use lss_master::{LssError, LssMaster};
pub use node_registry::{Node, NodeRegistry};
pub use sdo_client::{RawAbortCode, SdoClient, SdoClientError};
