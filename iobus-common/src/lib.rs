//! Protocol-level types shared between the IOBus master and the ISP bootloader glue.
//!
//! This crate is pure wire-format and data: frame codecs, LSS/SDO message types, and
//! the static product table. It has no async runtime dependency and no notion of a
//! live bus -- that belongs to `iobus-master`.

pub mod isp;
pub mod lss;
pub mod messages;
pub mod node_id;
pub mod object_ids;
pub mod objects;
pub mod product;
pub mod sdo;
pub mod traits;

pub use node_id::NodeId;

pub use messages::{CanError, CanId, CanMessage};
