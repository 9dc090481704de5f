//! Bus-wide node management: discovery, liveness, and per-node SDO access
#[allow(clippy::module_inception)]
mod bus_manager;
mod shared_receiver;
mod shared_sender;

pub use bus_manager::{BusManager, SdoClientGuard};
pub use shared_receiver::{NoMsgError, SharedReceiver, SharedReceiverChannel};
pub use shared_sender::SharedSender;
