//! Transport glue binding the protocol-level [`iobus_common`] types to a real CAN interface.
//!
//! Isolating `socketcan` behind this crate keeps it out of `iobus-common` and
//! `iobus-master`, which only ever see the `AsyncCanSender`/`AsyncCanReceiver` traits.

pub mod socketcan;

pub use crate::socketcan::{open_socketcan, ReceiveError, SocketCanFilter, SocketCanReceiver, SocketCanSender};
