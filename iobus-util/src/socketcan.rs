//! SocketCAN transport glue
//!
//! This is the only module in the workspace allowed to name the `socketcan` crate
//! directly. Everything above this layer talks in terms of [`iobus_common::traits`].

use std::sync::Arc;

use iobus_common::{
    messages::{CanError, CanId, CanMessage},
    traits::{AsyncCanReceiver, AsyncCanSender},
};
use snafu::{ResultExt, Snafu};

use socketcan::{tokio::CanSocket, CanFilter, CanFrame, EmbeddedFrame, Frame, IoError, ShouldRetry, SocketOptions};

fn socketcan_id_to_can_id(id: socketcan::CanId) -> CanId {
    match id {
        socketcan::CanId::Standard(id) => CanId::std(id.as_raw()),
        socketcan::CanId::Extended(id) => CanId::extended(id.as_raw()),
    }
}

fn can_id_to_socketcan_id(id: CanId) -> socketcan::CanId {
    match id {
        CanId::Extended(id) => socketcan::ExtendedId::new(id).unwrap().into(),
        CanId::Std(id) => socketcan::StandardId::new(id).unwrap().into(),
    }
}

fn socketcan_frame_to_can_message(frame: socketcan::CanFrame) -> Result<CanMessage, CanError> {
    let id = socketcan_id_to_can_id(frame.can_id());

    match frame {
        CanFrame::Data(frame) => Ok(CanMessage::new(id, frame.data())),
        CanFrame::Remote(_) => Ok(CanMessage::new_rtr(id)),
        CanFrame::Error(frame) => Err(CanError::from_raw(frame.error_bits() as u8)),
    }
}

fn can_message_to_socketcan_frame(frame: CanMessage) -> socketcan::CanFrame {
    let id = can_id_to_socketcan_id(frame.id());

    if frame.is_rtr() {
        socketcan::CanFrame::new_remote(id, 0).unwrap()
    } else {
        socketcan::CanFrame::new(id, frame.data()).unwrap()
    }
}

/// A CAN filter for socketcan interfaces.
///
/// Wraps the native socketcan filter so callers don't need to depend on the
/// `socketcan` crate themselves just to restrict which frames they receive.
#[derive(Copy, Clone, Debug)]
pub struct SocketCanFilter {
    id: u32,
    mask: u32,
}

impl SocketCanFilter {
    /// Create a new CAN filter with the given id and mask
    pub fn new(id: u32, mask: u32) -> Self {
        Self { id, mask }
    }
}

/// A socketcan-based CAN message receiver
///
/// Multiple receivers can share one underlying socket via `Arc<CanSocket>`.
#[derive(Debug, Clone)]
pub struct SocketCanReceiver {
    socket: Arc<CanSocket>,
}

/// Error type returned by [`SocketCanReceiver::recv`]
#[derive(Debug, Snafu)]
pub enum ReceiveError {
    /// An I/O error occurred reading from the socket
    Io {
        /// The underlying socketcan I/O error
        source: socketcan::IoError,
    },
    /// A CAN-level error frame was received
    Can {
        /// The decoded CAN error
        source: CanError,
    },
}

impl AsyncCanReceiver for SocketCanReceiver {
    type Error = ReceiveError;

    fn try_recv(&mut self) -> Option<CanMessage> {
        match self.socket.try_read_frame() {
            Ok(frame) => socketcan_frame_to_can_message(frame).ok(),
            Err(_) => None,
        }
    }

    async fn recv(&mut self) -> Result<CanMessage, ReceiveError> {
        loop {
            match self.socket.read_frame().await {
                Ok(frame) => return socketcan_frame_to_can_message(frame).context(CanSnafu),
                Err(e) => {
                    if !e.should_retry() {
                        return Err(ReceiveError::Io { source: e });
                    }
                }
            }
        }
    }
}

/// A socketcan-based CAN message sender
#[derive(Debug, Clone)]
pub struct SocketCanSender {
    socket: Arc<CanSocket>,
}

impl AsyncCanSender for SocketCanSender {
    async fn send(&mut self, msg: CanMessage) -> Result<(), CanMessage> {
        let result = self
            .socket
            .write_frame(can_message_to_socketcan_frame(msg))
            .await;
        if result.is_err() {
            Err(msg)
        } else {
            Ok(())
        }
    }
}

/// Open a socketcan device and split it into a sender and receiver
///
/// # Arguments
/// * `device` - The name of the socketcan device to open, e.g. `can0`
///
/// Creating both halves from a single shared socket means the receiver never sees
/// frames the sender itself transmitted.
pub fn open_socketcan<S: AsRef<str>>(
    device: S,
    filters: Option<&[SocketCanFilter]>,
) -> Result<(SocketCanSender, SocketCanReceiver), IoError> {
    let device: &str = device.as_ref();
    let socket = CanSocket::open(device)?;
    if let Some(socket_filters) = filters {
        let mapped_filters: Vec<CanFilter> = socket_filters
            .iter()
            .map(|filter| CanFilter::new(filter.id, filter.mask))
            .collect();
        socket.set_filters(&mapped_filters)?;
    }
    let socket = Arc::new(socket);
    let receiver = SocketCanReceiver {
        socket: socket.clone(),
    };
    let sender = SocketCanSender { socket };
    Ok((sender, receiver))
}
