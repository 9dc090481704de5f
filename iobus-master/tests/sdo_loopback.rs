//! End-to-end SDO exchange over a simulated node, driving a real [`SdoClient`] against a
//! mock [`AsyncCanSender`]/[`AsyncCanReceiver`] pair instead of a real CAN interface.

use std::collections::HashMap;

use tokio::sync::mpsc;

use iobus_common::messages::CanMessage;
use iobus_common::sdo::{SdoRequest, SdoResponse};
use iobus_common::traits::{AsyncCanReceiver, AsyncCanSender};
use iobus_common::CanId;
use iobus_master::SdoClient;

const NODE_ID: u8 = 5;

struct ChannelSender(mpsc::UnboundedSender<CanMessage>);

impl AsyncCanSender for ChannelSender {
    async fn send(&mut self, msg: CanMessage) -> Result<(), CanMessage> {
        self.0.send(msg).map_err(|e| e.0)
    }
}

struct ChannelReceiver(mpsc::UnboundedReceiver<CanMessage>);

impl AsyncCanReceiver for ChannelReceiver {
    type Error = ();

    fn try_recv(&mut self) -> Option<CanMessage> {
        self.0.try_recv().ok()
    }

    async fn recv(&mut self) -> Result<CanMessage, Self::Error> {
        self.0.recv().await.ok_or(())
    }
}

/// A minimal SDO server simulating one node's object dictionary: expedited and
/// segmented upload/download against an in-memory `(index, sub) -> bytes` store.
async fn run_node(
    mut requests: mpsc::UnboundedReceiver<CanMessage>,
    responses: mpsc::UnboundedSender<CanMessage>,
) {
    let mut store: HashMap<(u16, u8), Vec<u8>> = HashMap::new();
    let resp_id = CanId::Std(0x580 + NODE_ID as u16);

    // Segmented-transfer state, valid only while a multi-frame exchange is in progress.
    let mut upload_remaining: Option<(u16, u8, Vec<u8>, bool)> = None;
    let mut download_buffer: Option<(u16, u8, Vec<u8>, bool)> = None;

    while let Some(msg) = requests.recv().await {
        let Ok(req) = SdoRequest::try_from(msg.data()) else {
            continue;
        };

        let reply = match req {
            SdoRequest::InitiateUpload { index, sub } => {
                let data = store.get(&(index, sub)).cloned().unwrap_or_default();
                if data.len() <= 4 {
                    upload_remaining = None;
                    SdoResponse::expedited_upload(index, sub, &data)
                } else {
                    upload_remaining = Some((index, sub, data.clone(), false));
                    SdoResponse::upload_acknowledge(index, sub, Some(data.len() as u32))
                }
            }
            SdoRequest::ReqUploadSegment { t } => match upload_remaining.take() {
                Some((index, sub, mut remaining, expected_toggle)) => {
                    assert_eq!(t, expected_toggle, "client toggle must match server's");
                    let take = remaining.len().min(7);
                    let chunk: Vec<u8> = remaining.drain(0..take).collect();
                    let complete = remaining.is_empty();
                    if !complete {
                        upload_remaining = Some((index, sub, remaining, !expected_toggle));
                    }
                    SdoResponse::upload_segment(t, complete, &chunk)
                }
                None => continue,
            },
            SdoRequest::InitiateDownload {
                e,
                s: _,
                n,
                index,
                sub,
                data,
            } => {
                if e {
                    let len = 4 - n as usize;
                    store.insert((index, sub), data[0..len].to_vec());
                    download_buffer = None;
                } else {
                    download_buffer = Some((index, sub, Vec::new(), false));
                }
                SdoResponse::download_acknowledge(index, sub)
            }
            SdoRequest::DownloadSegment { t, n, c, data } => {
                let Some((index, sub, mut buf, expected_toggle)) = download_buffer.take() else {
                    continue;
                };
                assert_eq!(t, expected_toggle, "client toggle must match server's");
                let len = 7 - n as usize;
                buf.extend_from_slice(&data[0..len]);
                if c {
                    store.insert((index, sub), buf);
                } else {
                    download_buffer = Some((index, sub, buf, !expected_toggle));
                }
                SdoResponse::download_segment_acknowledge(t)
            }
            _ => continue,
        };

        if responses.send(reply.to_can_message(resp_id)).is_err() {
            return;
        }
    }
}

fn spawn_loopback() -> (ChannelSender, ChannelReceiver) {
    let (to_node_tx, to_node_rx) = mpsc::unbounded_channel();
    let (from_node_tx, from_node_rx) = mpsc::unbounded_channel();
    tokio::spawn(run_node(to_node_rx, from_node_tx));
    (ChannelSender(to_node_tx), ChannelReceiver(from_node_rx))
}

#[tokio::test]
async fn expedited_write_then_read_round_trips() {
    let (sender, receiver) = spawn_loopback();
    let mut sdo = SdoClient::new_std(NODE_ID, sender, receiver);

    sdo.write_u32(0x2100, 2, 0xDEAD_BEEF).await.unwrap();
    let read_back = sdo.upload_u32(0x2100, 2).await.unwrap();
    assert_eq!(read_back, 0xDEAD_BEEF);
}

#[tokio::test]
async fn segmented_write_then_read_round_trips() {
    let (sender, receiver) = spawn_loopback();
    let mut sdo = SdoClient::new_std(NODE_ID, sender, receiver);

    // 20 bytes forces a segmented transfer (announced size > 4, and > 7 per segment).
    let payload: Vec<u8> = (0..20u8).collect();
    sdo.download(0x1F50, 1, &payload).await.unwrap();

    let read_back = sdo.upload(0x1F50, 1).await.unwrap();
    assert_eq!(read_back, payload);
}

#[tokio::test]
async fn unknown_object_reads_back_as_empty() {
    let (sender, receiver) = spawn_loopback();
    let mut sdo = SdoClient::new_std(NODE_ID, sender, receiver);

    let read_back = sdo.upload(0x3000, 0).await.unwrap();
    assert!(read_back.is_empty());
}
