//! End-to-end LSS fast-scan against a simulated slave that only answers truthfully when
//! the probed bits actually match its factory address, instead of a mock that always
//! agrees (see the converges-in-four-frames unit test for that simpler case).

use tokio::sync::mpsc;

use iobus_common::lss::LssRequest;
use iobus_common::messages::{CanMessage, LSS_RESP_ID};
use iobus_common::traits::{AsyncCanReceiver, AsyncCanSender};
use iobus_master::LssMaster;

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

/// True to the wire protocol: responds `IdentifySlave` only when the candidate's bits at
/// or above `bit_check` match this slave's own field. Bits below `bit_check` are still
/// undetermined by the master and are not compared.
fn slave_matches(field: u32, candidate: u32, bit_check: u8) -> bool {
    let mask: u32 = if bit_check >= 32 {
        0
    } else {
        !0u32 << bit_check
    };
    (field & mask) == (candidate & mask)
}

async fn run_slave(
    identity: [u32; 4],
    mut requests: mpsc::UnboundedReceiver<CanMessage>,
    responses: mpsc::UnboundedSender<CanMessage>,
) {
    use iobus_common::lss::LssResponse;

    while let Some(msg) = requests.recv().await {
        let Ok(LssRequest::FastScan {
            id,
            bit_check,
            sub,
            next: _,
        }) = LssRequest::try_from(msg.data())
        else {
            continue;
        };

        if slave_matches(identity[sub as usize], id, bit_check)
            && responses
                .send(LssResponse::IdentifySlave.to_can_message(LSS_RESP_ID))
                .is_err()
        {
            return;
        }
    }
}

fn spawn_loopback(identity: [u32; 4]) -> (ChannelSender, ChannelReceiver) {
    let (to_slave_tx, to_slave_rx) = mpsc::unbounded_channel();
    let (from_slave_tx, from_slave_rx) = mpsc::unbounded_channel();
    tokio::spawn(run_slave(identity, to_slave_rx, from_slave_tx));
    (ChannelSender(to_slave_tx), ChannelReceiver(from_slave_rx))
}

#[tokio::test]
async fn unbiased_fast_scan_converges_on_real_slave_address() {
    let identity = [0x0000_0507, 2, 3, 0xABCD_1234];
    let (sender, receiver) = spawn_loopback(identity);
    let mut lss = LssMaster::new(sender, receiver);

    let found = lss
        .fast_scan(std::time::Duration::from_millis(2))
        .await
        .expect("slave should be found by an exhaustive unbiased scan");

    assert_eq!(found.vendor_id, identity[0]);
    assert_eq!(found.product_code, identity[1]);
    assert_eq!(found.revision, identity[2]);
    assert_eq!(found.serial, identity[3]);
}

#[tokio::test]
async fn biased_fast_scan_converges_with_partial_knowledge() {
    let identity = [0x0000_0507, 2, 3, 0x0000_1000];
    let (sender, receiver) = spawn_loopback(identity);
    let mut lss = LssMaster::new(sender, receiver);

    // Vendor/product/revision already known; only the serial's low 16 bits are unknown.
    let start = [identity[0], identity[1], identity[2], 0];
    let mask = [u32::MAX, u32::MAX, u32::MAX, 0xFFFF_0000];

    let found = lss
        .fast_scan_biased(std::time::Duration::from_millis(2), start, mask)
        .await
        .expect("biased scan should still converge on the real address");

    assert_eq!(found.serial, identity[3]);
}
