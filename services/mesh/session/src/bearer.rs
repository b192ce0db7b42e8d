//! Links carrying provisioning PDUs.

use crate::error::ProvisioningError;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::trace;

/// Default queue depth of a [`ChannelBearer`]
pub const DEFAULT_BEARER_CAPACITY: usize = 16;

/// Transport for provisioning PDUs (PB-ADV, PB-GATT or in-process)
#[async_trait]
pub trait ProvisioningBearer: Send {
    /// Send one encoded PDU
    async fn send_pdu(&mut self, pdu: Bytes) -> Result<(), ProvisioningError>;

    /// Wait for the next encoded PDU
    async fn recv_pdu(&mut self) -> Result<Bytes, ProvisioningError>;
}

/// In-process bearer backed by a pair of mpsc queues
#[derive(Debug)]
pub struct ChannelBearer {
    tx: mpsc::Sender<Bytes>,
    rx: mpsc::Receiver<Bytes>,
}

impl ChannelBearer {
    /// Two connected ends
    pub fn pair() -> (Self, Self) {
        Self::pair_with_capacity(DEFAULT_BEARER_CAPACITY)
    }

    /// Two connected ends with the given queue depth
    pub fn pair_with_capacity(capacity: usize) -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::channel(capacity);
        let (b_tx, a_rx) = mpsc::channel(capacity);
        (
            Self { tx: a_tx, rx: a_rx },
            Self { tx: b_tx, rx: b_rx },
        )
    }
}

#[async_trait]
impl ProvisioningBearer for ChannelBearer {
    async fn send_pdu(&mut self, pdu: Bytes) -> Result<(), ProvisioningError> {
        trace!("Bearer send {} octets", pdu.len());
        self.tx
            .send(pdu)
            .await
            .map_err(|_| ProvisioningError::BearerClosed)
    }

    async fn recv_pdu(&mut self) -> Result<Bytes, ProvisioningError> {
        self.rx.recv().await.ok_or(ProvisioningError::BearerClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_pair() {
        let (mut a, mut b) = ChannelBearer::pair();
        a.send_pdu(Bytes::from_static(&[0x00, 0x05])).await.unwrap();
        assert_eq!(b.recv_pdu().await.unwrap(), Bytes::from_static(&[0x00, 0x05]));

        drop(a);
        assert!(matches!(
            b.recv_pdu().await,
            Err(ProvisioningError::BearerClosed)
        ));
    }
}
