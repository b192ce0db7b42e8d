//! Access message pipeline between model code and network PDUs.
//!
//! ```text
//! send:    AccessPdu -> upper transport (encrypt) -> lower transport
//!          (unsegmented | segments) -> network PDU (encrypt, one SEQ each)
//! receive: network PDU (decrypt) -> replay check -> reassembly
//!          -> upper transport (decrypt) -> AccessPdu
//! ```

use crate::error::MessageError;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use mesh_registry::AddressKeyAllocator;
use mesh_security::{AccessKeySelector, AccessMeta, MeshSecurity};
use mesh_wire::segment::SEQ_ZERO_MASK;
use mesh_wire::{
    seq_auth, segment, AccessPdu, LowerTransportPdu, NetworkPdu, Reassembler,
    ACCESS_SEGMENT_SIZE, MAX_UNSEGMENTED_ACCESS_PDU,
};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Last `(iv_index, seq)` accepted per source address
#[derive(Debug, Default)]
pub struct ReplayCache {
    entries: DashMap<u16, (u32, u32)>,
}

impl ReplayCache {
    /// Empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `(iv_index, seq)` from `src` only if it is newer than anything
    /// seen before, and remember it
    pub fn check_and_update(&self, src: u16, iv_index: u32, seq: u32) -> bool {
        match self.entries.entry(src) {
            Entry::Vacant(vacant) => {
                vacant.insert((iv_index, seq));
                true
            }
            Entry::Occupied(mut occupied) => {
                if (iv_index, seq) > *occupied.get() {
                    occupied.insert((iv_index, seq));
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Number of tracked sources
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no source is tracked
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget every source, e.g. after an IV index recovery
    pub fn clear(&self) {
        self.entries.clear();
    }
}

/// Settings for outgoing messages
#[derive(Debug, Clone, Copy)]
pub struct MessengerConfig {
    /// Network key used to send
    pub network_key_index: u16,
    /// Current IV index
    pub iv_index: u32,
    /// TTL of originated PDUs
    pub ttl: u8,
    /// Reassembly timeout for incoming segmented messages
    pub reassembly_timeout: Duration,
}

impl Default for MessengerConfig {
    fn default() -> Self {
        Self {
            network_key_index: 0,
            iv_index: 0,
            ttl: mesh_storage::DEFAULT_GLOBAL_TTL,
            reassembly_timeout: mesh_wire::DEFAULT_REASSEMBLY_TIMEOUT,
        }
    }
}

/// Decrypted access message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Source address
    pub src: u16,
    /// Destination address
    pub dst: u16,
    /// Network key the message arrived on
    pub network_key_index: u16,
    /// Key that authenticated the access payload
    pub key: AccessKeySelector,
    /// Opcode and parameters
    pub pdu: AccessPdu,
}

/// Sends and receives access messages for one provisioner
pub struct MeshMessenger {
    security: Arc<MeshSecurity>,
    allocator: Arc<AddressKeyAllocator>,
    provisioner_id: Uuid,
    config: MessengerConfig,
    reassembler: Reassembler,
    replay: ReplayCache,
}

impl MeshMessenger {
    /// Create a messenger originating traffic as `provisioner_id`
    pub fn new(
        security: Arc<MeshSecurity>,
        allocator: Arc<AddressKeyAllocator>,
        provisioner_id: Uuid,
        config: MessengerConfig,
    ) -> Self {
        Self {
            reassembler: Reassembler::new(config.reassembly_timeout),
            security,
            allocator,
            provisioner_id,
            config,
            replay: ReplayCache::new(),
        }
    }

    /// Replay protection state
    pub fn replay_cache(&self) -> &ReplayCache {
        &self.replay
    }

    /// Encrypt `pdu` for `dst` and return the network PDUs to transmit
    pub async fn send(
        &self,
        pdu: &AccessPdu,
        dst: u16,
        key: AccessKeySelector,
    ) -> Result<Vec<Bytes>, MessageError> {
        let provisioner = self.allocator.provisioner(self.provisioner_id).await?;
        let src = provisioner
            .unicast_address
            .ok_or(MessageError::NoSourceAddress)?;
        let access = pdu.encode_segmented()?;
        let segmented = access.len() > MAX_UNSEGMENTED_ACCESS_PDU;

        let first_seq = self.allocator.next_sequence_number(self.provisioner_id).await?;
        let meta = AccessMeta {
            seq: first_seq,
            src,
            dst,
            iv_index: self.config.iv_index,
            szmic: false,
        };
        let sealed = self.security.encrypt_access(key, &meta, &access)?;

        let lower = if segmented {
            let seq_zero = (first_seq & SEQ_ZERO_MASK as u32) as u16;
            segment(&sealed.upper_pdu, ACCESS_SEGMENT_SIZE, seq_zero)?
                .into_iter()
                .map(|segment| LowerTransportPdu::SegmentedAccess {
                    akf: sealed.akf,
                    aid: sealed.aid,
                    segment,
                })
                .collect()
        } else {
            vec![LowerTransportPdu::UnsegmentedAccess {
                akf: sealed.akf,
                aid: sealed.aid,
                upper: sealed.upper_pdu.clone(),
            }]
        };

        let mut out = Vec::with_capacity(lower.len());
        for (i, transport) in lower.into_iter().enumerate() {
            let seq = if i == 0 {
                first_seq
            } else {
                self.allocator.next_sequence_number(self.provisioner_id).await?
            };
            let network = NetworkPdu::new(false, self.config.ttl, seq, src, dst, transport.encode())?;
            out.push(self.security.encrypt_network(
                self.config.network_key_index,
                self.config.iv_index,
                &network,
            )?);
        }

        debug!(
            "Sent {} to 0x{:04X} in {} network pdu(s)",
            pdu.opcode,
            dst,
            out.len()
        );
        Ok(out)
    }

    /// Process one received network PDU. Returns a message once one is
    /// complete; segments and control PDUs yield `None`.
    pub fn receive(&self, bytes: &[u8]) -> Result<Option<ReceivedMessage>, MessageError> {
        let received = self.security.decrypt_network(bytes, self.config.iv_index)?;
        let network = received.pdu;

        if !self
            .replay
            .check_and_update(network.src, received.iv_index, network.seq)
        {
            return Err(MessageError::Replay {
                src: network.src,
                seq: network.seq,
            });
        }

        let (akf, aid, seq, szmic, upper) =
            match LowerTransportPdu::decode(network.ctl, &network.transport_pdu)? {
                LowerTransportPdu::UnsegmentedAccess { akf, aid, upper } => {
                    (akf, aid, network.seq, false, upper)
                }
                LowerTransportPdu::SegmentedAccess { akf, aid, segment } => {
                    match self
                        .reassembler
                        .add_segment_at(network.src, segment, now())?
                    {
                        Some(done) => (
                            akf,
                            aid,
                            seq_auth(network.seq, done.seq_zero),
                            done.szmic,
                            done.payload,
                        ),
                        None => return Ok(None),
                    }
                }
                LowerTransportPdu::UnsegmentedControl { opcode, .. } => {
                    trace!("Ignoring control opcode 0x{:02X} from 0x{:04X}", opcode, network.src);
                    return Ok(None);
                }
            };

        let meta = AccessMeta {
            seq,
            src: network.src,
            dst: network.dst,
            iv_index: received.iv_index,
            szmic,
        };
        let (access, key) = self.security.decrypt_access(akf, aid, &meta, &upper)?;
        let pdu = AccessPdu::decode(&access)?;

        Ok(Some(ReceivedMessage {
            src: network.src,
            dst: network.dst,
            network_key_index: received.net_key_index,
            key,
            pdu,
        }))
    }

    /// Messages still waiting for segments
    pub fn pending_reassemblies(&self) -> usize {
        self.reassembler.pending_count()
    }

    /// Drop reassembly state that timed out, returning one
    /// `IncompleteReassembly` error per abandoned message
    pub fn sweep_expired(&self) -> Vec<MessageError> {
        self.reassembler
            .sweep_expired(now())
            .into_iter()
            .map(MessageError::from)
            .collect()
    }

    /// Sweep reassembly state every `period`, reporting abandoned messages on
    /// `expired`. The task ends when the messenger is dropped or the receiver
    /// is closed.
    pub fn spawn_reassembly_sweeper(
        self: &Arc<Self>,
        period: Duration,
        expired: mpsc::Sender<MessageError>,
    ) -> JoinHandle<()> {
        let messenger: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(messenger) = messenger.upgrade() else {
                    break;
                };
                for error in messenger.sweep_expired() {
                    warn!("{}", error);
                    if expired.send(error).await.is_err() {
                        return;
                    }
                }
            }
            debug!("Reassembly sweeper stopped");
        })
    }
}

/// Arrival time on the runtime clock, so paused test time applies
fn now() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}

impl std::fmt::Debug for MeshMessenger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshMessenger")
            .field("provisioner_id", &self.provisioner_id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
