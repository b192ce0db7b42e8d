//! Network PDU fields before encryption and obfuscation.
//!
//! ```text
//! | IVI (1) | NID (7) | CTL (1) | TTL (7) | SEQ (24) | SRC (16) | DST (16) | TransportPDU | NetMIC (32/64) |
//! ```
//!
//! CTL, TTL, SEQ and SRC are obfuscated; DST and the transport PDU are encrypted.

use crate::address::{is_valid_destination, is_valid_unicast_address};
use crate::error::WireError;
use bytes::Bytes;

/// Largest TTL value
pub const MAX_TTL: u8 = 0x7F;
/// Largest sequence number
pub const MAX_SEQUENCE_NUMBER: u32 = 0x00FF_FFFF;
/// NetMIC size for access messages
pub const ACCESS_NET_MIC_SIZE: usize = 4;
/// NetMIC size for control messages
pub const CONTROL_NET_MIC_SIZE: usize = 8;
/// Octets before the encrypted DST
pub const NETWORK_HEADER_SIZE: usize = 7;
/// Smallest valid network PDU on the wire
pub const MIN_NETWORK_PDU_SIZE: usize = NETWORK_HEADER_SIZE + 2 + 1 + ACCESS_NET_MIC_SIZE;
/// Largest network PDU on the wire
pub const MAX_NETWORK_PDU_SIZE: usize = 29;

/// NetMIC size for the message class
pub fn net_mic_size(ctl: bool) -> usize {
    if ctl {
        CONTROL_NET_MIC_SIZE
    } else {
        ACCESS_NET_MIC_SIZE
    }
}

/// Build the first octet from the IV index low bit and NID
pub fn header_octet(ivi: bool, nid: u8) -> u8 {
    ((ivi as u8) << 7) | (nid & 0x7F)
}

/// Split the first octet into IVI and NID
pub fn parse_header_octet(octet: u8) -> (bool, u8) {
    (octet & 0x80 != 0, octet & 0x7F)
}

/// Clear network PDU fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkPdu {
    /// Control message flag
    pub ctl: bool,
    /// Time to live
    pub ttl: u8,
    /// Sequence number (24 bits)
    pub seq: u32,
    /// Source unicast address
    pub src: u16,
    /// Destination address
    pub dst: u16,
    /// Lower transport PDU
    pub transport_pdu: Bytes,
}

impl NetworkPdu {
    /// Create a validated network PDU
    pub fn new(
        ctl: bool,
        ttl: u8,
        seq: u32,
        src: u16,
        dst: u16,
        transport_pdu: Bytes,
    ) -> Result<Self, WireError> {
        let pdu = Self {
            ctl,
            ttl,
            seq,
            src,
            dst,
            transport_pdu,
        };
        pdu.validate()?;
        Ok(pdu)
    }

    /// Check field ranges and the encoded size
    pub fn validate(&self) -> Result<(), WireError> {
        if self.ttl > MAX_TTL {
            return Err(WireError::Ttl(self.ttl));
        }
        if self.seq > MAX_SEQUENCE_NUMBER {
            return Err(WireError::Malformed("sequence number exceeds 24 bits"));
        }
        if !is_valid_unicast_address(self.src) {
            return Err(WireError::Malformed("source must be a unicast address"));
        }
        if !is_valid_destination(self.dst) {
            return Err(WireError::Malformed("destination is unassigned"));
        }
        if self.transport_pdu.is_empty() {
            return Err(WireError::Malformed("empty transport pdu"));
        }
        if self.encoded_len() > MAX_NETWORK_PDU_SIZE {
            return Err(WireError::Malformed("network pdu exceeds 29 octets"));
        }
        Ok(())
    }

    /// NetMIC size for this PDU
    pub fn net_mic_size(&self) -> usize {
        net_mic_size(self.ctl)
    }

    /// Size on the wire including NetMIC
    pub fn encoded_len(&self) -> usize {
        NETWORK_HEADER_SIZE + 2 + self.transport_pdu.len() + self.net_mic_size()
    }

    /// CTL|TTL octet
    pub fn ctl_ttl(&self) -> u8 {
        ((self.ctl as u8) << 7) | (self.ttl & MAX_TTL)
    }

    /// The six obfuscated octets: CTL|TTL, SEQ, SRC
    pub fn obfuscated_header(&self) -> [u8; 6] {
        let seq = self.seq.to_be_bytes();
        let src = self.src.to_be_bytes();
        [self.ctl_ttl(), seq[1], seq[2], seq[3], src[0], src[1]]
    }

    /// Rebuild from the deobfuscated header, DST and transport PDU
    pub fn from_parts(header: [u8; 6], dst: u16, transport_pdu: Bytes) -> Self {
        Self {
            ctl: header[0] & 0x80 != 0,
            ttl: header[0] & MAX_TTL,
            seq: u32::from_be_bytes([0, header[1], header[2], header[3]]),
            src: u16::from_be_bytes([header[4], header[5]]),
            dst,
            transport_pdu,
        }
    }
}
