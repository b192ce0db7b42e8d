//! Lower transport PDUs.
//!
//! The first octet carries `SEG | AKF | AID` for access messages and
//! `SEG | Opcode` for control messages. Segmented PDUs continue with the
//! segment header from [`crate::segment`].

use crate::error::{ensure_len, WireError};
use crate::segment::{Segment, SEQ_ZERO_MASK};
use bytes::{BufMut, Bytes, BytesMut};

/// Largest upper transport PDU sent unsegmented (access payload + 32-bit TransMIC)
pub const MAX_UNSEGMENTED_UPPER_PDU: usize = 15;

/// Lower transport PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LowerTransportPdu {
    /// Unsegmented access message
    UnsegmentedAccess {
        /// Application key flag
        akf: bool,
        /// Application key identifier
        aid: u8,
        /// Upper transport PDU
        upper: Bytes,
    },
    /// One segment of a segmented access message
    SegmentedAccess {
        /// Application key flag
        akf: bool,
        /// Application key identifier
        aid: u8,
        /// Segment header and payload
        segment: Segment,
    },
    /// Unsegmented control message
    UnsegmentedControl {
        /// Transport control opcode
        opcode: u8,
        /// Control parameters
        parameters: Bytes,
    },
}

impl LowerTransportPdu {
    /// Whether the PDU travels with CTL set
    pub fn is_control(&self) -> bool {
        matches!(self, LowerTransportPdu::UnsegmentedControl { .. })
    }

    /// Encode the lower transport PDU
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        match self {
            LowerTransportPdu::UnsegmentedAccess { akf, aid, upper } => {
                buf.put_u8(access_octet(false, *akf, *aid));
                buf.extend_from_slice(upper);
            }
            LowerTransportPdu::SegmentedAccess { akf, aid, segment } => {
                buf.put_u8(access_octet(true, *akf, *aid));
                segment.encode_header(&mut buf);
                buf.extend_from_slice(&segment.payload);
            }
            LowerTransportPdu::UnsegmentedControl { opcode, parameters } => {
                buf.put_u8(opcode & 0x7F);
                buf.extend_from_slice(parameters);
            }
        }
        buf.freeze()
    }

    /// Decode a lower transport PDU; `ctl` comes from the network header
    pub fn decode(ctl: bool, buf: &Bytes) -> Result<Self, WireError> {
        ensure_len(buf, 1)?;
        let first = buf[0];
        let seg = first & 0x80 != 0;

        if ctl {
            if seg {
                return Err(WireError::Malformed("segmented control messages unsupported"));
            }
            return Ok(LowerTransportPdu::UnsegmentedControl {
                opcode: first & 0x7F,
                parameters: buf.slice(1..),
            });
        }

        let akf = first & 0x40 != 0;
        let aid = first & 0x3F;
        if seg {
            let segment = Segment::decode(&buf.slice(1..))?;
            Ok(LowerTransportPdu::SegmentedAccess { akf, aid, segment })
        } else {
            ensure_len(buf, 1 + 5)?;
            Ok(LowerTransportPdu::UnsegmentedAccess {
                akf,
                aid,
                upper: buf.slice(1..),
            })
        }
    }
}

fn access_octet(seg: bool, akf: bool, aid: u8) -> u8 {
    ((seg as u8) << 7) | ((akf as u8) << 6) | (aid & 0x3F)
}

/// Recover the full SeqAuth from a segment's SeqZero and the network SEQ
/// that carried it.
pub fn seq_auth(seq: u32, seq_zero: u16) -> u32 {
    let seq_zero = (seq_zero & SEQ_ZERO_MASK) as u32;
    let candidate = (seq & !(SEQ_ZERO_MASK as u32)) | seq_zero;
    if candidate > seq {
        candidate.wrapping_sub(SEQ_ZERO_MASK as u32 + 1)
    } else {
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsegmented_access_octet() {
        let pdu = LowerTransportPdu::UnsegmentedAccess {
            akf: true,
            aid: 0x26,
            upper: Bytes::from_static(&[1, 2, 3, 4, 5]),
        };
        let encoded = pdu.encode();
        assert_eq!(encoded[0], 0x66);
        assert_eq!(LowerTransportPdu::decode(false, &encoded).unwrap(), pdu);
    }

    #[test]
    fn test_segmented_access_round_trip() {
        let pdu = LowerTransportPdu::SegmentedAccess {
            akf: false,
            aid: 0,
            segment: Segment {
                seq_zero: 0x0101,
                seg_o: 1,
                seg_n: 2,
                szmic: false,
                payload: Bytes::from_static(&[9; 12]),
            },
        };
        let encoded = pdu.encode();
        assert_eq!(encoded[0], 0x80);
        assert_eq!(encoded.len(), 1 + 3 + 12);
        assert_eq!(LowerTransportPdu::decode(false, &encoded).unwrap(), pdu);
    }

    #[test]
    fn test_control_message() {
        let encoded = Bytes::from_static(&[0x0A, 0x01, 0x02]);
        let pdu = LowerTransportPdu::decode(true, &encoded).unwrap();
        assert!(pdu.is_control());
        assert_eq!(pdu.encode(), encoded);
        assert!(LowerTransportPdu::decode(true, &Bytes::from_static(&[0x80, 0x00])).is_err());
    }

    #[test]
    fn test_unsegmented_access_needs_mic() {
        assert!(LowerTransportPdu::decode(false, &Bytes::from_static(&[0x00, 1, 2])).is_err());
    }

    #[test]
    fn test_seq_auth_reconstruction() {
        assert_eq!(seq_auth(0x3129AB, 0x09AB), 0x3129AB);
        // Last segment sent a few sequence numbers after the first
        assert_eq!(seq_auth(0x3129B0, 0x09AB), 0x3129AB);
        // SeqZero from before a 13-bit rollover
        assert_eq!(seq_auth(0x004001, 0x1FFE), 0x003FFE);
    }
}
