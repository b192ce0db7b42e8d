//! Access layer PDUs: an opcode followed by raw parameters.

use crate::error::WireError;
use crate::opcode::Opcode;
use bytes::{Bytes, BytesMut};

/// Maximum access PDU carried in a single unsegmented access message
pub const MAX_UNSEGMENTED_ACCESS_PDU: usize = 11;

/// Maximum access PDU carried by a segmented message (32 segments of 12 octets minus TransMIC)
pub const MAX_SEGMENTED_ACCESS_PDU: usize = 380;

/// Access layer message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPdu {
    /// Operation code
    pub opcode: Opcode,
    /// Raw parameter octets
    pub parameters: Bytes,
}

impl AccessPdu {
    /// Create a new access PDU
    pub fn new(opcode: Opcode, parameters: impl Into<Bytes>) -> Self {
        Self {
            opcode,
            parameters: parameters.into(),
        }
    }

    /// Encoded size in octets
    pub fn encoded_len(&self) -> usize {
        self.opcode.encoded_len() + self.parameters.len()
    }

    /// Whether the message needs segmentation
    pub fn requires_segmentation(&self) -> bool {
        self.encoded_len() > MAX_UNSEGMENTED_ACCESS_PDU
    }

    /// Encode for an unsegmented access message.
    ///
    /// Fails with [`WireError::ParametersTooLarge`] when the message must be segmented.
    pub fn encode(&self) -> Result<Bytes, WireError> {
        self.encode_with_limit(MAX_UNSEGMENTED_ACCESS_PDU)
    }

    /// Encode for a segmented access message
    pub fn encode_segmented(&self) -> Result<Bytes, WireError> {
        self.encode_with_limit(MAX_SEGMENTED_ACCESS_PDU)
    }

    fn encode_with_limit(&self, max: usize) -> Result<Bytes, WireError> {
        let len = self.encoded_len();
        if len > max {
            return Err(WireError::ParametersTooLarge { len, max });
        }

        let mut buf = BytesMut::with_capacity(len);
        self.opcode.encode(&mut buf);
        buf.extend_from_slice(&self.parameters);
        Ok(buf.freeze())
    }

    /// Decode an access PDU
    pub fn decode(pdu: &Bytes) -> Result<Self, WireError> {
        let (opcode, width) = Opcode::decode(pdu)?;
        Ok(Self {
            opcode,
            parameters: pdu.slice(width..),
        })
    }
}

/// Encode `opcode` followed by `parameters` as an unsegmented access PDU
pub fn encode(opcode: Opcode, parameters: &[u8]) -> Result<Bytes, WireError> {
    AccessPdu::new(opcode, Bytes::copy_from_slice(parameters)).encode()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_appends_parameters_verbatim() {
        let pdu = encode(Opcode::sig(0x8234), &[0x42, 0x00]).unwrap();
        assert_eq!(&pdu[..], &[0x82, 0x34, 0x42, 0x00]);
    }

    #[test]
    fn test_parameters_too_large() {
        // 1-octet opcode + 10 params = 11: fits
        assert!(encode(Opcode::short(0x52), &[0u8; 10]).is_ok());
        // 2-octet opcode + 10 params = 12: must segment
        assert_eq!(
            encode(Opcode::sig(0x8231), &[0u8; 10]),
            Err(WireError::ParametersTooLarge { len: 12, max: 11 })
        );
        // 3-octet opcode + 9 params = 12
        assert!(encode(Opcode::vendor(0x02, 0x0059), &[0u8; 9]).is_err());
    }

    #[test]
    fn test_segmented_limit() {
        let big = AccessPdu::new(Opcode::short(0x52), vec![0u8; 100]);
        assert!(big.requires_segmentation());
        assert!(big.encode().is_err());
        assert_eq!(big.encode_segmented().unwrap().len(), 101);

        let too_big = AccessPdu::new(Opcode::short(0x52), vec![0u8; 380]);
        assert!(too_big.encode_segmented().is_err());
    }

    #[test]
    fn test_decode_splits_opcode_and_parameters() {
        let raw = Bytes::from_static(&[0xC1, 0x59, 0x00, 0x01, 0x02]);
        let pdu = AccessPdu::decode(&raw).unwrap();
        assert_eq!(pdu.opcode, Opcode::vendor(0x01, 0x0059));
        assert_eq!(&pdu.parameters[..], &[0x01, 0x02]);
    }
}
