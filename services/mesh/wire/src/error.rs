//! Wire protocol error types.

use crate::opcode::Opcode;
use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Not enough bytes to decode the structure
    #[error("incomplete pdu: need {needed} bytes, have {actual}")]
    Incomplete {
        /// Bytes required
        needed: usize,
        /// Bytes available
        actual: usize,
    },

    /// Opcode and parameters do not fit an unsegmented access message
    #[error("parameters too large: {len} bytes exceeds {max}")]
    ParametersTooLarge {
        /// Encoded opcode + parameter length
        len: usize,
        /// Maximum permitted length
        max: usize,
    },

    /// Opcode value violates the opcode encoding rule
    #[error("invalid opcode 0x{0:06X}")]
    InvalidOpcode(u32),

    /// No decoder registered for the opcode
    #[error("unknown opcode {0}")]
    UnknownOpcode(Opcode),

    /// Parameter bytes do not match the message layout
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// Payload needs more than 32 segments
    #[error("too many segments: {0}")]
    TooManySegments(usize),

    /// Reassembly timer expired before all segments arrived
    #[error("incomplete reassembly src=0x{src:04X} seq_zero={seq_zero}")]
    IncompleteReassembly {
        /// Source address of the segmented message
        src: u16,
        /// SeqZero of the segmented message
        seq_zero: u16,
    },

    /// Unknown provisioning PDU type
    #[error("unknown pdu type {0}")]
    UnknownPduType(u8),

    /// Invalid TTL
    #[error("invalid ttl {0}")]
    Ttl(u8),

    /// Malformed PDU structure
    #[error("malformed pdu: {0}")]
    Malformed(&'static str),
}

impl WireError {
    /// Whether the error only signals an unregistered opcode
    pub fn is_unknown_opcode(&self) -> bool {
        matches!(self, WireError::UnknownOpcode(_))
    }
}

/// Fail with [`WireError::Incomplete`] unless `buf` holds at least `needed` bytes
pub(crate) fn ensure_len(buf: &[u8], needed: usize) -> Result<(), WireError> {
    if buf.len() < needed {
        return Err(WireError::Incomplete {
            needed,
            actual: buf.len(),
        });
    }
    Ok(())
}
