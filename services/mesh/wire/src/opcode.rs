//! Access layer opcodes.
//!
//! The width of an opcode is given by the top bits of its first octet:
//!
//! ```text
//! 0xxxxxxx                    1 octet  (0x7F reserved)
//! 10xxxxxx xxxxxxxx           2 octets (SIG)
//! 11xxxxxx cccccccc cccccccc  3 octets (vendor, company id little-endian)
//! ```

use crate::error::{ensure_len, WireError};
use bytes::BufMut;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reserved single-octet opcode
const RESERVED_OPCODE: u8 = 0x7F;

/// A validated access layer opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Opcode(u32);

impl Opcode {
    /// Single-octet SIG opcode, for constants
    pub const fn short(value: u8) -> Self {
        assert!(value < RESERVED_OPCODE, "single-octet opcodes are 0x00..=0x7E");
        Self(value as u32)
    }

    /// Two-octet SIG opcode, for constants
    pub const fn sig(value: u16) -> Self {
        assert!(value & 0xC000 == 0x8000, "two-octet opcodes start with 0b10");
        Self(value as u32)
    }

    /// Three-octet vendor opcode
    pub const fn vendor(opcode: u8, company_id: u16) -> Self {
        let [lo, hi] = company_id.to_le_bytes();
        Self(0xC0_0000 | (((opcode & 0x3F) as u32) << 16) | ((lo as u32) << 8) | hi as u32)
    }

    /// Validate a raw opcode value
    pub fn new(value: u32) -> Result<Self, WireError> {
        match value {
            0x00..=0x7E | 0x8000..=0xBFFF | 0xC0_0000..=0xFF_FFFF => Ok(Self(value)),
            _ => Err(WireError::InvalidOpcode(value)),
        }
    }

    /// Raw numeric value as it appears on the wire (big-endian octets)
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Encoded width in octets
    pub fn encoded_len(&self) -> usize {
        match self.0 {
            0x00..=0xFF => 1,
            0x100..=0xFFFF => 2,
            _ => 3,
        }
    }

    /// Whether this is a vendor opcode
    pub fn is_vendor(&self) -> bool {
        self.encoded_len() == 3
    }

    /// Company identifier of a vendor opcode
    pub fn company_id(&self) -> Option<u16> {
        if self.is_vendor() {
            Some(u16::from_le_bytes([(self.0 >> 8) as u8, self.0 as u8]))
        } else {
            None
        }
    }

    /// Write the opcode octets
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        match self.encoded_len() {
            1 => buf.put_u8(self.0 as u8),
            2 => buf.put_u16(self.0 as u16),
            _ => {
                buf.put_u8((self.0 >> 16) as u8);
                buf.put_u16(self.0 as u16);
            }
        }
    }

    /// Read an opcode from the front of `buf`, returning it with its width
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), WireError> {
        ensure_len(buf, 1)?;
        let first = buf[0];
        match first >> 6 {
            0b00 | 0b01 => {
                if first == RESERVED_OPCODE {
                    return Err(WireError::InvalidOpcode(first as u32));
                }
                Ok((Self(first as u32), 1))
            }
            0b10 => {
                ensure_len(buf, 2)?;
                Ok((Self(u16::from_be_bytes([buf[0], buf[1]]) as u32), 2))
            }
            _ => {
                ensure_len(buf, 3)?;
                let value = ((buf[0] as u32) << 16) | ((buf[1] as u32) << 8) | buf[2] as u32;
                Ok((Self(value), 3))
            }
        }
    }
}

impl TryFrom<u32> for Opcode {
    type Error = WireError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Opcode::new(value)
    }
}

impl From<Opcode> for u32 {
    fn from(opcode: Opcode) -> Self {
        opcode.0
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.encoded_len() {
            1 => write!(f, "0x{:02X}", self.0),
            2 => write!(f, "0x{:04X}", self.0),
            _ => write!(f, "0x{:06X}", self.0),
        }
    }
}
