//! Provisioning protocol PDUs.
//!
//! Every PDU starts with one octet whose low six bits carry the PDU type; the
//! two high bits are padding and must be zero. Parameters are fixed-size per
//! type.

use crate::error::{ensure_len, WireError};
use bitflags::bitflags;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of the Capabilities parameters
pub const CAPABILITIES_SIZE: usize = 11;
/// Size of the Start parameters
pub const START_SIZE: usize = 5;
/// Size of an uncompressed P-256 public key (X || Y)
pub const PUBLIC_KEY_SIZE: usize = 64;
/// Size of confirmation and random values
pub const CONFIRMATION_SIZE: usize = 16;
/// Size of the plaintext provisioning data
pub const PROVISIONING_DATA_SIZE: usize = 25;
/// Size of the provisioning data MIC
pub const PROVISIONING_DATA_MIC_SIZE: usize = 8;

/// Provisioning PDU types
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PduType {
    /// Provisioner invites the device
    Invite = 0x00,
    /// Device capabilities
    Capabilities = 0x01,
    /// Selected provisioning method
    Start = 0x02,
    /// Public key exchange
    PublicKey = 0x03,
    /// Input OOB entered on the device
    InputComplete = 0x04,
    /// Confirmation value
    Confirmation = 0x05,
    /// Random value
    Random = 0x06,
    /// Encrypted provisioning data
    Data = 0x07,
    /// Provisioning finished
    Complete = 0x08,
    /// Provisioning aborted
    Failed = 0x09,
}

impl TryFrom<u8> for PduType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(PduType::Invite),
            0x01 => Ok(PduType::Capabilities),
            0x02 => Ok(PduType::Start),
            0x03 => Ok(PduType::PublicKey),
            0x04 => Ok(PduType::InputComplete),
            0x05 => Ok(PduType::Confirmation),
            0x06 => Ok(PduType::Random),
            0x07 => Ok(PduType::Data),
            0x08 => Ok(PduType::Complete),
            0x09 => Ok(PduType::Failed),
            _ => Err(WireError::UnknownPduType(value)),
        }
    }
}

impl fmt::Display for PduType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Error codes carried by a Provisioning Failed PDU
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureCode {
    /// PDU type not recognized
    InvalidPdu = 0x01,
    /// Parameters outside the expected range
    InvalidFormat = 0x02,
    /// PDU not expected at this point
    UnexpectedPdu = 0x03,
    /// Confirmation value did not match
    ConfirmationFailed = 0x04,
    /// Device ran out of resources
    OutOfResources = 0x05,
    /// Provisioning data failed to decrypt
    DecryptionFailed = 0x06,
    /// Unexpected error on the device
    UnexpectedError = 0x07,
    /// Device cannot assign consecutive unicast addresses
    CannotAssignAddresses = 0x08,
}

impl TryFrom<u8> for FailureCode {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(FailureCode::InvalidPdu),
            0x02 => Ok(FailureCode::InvalidFormat),
            0x03 => Ok(FailureCode::UnexpectedPdu),
            0x04 => Ok(FailureCode::ConfirmationFailed),
            0x05 => Ok(FailureCode::OutOfResources),
            0x06 => Ok(FailureCode::DecryptionFailed),
            0x07 => Ok(FailureCode::UnexpectedError),
            0x08 => Ok(FailureCode::CannotAssignAddresses),
            _ => Err(WireError::Malformed("prohibited provisioning failure code")),
        }
    }
}

impl fmt::Display for FailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

bitflags! {
    /// Supported provisioning algorithms
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Algorithms: u16 {
        /// FIPS P-256 elliptic curve
        const FIPS_P256 = 1 << 0;
    }
}

bitflags! {
    /// Public key availability
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct PublicKeyType: u8 {
        /// Public key is available out of band
        const OOB_AVAILABLE = 1 << 0;
    }
}

bitflags! {
    /// Static OOB availability
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct StaticOobType: u8 {
        /// Static OOB information is available
        const AVAILABLE = 1 << 0;
    }
}

bitflags! {
    /// Output OOB actions
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct OutputOobActions: u16 {
        /// Blink
        const BLINK = 1 << 0;
        /// Beep
        const BEEP = 1 << 1;
        /// Vibrate
        const VIBRATE = 1 << 2;
        /// Output numeric
        const NUMERIC = 1 << 3;
        /// Output alphanumeric
        const ALPHANUMERIC = 1 << 4;
    }
}

bitflags! {
    /// Input OOB actions
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct InputOobActions: u16 {
        /// Push
        const PUSH = 1 << 0;
        /// Twist
        const TWIST = 1 << 1;
        /// Input numeric
        const NUMERIC = 1 << 2;
        /// Input alphanumeric
        const ALPHANUMERIC = 1 << 3;
    }
}

bitflags! {
    /// Flags carried in the provisioning data
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct ProvisioningFlags: u8 {
        /// Key refresh phase 2 in progress
        const KEY_REFRESH = 1 << 0;
        /// IV update in progress
        const IV_UPDATE = 1 << 1;
    }
}

/// Device capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Number of elements on the device
    pub element_count: u8,
    /// Supported algorithms
    pub algorithms: Algorithms,
    /// Public key type
    pub public_key_type: PublicKeyType,
    /// Static OOB type
    pub static_oob_type: StaticOobType,
    /// Maximum output OOB size
    pub output_oob_size: u8,
    /// Supported output OOB actions
    pub output_oob_actions: OutputOobActions,
    /// Maximum input OOB size
    pub input_oob_size: u8,
    /// Supported input OOB actions
    pub input_oob_actions: InputOobActions,
}

impl Capabilities {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(self.element_count);
        buf.put_u16(self.algorithms.bits());
        buf.put_u8(self.public_key_type.bits());
        buf.put_u8(self.static_oob_type.bits());
        buf.put_u8(self.output_oob_size);
        buf.put_u16(self.output_oob_actions.bits());
        buf.put_u8(self.input_oob_size);
        buf.put_u16(self.input_oob_actions.bits());
    }

    fn decode(p: &[u8]) -> Result<Self, WireError> {
        if p[0] == 0 {
            return Err(WireError::Malformed("device must have at least one element"));
        }
        Ok(Self {
            element_count: p[0],
            algorithms: Algorithms::from_bits_retain(u16::from_be_bytes([p[1], p[2]])),
            public_key_type: PublicKeyType::from_bits_retain(p[3]),
            static_oob_type: StaticOobType::from_bits_retain(p[4]),
            output_oob_size: p[5],
            output_oob_actions: OutputOobActions::from_bits_retain(u16::from_be_bytes([
                p[6], p[7],
            ])),
            input_oob_size: p[8],
            input_oob_actions: InputOobActions::from_bits_retain(u16::from_be_bytes([
                p[9], p[10],
            ])),
        })
    }
}

/// Authentication method selected in the Start PDU
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthenticationMethod {
    /// No OOB authentication
    NoOob = 0x00,
    /// Static OOB authentication
    StaticOob = 0x01,
    /// Output OOB authentication
    OutputOob = 0x02,
    /// Input OOB authentication
    InputOob = 0x03,
}

impl TryFrom<u8> for AuthenticationMethod {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(AuthenticationMethod::NoOob),
            0x01 => Ok(AuthenticationMethod::StaticOob),
            0x02 => Ok(AuthenticationMethod::OutputOob),
            0x03 => Ok(AuthenticationMethod::InputOob),
            _ => Err(WireError::Malformed("invalid authentication method")),
        }
    }
}

/// Provisioning method chosen by the provisioner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Start {
    /// Algorithm (0 = FIPS P-256)
    pub algorithm: u8,
    /// Public key delivery (0 = in band, 1 = OOB)
    pub public_key: u8,
    /// Authentication method
    pub auth_method: AuthenticationMethod,
    /// Authentication action
    pub auth_action: u8,
    /// Authentication size
    pub auth_size: u8,
}

impl Start {
    /// FIPS P-256, in-band public key, given authentication method
    pub fn fips_p256(auth_method: AuthenticationMethod) -> Self {
        Self {
            algorithm: 0x00,
            public_key: 0x00,
            auth_method,
            auth_action: 0x00,
            auth_size: 0x00,
        }
    }
}

/// Plaintext provisioning data sent to the device
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct ProvisioningData {
    /// Network key
    pub network_key: [u8; 16],
    /// Network key index
    pub key_index: u16,
    /// Key refresh and IV update flags
    #[zeroize(skip)]
    pub flags: ProvisioningFlags,
    /// Current IV index
    pub iv_index: u32,
    /// Unicast address of the primary element
    pub unicast_address: u16,
}

impl ProvisioningData {
    /// Serialize to the 25-octet plaintext
    pub fn encode(&self) -> [u8; PROVISIONING_DATA_SIZE] {
        let mut out = [0u8; PROVISIONING_DATA_SIZE];
        out[..16].copy_from_slice(&self.network_key);
        out[16..18].copy_from_slice(&self.key_index.to_be_bytes());
        out[18] = self.flags.bits();
        out[19..23].copy_from_slice(&self.iv_index.to_be_bytes());
        out[23..25].copy_from_slice(&self.unicast_address.to_be_bytes());
        out
    }

    /// Parse the 25-octet plaintext
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() != PROVISIONING_DATA_SIZE {
            return Err(WireError::Malformed("provisioning data must be 25 octets"));
        }
        let mut network_key = [0u8; 16];
        network_key.copy_from_slice(&buf[..16]);
        Ok(Self {
            network_key,
            key_index: u16::from_be_bytes([buf[16], buf[17]]),
            flags: ProvisioningFlags::from_bits_retain(buf[18]),
            iv_index: u32::from_be_bytes([buf[19], buf[20], buf[21], buf[22]]),
            unicast_address: u16::from_be_bytes([buf[23], buf[24]]),
        })
    }
}

impl fmt::Debug for ProvisioningData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisioningData")
            .field("network_key", &"<redacted>")
            .field("key_index", &self.key_index)
            .field("flags", &self.flags)
            .field("iv_index", &self.iv_index)
            .field("unicast_address", &self.unicast_address)
            .finish()
    }
}

/// A provisioning protocol PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningPdu {
    /// Invite with attention timer in seconds
    Invite {
        /// Attention timer duration
        attention_duration: u8,
    },
    /// Device capabilities
    Capabilities(Capabilities),
    /// Selected provisioning method
    Start(Start),
    /// Public key X || Y
    PublicKey([u8; PUBLIC_KEY_SIZE]),
    /// Input OOB complete
    InputComplete,
    /// Confirmation value
    Confirmation([u8; CONFIRMATION_SIZE]),
    /// Random value
    Random([u8; CONFIRMATION_SIZE]),
    /// Encrypted provisioning data with MIC
    Data {
        /// Encrypted provisioning data
        encrypted: [u8; PROVISIONING_DATA_SIZE],
        /// Provisioning data MIC
        mic: [u8; PROVISIONING_DATA_MIC_SIZE],
    },
    /// Provisioning complete
    Complete,
    /// Provisioning failed
    Failed(FailureCode),
}

impl ProvisioningPdu {
    /// PDU type
    pub fn pdu_type(&self) -> PduType {
        match self {
            ProvisioningPdu::Invite { .. } => PduType::Invite,
            ProvisioningPdu::Capabilities(_) => PduType::Capabilities,
            ProvisioningPdu::Start(_) => PduType::Start,
            ProvisioningPdu::PublicKey(_) => PduType::PublicKey,
            ProvisioningPdu::InputComplete => PduType::InputComplete,
            ProvisioningPdu::Confirmation(_) => PduType::Confirmation,
            ProvisioningPdu::Random(_) => PduType::Random,
            ProvisioningPdu::Data { .. } => PduType::Data,
            ProvisioningPdu::Complete => PduType::Complete,
            ProvisioningPdu::Failed(_) => PduType::Failed,
        }
    }

    /// Parameter octets without the type octet
    pub fn parameters(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode_parameters(&mut buf);
        buf.freeze()
    }

    /// Encode type octet and parameters
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(1 + PUBLIC_KEY_SIZE);
        buf.put_u8(self.pdu_type() as u8);
        self.encode_parameters(&mut buf);
        buf.freeze()
    }

    fn encode_parameters(&self, buf: &mut BytesMut) {
        match self {
            ProvisioningPdu::Invite { attention_duration } => buf.put_u8(*attention_duration),
            ProvisioningPdu::Capabilities(caps) => caps.encode(buf),
            ProvisioningPdu::Start(start) => {
                buf.put_u8(start.algorithm);
                buf.put_u8(start.public_key);
                buf.put_u8(start.auth_method as u8);
                buf.put_u8(start.auth_action);
                buf.put_u8(start.auth_size);
            }
            ProvisioningPdu::PublicKey(key) => buf.extend_from_slice(key),
            ProvisioningPdu::Confirmation(value) | ProvisioningPdu::Random(value) => {
                buf.extend_from_slice(value)
            }
            ProvisioningPdu::Data { encrypted, mic } => {
                buf.extend_from_slice(encrypted);
                buf.extend_from_slice(mic);
            }
            ProvisioningPdu::Failed(code) => buf.put_u8(*code as u8),
            ProvisioningPdu::InputComplete | ProvisioningPdu::Complete => {}
        }
    }

    /// Decode a complete PDU
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        ensure_len(buf, 1)?;
        if buf[0] & 0xC0 != 0 {
            return Err(WireError::Malformed("provisioning pdu padding bits set"));
        }
        let pdu_type = PduType::try_from(buf[0])?;
        let p = &buf[1..];

        let expected = match pdu_type {
            PduType::Invite | PduType::Failed => 1,
            PduType::Capabilities => CAPABILITIES_SIZE,
            PduType::Start => START_SIZE,
            PduType::PublicKey => PUBLIC_KEY_SIZE,
            PduType::Confirmation | PduType::Random => CONFIRMATION_SIZE,
            PduType::Data => PROVISIONING_DATA_SIZE + PROVISIONING_DATA_MIC_SIZE,
            PduType::InputComplete | PduType::Complete => 0,
        };
        ensure_len(p, expected)?;
        if p.len() > expected {
            return Err(WireError::Malformed("trailing octets in provisioning pdu"));
        }

        let pdu = match pdu_type {
            PduType::Invite => ProvisioningPdu::Invite {
                attention_duration: p[0],
            },
            PduType::Capabilities => ProvisioningPdu::Capabilities(Capabilities::decode(p)?),
            PduType::Start => ProvisioningPdu::Start(Start {
                algorithm: p[0],
                public_key: p[1],
                auth_method: AuthenticationMethod::try_from(p[2])?,
                auth_action: p[3],
                auth_size: p[4],
            }),
            PduType::PublicKey => ProvisioningPdu::PublicKey(to_array(p)),
            PduType::InputComplete => ProvisioningPdu::InputComplete,
            PduType::Confirmation => ProvisioningPdu::Confirmation(to_array(p)),
            PduType::Random => ProvisioningPdu::Random(to_array(p)),
            PduType::Data => ProvisioningPdu::Data {
                encrypted: to_array(&p[..PROVISIONING_DATA_SIZE]),
                mic: to_array(&p[PROVISIONING_DATA_SIZE..]),
            },
            PduType::Complete => ProvisioningPdu::Complete,
            PduType::Failed => ProvisioningPdu::Failed(FailureCode::try_from(p[0])?),
        };
        Ok(pdu)
    }
}

/// Copy a slice of already-checked length into an array
fn to_array<const N: usize>(p: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&p[..N]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> Capabilities {
        Capabilities {
            element_count: 2,
            algorithms: Algorithms::FIPS_P256,
            public_key_type: PublicKeyType::empty(),
            static_oob_type: StaticOobType::AVAILABLE,
            output_oob_size: 0,
            output_oob_actions: OutputOobActions::empty(),
            input_oob_size: 0,
            input_oob_actions: InputOobActions::empty(),
        }
    }

    #[test]
    fn test_capabilities_layout() {
        let pdu = ProvisioningPdu::Capabilities(caps());
        let encoded = pdu.encode();
        assert_eq!(
            &encoded[..],
            &[0x01, 0x02, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]
        );
        assert_eq!(ProvisioningPdu::decode(&encoded).unwrap(), pdu);
        assert_eq!(pdu.parameters().len(), CAPABILITIES_SIZE);
    }

    #[test]
    fn test_start_layout() {
        let pdu = ProvisioningPdu::Start(Start::fips_p256(AuthenticationMethod::StaticOob));
        assert_eq!(&pdu.encode()[..], &[0x02, 0x00, 0x00, 0x01, 0x00, 0x00]);
    }

    #[test]
    fn test_failed_and_empty_pdus() {
        assert_eq!(
            ProvisioningPdu::decode(&[0x09, 0x04]).unwrap(),
            ProvisioningPdu::Failed(FailureCode::ConfirmationFailed)
        );
        assert_eq!(
            ProvisioningPdu::decode(&[0x08]).unwrap(),
            ProvisioningPdu::Complete
        );
        assert!(ProvisioningPdu::decode(&[0x09, 0x00]).is_err());
    }

    #[test]
    fn test_rejects_bad_type_and_length() {
        assert_eq!(
            ProvisioningPdu::decode(&[0x0A]),
            Err(WireError::UnknownPduType(0x0A))
        );
        assert!(ProvisioningPdu::decode(&[0x40]).is_err());
        assert!(matches!(
            ProvisioningPdu::decode(&[0x05, 0x00]),
            Err(WireError::Incomplete { .. })
        ));
        assert!(ProvisioningPdu::decode(&[0x08, 0x00]).is_err());
    }

    #[test]
    fn test_data_splits_mic() {
        let mut raw = vec![0x07];
        raw.extend((0..33).map(|i| i as u8));
        match ProvisioningPdu::decode(&raw).unwrap() {
            ProvisioningPdu::Data { encrypted, mic } => {
                assert_eq!(encrypted[24], 24);
                assert_eq!(mic, [25, 26, 27, 28, 29, 30, 31, 32]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_provisioning_data_layout() {
        let data = ProvisioningData {
            network_key: [0xAB; 16],
            key_index: 0x0123,
            flags: ProvisioningFlags::IV_UPDATE,
            iv_index: 0x1234_5678,
            unicast_address: 0x0B0C,
        };
        let plain = data.encode();
        assert_eq!(
            &plain[16..],
            &[0x01, 0x23, 0x02, 0x12, 0x34, 0x56, 0x78, 0x0B, 0x0C]
        );
        assert_eq!(ProvisioningData::decode(&plain).unwrap(), data);
        assert!(!format!("{:?}", data).contains("171"));
    }
}
