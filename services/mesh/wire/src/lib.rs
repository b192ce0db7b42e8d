//! Bit-exact Bluetooth Mesh PDU layouts for the mesh provisioner.
//!
//! This crate owns everything that can be said about mesh traffic without
//! touching key material: address classes, access layer opcodes, lower
//! transport segmentation and reassembly, provisioning PDUs and the clear
//! fields of a network PDU. Encryption lives in `mesh-security`.
//!
//! ## Layering
//!
//! ```text
//! +--------------------------+
//! | Access PDU               | opcode (1-3 octets) + parameters
//! +--------------------------+
//! | Upper transport          | encrypted access PDU + TransMIC
//! +--------------------------+
//! | Lower transport          | SEG|AKF|AID, optional segment header
//! +--------------------------+
//! | Network PDU              | IVI|NID, obfuscated header, DST, NetMIC
//! +--------------------------+
//! ```
//!
//! ## Features
//!
//! - **Zero-Copy I/O**: Uses `Bytes`/`BytesMut` for all PDU buffers
//! - **Segmentation**: Deterministic splitting into at most 32 segments
//! - **Reassembly**: Concurrent, order-insensitive, duplicate-tolerant with timeout
//! - **Opcode Dispatch**: Explicitly registered decoder tables

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod access;
pub mod address;
pub mod dispatch;
pub mod error;
pub mod network;
pub mod opcode;
pub mod provisioning;
pub mod segment;
pub mod transport;

// Re-export main types
pub use access::{AccessPdu, MAX_SEGMENTED_ACCESS_PDU, MAX_UNSEGMENTED_ACCESS_PDU};
pub use address::AddressType;
pub use dispatch::{DecodeFn, OpcodeTable};
pub use error::WireError;
pub use network::{NetworkPdu, MAX_SEQUENCE_NUMBER, MAX_TTL};
pub use opcode::Opcode;
pub use provisioning::{
    Algorithms, AuthenticationMethod, Capabilities, FailureCode, PduType, ProvisioningData,
    ProvisioningFlags, ProvisioningPdu, Start,
};
pub use segment::{
    reassemble, segment, Reassembled, Reassembler, Segment, ACCESS_SEGMENT_SIZE,
    DEFAULT_REASSEMBLY_TIMEOUT, MAX_SEGMENTS,
};
pub use transport::{seq_auth, LowerTransportPdu, MAX_UNSEGMENTED_UPPER_PDU};
