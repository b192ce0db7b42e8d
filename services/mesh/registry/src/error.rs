//! Registry error types.

use mesh_storage::{AllocatedRange, RangeKind, StorageError};
use thiserror::Error;
use uuid::Uuid;

/// Allocation and validation errors
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Range bounds are inverted, outside the address class, or overlap
    #[error("invalid {kind} range {range}: {reason}")]
    InvalidRange {
        /// Offending range
        range: AllocatedRange,
        /// Address space of the range
        kind: RangeKind,
        /// What is wrong with it
        reason: &'static str,
    },

    /// Address is not a usable unicast address here
    #[error("invalid address 0x{0:04X}")]
    InvalidAddress(u16),

    /// Address already held by a provisioner or node
    #[error("address 0x{0:04X} already in use")]
    AddressInUse(u16),

    /// Sequence number reached 0xFFFFFF
    #[error("sequence numbers exhausted for provisioner {0}")]
    SequenceExhausted(Uuid),

    /// Provisioner name is empty
    #[error("provisioner name must not be empty")]
    EmptyName,

    /// TTL is neither 0 nor within 2..=127
    #[error("invalid ttl {0}")]
    InvalidTtl(u8),

    /// No provisioner with this id
    #[error("unknown provisioner {0}")]
    UnknownProvisioner(Uuid),

    /// A provisioner with this id already exists
    #[error("provisioner {0} already exists")]
    ProvisionerExists(Uuid),

    /// Provisioner belongs to another network
    #[error("provisioner belongs to mesh {0}")]
    WrongMesh(Uuid),

    /// No node with this device UUID
    #[error("unknown node {0}")]
    UnknownNode(Uuid),

    /// No free block of consecutive addresses
    #[error("no free block of {element_count} unicast addresses")]
    NoAddressAvailable {
        /// Requested number of elements
        element_count: u8,
    },

    /// Persistence failure
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}
