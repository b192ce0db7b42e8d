//! Session and message pipeline errors.

use crate::state::ProvisioningState;
use mesh_registry::RegistryError;
use mesh_security::SecurityError;
use mesh_wire::{FailureCode, PduType, WireError};
use thiserror::Error;
use uuid::Uuid;

/// Provisioning failures. Every variant aborts only the session it came from.
#[derive(Error, Debug)]
pub enum ProvisioningError {
    /// Device does not support FIPS P-256
    #[error("device does not support a common provisioning algorithm")]
    UnsupportedAlgorithm,

    /// Static OOB required but not offered by the device
    #[error("device does not support the required authentication method")]
    UnsupportedAuthentication,

    /// Peer public key is not a valid P-256 point
    #[error("invalid public key")]
    InvalidPublicKey,

    /// Device confirmation did not match its random value
    #[error("confirmation mismatch")]
    ConfirmationMismatch,

    /// Provisioning data could not be authenticated
    #[error("provisioning data encryption failure")]
    EncryptionFailure,

    /// Device sent a Failed PDU with this code
    #[error("device reported failure: {0}")]
    DeviceReported(FailureCode),

    /// PDU not valid in the current state
    #[error("unexpected {pdu:?} pdu in state {state}")]
    UnexpectedPdu {
        /// Session state when the PDU arrived
        state: ProvisioningState,
        /// Type of the offending PDU
        pdu: PduType,
    },

    /// Provisioning data requested before an address was assigned
    #[error("no unicast address assigned")]
    NoAddressAssigned,

    /// A step did not complete in time
    #[error("timed out in state {state}")]
    Timeout {
        /// State the session was waiting in
        state: ProvisioningState,
    },

    /// Session was cancelled
    #[error("provisioning cancelled")]
    Cancelled,

    /// Another session is already running for this device
    #[error("session already in progress for device {0}")]
    SessionInProgress(Uuid),

    /// Operation not allowed in the current state
    #[error("cannot {operation} in state {state}")]
    InvalidState {
        /// Current state
        state: ProvisioningState,
        /// Attempted operation
        operation: &'static str,
    },

    /// Network key to distribute is not installed
    #[error("network key {0} is not installed")]
    UnknownNetworkKey(u16),

    /// Bearer link closed
    #[error("bearer closed")]
    BearerClosed,

    /// PDU encoding error
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// Cryptographic failure
    #[error("security error: {0}")]
    Security(SecurityError),

    /// Address allocation failure
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}

impl From<SecurityError> for ProvisioningError {
    fn from(err: SecurityError) -> Self {
        match err {
            SecurityError::InvalidPublicKey => ProvisioningError::InvalidPublicKey,
            SecurityError::AuthenticationFailed | SecurityError::EncryptionFailure => {
                ProvisioningError::EncryptionFailure
            }
            other => ProvisioningError::Security(other),
        }
    }
}

impl ProvisioningError {
    /// Map a device Failed code onto the local error taxonomy
    pub fn from_failure_code(code: FailureCode) -> Self {
        match code {
            FailureCode::DecryptionFailed => ProvisioningError::EncryptionFailure,
            FailureCode::ConfirmationFailed => ProvisioningError::ConfirmationMismatch,
            other => ProvisioningError::DeviceReported(other),
        }
    }
}

/// Errors from the mesh message pipeline
#[derive(Error, Debug)]
pub enum MessageError {
    /// Sequence number not newer than the last one seen from `src`
    #[error("replayed pdu from 0x{src:04X} seq {seq}")]
    Replay {
        /// Source address
        src: u16,
        /// Rejected sequence number
        seq: u32,
    },

    /// Local provisioner has no unicast address
    #[error("provisioner has no unicast address")]
    NoSourceAddress,

    /// PDU encoding error
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// Encryption or authentication failure
    #[error("security error: {0}")]
    Security(#[from] SecurityError),

    /// Sequence number allocation failure
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}
