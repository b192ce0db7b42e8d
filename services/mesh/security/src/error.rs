//! Security error types.

use crate::keys::KeyRefreshPhase;
use mesh_wire::WireError;
use thiserror::Error;

/// Security layer errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecurityError {
    /// No candidate key authenticated the PDU
    #[error("authentication failed")]
    AuthenticationFailed,

    /// Peer public key is not a valid P-256 point
    #[error("invalid public key")]
    InvalidPublicKey,

    /// AES-CCM refused to encrypt
    #[error("encryption failure")]
    EncryptionFailure,

    /// Key index outside 0..=0xFFF
    #[error("invalid key index {0}")]
    InvalidKeyIndex(u16),

    /// No key installed under the given index or address
    #[error("unknown {kind} key {index}")]
    UnknownKey {
        /// Key class
        kind: &'static str,
        /// Key index or device address
        index: u16,
    },

    /// Key refresh step not allowed in the current phase
    #[error("key refresh step not allowed in phase {0:?}")]
    KeyRefresh(KeyRefreshPhase),

    /// Malformed key material or PDU
    #[error("malformed: {0}")]
    Malformed(&'static str),

    /// Wire layout error
    #[error("wire error: {0}")]
    Wire(#[from] WireError),
}
