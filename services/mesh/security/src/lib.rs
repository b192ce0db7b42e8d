//! Bluetooth Mesh security: key derivation, network and application PDU
//! encryption, and the cryptography behind the provisioning handshake.
//!
//! All functions here are stateless and safe to call from any task. The
//! [`MeshSecurity`] key ring is the only place long-lived key material is
//! kept; removing a key drops its single copy, which zeroizes it.
//!
//! ## Key Hierarchy
//!
//! ```text
//! NetKey --k2--> NID, EncryptionKey, PrivacyKey
//!        --k3--> Network ID
//!        --k1--> IdentityKey, BeaconKey
//! AppKey --k4--> AID
//! ECDH   --k1--> ConfirmationKey, SessionKey, SessionNonce, DeviceKey
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod application;
pub mod crypto;
pub mod error;
pub mod keyring;
pub mod keys;
pub mod network;
pub mod provisioning;

// Re-export main types
pub use application::{decrypt_access_payload, encrypt_access_payload, AccessKey, AccessMeta};
pub use error::SecurityError;
pub use keyring::{AccessKeySelector, MeshSecurity, ReceivedNetworkPdu, SealedAccess};
pub use keys::{
    derive_network_keys, ApplicationKey, KeyBytes, KeyRefreshPhase, NetworkKey,
    NetworkKeyMaterial, MAX_KEY_INDEX,
};
pub use network::{decrypt_network_pdu, encrypt_network_pdu};
pub use provisioning::{EcdhKeyPair, EcdhSecret, SessionKeys};
