//! Transient key material of one provisioning handshake.
//!
//! A context lives inside its session and is dropped the moment the session
//! completes, fails or is cancelled; dropping zeroizes every field.

use mesh_security::crypto::Block;
use mesh_security::{EcdhKeyPair, EcdhSecret, KeyBytes, SessionKeys};
use mesh_wire::provisioning::PUBLIC_KEY_SIZE;
use mesh_wire::AuthenticationMethod;
use zeroize::{Zeroize, ZeroizeOnDrop};

#[derive(Default, Zeroize, ZeroizeOnDrop)]
pub(crate) struct ProvisioningContext {
    /// Ephemeral key pair; the p256 scalar clears itself on drop
    #[zeroize(skip)]
    pub key_pair: Option<EcdhKeyPair>,
    #[zeroize(skip)]
    pub auth_method: Option<AuthenticationMethod>,
    pub invite: Vec<u8>,
    pub capabilities: Vec<u8>,
    pub start: Vec<u8>,
    pub peer_public_key: Option<[u8; PUBLIC_KEY_SIZE]>,
    pub auth_value: Block,
    pub own_random: Block,
    pub peer_random: Option<Block>,
    pub confirmation_salt: Block,
    pub confirmation_key: Option<KeyBytes>,
    pub peer_confirmation: Option<Block>,
    pub secret: Option<EcdhSecret>,
    pub session_keys: Option<SessionKeys>,
}

impl ProvisioningContext {
    pub fn new() -> Self {
        Self::default()
    }
}
