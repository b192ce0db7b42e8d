//! Provisioning cryptography: ECDH, confirmation values and session keys.
//!
//! ```text
//! ConfirmationSalt = s1(Invite || Capabilities || Start || PubKeyProvisioner || PubKeyDevice)
//! ConfirmationKey  = k1(ECDHSecret, ConfirmationSalt, "prck")
//! Confirmation     = AES-CMAC(ConfirmationKey, Random || AuthValue)
//! ProvisioningSalt = s1(ConfirmationSalt || RandomProvisioner || RandomDevice)
//! SessionKey       = k1(ECDHSecret, ProvisioningSalt, "prsk")
//! SessionNonce     = k1(ECDHSecret, ProvisioningSalt, "prsn")[3..16]
//! DeviceKey        = k1(ECDHSecret, ProvisioningSalt, "prdk")
//! ```

use crate::crypto::{aes_cmac_parts, ccm_decrypt, ccm_encrypt, k1, s1, Block, NONCE_SIZE};
use crate::error::SecurityError;
use crate::keys::KeyBytes;
use mesh_wire::provisioning::{
    CAPABILITIES_SIZE, PROVISIONING_DATA_MIC_SIZE, PROVISIONING_DATA_SIZE, PUBLIC_KEY_SIZE,
    START_SIZE,
};
use mesh_wire::ProvisioningData;
use p256::ecdh::EphemeralSecret;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::PublicKey;
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of the confirmation inputs
pub const CONFIRMATION_INPUTS_SIZE: usize = 1 + CAPABILITIES_SIZE + START_SIZE + 2 * PUBLIC_KEY_SIZE;

/// Ephemeral P-256 key pair for one provisioning session
pub struct EcdhKeyPair {
    secret: EphemeralSecret,
    public: [u8; PUBLIC_KEY_SIZE],
}

impl EcdhKeyPair {
    /// Generate a fresh key pair
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random(&mut OsRng);
        let point = secret.public_key().to_encoded_point(false);
        let mut public = [0u8; PUBLIC_KEY_SIZE];
        // Uncompressed SEC1: 0x04 || X || Y
        public.copy_from_slice(&point.as_bytes()[1..]);
        Self { secret, public }
    }

    /// Public key as X || Y
    pub fn public_key(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.public
    }

    /// Compute the shared secret with the peer's X || Y public key
    pub fn shared_secret(&self, peer: &[u8; PUBLIC_KEY_SIZE]) -> Result<EcdhSecret, SecurityError> {
        if peer == &self.public {
            return Err(SecurityError::InvalidPublicKey);
        }
        let peer = parse_public_key(peer)?;
        let shared = self.secret.diffie_hellman(&peer);
        let mut out = [0u8; 32];
        out.copy_from_slice(shared.raw_secret_bytes());
        Ok(EcdhSecret(out))
    }
}

impl fmt::Debug for EcdhKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EcdhKeyPair")
            .field("public", &hex::encode(self.public))
            .finish_non_exhaustive()
    }
}

/// Validate an X || Y encoded point
pub fn parse_public_key(raw: &[u8; PUBLIC_KEY_SIZE]) -> Result<PublicKey, SecurityError> {
    let mut sec1 = [0u8; PUBLIC_KEY_SIZE + 1];
    sec1[0] = 0x04;
    sec1[1..].copy_from_slice(raw);
    PublicKey::from_sec1_bytes(&sec1).map_err(|_| SecurityError::InvalidPublicKey)
}

/// 256-bit ECDH shared secret
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EcdhSecret([u8; 32]);

impl EcdhSecret {
    /// Raw secret bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for EcdhSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EcdhSecret(<redacted>)")
    }
}

/// Fresh 128-bit provisioning random
pub fn generate_random() -> Block {
    let mut random = [0u8; 16];
    OsRng.fill_bytes(&mut random);
    random
}

/// Concatenate the confirmation inputs
pub fn confirmation_inputs(
    invite: &[u8],
    capabilities: &[u8],
    start: &[u8],
    provisioner_public_key: &[u8; PUBLIC_KEY_SIZE],
    device_public_key: &[u8; PUBLIC_KEY_SIZE],
) -> Result<Vec<u8>, SecurityError> {
    if invite.len() != 1 || capabilities.len() != CAPABILITIES_SIZE || start.len() != START_SIZE {
        return Err(SecurityError::Malformed("confirmation input parameter sizes"));
    }
    let mut inputs = Vec::with_capacity(CONFIRMATION_INPUTS_SIZE);
    inputs.extend_from_slice(invite);
    inputs.extend_from_slice(capabilities);
    inputs.extend_from_slice(start);
    inputs.extend_from_slice(provisioner_public_key);
    inputs.extend_from_slice(device_public_key);
    Ok(inputs)
}

/// ConfirmationSalt
pub fn confirmation_salt(inputs: &[u8]) -> Block {
    s1(inputs)
}

/// ConfirmationKey
pub fn confirmation_key(secret: &EcdhSecret, confirmation_salt: &Block) -> KeyBytes {
    KeyBytes::new(k1(secret.as_bytes(), confirmation_salt, b"prck"))
}

/// Confirmation value for a random and auth value
pub fn confirmation_value(key: &KeyBytes, random: &Block, auth_value: &Block) -> Block {
    aes_cmac_parts(key.as_bytes(), &[random, auth_value])
}

/// ProvisioningSalt
pub fn provisioning_salt(
    confirmation_salt: &Block,
    provisioner_random: &Block,
    device_random: &Block,
) -> Block {
    let mut input = [0u8; 48];
    input[..16].copy_from_slice(confirmation_salt);
    input[16..32].copy_from_slice(provisioner_random);
    input[32..].copy_from_slice(device_random);
    s1(&input)
}

/// Keys derived once both randoms are known
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    session_key: KeyBytes,
    session_nonce: [u8; NONCE_SIZE],
    device_key: KeyBytes,
}

impl SessionKeys {
    /// Derive session key, nonce and device key
    pub fn derive(secret: &EcdhSecret, provisioning_salt: &Block) -> Self {
        let n = secret.as_bytes();
        let nonce_block = k1(n, provisioning_salt, b"prsn");
        let mut session_nonce = [0u8; NONCE_SIZE];
        session_nonce.copy_from_slice(&nonce_block[16 - NONCE_SIZE..]);
        Self {
            session_key: KeyBytes::new(k1(n, provisioning_salt, b"prsk")),
            session_nonce,
            device_key: KeyBytes::new(k1(n, provisioning_salt, b"prdk")),
        }
    }

    /// Session key
    pub fn session_key(&self) -> &KeyBytes {
        &self.session_key
    }

    /// Session nonce
    pub fn session_nonce(&self) -> &[u8; NONCE_SIZE] {
        &self.session_nonce
    }

    /// Device key shared with the new node
    pub fn device_key(&self) -> &KeyBytes {
        &self.device_key
    }
}

impl fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKeys(<redacted>)")
    }
}

/// Encrypted provisioning data and its MIC
pub type EncryptedProvisioningData = (
    [u8; PROVISIONING_DATA_SIZE],
    [u8; PROVISIONING_DATA_MIC_SIZE],
);

/// Encrypt provisioning data with the session key
pub fn encrypt_provisioning_data(
    keys: &SessionKeys,
    data: &ProvisioningData,
) -> Result<EncryptedProvisioningData, SecurityError> {
    let mut plain = data.encode();
    let sealed = ccm_encrypt(
        keys.session_key.as_bytes(),
        &keys.session_nonce,
        &plain,
        PROVISIONING_DATA_MIC_SIZE,
    );
    plain.zeroize();
    let sealed = sealed?;

    let mut encrypted = [0u8; PROVISIONING_DATA_SIZE];
    let mut mic = [0u8; PROVISIONING_DATA_MIC_SIZE];
    encrypted.copy_from_slice(&sealed[..PROVISIONING_DATA_SIZE]);
    mic.copy_from_slice(&sealed[PROVISIONING_DATA_SIZE..]);
    Ok((encrypted, mic))
}

/// Decrypt provisioning data; fails with `AuthenticationFailed` on MIC mismatch
pub fn decrypt_provisioning_data(
    keys: &SessionKeys,
    encrypted: &[u8; PROVISIONING_DATA_SIZE],
    mic: &[u8; PROVISIONING_DATA_MIC_SIZE],
) -> Result<ProvisioningData, SecurityError> {
    let mut sealed = Vec::with_capacity(PROVISIONING_DATA_SIZE + PROVISIONING_DATA_MIC_SIZE);
    sealed.extend_from_slice(encrypted);
    sealed.extend_from_slice(mic);

    let mut plain = ccm_decrypt(
        keys.session_key.as_bytes(),
        &keys.session_nonce,
        &sealed,
        PROVISIONING_DATA_MIC_SIZE,
    )?;
    let data = ProvisioningData::decode(&plain);
    plain.zeroize();
    Ok(data?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::constant_time_eq;
    use mesh_wire::ProvisioningFlags;

    #[test]
    fn test_ecdh_agreement() {
        let provisioner = EcdhKeyPair::generate();
        let device = EcdhKeyPair::generate();
        let a = provisioner.shared_secret(device.public_key()).unwrap();
        let b = device.shared_secret(provisioner.public_key()).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_rejects_invalid_and_own_public_key() {
        let pair = EcdhKeyPair::generate();
        assert_eq!(
            pair.shared_secret(&[0x01; PUBLIC_KEY_SIZE]).unwrap_err(),
            SecurityError::InvalidPublicKey
        );
        assert_eq!(
            pair.shared_secret(&pair.public_key().clone()).unwrap_err(),
            SecurityError::InvalidPublicKey
        );
    }

    #[test]
    fn test_confirmation_inputs_sizes() {
        let pk = [0u8; PUBLIC_KEY_SIZE];
        let inputs = confirmation_inputs(&[5], &[0; 11], &[0; 5], &pk, &pk).unwrap();
        assert_eq!(inputs.len(), CONFIRMATION_INPUTS_SIZE);
        assert!(confirmation_inputs(&[5], &[0; 10], &[0; 5], &pk, &pk).is_err());
    }

    #[test]
    fn test_both_sides_agree_on_confirmation_and_keys() {
        let provisioner = EcdhKeyPair::generate();
        let device = EcdhKeyPair::generate();
        let inputs = confirmation_inputs(
            &[0],
            &[1, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0],
            &[0; 5],
            provisioner.public_key(),
            device.public_key(),
        )
        .unwrap();
        let salt = confirmation_salt(&inputs);

        let secret_p = provisioner.shared_secret(device.public_key()).unwrap();
        let secret_d = device.shared_secret(provisioner.public_key()).unwrap();
        let key_p = confirmation_key(&secret_p, &salt);
        let key_d = confirmation_key(&secret_d, &salt);

        let random = generate_random();
        let auth = [0u8; 16];
        assert!(constant_time_eq(
            &confirmation_value(&key_p, &random, &auth),
            &confirmation_value(&key_d, &random, &auth)
        ));
        assert_ne!(
            confirmation_value(&key_p, &random, &auth),
            confirmation_value(&key_p, &random, &[1; 16])
        );

        let prov_salt = provisioning_salt(&salt, &generate_random(), &generate_random());
        let keys_p = SessionKeys::derive(&secret_p, &prov_salt);
        let keys_d = SessionKeys::derive(&secret_d, &prov_salt);
        assert_eq!(keys_p.device_key(), keys_d.device_key());
        assert_eq!(keys_p.session_nonce(), keys_d.session_nonce());

        let data = ProvisioningData {
            network_key: [0x42; 16],
            key_index: 1,
            flags: ProvisioningFlags::empty(),
            iv_index: 0,
            unicast_address: 0x0010,
        };
        let (encrypted, mic) = encrypt_provisioning_data(&keys_p, &data).unwrap();
        assert_eq!(decrypt_provisioning_data(&keys_d, &encrypted, &mic).unwrap(), data);

        let mut bad_mic = mic;
        bad_mic[0] ^= 0xFF;
        assert_eq!(
            decrypt_provisioning_data(&keys_d, &encrypted, &bad_mic).unwrap_err(),
            SecurityError::AuthenticationFailed
        );
    }
}
