//! Key types. Every type holding key bytes zeroizes them on drop and redacts
//! them from `Debug` output.

use crate::crypto::{k1, k2, k3, k4, s1, Block};
use crate::error::SecurityError;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Largest 12-bit global key index
pub const MAX_KEY_INDEX: u16 = 0x0FFF;

/// 128-bit secret key
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct KeyBytes(Block);

impl KeyBytes {
    /// Wrap raw key bytes
    pub fn new(bytes: Block) -> Self {
        Self(bytes)
    }

    /// Generate a random key
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Parse a 32-digit hex string
    pub fn from_hex(s: &str) -> Result<Self, SecurityError> {
        let mut bytes = [0u8; 16];
        hex::decode_to_slice(s.trim(), &mut bytes)
            .map_err(|_| SecurityError::Malformed("key must be 32 hex digits"))?;
        Ok(Self(bytes))
    }

    /// Hex encoding of the key
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &Block {
        &self.0
    }
}

impl fmt::Debug for KeyBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyBytes(<redacted>)")
    }
}

impl Serialize for KeyBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for KeyBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut s = String::deserialize(deserializer)?;
        let key = KeyBytes::from_hex(&s).map_err(serde::de::Error::custom);
        s.zeroize();
        key
    }
}

/// Key refresh procedure phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KeyRefreshPhase {
    /// Single key in use
    #[default]
    Normal,
    /// New key distributed, old key still used for transmission
    KeyDistribution,
    /// New key used for transmission, old key still accepted
    UsingNewKeys,
}

fn check_index(index: u16) -> Result<(), SecurityError> {
    if index > MAX_KEY_INDEX {
        return Err(SecurityError::InvalidKeyIndex(index));
    }
    Ok(())
}

/// Network key with its key refresh slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkKey {
    index: u16,
    name: String,
    key: KeyBytes,
    old_key: Option<KeyBytes>,
    phase: KeyRefreshPhase,
}

impl NetworkKey {
    /// Create a network key
    pub fn new(index: u16, name: impl Into<String>, key: KeyBytes) -> Result<Self, SecurityError> {
        check_index(index)?;
        Ok(Self {
            index,
            name: name.into(),
            key,
            old_key: None,
            phase: KeyRefreshPhase::Normal,
        })
    }

    /// Create a network key with random key bytes
    pub fn generate(index: u16, name: impl Into<String>) -> Result<Self, SecurityError> {
        Self::new(index, name, KeyBytes::generate())
    }

    /// Global key index
    pub fn index(&self) -> u16 {
        self.index
    }

    /// Display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current (newest) key
    pub fn key(&self) -> &KeyBytes {
        &self.key
    }

    /// Previous key during key refresh
    pub fn old_key(&self) -> Option<&KeyBytes> {
        self.old_key.as_ref()
    }

    /// Key refresh phase
    pub fn phase(&self) -> KeyRefreshPhase {
        self.phase
    }

    /// Key used to originate traffic in the current phase
    pub fn transmit_key(&self) -> &KeyBytes {
        match (self.phase, &self.old_key) {
            (KeyRefreshPhase::KeyDistribution, Some(old)) => old,
            _ => &self.key,
        }
    }

    /// Start key refresh: the current key moves to the old slot
    pub fn begin_key_refresh(&mut self, new_key: KeyBytes) -> Result<(), SecurityError> {
        if self.phase != KeyRefreshPhase::Normal {
            return Err(SecurityError::KeyRefresh(self.phase));
        }
        let old = std::mem::replace(&mut self.key, new_key);
        self.old_key = Some(old);
        self.phase = KeyRefreshPhase::KeyDistribution;
        Ok(())
    }

    /// Switch transmission to the new key
    pub fn use_new_key(&mut self) -> Result<(), SecurityError> {
        if self.phase != KeyRefreshPhase::KeyDistribution {
            return Err(SecurityError::KeyRefresh(self.phase));
        }
        self.phase = KeyRefreshPhase::UsingNewKeys;
        Ok(())
    }

    /// Revoke the old key and return to normal operation
    pub fn finish_key_refresh(&mut self) -> Result<(), SecurityError> {
        if self.phase == KeyRefreshPhase::Normal {
            return Err(SecurityError::KeyRefresh(self.phase));
        }
        self.old_key = None;
        self.phase = KeyRefreshPhase::Normal;
        Ok(())
    }
}

/// Material derived from a network key
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct NetworkKeyMaterial {
    /// 7-bit network identifier
    pub nid: u8,
    /// Network PDU encryption key
    pub encryption_key: Block,
    /// Header obfuscation key
    pub privacy_key: Block,
    /// Public 64-bit network id
    pub network_id: [u8; 8],
    /// Node identity key
    pub identity_key: Block,
    /// Secure network beacon key
    pub beacon_key: Block,
}

impl NetworkKeyMaterial {
    /// Derive all material from a network key
    pub fn derive(key: &KeyBytes) -> Self {
        let n = key.as_bytes();
        let (nid, encryption_key, privacy_key) = k2(n, &[0x00]);
        Self {
            nid,
            encryption_key,
            privacy_key,
            network_id: k3(n),
            identity_key: k1(n, &s1(b"nkik"), b"id128\x01"),
            beacon_key: k1(n, &s1(b"nkbk"), b"id128\x01"),
        }
    }
}

impl fmt::Debug for NetworkKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkKeyMaterial")
            .field("nid", &format_args!("0x{:02X}", self.nid))
            .field("network_id", &hex::encode(self.network_id))
            .finish_non_exhaustive()
    }
}

/// Derive NID, encryption, privacy, identity and beacon keys and the network id
pub fn derive_network_keys(key: &KeyBytes) -> NetworkKeyMaterial {
    NetworkKeyMaterial::derive(key)
}

/// Application key bound to a network key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationKey {
    index: u16,
    bound_net_key_index: u16,
    name: String,
    key: KeyBytes,
    old_key: Option<KeyBytes>,
    aid: u8,
    old_aid: Option<u8>,
}

impl ApplicationKey {
    /// Create an application key bound to `bound_net_key_index`
    pub fn new(
        index: u16,
        bound_net_key_index: u16,
        name: impl Into<String>,
        key: KeyBytes,
    ) -> Result<Self, SecurityError> {
        check_index(index)?;
        check_index(bound_net_key_index)?;
        let aid = k4(key.as_bytes());
        Ok(Self {
            index,
            bound_net_key_index,
            name: name.into(),
            key,
            old_key: None,
            aid,
            old_aid: None,
        })
    }

    /// Create an application key with random key bytes
    pub fn generate(
        index: u16,
        bound_net_key_index: u16,
        name: impl Into<String>,
    ) -> Result<Self, SecurityError> {
        Self::new(index, bound_net_key_index, name, KeyBytes::generate())
    }

    /// Global key index
    pub fn index(&self) -> u16 {
        self.index
    }

    /// Index of the bound network key
    pub fn bound_net_key_index(&self) -> u16 {
        self.bound_net_key_index
    }

    /// Display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current key
    pub fn key(&self) -> &KeyBytes {
        &self.key
    }

    /// Previous key during key refresh
    pub fn old_key(&self) -> Option<&KeyBytes> {
        self.old_key.as_ref()
    }

    /// Application key identifier of the current key
    pub fn aid(&self) -> u8 {
        self.aid
    }

    /// Application key identifier of the old key
    pub fn old_aid(&self) -> Option<u8> {
        self.old_aid
    }

    /// Replace the key, keeping the previous one for reception
    pub fn update(&mut self, new_key: KeyBytes) {
        let new_aid = k4(new_key.as_bytes());
        let old = std::mem::replace(&mut self.key, new_key);
        self.old_key = Some(old);
        self.old_aid = Some(self.aid);
        self.aid = new_aid;
    }

    /// Drop the old key
    pub fn revoke_old(&mut self) {
        self.old_key = None;
        self.old_aid = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_network_key_material() {
        let key = KeyBytes::from_hex("7dd7364cd842ad18c17c2b820c84c3d6").unwrap();
        let material = derive_network_keys(&key);
        assert_eq!(material.nid, 0x68);
        assert_eq!(
            hex::encode(material.encryption_key),
            "0953fa93e7caac9638f58820220a398e"
        );
        assert_eq!(
            hex::encode(material.privacy_key),
            "8b84eedec100067d670971dd2aa700cf"
        );
        assert_eq!(hex::encode(material.network_id), "3ecaff672f673370");
    }

    #[test]
    fn test_sample_application_key_aid() {
        let key = KeyBytes::from_hex("63964771734fbd76e3b40519d1d94a48").unwrap();
        let app_key = ApplicationKey::new(0, 0, "Sample", key).unwrap();
        assert_eq!(app_key.aid(), 0x26);
    }

    #[test]
    fn test_key_index_range() {
        assert!(NetworkKey::generate(0x0FFF, "Max").is_ok());
        assert_eq!(
            NetworkKey::generate(0x1000, "Too big").unwrap_err(),
            SecurityError::InvalidKeyIndex(0x1000)
        );
        assert!(ApplicationKey::generate(1, 0x1000, "Bad binding").is_err());
    }

    #[test]
    fn test_key_refresh_phases() {
        let original = KeyBytes::new([1; 16]);
        let mut key = NetworkKey::new(0, "Primary", original.clone()).unwrap();
        assert!(key.use_new_key().is_err());

        key.begin_key_refresh(KeyBytes::new([2; 16])).unwrap();
        assert_eq!(key.phase(), KeyRefreshPhase::KeyDistribution);
        assert_eq!(key.transmit_key(), &original);
        assert!(key.begin_key_refresh(KeyBytes::new([3; 16])).is_err());

        key.use_new_key().unwrap();
        assert_eq!(key.transmit_key(), &KeyBytes::new([2; 16]));
        assert!(key.old_key().is_some());

        key.finish_key_refresh().unwrap();
        assert_eq!(key.phase(), KeyRefreshPhase::Normal);
        assert!(key.old_key().is_none());
    }

    #[test]
    fn test_app_key_update_tracks_old_aid() {
        let mut key = ApplicationKey::generate(1, 0, "Lights").unwrap();
        let first_aid = key.aid();
        key.update(KeyBytes::from_hex("63964771734fbd76e3b40519d1d94a48").unwrap());
        assert_eq!(key.aid(), 0x26);
        assert_eq!(key.old_aid(), Some(first_aid));
        key.revoke_old();
        assert!(key.old_key().is_none());
    }

    #[test]
    fn test_debug_redacts_and_serde_hex() {
        let key = NetworkKey::new(
            3,
            "Net",
            KeyBytes::from_hex("7dd7364cd842ad18c17c2b820c84c3d6").unwrap(),
        )
        .unwrap();
        assert!(!format!("{:?}", key).contains("7dd7"));

        let json = serde_json::to_string(&key).unwrap();
        assert!(json.contains("7dd7364cd842ad18c17c2b820c84c3d6"));
        let back: NetworkKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }
}
