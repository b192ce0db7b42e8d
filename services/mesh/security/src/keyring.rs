//! Key ring holding the only in-memory copies of network, application and
//! device keys.

use crate::application::{decrypt_access_payload, encrypt_access_payload, AccessKey, AccessMeta};
use crate::error::SecurityError;
use crate::keys::{ApplicationKey, KeyBytes, KeyRefreshPhase, NetworkKey, NetworkKeyMaterial};
use crate::network::{decrypt_with, effective_iv_index, encrypt_network_pdu, parse_network_header};
use bytes::Bytes;
use dashmap::DashMap;
use mesh_wire::NetworkPdu;
use tracing::{debug, info, trace};

/// Network key with material for both key refresh slots
struct NetworkKeyEntry {
    key: NetworkKey,
    material: NetworkKeyMaterial,
    old_material: Option<NetworkKeyMaterial>,
}

impl NetworkKeyEntry {
    fn new(key: NetworkKey) -> Self {
        let material = NetworkKeyMaterial::derive(key.key());
        let old_material = key.old_key().map(NetworkKeyMaterial::derive);
        Self {
            key,
            material,
            old_material,
        }
    }

    fn transmit_material(&self) -> &NetworkKeyMaterial {
        match (self.key.phase(), &self.old_material) {
            (KeyRefreshPhase::KeyDistribution, Some(old)) => old,
            _ => &self.material,
        }
    }
}

/// Which key secures an outgoing access message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKeySelector {
    /// Application key by global index
    Application(u16),
    /// Device key of the node at this unicast address
    Device(u16),
}

/// Upper transport PDU with the lower transport key fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedAccess {
    /// Encrypted payload || TransMIC
    pub upper_pdu: Bytes,
    /// Application key flag
    pub akf: bool,
    /// Application key identifier (0 for device keys)
    pub aid: u8,
}

/// Result of decrypting a network PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedNetworkPdu {
    /// Clear network fields
    pub pdu: NetworkPdu,
    /// Index of the network key that authenticated it
    pub net_key_index: u16,
    /// IV index the PDU was sent with
    pub iv_index: u32,
}

/// Concurrent key ring
#[derive(Default)]
pub struct MeshSecurity {
    network_keys: DashMap<u16, NetworkKeyEntry>,
    app_keys: DashMap<u16, ApplicationKey>,
    device_keys: DashMap<u16, KeyBytes>,
}

impl MeshSecurity {
    /// Create an empty key ring
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace a network key
    pub fn install_network_key(&self, key: NetworkKey) {
        let entry = NetworkKeyEntry::new(key);
        info!(
            "Installed network key index={} nid=0x{:02X} network_id={}",
            entry.key.index(),
            entry.material.nid,
            hex::encode(entry.material.network_id)
        );
        self.network_keys.insert(entry.key.index(), entry);
    }

    /// Copy of a network key, for persistence
    pub fn network_key(&self, index: u16) -> Option<NetworkKey> {
        self.network_keys.get(&index).map(|e| e.key.clone())
    }

    /// Installed network key indexes in ascending order
    pub fn network_key_indexes(&self) -> Vec<u16> {
        let mut indexes: Vec<u16> = self.network_keys.iter().map(|e| *e.key()).collect();
        indexes.sort_unstable();
        indexes
    }

    /// NID and network id of an installed key
    pub fn network_identity(&self, index: u16) -> Option<(u8, [u8; 8])> {
        self.network_keys
            .get(&index)
            .map(|e| (e.material.nid, e.material.network_id))
    }

    /// Remove a network key and every application key bound to it
    pub fn remove_network_key(&self, index: u16) -> Result<(), SecurityError> {
        self.network_keys
            .remove(&index)
            .ok_or(SecurityError::UnknownKey {
                kind: "network",
                index,
            })?;
        self.app_keys.retain(|_, app| app.bound_net_key_index() != index);
        info!("Removed network key index={}", index);
        Ok(())
    }

    /// Start key refresh for a network key
    pub fn begin_key_refresh(&self, index: u16, new_key: KeyBytes) -> Result<(), SecurityError> {
        self.update_network_key(index, |key| key.begin_key_refresh(new_key))
    }

    /// Move a network key to the next key refresh phase
    pub fn advance_key_refresh(&self, index: u16) -> Result<KeyRefreshPhase, SecurityError> {
        self.update_network_key(index, |key| match key.phase() {
            KeyRefreshPhase::KeyDistribution => key.use_new_key(),
            _ => key.finish_key_refresh(),
        })?;
        self.network_keys
            .get(&index)
            .map(|e| e.key.phase())
            .ok_or(SecurityError::UnknownKey {
                kind: "network",
                index,
            })
    }

    fn update_network_key<F>(&self, index: u16, f: F) -> Result<(), SecurityError>
    where
        F: FnOnce(&mut NetworkKey) -> Result<(), SecurityError>,
    {
        let mut entry = self
            .network_keys
            .get_mut(&index)
            .ok_or(SecurityError::UnknownKey {
                kind: "network",
                index,
            })?;
        let mut key = entry.key.clone();
        f(&mut key)?;
        debug!("Network key index={} now in phase {:?}", index, key.phase());
        *entry = NetworkKeyEntry::new(key);
        Ok(())
    }

    /// Install or replace an application key; its network key must exist
    pub fn install_app_key(&self, key: ApplicationKey) -> Result<(), SecurityError> {
        let bound = key.bound_net_key_index();
        if !self.network_keys.contains_key(&bound) {
            return Err(SecurityError::UnknownKey {
                kind: "network",
                index: bound,
            });
        }
        info!(
            "Installed application key index={} aid=0x{:02X} bound to {}",
            key.index(),
            key.aid(),
            bound
        );
        self.app_keys.insert(key.index(), key);
        Ok(())
    }

    /// Copy of an application key
    pub fn app_key(&self, index: u16) -> Option<ApplicationKey> {
        self.app_keys.get(&index).map(|k| k.value().clone())
    }

    /// Remove an application key
    pub fn remove_app_key(&self, index: u16) -> Result<(), SecurityError> {
        self.app_keys
            .remove(&index)
            .map(|_| ())
            .ok_or(SecurityError::UnknownKey {
                kind: "application",
                index,
            })
    }

    /// Install the device key of a provisioned node
    pub fn install_device_key(&self, address: u16, key: KeyBytes) {
        debug!("Installed device key for 0x{:04X}", address);
        self.device_keys.insert(address, key);
    }

    /// Whether a device key is installed for `address`
    pub fn has_device_key(&self, address: u16) -> bool {
        self.device_keys.contains_key(&address)
    }

    /// Remove a device key
    pub fn remove_device_key(&self, address: u16) -> Result<(), SecurityError> {
        self.device_keys
            .remove(&address)
            .map(|_| ())
            .ok_or(SecurityError::UnknownKey {
                kind: "device",
                index: address,
            })
    }

    /// Drop every key
    pub fn wipe(&self) {
        self.network_keys.clear();
        self.app_keys.clear();
        self.device_keys.clear();
        info!("Key ring wiped");
    }

    /// Encrypt a network PDU with the transmit key of `net_key_index`
    pub fn encrypt_network(
        &self,
        net_key_index: u16,
        iv_index: u32,
        pdu: &NetworkPdu,
    ) -> Result<Bytes, SecurityError> {
        let entry = self
            .network_keys
            .get(&net_key_index)
            .ok_or(SecurityError::UnknownKey {
                kind: "network",
                index: net_key_index,
            })?;
        encrypt_network_pdu(entry.transmit_material(), iv_index, pdu)
    }

    /// Decrypt a network PDU with any installed key, old slots included
    pub fn decrypt_network(
        &self,
        bytes: &[u8],
        iv_index: u32,
    ) -> Result<ReceivedNetworkPdu, SecurityError> {
        let (ivi, nid) = parse_network_header(bytes)?;
        let iv_index = effective_iv_index(ivi, iv_index)?;

        for entry in self.network_keys.iter() {
            let slots = std::iter::once(&entry.material).chain(entry.old_material.as_ref());
            for material in slots.filter(|m| m.nid == nid) {
                if let Ok(pdu) = decrypt_with(material, bytes, iv_index) {
                    return Ok(ReceivedNetworkPdu {
                        pdu,
                        net_key_index: entry.key.index(),
                        iv_index,
                    });
                }
            }
        }

        trace!("No network key authenticated NID 0x{:02X}", nid);
        Err(SecurityError::AuthenticationFailed)
    }

    /// Encrypt an access PDU with an application or device key
    pub fn encrypt_access(
        &self,
        selector: AccessKeySelector,
        meta: &AccessMeta,
        access_pdu: &[u8],
    ) -> Result<SealedAccess, SecurityError> {
        match selector {
            AccessKeySelector::Application(index) => {
                let entry = self.app_keys.get(&index).ok_or(SecurityError::UnknownKey {
                    kind: "application",
                    index,
                })?;
                let app = entry.value();
                let upper_pdu =
                    encrypt_access_payload(AccessKey::Application(app.key()), meta, access_pdu)?;
                Ok(SealedAccess {
                    upper_pdu,
                    akf: true,
                    aid: app.aid(),
                })
            }
            AccessKeySelector::Device(address) => {
                let key = self
                    .device_keys
                    .get(&address)
                    .ok_or(SecurityError::UnknownKey {
                        kind: "device",
                        index: address,
                    })?;
                let upper_pdu =
                    encrypt_access_payload(AccessKey::Device(key.value()), meta, access_pdu)?;
                Ok(SealedAccess {
                    upper_pdu,
                    akf: false,
                    aid: 0,
                })
            }
        }
    }

    /// Decrypt an upper transport PDU.
    ///
    /// With AKF set every application key (current or old) whose AID matches
    /// is tried; otherwise the device key of the source, then of the
    /// destination.
    pub fn decrypt_access(
        &self,
        akf: bool,
        aid: u8,
        meta: &AccessMeta,
        upper_pdu: &[u8],
    ) -> Result<(Bytes, AccessKeySelector), SecurityError> {
        if akf {
            for entry in self.app_keys.iter() {
                let app = entry.value();
                let slots = std::iter::once((app.aid(), Some(app.key())))
                    .chain(app.old_aid().map(|old| (old, app.old_key())));
                for (slot_aid, key) in slots {
                    let Some(key) = key else { continue };
                    if slot_aid != aid {
                        continue;
                    }
                    if let Ok(plain) =
                        decrypt_access_payload(AccessKey::Application(key), meta, upper_pdu)
                    {
                        return Ok((plain, AccessKeySelector::Application(app.index())));
                    }
                }
            }
        } else {
            for address in [meta.src, meta.dst] {
                if let Some(key) = self.device_keys.get(&address) {
                    let key = AccessKey::Device(key.value());
                    if let Ok(plain) = decrypt_access_payload(key, meta, upper_pdu) {
                        return Ok((plain, AccessKeySelector::Device(address)));
                    }
                }
            }
        }

        Err(SecurityError::AuthenticationFailed)
    }
}

impl std::fmt::Debug for MeshSecurity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshSecurity")
            .field("network_keys", &self.network_key_indexes())
            .field("app_keys", &self.app_keys.len())
            .field("device_keys", &self.device_keys.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pdu() -> NetworkPdu {
        NetworkPdu::new(false, 5, 42, 0x0001, 0x0002, Bytes::from_static(&[0, 1, 2, 3, 4, 5]))
            .unwrap()
    }

    fn meta() -> AccessMeta {
        AccessMeta {
            seq: 42,
            src: 0x0001,
            dst: 0x0002,
            iv_index: 0,
            szmic: false,
        }
    }

    #[test]
    fn test_network_round_trip_reports_key_index() {
        let ring = MeshSecurity::new();
        ring.install_network_key(NetworkKey::new(0, "Primary", KeyBytes::new([1; 16])).unwrap());
        ring.install_network_key(NetworkKey::new(7, "Other", KeyBytes::new([2; 16])).unwrap());

        let encrypted = ring.encrypt_network(7, 0, &pdu()).unwrap();
        let received = ring.decrypt_network(&encrypted, 0).unwrap();
        assert_eq!(received.pdu, pdu());
        assert_eq!(received.net_key_index, 7);
    }

    #[test]
    fn test_removed_key_no_longer_decrypts() {
        let ring = MeshSecurity::new();
        ring.install_network_key(NetworkKey::new(0, "Primary", KeyBytes::new([1; 16])).unwrap());
        let encrypted = ring.encrypt_network(0, 0, &pdu()).unwrap();

        ring.remove_network_key(0).unwrap();
        assert_eq!(
            ring.decrypt_network(&encrypted, 0).unwrap_err(),
            SecurityError::AuthenticationFailed
        );
        assert!(ring.encrypt_network(0, 0, &pdu()).is_err());
        assert!(ring.remove_network_key(0).is_err());
    }

    #[test]
    fn test_key_refresh_accepts_both_slots() {
        let ring = MeshSecurity::new();
        ring.install_network_key(NetworkKey::new(0, "Primary", KeyBytes::new([1; 16])).unwrap());
        let with_old = ring.encrypt_network(0, 0, &pdu()).unwrap();

        ring.begin_key_refresh(0, KeyBytes::new([2; 16])).unwrap();
        // Phase 1 still transmits with the old key
        assert_eq!(ring.encrypt_network(0, 0, &pdu()).unwrap(), with_old);

        assert_eq!(
            ring.advance_key_refresh(0).unwrap(),
            KeyRefreshPhase::UsingNewKeys
        );
        let with_new = ring.encrypt_network(0, 0, &pdu()).unwrap();
        assert_ne!(with_new, with_old);
        assert!(ring.decrypt_network(&with_old, 0).is_ok());
        assert!(ring.decrypt_network(&with_new, 0).is_ok());

        assert_eq!(ring.advance_key_refresh(0).unwrap(), KeyRefreshPhase::Normal);
        assert!(ring.decrypt_network(&with_old, 0).is_err());
    }

    #[test]
    fn test_app_key_requires_bound_network_key() {
        let ring = MeshSecurity::new();
        let app = ApplicationKey::generate(1, 0, "Lights").unwrap();
        assert!(ring.install_app_key(app.clone()).is_err());

        ring.install_network_key(NetworkKey::generate(0, "Primary").unwrap());
        ring.install_app_key(app).unwrap();
        ring.remove_network_key(0).unwrap();
        assert!(ring.app_key(1).is_none());
    }

    #[test]
    fn test_access_with_app_key_selected_by_aid() {
        let ring = MeshSecurity::new();
        ring.install_network_key(NetworkKey::generate(0, "Primary").unwrap());
        ring.install_app_key(ApplicationKey::generate(1, 0, "A").unwrap())
            .unwrap();
        ring.install_app_key(ApplicationKey::generate(2, 0, "B").unwrap())
            .unwrap();

        let sealed = ring
            .encrypt_access(AccessKeySelector::Application(2), &meta(), b"\x82\x31")
            .unwrap();
        assert!(sealed.akf);
        let (plain, used) = ring
            .decrypt_access(sealed.akf, sealed.aid, &meta(), &sealed.upper_pdu)
            .unwrap();
        assert_eq!(&plain[..], b"\x82\x31");
        assert_eq!(used, AccessKeySelector::Application(2));

        ring.remove_app_key(2).unwrap();
        assert_eq!(
            ring.decrypt_access(sealed.akf, sealed.aid, &meta(), &sealed.upper_pdu)
                .unwrap_err(),
            SecurityError::AuthenticationFailed
        );
    }

    #[test]
    fn test_access_with_device_key() {
        let ring = MeshSecurity::new();
        ring.install_device_key(0x0002, KeyBytes::new([5; 16]));
        let sealed = ring
            .encrypt_access(AccessKeySelector::Device(0x0002), &meta(), b"\x80\x08")
            .unwrap();
        assert!(!sealed.akf);

        let (_, used) = ring
            .decrypt_access(false, 0, &meta(), &sealed.upper_pdu)
            .unwrap();
        assert_eq!(used, AccessKeySelector::Device(0x0002));

        ring.wipe();
        assert!(!ring.has_device_key(0x0002));
        assert!(ring.decrypt_access(false, 0, &meta(), &sealed.upper_pdu).is_err());
    }
}
