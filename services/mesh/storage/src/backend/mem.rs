//! In-memory storage backend for development and testing

use crate::{
    NetworkKeyStore, NodeRecord, NodeStore, Provisioner, ProvisionerStore, StorageError,
};
use async_trait::async_trait;
use dashmap::DashMap;
use mesh_security::NetworkKey;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;
use uuid::Uuid;

/// In-memory repository implementation
#[derive(Default)]
pub struct MemoryStore {
    /// Provisioner id -> record
    provisioners: DashMap<Uuid, Provisioner>,
    /// (mesh, key index) -> network key
    network_keys: DashMap<(Uuid, u16), NetworkKey>,
    /// (mesh, device uuid) -> node
    nodes: DashMap<(Uuid, Uuid), NodeRecord>,
    /// Make every write fail, for exercising error paths
    fail_writes: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent writes fail with an I/O error
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "writes disabled",
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ProvisionerStore for MemoryStore {
    async fn load_provisioner(&self, id: Uuid) -> Result<Provisioner, StorageError> {
        self.provisioners
            .get(&id)
            .map(|p| p.value().clone())
            .ok_or(StorageError::NotFound)
    }

    async fn save_provisioner(&self, provisioner: &Provisioner) -> Result<(), StorageError> {
        self.check_writable()?;
        debug!(
            "Store save provisioner id={} seq={}",
            provisioner.id, provisioner.sequence_number
        );
        self.provisioners.insert(provisioner.id, provisioner.clone());
        Ok(())
    }

    async fn delete_provisioner(&self, id: Uuid) -> Result<(), StorageError> {
        self.check_writable()?;
        debug!("Store delete provisioner id={}", id);
        self.provisioners
            .remove(&id)
            .map(|_| ())
            .ok_or(StorageError::NotFound)
    }

    async fn list_provisioners(&self, mesh_uuid: Uuid) -> Result<Vec<Provisioner>, StorageError> {
        let mut list: Vec<Provisioner> = self
            .provisioners
            .iter()
            .filter(|p| p.mesh_uuid == mesh_uuid)
            .map(|p| p.value().clone())
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(list)
    }
}

#[async_trait]
impl NetworkKeyStore for MemoryStore {
    async fn load_network_keys(&self, mesh_uuid: Uuid) -> Result<Vec<NetworkKey>, StorageError> {
        let mut keys: Vec<NetworkKey> = self
            .network_keys
            .iter()
            .filter(|entry| entry.key().0 == mesh_uuid)
            .map(|entry| entry.value().clone())
            .collect();
        keys.sort_by_key(|k| k.index());
        Ok(keys)
    }

    async fn save_network_key(&self, mesh_uuid: Uuid, key: &NetworkKey) -> Result<(), StorageError> {
        self.check_writable()?;
        debug!("Store save network key mesh={} index={}", mesh_uuid, key.index());
        self.network_keys
            .insert((mesh_uuid, key.index()), key.clone());
        Ok(())
    }

    async fn delete_network_key(&self, mesh_uuid: Uuid, index: u16) -> Result<(), StorageError> {
        self.check_writable()?;
        self.network_keys
            .remove(&(mesh_uuid, index))
            .map(|_| ())
            .ok_or(StorageError::NotFound)
    }
}

#[async_trait]
impl NodeStore for MemoryStore {
    async fn load_nodes(&self, mesh_uuid: Uuid) -> Result<Vec<NodeRecord>, StorageError> {
        let mut nodes: Vec<NodeRecord> = self
            .nodes
            .iter()
            .filter(|entry| entry.key().0 == mesh_uuid)
            .map(|entry| entry.value().clone())
            .collect();
        nodes.sort_by_key(|n| n.unicast_address);
        Ok(nodes)
    }

    async fn save_node(&self, node: &NodeRecord) -> Result<(), StorageError> {
        self.check_writable()?;
        debug!(
            "Store save node device={} address=0x{:04X}",
            node.device_uuid, node.unicast_address
        );
        self.nodes
            .insert((node.mesh_uuid, node.device_uuid), node.clone());
        Ok(())
    }

    async fn delete_node(&self, mesh_uuid: Uuid, device_uuid: Uuid) -> Result<(), StorageError> {
        self.check_writable()?;
        self.nodes
            .remove(&(mesh_uuid, device_uuid))
            .map(|_| ())
            .ok_or(StorageError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AllocatedRange, RangeKind};

    #[tokio::test]
    async fn test_memory_provisioner_basic() {
        let store = MemoryStore::new();
        let mesh = Uuid::new_v4();
        let p = Provisioner::new(mesh, "Alpha")
            .with_range(RangeKind::Unicast, AllocatedRange::new(0x0001, 0x00FF));

        store.save_provisioner(&p).await.unwrap();
        assert_eq!(store.load_provisioner(p.id).await.unwrap(), p);
        assert_eq!(store.list_provisioners(mesh).await.unwrap().len(), 1);
        assert!(store.list_provisioners(Uuid::new_v4()).await.unwrap().is_empty());

        store.delete_provisioner(p.id).await.unwrap();
        assert!(matches!(
            store.load_provisioner(p.id).await,
            Err(StorageError::NotFound)
        ));
        assert!(store.delete_provisioner(p.id).await.is_err());
    }

    #[tokio::test]
    async fn test_memory_network_keys_sorted() {
        let store = MemoryStore::new();
        let mesh = Uuid::new_v4();
        for index in [3u16, 0, 1] {
            let key = NetworkKey::generate(index, format!("Key {}", index)).unwrap();
            store.save_network_key(mesh, &key).await.unwrap();
        }
        let indexes: Vec<u16> = store
            .load_network_keys(mesh)
            .await
            .unwrap()
            .iter()
            .map(|k| k.index())
            .collect();
        assert_eq!(indexes, vec![0, 1, 3]);
        store.delete_network_key(mesh, 1).await.unwrap();
        assert_eq!(store.load_network_keys(mesh).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_writes_leave_state_unchanged() {
        let store = MemoryStore::new();
        let p = Provisioner::new(Uuid::new_v4(), "Alpha");
        store.set_fail_writes(true);
        assert!(matches!(
            store.save_provisioner(&p).await,
            Err(StorageError::Io(_))
        ));
        assert!(store.load_provisioner(p.id).await.is_err());
    }
}
