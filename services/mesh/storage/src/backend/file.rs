//! File-based storage backend with CRC-guarded records and atomic replace.
//!
//! Layout under the data directory:
//!
//! ```text
//! provisioners/<id>.json
//! network_keys/<mesh_uuid>/<index>.json
//! nodes/<mesh_uuid>/<device_uuid>.json
//! ```
//!
//! Each file holds a [`Record`] envelope whose `crc32` covers the serialized
//! `data` value. Writes go to a temporary file that is renamed into place.

use crate::{
    NetworkKeyStore, NodeRecord, NodeStore, Provisioner, ProvisionerStore, StorageError,
};
use async_trait::async_trait;
use crc32fast::Hasher;
use mesh_security::NetworkKey;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

const RECORD_EXTENSION: &str = "json";

/// On-disk envelope
#[derive(Serialize, Deserialize, Debug)]
struct Record {
    crc32: u32,
    data: serde_json::Value,
}

impl Record {
    fn compute_crc(data: &serde_json::Value) -> Result<u32, StorageError> {
        let mut hasher = Hasher::new();
        hasher.update(&serde_json::to_vec(data)?);
        Ok(hasher.finalize())
    }
}

/// File-based repository implementation
pub struct FileStore {
    data_dir: PathBuf,
    /// Serializes writers so temp files never collide
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `data_dir`
    pub async fn open(data_dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let data_dir = data_dir.into();
        for sub in ["provisioners", "network_keys", "nodes"] {
            std::fs::create_dir_all(data_dir.join(sub))?;
        }
        info!("Opened file store at {}", data_dir.display());
        Ok(Self {
            data_dir,
            write_lock: Mutex::new(()),
        })
    }

    /// Root directory
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn provisioner_path(&self, id: Uuid) -> PathBuf {
        self.data_dir
            .join("provisioners")
            .join(format!("{}.{}", id, RECORD_EXTENSION))
    }

    fn network_key_dir(&self, mesh_uuid: Uuid) -> PathBuf {
        self.data_dir.join("network_keys").join(mesh_uuid.to_string())
    }

    fn node_dir(&self, mesh_uuid: Uuid) -> PathBuf {
        self.data_dir.join("nodes").join(mesh_uuid.to_string())
    }

    async fn write_record<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), StorageError> {
        let data = serde_json::to_value(value)?;
        let record = Record {
            crc32: Record::compute_crc(&data)?,
            data,
        };
        let content = serde_json::to_vec_pretty(&record)?;

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(&content)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, path)?;
        debug!("Wrote record {}", path.display());
        Ok(())
    }

    fn read_record<T: DeserializeOwned>(path: &Path) -> Result<T, StorageError> {
        let content = match std::fs::read(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound)
            }
            Err(e) => return Err(e.into()),
        };

        let record: Record = serde_json::from_slice(&content).map_err(|e| {
            StorageError::Corruption(format!("Invalid record {}: {}", path.display(), e))
        })?;
        if Record::compute_crc(&record.data)? != record.crc32 {
            return Err(StorageError::Corruption(format!(
                "CRC mismatch in {}",
                path.display()
            )));
        }
        serde_json::from_value(record.data).map_err(|e| {
            StorageError::Corruption(format!("Invalid record {}: {}", path.display(), e))
        })
    }

    fn remove_record(path: &Path) -> Result<(), StorageError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    /// Read every record in `dir`. Corrupt records fail the whole load.
    fn read_dir_records<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>, StorageError> {
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| {
                let path = entry.ok()?.path();
                if path.extension()?.to_str()? == RECORD_EXTENSION {
                    Some(path)
                } else {
                    None
                }
            })
            .collect();
        paths.sort();

        paths.iter().map(|p| Self::read_record(p)).collect()
    }
}

#[async_trait]
impl ProvisionerStore for FileStore {
    async fn load_provisioner(&self, id: Uuid) -> Result<Provisioner, StorageError> {
        Self::read_record(&self.provisioner_path(id))
    }

    async fn save_provisioner(&self, provisioner: &Provisioner) -> Result<(), StorageError> {
        self.write_record(&self.provisioner_path(provisioner.id), provisioner)
            .await
    }

    async fn delete_provisioner(&self, id: Uuid) -> Result<(), StorageError> {
        Self::remove_record(&self.provisioner_path(id))
    }

    async fn list_provisioners(&self, mesh_uuid: Uuid) -> Result<Vec<Provisioner>, StorageError> {
        let all: Vec<Provisioner> = Self::read_dir_records(&self.data_dir.join("provisioners"))?;
        let mut list: Vec<Provisioner> =
            all.into_iter().filter(|p| p.mesh_uuid == mesh_uuid).collect();
        list.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(list)
    }
}

#[async_trait]
impl NetworkKeyStore for FileStore {
    async fn load_network_keys(&self, mesh_uuid: Uuid) -> Result<Vec<NetworkKey>, StorageError> {
        let mut keys: Vec<NetworkKey> = Self::read_dir_records(&self.network_key_dir(mesh_uuid))?;
        keys.sort_by_key(|k| k.index());
        Ok(keys)
    }

    async fn save_network_key(&self, mesh_uuid: Uuid, key: &NetworkKey) -> Result<(), StorageError> {
        let path = self
            .network_key_dir(mesh_uuid)
            .join(format!("{}.{}", key.index(), RECORD_EXTENSION));
        self.write_record(&path, key).await
    }

    async fn delete_network_key(&self, mesh_uuid: Uuid, index: u16) -> Result<(), StorageError> {
        let path = self
            .network_key_dir(mesh_uuid)
            .join(format!("{}.{}", index, RECORD_EXTENSION));
        Self::remove_record(&path)
    }
}

#[async_trait]
impl NodeStore for FileStore {
    async fn load_nodes(&self, mesh_uuid: Uuid) -> Result<Vec<NodeRecord>, StorageError> {
        let mut nodes: Vec<NodeRecord> = Self::read_dir_records(&self.node_dir(mesh_uuid))?;
        nodes.sort_by_key(|n| n.unicast_address);
        Ok(nodes)
    }

    async fn save_node(&self, node: &NodeRecord) -> Result<(), StorageError> {
        let path = self
            .node_dir(node.mesh_uuid)
            .join(format!("{}.{}", node.device_uuid, RECORD_EXTENSION));
        self.write_record(&path, node).await
    }

    async fn delete_node(&self, mesh_uuid: Uuid, device_uuid: Uuid) -> Result<(), StorageError> {
        let path = self
            .node_dir(mesh_uuid)
            .join(format!("{}.{}", device_uuid, RECORD_EXTENSION));
        let result = Self::remove_record(&path);
        if result.is_err() {
            warn!("Node {} not found in mesh {}", device_uuid, mesh_uuid);
        }
        result
    }
}
