//! Persistence for the mesh provisioner: plain entities, repository traits and
//! pluggable backends.
//!
//! This crate provides the storage layer behind the address/key allocator.
//! Entities are plain serde structs; backends implement the repository
//! traits (in-memory for tests, file-based with CRC-guarded JSON records for
//! real deployments). A versioned CBOR snapshot format is provided for
//! exporting single provisioners.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod model;
pub mod snapshot;

use async_trait::async_trait;
use mesh_security::NetworkKey;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

pub use model::{
    AllocatedRange, NodeRecord, Provisioner, RangeKind, DEFAULT_GLOBAL_TTL,
    DEFAULT_PROVISIONER_NAME,
};
pub use snapshot::{decode_snapshot, encode_snapshot, SNAPSHOT_VERSION};

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Data corruption detected
    #[error("Data corruption: {0}")]
    Corruption(String),
    /// Entry not found
    #[error("Entry not found")]
    NotFound,
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Snapshot encoding or version error
    #[error("Snapshot error: {0}")]
    Snapshot(String),
}

/// Provisioner repository
#[async_trait]
pub trait ProvisionerStore: Send + Sync {
    /// Load a provisioner by id
    async fn load_provisioner(&self, id: Uuid) -> Result<Provisioner, StorageError>;

    /// Insert or replace a provisioner
    async fn save_provisioner(&self, provisioner: &Provisioner) -> Result<(), StorageError>;

    /// Delete a provisioner; `NotFound` if absent
    async fn delete_provisioner(&self, id: Uuid) -> Result<(), StorageError>;

    /// All provisioners of a network
    async fn list_provisioners(&self, mesh_uuid: Uuid) -> Result<Vec<Provisioner>, StorageError>;
}

/// Network key repository
#[async_trait]
pub trait NetworkKeyStore: Send + Sync {
    /// All network keys of a network, ordered by index
    async fn load_network_keys(&self, mesh_uuid: Uuid) -> Result<Vec<NetworkKey>, StorageError>;

    /// Insert or replace a network key
    async fn save_network_key(&self, mesh_uuid: Uuid, key: &NetworkKey) -> Result<(), StorageError>;

    /// Delete a network key; `NotFound` if absent
    async fn delete_network_key(&self, mesh_uuid: Uuid, index: u16) -> Result<(), StorageError>;
}

/// Provisioned node repository
#[async_trait]
pub trait NodeStore: Send + Sync {
    /// All nodes of a network
    async fn load_nodes(&self, mesh_uuid: Uuid) -> Result<Vec<NodeRecord>, StorageError>;

    /// Insert or replace a node
    async fn save_node(&self, node: &NodeRecord) -> Result<(), StorageError>;

    /// Delete a node; `NotFound` if absent
    async fn delete_node(&self, mesh_uuid: Uuid, device_uuid: Uuid) -> Result<(), StorageError>;
}

/// Combined storage interface
#[derive(Clone)]
pub struct Storage {
    /// Provisioner records
    pub provisioners: Arc<dyn ProvisionerStore>,
    /// Network keys
    pub network_keys: Arc<dyn NetworkKeyStore>,
    /// Provisioned nodes
    pub nodes: Arc<dyn NodeStore>,
}

/// Storage backend configuration
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum StorageMode {
    /// In-memory storage (dev/tests only)
    #[default]
    InMemory,
    /// File-based storage
    File {
        /// Data directory path
        data_dir: PathBuf,
    },
}

// Re-export backend implementations
pub use backend::file::FileStore;
pub use backend::mem::MemoryStore;

impl Storage {
    /// Create storage from configuration
    pub async fn from_mode(mode: StorageMode) -> Result<Self, StorageError> {
        match mode {
            StorageMode::InMemory => Ok(Self::from_backend(Arc::new(MemoryStore::new()))),
            StorageMode::File { data_dir } => {
                let store = FileStore::open(data_dir).await?;
                Ok(Self::from_backend(Arc::new(store)))
            }
        }
    }

    /// Use one backend for every repository
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: ProvisionerStore + NetworkKeyStore + NodeStore + 'static,
    {
        Self {
            provisioners: backend.clone(),
            network_keys: backend.clone(),
            nodes: backend,
        }
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage").finish_non_exhaustive()
    }
}
