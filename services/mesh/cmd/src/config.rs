//! Configuration handling for the provisioner binary.
//!
//! Values come from the `mesh` section of a YAML file, then from `MESH_*`
//! environment variables, then from command line flags in `main`.

use anyhow::Result;
use mesh_storage::StorageMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Provisioner configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeshConfig {
    /// Network identity; generated and kept in the data directory when unset
    pub mesh_uuid: Option<Uuid>,
    /// Storage backend: `memory` or `file`
    pub storage_mode: String,
    /// Data directory for the file backend
    pub data_dir: PathBuf,
    /// Current IV index
    pub iv_index: u32,
    /// Network key distributed during provisioning
    pub network_key_index: u16,
    /// Per-step provisioning timeout (seconds)
    pub provisioning_timeout_secs: u64,
    /// Segment reassembly timeout (seconds)
    pub reassembly_timeout_secs: u64,
    /// Attention timer sent with the invite (seconds)
    pub attention_duration: u8,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            mesh_uuid: None,
            storage_mode: "file".to_string(),
            data_dir: PathBuf::from("./meshdata"),
            iv_index: 0,
            network_key_index: 0,
            provisioning_timeout_secs: 60,
            reassembly_timeout_secs: 10,
            attention_duration: 5,
        }
    }
}

/// Root configuration structure (matches the YAML structure)
#[derive(Debug, Deserialize)]
struct RootConfig {
    mesh: Option<SectionConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct SectionConfig {
    mesh_uuid: Option<Uuid>,
    storage: Option<StorageSection>,
    iv_index: Option<u32>,
    network_key_index: Option<u16>,
    timeouts: Option<TimeoutSection>,
    attention_duration: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct StorageSection {
    mode: Option<String>,
    data_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct TimeoutSection {
    provisioning_secs: Option<u64>,
    reassembly_secs: Option<u64>,
}

impl MeshConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        Self::load_with_env(config_path, |key| std::env::var(key).ok())
    }

    /// Load configuration, reading overrides through `env`
    pub fn load_with_env<P, F>(config_path: P, env: F) -> Result<Self>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Ok(content) = std::fs::read_to_string(&config_path) {
            match serde_yaml::from_str::<RootConfig>(&content) {
                Ok(root) => {
                    if let Some(section) = root.mesh {
                        config.apply_section(section);
                    }
                    info!("Loaded configuration from {:?}", config_path.as_ref());
                }
                Err(e) => warn!(
                    "Failed to parse config file {:?}, using defaults: {}",
                    config_path.as_ref(),
                    e
                ),
            }
        } else {
            warn!("Config file {:?} not found, using defaults", config_path.as_ref());
        }

        config.apply_environment_overrides(env);

        info!(
            "Final mesh configuration: storage={} data_dir={:?} iv_index={} net_key_index={} step_timeout={}s reassembly_timeout={}s",
            config.storage_mode,
            config.data_dir,
            config.iv_index,
            config.network_key_index,
            config.provisioning_timeout_secs,
            config.reassembly_timeout_secs
        );
        Ok(config)
    }

    fn apply_section(&mut self, section: SectionConfig) {
        if let Some(uuid) = section.mesh_uuid {
            self.mesh_uuid = Some(uuid);
        }
        if let Some(storage) = section.storage {
            if let Some(mode) = storage.mode {
                self.storage_mode = mode;
            }
            if let Some(dir) = storage.data_dir {
                self.data_dir = dir;
            }
        }
        if let Some(iv_index) = section.iv_index {
            self.iv_index = iv_index;
        }
        if let Some(index) = section.network_key_index {
            self.network_key_index = index;
        }
        if let Some(timeouts) = section.timeouts {
            if let Some(secs) = timeouts.provisioning_secs {
                self.provisioning_timeout_secs = secs;
            }
            if let Some(secs) = timeouts.reassembly_secs {
                self.reassembly_timeout_secs = secs;
            }
        }
        if let Some(attention) = section.attention_duration {
            self.attention_duration = attention;
        }
    }

    /// Apply environment variable overrides
    fn apply_environment_overrides<F>(&mut self, env: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = env("MESH_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
            info!("Data directory overridden by environment: {:?}", self.data_dir);
        }

        if let Some(mode) = env("MESH_STORAGE_MODE") {
            self.storage_mode = mode;
            info!("Storage mode overridden by environment: {}", self.storage_mode);
        }

        if let Some(value) = env("MESH_IV_INDEX") {
            match value.parse::<u32>() {
                Ok(iv_index) => {
                    self.iv_index = iv_index;
                    info!("IV index overridden by environment: {}", iv_index);
                }
                Err(_) => warn!("Ignoring invalid MESH_IV_INDEX {:?}", value),
            }
        }

        if let Some(value) = env("MESH_UUID") {
            match value.parse::<Uuid>() {
                Ok(uuid) => {
                    self.mesh_uuid = Some(uuid);
                    info!("Mesh UUID overridden by environment: {}", uuid);
                }
                Err(_) => warn!("Ignoring invalid MESH_UUID {:?}", value),
            }
        }

        if let Some(value) = env("MESH_PROVISIONING_TIMEOUT_SECS") {
            if let Ok(secs) = value.parse::<u64>() {
                self.provisioning_timeout_secs = secs;
                info!("Provisioning timeout overridden by environment: {}s", secs);
            }
        }

        if let Some(value) = env("MESH_REASSEMBLY_TIMEOUT_SECS") {
            if let Ok(secs) = value.parse::<u64>() {
                self.reassembly_timeout_secs = secs;
                info!("Reassembly timeout overridden by environment: {}s", secs);
            }
        }
    }

    /// Storage backend selected by `storage_mode`
    pub fn storage_mode(&self) -> Result<StorageMode> {
        match self.storage_mode.as_str() {
            "memory" => Ok(StorageMode::InMemory),
            "file" => Ok(StorageMode::File {
                data_dir: self.data_dir.clone(),
            }),
            other => anyhow::bail!("unknown storage mode {:?} (expected memory or file)", other),
        }
    }

    /// Per-step provisioning timeout
    pub fn provisioning_timeout(&self) -> Duration {
        Duration::from_secs(self.provisioning_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_default_config() {
        let config = MeshConfig::default();
        assert_eq!(config.mesh_uuid, None);
        assert_eq!(config.provisioning_timeout(), Duration::from_secs(60));
        assert_eq!(config.reassembly_timeout_secs, 10);
        assert!(matches!(config.storage_mode().unwrap(), StorageMode::File { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let yaml_content = r#"
mesh:
  mesh_uuid: 6f1c2a1e-0d4b-4c38-9a55-3a7e2f0b9c11
  storage:
    mode: memory
  iv_index: 42
  timeouts:
    provisioning_secs: 30
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let config = MeshConfig::load_with_env(temp_file.path(), no_env).unwrap();

        assert_eq!(
            config.mesh_uuid,
            Some("6f1c2a1e-0d4b-4c38-9a55-3a7e2f0b9c11".parse().unwrap())
        );
        assert_eq!(config.storage_mode().unwrap(), StorageMode::InMemory);
        assert_eq!(config.iv_index, 42);
        assert_eq!(config.provisioning_timeout_secs, 30);
        assert_eq!(config.reassembly_timeout_secs, 10);
    }

    #[test]
    fn test_missing_or_broken_file_uses_defaults() {
        let missing = MeshConfig::load_with_env("/nonexistent/btmesh.yaml", no_env).unwrap();
        assert_eq!(missing, MeshConfig::default());

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"mesh: [not, a, map").unwrap();
        let broken = MeshConfig::load_with_env(temp_file.path(), no_env).unwrap();
        assert_eq!(broken, MeshConfig::default());
    }

    #[test]
    fn test_environment_overrides() {
        let env: HashMap<&str, &str> = [
            ("MESH_DATA_DIR", "/var/lib/btmesh"),
            ("MESH_IV_INDEX", "7"),
            ("MESH_REASSEMBLY_TIMEOUT_SECS", "3"),
            ("MESH_UUID", "not-a-uuid"),
        ]
        .into_iter()
        .collect();

        let config = MeshConfig::load_with_env("/nonexistent/btmesh.yaml", |key| {
            env.get(key).map(|v| v.to_string())
        })
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/var/lib/btmesh"));
        assert_eq!(config.iv_index, 7);
        assert_eq!(config.reassembly_timeout_secs, 3);
        // Invalid values are ignored
        assert_eq!(config.mesh_uuid, None);
    }

    #[test]
    fn test_unknown_storage_mode() {
        let config = MeshConfig {
            storage_mode: "redis".to_string(),
            ..MeshConfig::default()
        };
        assert!(config.storage_mode().is_err());
    }
}
