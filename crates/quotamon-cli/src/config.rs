use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use quotamon_backend::BackendKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSystemConfig {
    pub name: String,
    pub filesystem: String,
    pub backend: BackendKind,
    #[serde(default = "default_replication_factor")]
    pub data_replication_factor: u64,
    /// Recorded listing replayed by the in-memory backend. Live GPFS/Lustre
    /// drivers attach behind the StorageBackend trait instead.
    pub listing: Option<PathBuf>,
    pub shared_fileset_prefix: Option<String>,
    pub project_fileset_prefix: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotamonConfig {
    pub sink_url: String,
    pub access_token: Option<String>,
    #[serde(default = "default_inode_threshold")]
    pub inode_threshold: f64,
    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: PathBuf,
    #[serde(default)]
    pub storage: Vec<StorageSystemConfig>,
}

fn default_replication_factor() -> u64 {
    1
}

fn default_inode_threshold() -> f64 {
    quotamon_core::DEFAULT_INODE_THRESHOLD
}

fn default_snapshot_dir() -> PathBuf {
    PathBuf::from("/var/log/quotamon/inode-zips")
}

impl Default for QuotamonConfig {
    fn default() -> Self {
        Self {
            sink_url: String::from("https://account.example.org/api"),
            access_token: None,
            inode_threshold: default_inode_threshold(),
            snapshot_dir: default_snapshot_dir(),
            storage: Vec::new(),
        }
    }
}

impl QuotamonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => {
                let config: QuotamonConfig = toml::from_str(&contents)?;
                Ok(config)
            }
            "json" => {
                let config: QuotamonConfig = serde_json::from_str(&contents)?;
                Ok(config)
            }
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        }
    }
}
