use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{BackendError, BackendResult};
use crate::record::{DeviceQuotaListing, FilesetListing};

/// Interface to a storage backend driver.
///
/// The actual GPFS/Lustre command plumbing lives behind this trait; the
/// engine only consumes the listed shapes. Owner and fileset-name resolution
/// return `None` when the backend cannot map an identifier; callers decide
/// whether to keep the raw identifier or skip the record.
pub trait StorageBackend {
    /// Filesystems the backend currently knows about.
    fn list_filesystems(&self) -> BackendResult<Vec<String>>;

    /// All quota records for one device, partitioned by quota kind.
    fn list_quota(&self, device: &str) -> BackendResult<DeviceQuotaListing>;

    /// Fileset listings per filesystem.
    fn list_filesets(&self) -> BackendResult<HashMap<String, FilesetListing>>;

    /// Maps a raw quota identifier to an owner name.
    fn quota_owner(&self, quota_id: &str, device: &str) -> Option<String>;

    /// Maps a raw fileset identifier to its human fileset name.
    fn fileset_name(&self, fileset_id: &str, device: &str) -> Option<String>;
}

/// In-memory backend holding recorded listings.
///
/// Used by the test suites, and by the binary to replay a listing captured
/// from a live system (`from_file`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryBackend {
    quota: HashMap<String, DeviceQuotaListing>,
    filesets: HashMap<String, FilesetListing>,
    #[serde(default)]
    owners: HashMap<String, String>,
    #[serde(default)]
    fileset_names: HashMap<String, String>,
    #[serde(default)]
    unavailable: Vec<String>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_file(path: &Path) -> BackendResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| BackendError::Unavailable {
            device: path.display().to_string(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&contents).map_err(|e| BackendError::Unavailable {
            device: path.display().to_string(),
            reason: format!("invalid listing: {}", e),
        })
    }

    pub fn with_quota(mut self, device: impl Into<String>, listing: DeviceQuotaListing) -> Self {
        self.quota.insert(device.into(), listing);
        self
    }

    pub fn with_filesets(
        mut self,
        filesystem: impl Into<String>,
        listing: FilesetListing,
    ) -> Self {
        self.filesets.insert(filesystem.into(), listing);
        self
    }

    pub fn with_owner(mut self, quota_id: impl Into<String>, owner: impl Into<String>) -> Self {
        self.owners.insert(quota_id.into(), owner.into());
        self
    }

    pub fn with_fileset_name(
        mut self,
        fileset_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        self.fileset_names.insert(fileset_id.into(), name.into());
        self
    }

    /// Marks a device as unavailable; listing it fails the way a dead
    /// backend would.
    pub fn with_unavailable(mut self, device: impl Into<String>) -> Self {
        self.unavailable.push(device.into());
        self
    }
}

impl StorageBackend for MemoryBackend {
    fn list_filesystems(&self) -> BackendResult<Vec<String>> {
        let mut names: Vec<String> = self.quota.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn list_quota(&self, device: &str) -> BackendResult<DeviceQuotaListing> {
        if self.unavailable.iter().any(|d| d == device) {
            return Err(BackendError::Unavailable {
                device: device.to_string(),
                reason: "listing marked unavailable".to_string(),
            });
        }
        self.quota
            .get(device)
            .cloned()
            .ok_or_else(|| BackendError::UnknownDevice(device.to_string()))
    }

    fn list_filesets(&self) -> BackendResult<HashMap<String, FilesetListing>> {
        Ok(self.filesets.clone())
    }

    fn quota_owner(&self, quota_id: &str, _device: &str) -> Option<String> {
        self.owners.get(quota_id).cloned()
    }

    fn fileset_name(&self, fileset_id: &str, _device: &str) -> Option<String> {
        self.fileset_names.get(fileset_id).cloned()
    }
}
