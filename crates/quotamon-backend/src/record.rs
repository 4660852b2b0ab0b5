use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The two kinds of quota a backend reports: per-user and per-fileset
/// (project/VO). Group quota is not tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaKind {
    User,
    Fileset,
}

/// Which backend family produced a listing. Numeric details differ between
/// the two: GPFS reports allocated and maximum inode counts in its fileset
/// listing, Lustre does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Gpfs,
    Lustre,
}

/// One raw quota record as listed by the backend for a single quota id.
///
/// Block counters are physical (not yet divided by the data replication
/// factor); grace indicators carry the backend's textual encoding verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaRecord {
    pub block_usage: u64,
    pub block_quota: u64,
    pub block_limit: u64,
    pub block_in_doubt: u64,
    pub block_grace: String,
    pub files_usage: u64,
    pub files_quota: u64,
    pub files_limit: u64,
    pub files_in_doubt: u64,
    pub files_grace: String,
    /// Raw fileset identifier this record is charged against; `None` for the
    /// default (no-fileset) quota.
    pub fileset_id: Option<String>,
}

impl QuotaRecord {
    pub fn zeroed() -> Self {
        Self {
            block_usage: 0,
            block_quota: 0,
            block_limit: 0,
            block_in_doubt: 0,
            block_grace: String::from("none"),
            files_usage: 0,
            files_quota: 0,
            files_limit: 0,
            files_in_doubt: 0,
            files_grace: String::from("none"),
            fileset_id: None,
        }
    }
}

/// One fileset entry from the backend fileset listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesetInfo {
    pub fileset_name: String,
    /// Inodes currently allocated to the fileset; 0 on backends that do not
    /// report allocation.
    pub alloc_inodes: u64,
    /// Maximum inodes the fileset may hold; 0 means unbounded.
    pub max_inodes: u64,
}

/// Quota records for one device, partitioned by kind and keyed by the raw
/// quota identifier. An identifier can carry several sub-records (one per
/// storage pool).
pub type DeviceQuotaListing = HashMap<QuotaKind, HashMap<String, Vec<QuotaRecord>>>;

/// Fileset listing for one filesystem, keyed by raw fileset identifier.
pub type FilesetListing = HashMap<String, FilesetInfo>;
