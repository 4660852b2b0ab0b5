//! Inode criticality scanning over raw fileset listings.
//!
//! Independent of the per-owner aggregation: this is a global
//! capacity-exhaustion signal per fileset, with no notion of per-user
//! soft/hard exceedance.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use quotamon_backend::{BackendKind, FilesetListing, QuotaRecord};

/// Default fraction of the inode ceiling above which a fileset is critical.
pub const DEFAULT_INODE_THRESHOLD: f64 = 0.9;

/// A fileset whose inode usage has crossed the criticality threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeCritical {
    /// Inodes in use.
    pub used: u64,
    /// Inodes currently allocated to the fileset (0 when the backend does
    /// not report allocation).
    pub allocated: u64,
    /// Maximum inodes the fileset may hold.
    pub maxinodes: u64,
}

/// Scans one filesystem's fileset listing for filesets running out of
/// inodes.
///
/// `used` always comes from the fileset's inode-quota usage record. GPFS
/// reports allocated and maximum inode counts in the fileset listing; other
/// backends report no allocation, and the maximum falls back to the quota
/// hard limit on inode count. A maximum of 0 means unbounded and is never
/// critical; the comparison is strict.
pub fn scan_inode_criticality(
    filesets: &FilesetListing,
    fileset_quota: &HashMap<String, Vec<QuotaRecord>>,
    threshold: f64,
    backend: BackendKind,
) -> HashMap<String, InodeCritical> {
    let mut critical = HashMap::new();

    for (fileset_id, info) in filesets {
        let Some(first) = fileset_quota.get(fileset_id).and_then(|r| r.first()) else {
            tracing::warn!(
                "No inode quota record for fileset {} ({}), skipping",
                info.fileset_name,
                fileset_id
            );
            continue;
        };

        let allocated = match backend {
            BackendKind::Gpfs => info.alloc_inodes,
            BackendKind::Lustre => 0,
        };
        let maxinodes = match backend {
            BackendKind::Gpfs => info.max_inodes,
            BackendKind::Lustre => first.files_limit,
        };
        let used = first.files_usage;

        if maxinodes > 0 && (used as f64) > threshold * (maxinodes as f64) {
            critical.insert(
                info.fileset_name.clone(),
                InodeCritical {
                    used,
                    allocated,
                    maxinodes,
                },
            );
        }
    }

    critical
}
