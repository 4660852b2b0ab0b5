//! Per-owner quota entities and their merge semantics.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use quotamon_backend::QuotaKind;

/// Grace-period state for one counter family (block or inode).
///
/// `remaining_secs` is `None` when no countdown is active; once a grace
/// period has expired the remaining time is irrelevant and also `None`
/// (presentation layers normalize that to 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraceStatus {
    /// Whether the grace period has run out.
    pub expired: bool,
    /// Seconds left on an active countdown.
    pub remaining_secs: Option<u64>,
}

impl GraceStatus {
    /// No grace period active.
    pub fn none() -> Self {
        Self {
            expired: false,
            remaining_secs: None,
        }
    }

    /// Grace period has run out.
    pub fn expired() -> Self {
        Self {
            expired: true,
            remaining_secs: None,
        }
    }

    /// Grace countdown active with the given seconds left.
    pub fn active(remaining_secs: u64) -> Self {
        Self {
            expired: false,
            remaining_secs: Some(remaining_secs),
        }
    }

    /// Combines the grace state of two sub-records for the same fileset.
    ///
    /// Any expired sub-record marks the merged value expired; when both
    /// carry a countdown the soonest deadline wins.
    pub fn merge(self, other: GraceStatus) -> GraceStatus {
        let remaining_secs = match (self.remaining_secs, other.remaining_secs) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        };
        GraceStatus {
            expired: self.expired || other.expired,
            remaining_secs,
        }
    }

    /// Remaining seconds with `None` normalized to 0, as wire formats want.
    pub fn remaining_or_zero(&self) -> u64 {
        self.remaining_secs.unwrap_or(0)
    }
}

/// Immutable snapshot of one quota measurement for an (entity, fileset)
/// pair.
///
/// Block counters are logical, already divided by the data replication
/// factor; inode counters are physical (inode quota is not split across
/// replicas). `hard >= soft` is expected but not enforced: a misconfigured
/// backend may violate it, and that is data, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaValue {
    /// Block usage in storage units.
    pub used: u64,
    /// Block soft limit.
    pub soft: u64,
    /// Block hard limit.
    pub hard: u64,
    /// Block usage the backend has not yet attributed.
    pub doubt: u64,
    /// Block grace state.
    pub expired: GraceStatus,
    /// Inodes in use.
    pub files_used: u64,
    /// Inode soft limit.
    pub files_soft: u64,
    /// Inode hard limit.
    pub files_hard: u64,
    /// Inode usage the backend has not yet attributed.
    pub files_doubt: u64,
    /// Inode grace state.
    pub files_expired: GraceStatus,
    /// Epoch seconds at which this value was computed.
    pub timestamp: u64,
}

impl QuotaValue {
    /// Folds another sub-record for the same fileset into this value.
    ///
    /// Counters accumulate; an owner holding quota on one fileset under two
    /// sub-records (one per storage pool) must sum, not replace, or
    /// cross-pool usage is undercounted.
    pub fn accumulate(&mut self, other: &QuotaValue) {
        self.used += other.used;
        self.soft += other.soft;
        self.hard += other.hard;
        self.doubt += other.doubt;
        self.expired = self.expired.merge(other.expired);
        self.files_used += other.files_used;
        self.files_soft += other.files_soft;
        self.files_hard += other.files_hard;
        self.files_doubt += other.files_doubt;
        self.files_expired = self.files_expired.merge(other.files_expired);
        self.timestamp = self.timestamp.max(other.timestamp);
    }

    /// Whether this value crosses a soft limit, block or inode.
    pub fn exceeds_soft(&self) -> bool {
        self.used > self.soft || self.files_used > self.files_soft
    }
}

/// Quota view of one owner (user or fileset/project) on one storage system,
/// spanning all filesets the owner holds quota on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaEntity {
    /// Monitored storage system this entity belongs to.
    pub storage_name: String,
    /// Backend filesystem the quota was listed on.
    pub filesystem: String,
    /// Whether this is a user or a fileset/project entity.
    pub kind: QuotaKind,
    /// User name/id or project identifier.
    pub owner: String,
    quota_map: HashMap<Option<String>, QuotaValue>,
}

impl QuotaEntity {
    /// Creates an empty user entity.
    pub fn user(
        storage_name: impl Into<String>,
        filesystem: impl Into<String>,
        owner: impl Into<String>,
    ) -> Self {
        Self::new(storage_name, filesystem, QuotaKind::User, owner)
    }

    /// Creates an empty fileset/project entity.
    pub fn fileset(
        storage_name: impl Into<String>,
        filesystem: impl Into<String>,
        owner: impl Into<String>,
    ) -> Self {
        Self::new(storage_name, filesystem, QuotaKind::Fileset, owner)
    }

    fn new(
        storage_name: impl Into<String>,
        filesystem: impl Into<String>,
        kind: QuotaKind,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            storage_name: storage_name.into(),
            filesystem: filesystem.into(),
            kind,
            owner: owner.into(),
            quota_map: HashMap::new(),
        }
    }

    /// Upserts the named fileset's quota value.
    ///
    /// A fileset that already has a value for this aggregation pass gets
    /// the counters accumulated, not replaced. The `None` fileset key is
    /// the default (no-fileset) quota.
    pub fn update(&mut self, fileset: Option<String>, value: QuotaValue) -> &mut Self {
        match self.quota_map.entry(fileset) {
            Entry::Occupied(mut entry) => {
                tracing::debug!(
                    "merging quota sub-record for {} on fileset {:?}",
                    self.owner,
                    entry.key()
                );
                entry.get_mut().accumulate(&value);
            }
            Entry::Vacant(entry) => {
                entry.insert(value);
            }
        }
        self
    }

    /// True iff any fileset entry crosses its block or inode soft limit.
    ///
    /// Soft-limit crossing, not hard-limit, is what triggers notification.
    /// An entity with no filesets never exceeds.
    pub fn exceeds(&self) -> bool {
        self.quota_map.values().any(QuotaValue::exceeds_soft)
    }

    /// The per-fileset quota values.
    pub fn quota_map(&self) -> &HashMap<Option<String>, QuotaValue> {
        &self.quota_map
    }

    /// Quota value for one fileset, if present.
    pub fn get(&self, fileset: Option<&str>) -> Option<&QuotaValue> {
        self.quota_map.get(&fileset.map(str::to_string))
    }

    /// Number of filesets this entity holds quota on.
    pub fn len(&self) -> usize {
        self.quota_map.len()
    }

    /// Whether the entity has no fileset entries yet.
    pub fn is_empty(&self) -> bool {
        self.quota_map.is_empty()
    }
}
