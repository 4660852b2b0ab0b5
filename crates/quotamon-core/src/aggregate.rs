//! Aggregation of raw device-level quota listings into per-owner entities.

use std::collections::HashMap;

use quotamon_backend::{DeviceQuotaListing, QuotaKind, QuotaRecord};

use crate::entity::{QuotaEntity, QuotaValue};
use crate::grace::resolve_grace;

/// Maps a raw quota identifier to an owner name.
pub type OwnerResolver<'a> = dyn Fn(&str) -> Option<String> + 'a;

/// Maps a raw fileset identifier to a human fileset name.
pub type FilesetNameResolver<'a> = dyn Fn(&str) -> Option<String> + 'a;

/// Result of one aggregation pass over a device listing.
#[derive(Debug, Clone)]
pub struct AggregateOutcome {
    /// Per-user entities, keyed by owner name.
    pub users: HashMap<String, QuotaEntity>,
    /// Per-fileset (project) entities, keyed by fileset name.
    pub filesets: HashMap<String, QuotaEntity>,
    /// Raw identifiers that could not be resolved to a name. Their records
    /// are still present in the maps under the raw identifier; notification
    /// paths may choose to skip them.
    pub unresolved: Vec<String>,
}

/// Builds the per-user and per-fileset entity maps from a raw device-level
/// quota listing.
///
/// Block counters are divided by the data replication factor (floor
/// division); inode counters never are, since inode metadata is not
/// replicated the same way. Owner and fileset-name resolution are injected.
pub struct QuotaAggregator<'a> {
    storage_name: String,
    filesystem: String,
    replication_factor: u64,
    owner_resolver: &'a OwnerResolver<'a>,
    fileset_resolver: &'a FilesetNameResolver<'a>,
}

impl<'a> QuotaAggregator<'a> {
    /// Creates an aggregator for one storage system.
    ///
    /// Replication factors are always >= 1; a factor of 0 is clamped to 1.
    pub fn new(
        storage_name: impl Into<String>,
        filesystem: impl Into<String>,
        replication_factor: u64,
        owner_resolver: &'a OwnerResolver<'a>,
        fileset_resolver: &'a FilesetNameResolver<'a>,
    ) -> Self {
        let replication_factor = replication_factor.max(1);
        Self {
            storage_name: storage_name.into(),
            filesystem: filesystem.into(),
            replication_factor,
            owner_resolver,
            fileset_resolver,
        }
    }

    /// Runs one aggregation pass, stamping every value with `timestamp`.
    pub fn aggregate(&self, listing: &DeviceQuotaListing, timestamp: u64) -> AggregateOutcome {
        let mut outcome = AggregateOutcome {
            users: HashMap::new(),
            filesets: HashMap::new(),
            unresolved: Vec::new(),
        };

        tracing::info!(
            "ordering user quota for storage {}",
            self.storage_name
        );
        if let Some(records) = listing.get(&QuotaKind::User) {
            for (quota_id, sub_records) in records {
                let owner = match (self.owner_resolver)(quota_id) {
                    Some(name) => name,
                    None => {
                        outcome.unresolved.push(quota_id.clone());
                        quota_id.clone()
                    }
                };
                let entity = outcome.users.entry(owner.clone()).or_insert_with(|| {
                    QuotaEntity::user(&self.storage_name, &self.filesystem, &owner)
                });
                self.update_entity(entity, sub_records, timestamp);
            }
        }

        tracing::info!(
            "ordering fileset quota for storage {}",
            self.storage_name
        );
        if let Some(records) = listing.get(&QuotaKind::Fileset) {
            for (quota_id, sub_records) in records {
                let name = match (self.fileset_resolver)(quota_id) {
                    Some(name) => name,
                    None => {
                        outcome.unresolved.push(quota_id.clone());
                        quota_id.clone()
                    }
                };
                let entity = outcome.filesets.entry(name.clone()).or_insert_with(|| {
                    QuotaEntity::fileset(&self.storage_name, &self.filesystem, &name)
                });
                self.update_entity(entity, sub_records, timestamp);
            }
        }

        outcome
    }

    fn update_entity(&self, entity: &mut QuotaEntity, records: &[QuotaRecord], timestamp: u64) {
        for record in records {
            let fileset_name = match &record.fileset_id {
                Some(id) => Some((self.fileset_resolver)(id).unwrap_or_else(|| id.clone())),
                None => None,
            };

            tracing::debug!(
                "fileset {:?} on {}: block grace {:?}",
                fileset_name,
                self.filesystem,
                record.block_grace
            );

            entity.update(fileset_name, self.record_value(record, timestamp));
        }
    }

    /// Converts one raw record into a quota value.
    ///
    /// Grace resolution runs on the raw (physical) counters, before the
    /// replication division, matching what the backend's grace countdown is
    /// keyed on.
    fn record_value(&self, record: &QuotaRecord, timestamp: u64) -> QuotaValue {
        let expired = resolve_grace(&record.block_grace, record.block_usage, record.block_quota);
        let files_expired =
            resolve_grace(&record.files_grace, record.files_usage, record.files_quota);

        QuotaValue {
            used: record.block_usage / self.replication_factor,
            soft: record.block_quota / self.replication_factor,
            hard: record.block_limit / self.replication_factor,
            doubt: record.block_in_doubt / self.replication_factor,
            expired,
            files_used: record.files_usage,
            files_soft: record.files_quota,
            files_hard: record.files_limit,
            files_doubt: record.files_in_doubt,
            files_expired,
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::GraceStatus;

    fn record(used: u64, soft: u64, fileset_id: Option<&str>) -> QuotaRecord {
        QuotaRecord {
            block_usage: used,
            block_quota: soft,
            block_limit: soft * 2,
            block_in_doubt: 0,
            block_grace: "none".to_string(),
            files_usage: 10,
            files_quota: 100,
            files_limit: 200,
            files_in_doubt: 0,
            files_grace: "none".to_string(),
            fileset_id: fileset_id.map(str::to_string),
        }
    }

    fn listing(
        kind: QuotaKind,
        entries: Vec<(&str, Vec<QuotaRecord>)>,
    ) -> DeviceQuotaListing {
        let mut by_id = HashMap::new();
        for (id, records) in entries {
            by_id.insert(id.to_string(), records);
        }
        HashMap::from([(kind, by_id)])
    }

    fn no_resolution(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_block_counters_divided_by_replication_factor() {
        let resolver = |id: &str| Some(format!("user{}", id));
        let fs_resolver = no_resolution;
        let agg = QuotaAggregator::new("projectsA", "scratch", 2, &resolver, &fs_resolver);

        let mut rec = record(101, 100, None);
        rec.block_limit = 201;
        rec.block_in_doubt = 7;
        let outcome = agg.aggregate(&listing(QuotaKind::User, vec![("1", vec![rec])]), 1000);

        let value = outcome.users["user1"].get(None).unwrap();
        assert_eq!(value.used, 50);
        assert_eq!(value.soft, 50);
        assert_eq!(value.hard, 100);
        assert_eq!(value.doubt, 3);
    }

    #[test]
    fn test_inode_counters_never_divided() {
        let resolver = |id: &str| Some(format!("user{}", id));
        let fs_resolver = no_resolution;
        let agg = QuotaAggregator::new("projectsA", "scratch", 4, &resolver, &fs_resolver);

        let mut rec = record(400, 800, None);
        rec.files_usage = 123;
        rec.files_quota = 456;
        rec.files_limit = 789;
        rec.files_in_doubt = 11;
        let outcome = agg.aggregate(&listing(QuotaKind::User, vec![("1", vec![rec])]), 1000);

        let value = outcome.users["user1"].get(None).unwrap();
        assert_eq!(value.used, 100);
        assert_eq!(value.files_used, 123);
        assert_eq!(value.files_soft, 456);
        assert_eq!(value.files_hard, 789);
        assert_eq!(value.files_doubt, 11);
    }

    #[test]
    fn test_sub_records_on_same_fileset_accumulate() {
        let resolver = |_: &str| Some("u1".to_string());
        let fs_resolver = |id: &str| Some(format!("proj{}", id));
        let agg = QuotaAggregator::new("projectsA", "scratch", 1, &resolver, &fs_resolver);

        let outcome = agg.aggregate(
            &listing(
                QuotaKind::User,
                vec![("1", vec![record(100, 50, Some("1")), record(20, 50, Some("1"))])],
            ),
            1000,
        );

        let value = outcome.users["u1"].get(Some("proj1")).unwrap();
        assert_eq!(value.used, 120);
        assert!(outcome.users["u1"].exceeds());
    }

    #[test]
    fn test_unresolved_owner_kept_under_raw_identifier() {
        let fs_resolver = no_resolution;
        let agg = QuotaAggregator::new(
            "projectsA",
            "scratch",
            1,
            &no_resolution,
            &fs_resolver,
        );

        let outcome = agg.aggregate(
            &listing(QuotaKind::User, vec![("2540075", vec![record(10, 50, None)])]),
            1000,
        );

        assert!(outcome.users.contains_key("2540075"));
        assert_eq!(outcome.unresolved, vec!["2540075".to_string()]);
    }

    #[test]
    fn test_fileset_map_keyed_by_resolved_name() {
        let owner_resolver = no_resolution;
        let fs_resolver = |id: &str| match id {
            "7" => Some("gvo00002".to_string()),
            _ => None,
        };
        let agg =
            QuotaAggregator::new("projectsA", "scratch", 1, &owner_resolver, &fs_resolver);

        let outcome = agg.aggregate(
            &listing(
                QuotaKind::Fileset,
                vec![("7", vec![record(10, 50, Some("7"))]), ("8", vec![record(5, 50, None)])],
            ),
            1000,
        );

        assert!(outcome.filesets.contains_key("gvo00002"));
        assert_eq!(outcome.filesets["gvo00002"].kind, QuotaKind::Fileset);
        // Unresolvable fileset id stays under the raw identifier.
        assert!(outcome.filesets.contains_key("8"));
        assert_eq!(outcome.unresolved, vec!["8".to_string()]);
    }

    #[test]
    fn test_grace_resolved_from_raw_counters() {
        let resolver = |_: &str| Some("u1".to_string());
        let fs_resolver = no_resolution;
        let agg = QuotaAggregator::new("projectsA", "scratch", 2, &resolver, &fs_resolver);

        // Raw usage over the raw soft limit; after division both are equal,
        // but the grace countdown is keyed on the raw counters.
        let mut rec = record(101, 100, None);
        rec.block_grace = "2 days".to_string();
        let outcome = agg.aggregate(&listing(QuotaKind::User, vec![("1", vec![rec])]), 1000);

        let value = outcome.users["u1"].get(None).unwrap();
        assert_eq!(value.expired, GraceStatus::active(2 * 86_400));
    }

    #[test]
    fn test_aggregation_is_deterministic() {
        let resolver = |id: &str| Some(format!("user{}", id));
        let fs_resolver = |id: &str| Some(format!("fs{}", id));
        let agg = QuotaAggregator::new("projectsA", "scratch", 3, &resolver, &fs_resolver);

        let input = listing(
            QuotaKind::User,
            vec![
                ("1", vec![record(100, 50, Some("1")), record(31, 50, Some("1"))]),
                ("2", vec![record(7, 50, None)]),
            ],
        );

        let first = agg.aggregate(&input, 1000);
        let second = agg.aggregate(&input, 1000);
        assert_eq!(first.users, second.users);
    }

    #[test]
    fn test_zero_replication_factor_clamped() {
        let resolver = |_: &str| Some("u1".to_string());
        let fs_resolver = no_resolution;
        let agg = QuotaAggregator::new("projectsA", "scratch", 0, &resolver, &fs_resolver);

        let outcome = agg.aggregate(
            &listing(QuotaKind::User, vec![("1", vec![record(100, 50, None)])]),
            1000,
        );
        assert_eq!(outcome.users["u1"].get(None).unwrap().used, 100);
    }

    #[test]
    fn test_empty_listing_yields_empty_maps() {
        let resolver = |_: &str| Some("u1".to_string());
        let fs_resolver = no_resolution;
        let agg = QuotaAggregator::new("projectsA", "scratch", 1, &resolver, &fs_resolver);

        let outcome = agg.aggregate(&HashMap::new(), 1000);
        assert!(outcome.users.is_empty());
        assert!(outcome.filesets.is_empty());
        assert!(outcome.unresolved.is_empty());
    }
}
