use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;

use quotamon_backend::{
    write_fileset_snapshot, FilesetListing, MemoryBackend, QuotaKind, StorageBackend,
};
use quotamon_core::{scan_inode_criticality, AggregateOutcome, InodeCritical, QuotaAggregator};
use quotamon_sink::{BatchDispatcher, QuotaSink, SinkError};

use crate::config::{QuotamonConfig, StorageSystemConfig};
use crate::notify::{format_critical_inodes, Notifier};

/// Counters describing one run, keyed per storage system or filesystem.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    values: BTreeMap<String, i64>,
}

impl RunStats {
    pub fn set(&mut self, key: impl Into<String>, value: i64) {
        self.values.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<i64> {
        self.values.get(key).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn summary(&self) -> String {
        self.values
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// What one storage system's processing produced.
#[derive(Debug, Clone, Default)]
pub struct StorageOutcome {
    pub exceeding_users: Vec<String>,
    pub exceeding_filesets: Vec<String>,
}

/// Checks quota for every configured storage system and pushes reconciled
/// records to the sink.
///
/// A failure in one storage system is logged and does not abort the others.
pub fn run_check_quota(
    config: &QuotamonConfig,
    selected: &[String],
    sink: &dyn QuotaSink,
    dry_run: bool,
) -> RunStats {
    let mut stats = RunStats::default();

    for storage in &config.storage {
        if !selected.is_empty() && !selected.contains(&storage.name) {
            continue;
        }
        tracing::info!("Processing quota for storage {}", storage.name);

        let backend = match load_backend(storage) {
            Ok(backend) => backend,
            Err(err) => {
                tracing::error!("Backend unavailable for storage {}: {}", storage.name, err);
                stats.set(format!("{}_failed", storage.name), 1);
                continue;
            }
        };

        match process_storage(storage, &backend, sink, dry_run) {
            Ok(outcome) => {
                report_exceeding(&mut stats, storage, &outcome);
            }
            Err(err) => {
                tracing::error!("Could not process storage {}: {}", storage.name, err);
                stats.set(format!("{}_failed", storage.name), 1);
            }
        }
    }

    stats
}

fn report_exceeding(stats: &mut RunStats, storage: &StorageSystemConfig, outcome: &StorageOutcome) {
    stats.set(
        format!("{}_users", storage.name),
        outcome.exceeding_users.len() as i64,
    );
    stats.set(
        format!("{}_filesets", storage.name),
        outcome.exceeding_filesets.len() as i64,
    );

    if outcome.exceeding_users.is_empty() {
        tracing::debug!(
            "storage {} found no users who are exceeding their quota",
            storage.name
        );
    } else {
        tracing::warn!(
            "storage {} found {} users who are exceeding their quota",
            storage.name,
            outcome.exceeding_users.len()
        );
        for user in &outcome.exceeding_users {
            tracing::warn!("{} exceeds quota on storage {}", user, storage.name);
        }
    }

    if outcome.exceeding_filesets.is_empty() {
        tracing::debug!(
            "storage {} found no filesets that are exceeding their quota",
            storage.name
        );
    } else {
        tracing::warn!(
            "storage {} found {} filesets that are exceeding their quota",
            storage.name,
            outcome.exceeding_filesets.len()
        );
        for fileset in &outcome.exceeding_filesets {
            tracing::warn!("{} exceeds quota on storage {}", fileset, storage.name);
        }
    }
}

fn load_backend(storage: &StorageSystemConfig) -> anyhow::Result<MemoryBackend> {
    let Some(ref listing) = storage.listing else {
        anyhow::bail!(
            "no recorded listing configured for storage {} and no live driver attached",
            storage.name
        );
    };
    Ok(MemoryBackend::from_file(listing)?)
}

/// Aggregates and pushes one storage system's quota, returning the
/// exceeding entities.
pub fn process_storage(
    storage: &StorageSystemConfig,
    backend: &dyn StorageBackend,
    sink: &dyn QuotaSink,
    dry_run: bool,
) -> anyhow::Result<StorageOutcome> {
    let filesystems = backend.list_filesystems()?;
    if !filesystems.contains(&storage.filesystem) {
        anyhow::bail!(
            "Non-existent filesystem {} on storage {}",
            storage.filesystem,
            storage.name
        );
    }

    let listing = backend.list_quota(&storage.filesystem)?;
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs();

    let owner_resolver = |id: &str| backend.quota_owner(id, &storage.filesystem);
    let fileset_resolver = |id: &str| backend.fileset_name(id, &storage.filesystem);
    let aggregator = QuotaAggregator::new(
        &storage.name,
        &storage.filesystem,
        storage.data_replication_factor,
        &owner_resolver,
        &fileset_resolver,
    );
    let outcome = aggregator.aggregate(&listing, timestamp);

    let exceeding_filesets = push_fileset_quota(storage, &outcome, sink, dry_run)?;
    let exceeding_users = push_user_quota(storage, &outcome, sink, dry_run)?;

    Ok(StorageOutcome {
        exceeding_users,
        exceeding_filesets,
    })
}

fn push_user_quota(
    storage: &StorageSystemConfig,
    outcome: &AggregateOutcome,
    sink: &dyn QuotaSink,
    dry_run: bool,
) -> Result<Vec<String>, SinkError> {
    tracing::info!("Logging user quota to account sink");

    BatchDispatcher::scope(sink, &storage.name, QuotaKind::User, dry_run, |pusher| {
        let mut exceeding = Vec::new();
        let mut owners: Vec<&String> = outcome.users.keys().collect();
        owners.sort();

        for owner in owners {
            if outcome.unresolved.contains(owner) {
                tracing::warn!("Skipping unresolved owner {}", owner);
                continue;
            }
            let entity = &outcome.users[owner];

            let mut filesets: Vec<_> = entity.quota_map().iter().collect();
            filesets.sort_by(|a, b| a.0.cmp(b.0));
            for (fileset, quota) in filesets {
                pusher.push_quota(owner, fileset.as_deref(), quota, false)?;
            }

            if entity.exceeds() {
                exceeding.push(owner.clone());
            }
        }
        Ok(exceeding)
    })
}

fn push_fileset_quota(
    storage: &StorageSystemConfig,
    outcome: &AggregateOutcome,
    sink: &dyn QuotaSink,
    dry_run: bool,
) -> Result<Vec<String>, SinkError> {
    tracing::info!("Logging fileset quota to account sink");

    BatchDispatcher::scope(sink, &storage.name, QuotaKind::Fileset, dry_run, |pusher| {
        let mut exceeding = Vec::new();
        let mut names: Vec<&String> = outcome.filesets.keys().collect();
        names.sort();

        for name in names {
            if outcome.unresolved.contains(name) {
                tracing::warn!("Skipping unresolved fileset {}", name);
                continue;
            }
            let Some((owner, shared)) = project_owner(storage, name) else {
                tracing::debug!("Fileset {} is not a project fileset, skipping", name);
                continue;
            };
            let entity = &outcome.filesets[name];

            let mut filesets: Vec<_> = entity.quota_map().iter().collect();
            filesets.sort_by(|a, b| a.0.cmp(b.0));
            for (fileset, quota) in filesets {
                pusher.push_quota(&owner, fileset.as_deref(), quota, shared)?;
            }

            if entity.exceeds() {
                exceeding.push(name.clone());
            }
        }
        Ok(exceeding)
    })
}

/// Project owner and shared flag for a fileset name.
///
/// A name carrying the shared prefix is pushed to the shared sink under the
/// project name with the shared prefix swapped for the project prefix. When
/// a project prefix is configured, filesets matching neither prefix are not
/// project filesets and are skipped.
fn project_owner(storage: &StorageSystemConfig, name: &str) -> Option<(String, bool)> {
    if let Some(ref shared_prefix) = storage.shared_fileset_prefix {
        if name.starts_with(shared_prefix.as_str()) {
            let owner = match storage.project_fileset_prefix {
                Some(ref project_prefix) => name.replacen(shared_prefix, project_prefix, 1),
                None => name.to_string(),
            };
            return Some((owner, true));
        }
    }
    if let Some(ref project_prefix) = storage.project_fileset_prefix {
        if !name.starts_with(project_prefix.as_str()) {
            return None;
        }
    }
    Some((name.to_string(), false))
}

/// Stores fileset snapshots and reports filesets critically low on inodes.
pub fn run_inode_log(
    config: &QuotamonConfig,
    location: &Path,
    notifier: &dyn Notifier,
) -> RunStats {
    let mut stats = RunStats::default();
    let mut critical_all: BTreeMap<String, HashMap<String, InodeCritical>> = BTreeMap::new();

    for storage in &config.storage {
        let backend = match load_backend(storage) {
            Ok(backend) => backend,
            Err(err) => {
                tracing::error!("Backend unavailable for storage {}: {}", storage.name, err);
                stats.set(format!("{}_failed", storage.name), 1);
                continue;
            }
        };

        let filesets = match backend.list_filesets() {
            Ok(filesets) => filesets,
            Err(err) => {
                tracing::error!("Could not list filesets for storage {}: {}", storage.name, err);
                stats.set(format!("{}_failed", storage.name), 1);
                continue;
            }
        };

        let mut filesystems: Vec<&String> = filesets.keys().collect();
        filesystems.sort();

        for filesystem in filesystems {
            let listing = &filesets[filesystem];
            match store_and_scan(storage, &backend, filesystem, listing, location, config) {
                Ok(critical) => {
                    stats.set(format!("{}_inodes_log", filesystem), 0);
                    if !critical.is_empty() {
                        tracing::info!(
                            "Filesystem {} has {} filesets reaching the inode limit",
                            filesystem,
                            critical.len()
                        );
                        critical_all.insert(filesystem.clone(), critical);
                    }
                }
                Err(err) => {
                    stats.set(format!("{}_inodes_log", filesystem), 1);
                    tracing::error!(
                        "Failed storing inodes information for FS {}: {}",
                        filesystem,
                        err
                    );
                }
            }
        }
    }

    if critical_all.is_empty() {
        tracing::debug!("No critical filesets found");
    } else {
        let body = format_critical_inodes(&critical_all);
        if let Err(err) = notifier.send("Inode space(s) running out", &body) {
            tracing::error!("Could not send critical-inode notification: {}", err);
        }
    }

    stats
}

fn store_and_scan(
    storage: &StorageSystemConfig,
    backend: &dyn StorageBackend,
    filesystem: &str,
    listing: &FilesetListing,
    location: &Path,
    config: &QuotamonConfig,
) -> anyhow::Result<HashMap<String, InodeCritical>> {
    write_fileset_snapshot(location, &storage.name, filesystem, &Utc::now(), listing)?;
    tracing::info!("Stored inodes information for FS {}", filesystem);

    let quota = backend.list_quota(filesystem)?;
    let fileset_quota = quota.get(&QuotaKind::Fileset).cloned().unwrap_or_default();
    Ok(scan_inode_criticality(
        listing,
        &fileset_quota,
        config.inode_threshold,
        storage.backend,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use quotamon_backend::{BackendKind, FilesetInfo, QuotaRecord};
    use quotamon_sink::RecordingSink;
    use std::cell::RefCell;

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

    fn storage_config(name: &str, filesystem: &str) -> StorageSystemConfig {
        StorageSystemConfig {
            name: name.to_string(),
            filesystem: filesystem.to_string(),
            backend: BackendKind::Gpfs,
            data_replication_factor: 1,
            listing: None,
            shared_fileset_prefix: None,
            project_fileset_prefix: None,
        }
    }

    fn backend_with_user_records(
        filesystem: &str,
        entries: Vec<(&str, Vec<QuotaRecord>)>,
    ) -> MemoryBackend {
        let mut by_id = HashMap::new();
        for (id, records) in entries {
            by_id.insert(id.to_string(), records);
        }
        let listing = HashMap::from([(QuotaKind::User, by_id)]);
        MemoryBackend::new().with_quota(filesystem, listing)
    }

    #[test]
    fn test_scenario_merged_records_exceed() {
        // Two sub-records for u1 on proj1 merge to used=120 > soft=50.
        let backend = backend_with_user_records(
            "scratch",
            vec![(
                "2540001",
                vec![record(100, 50, Some("1")), record(20, 50, Some("1"))],
            )],
        )
        .with_owner("2540001", "u1")
        .with_fileset_name("1", "proj1");

        let sink = RecordingSink::new();
        let outcome = process_storage(
            &storage_config("projectsA", "scratch"),
            &backend,
            &sink,
            false,
        )
        .unwrap();

        assert_eq!(outcome.exceeding_users, vec!["u1".to_string()]);
        assert_eq!(sink.total_records(), 1);
        assert_eq!(sink.calls()[0].sink_key, "projectsA");
    }

    #[test]
    fn test_missing_filesystem_is_an_error() {
        let backend = backend_with_user_records("other", vec![]);
        let sink = RecordingSink::new();

        let result = process_storage(
            &storage_config("projectsA", "scratch"),
            &backend,
            &sink,
            false,
        );
        assert!(result.is_err());
        assert_eq!(sink.call_count(), 0);
    }

    #[test]
    fn test_unresolved_owner_skipped_on_push_path() {
        let backend = backend_with_user_records(
            "scratch",
            vec![
                ("2540001", vec![record(100, 50, None)]),
                ("2540002", vec![record(10, 50, None)]),
            ],
        )
        .with_owner("2540002", "u2");

        let sink = RecordingSink::new();
        let outcome = process_storage(
            &storage_config("projectsA", "scratch"),
            &backend,
            &sink,
            false,
        )
        .unwrap();

        // Only the resolved owner is pushed; the unresolved one (which
        // exceeds) is not reported either.
        assert_eq!(sink.total_records(), 1);
        assert!(outcome.exceeding_users.is_empty());
    }

    #[test]
    fn test_shared_fileset_routed_to_shared_sink() {
        let mut by_id = HashMap::new();
        by_id.insert("7".to_string(), vec![record(10, 50, Some("7"))]);
        by_id.insert("8".to_string(), vec![record(90, 50, Some("8"))]);
        by_id.insert("9".to_string(), vec![record(5, 50, Some("9"))]);
        let listing = HashMap::from([(QuotaKind::Fileset, by_id)]);
        let backend = MemoryBackend::new()
            .with_quota("scratch", listing)
            .with_fileset_name("7", "gvo00002")
            .with_fileset_name("8", "gvos00002")
            .with_fileset_name("9", "homes");

        let mut storage = storage_config("projectsA", "scratch");
        storage.shared_fileset_prefix = Some("gvos".to_string());
        storage.project_fileset_prefix = Some("gvo".to_string());

        let sink = RecordingSink::new();
        let outcome = process_storage(&storage, &backend, &sink, false).unwrap();

        let calls = sink.calls();
        let shared: Vec<_> = calls
            .iter()
            .filter(|c| c.sink_key == "projectsA_shared")
            .collect();
        assert_eq!(shared.len(), 1);
        assert_eq!(shared[0].records.len(), 1);
        // Shared fileset is pushed under the project name.
        assert_eq!(shared[0].records[0].owner.name(), "gvo00002");
        // "homes" matches neither prefix and is skipped entirely.
        assert_eq!(sink.total_records(), 2);
        // The shared fileset exceeds its soft limit.
        assert_eq!(outcome.exceeding_filesets, vec!["gvos00002".to_string()]);
    }

    #[test]
    fn test_dry_run_pushes_nothing() {
        let backend = backend_with_user_records(
            "scratch",
            vec![("2540001", vec![record(100, 50, None)])],
        )
        .with_owner("2540001", "u1");

        let sink = RecordingSink::new();
        let outcome = process_storage(
            &storage_config("projectsA", "scratch"),
            &backend,
            &sink,
            true,
        )
        .unwrap();

        assert_eq!(sink.call_count(), 0);
        // Exceedance is still evaluated in dry-run mode.
        assert_eq!(outcome.exceeding_users, vec!["u1".to_string()]);
    }

    #[test]
    fn test_failing_sink_aborts_storage() {
        let backend = backend_with_user_records(
            "scratch",
            vec![("2540001", vec![record(100, 50, None)])],
        )
        .with_owner("2540001", "u1");

        let sink = RecordingSink::failing(503);
        let result = process_storage(
            &storage_config("projectsA", "scratch"),
            &backend,
            &sink,
            false,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_run_check_quota_isolates_storage_failures() {
        let mut config = QuotamonConfig::default();
        // No listing configured: the backend is unavailable for both.
        config.storage.push(storage_config("projectsA", "scratch"));
        config.storage.push(storage_config("projectsB", "data"));

        let sink = RecordingSink::new();
        let stats = run_check_quota(&config, &[], &sink, false);

        assert_eq!(stats.get("projectsA_failed"), Some(1));
        assert_eq!(stats.get("projectsB_failed"), Some(1));
    }

    #[test]
    fn test_run_check_quota_storage_filter() {
        let mut config = QuotamonConfig::default();
        config.storage.push(storage_config("projectsA", "scratch"));
        config.storage.push(storage_config("projectsB", "data"));

        let sink = RecordingSink::new();
        let stats = run_check_quota(&config, &["projectsB".to_string()], &sink, false);

        assert_eq!(stats.get("projectsA_failed"), None);
        assert_eq!(stats.get("projectsB_failed"), Some(1));
    }

    #[test]
    fn test_project_owner_prefix_rules() {
        let mut storage = storage_config("projectsA", "scratch");
        storage.shared_fileset_prefix = Some("gvos".to_string());
        storage.project_fileset_prefix = Some("gvo".to_string());

        assert_eq!(
            project_owner(&storage, "gvo00002"),
            Some(("gvo00002".to_string(), false))
        );
        assert_eq!(
            project_owner(&storage, "gvos00002"),
            Some(("gvo00002".to_string(), true))
        );
        assert_eq!(project_owner(&storage, "homes"), None);

        // Without configured prefixes, everything is a normal project.
        let bare = storage_config("projectsA", "scratch");
        assert_eq!(
            project_owner(&bare, "anything"),
            Some(("anything".to_string(), false))
        );
    }

    struct RecordingNotifier {
        messages: RefCell<Vec<(String, String)>>,
    }

    impl Notifier for RecordingNotifier {
        fn send(&self, subject: &str, body: &str) -> anyhow::Result<()> {
            self.messages
                .borrow_mut()
                .push((subject.to_string(), body.to_string()));
            Ok(())
        }
    }

    fn write_backend_listing(backend: &MemoryBackend) -> tempfile::NamedTempFile {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::with_suffix(".json").unwrap();
        file.write_all(serde_json::to_string(backend).unwrap().as_bytes())
            .unwrap();
        file
    }

    #[test]
    fn test_run_inode_log_snapshots_and_notifies() {
        let mut rec = QuotaRecord::zeroed();
        rec.files_usage = 950;
        let by_id = HashMap::from([("1".to_string(), vec![rec])]);
        let listing = HashMap::from([(QuotaKind::Fileset, by_id)]);
        let filesets = HashMap::from([(
            "1".to_string(),
            FilesetInfo {
                fileset_name: "gvo00002".to_string(),
                alloc_inodes: 960,
                max_inodes: 1000,
            },
        )]);
        let backend = MemoryBackend::new()
            .with_quota("scratch", listing)
            .with_filesets("scratch", filesets);

        let listing_file = write_backend_listing(&backend);
        let mut config = QuotamonConfig::default();
        let mut storage = storage_config("projectsA", "scratch");
        storage.listing = Some(listing_file.path().to_path_buf());
        config.storage.push(storage);

        let location = tempfile::tempdir().unwrap();
        let notifier = RecordingNotifier {
            messages: RefCell::new(Vec::new()),
        };

        let stats = run_inode_log(&config, location.path(), &notifier);

        assert_eq!(stats.get("scratch_inodes_log"), Some(0));
        let snapshots: Vec<_> = std::fs::read_dir(location.path())
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(snapshots.len(), 1);

        let messages = notifier.messages.borrow();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].1.contains("gvo00002"));
    }

    #[test]
    fn test_run_inode_log_no_critical_no_notification() {
        let mut rec = QuotaRecord::zeroed();
        rec.files_usage = 100;
        let by_id = HashMap::from([("1".to_string(), vec![rec])]);
        let listing = HashMap::from([(QuotaKind::Fileset, by_id)]);
        let filesets = HashMap::from([(
            "1".to_string(),
            FilesetInfo {
                fileset_name: "gvo00002".to_string(),
                alloc_inodes: 200,
                max_inodes: 1000,
            },
        )]);
        let backend = MemoryBackend::new()
            .with_quota("scratch", listing)
            .with_filesets("scratch", filesets);

        let listing_file = write_backend_listing(&backend);
        let mut config = QuotamonConfig::default();
        let mut storage = storage_config("projectsA", "scratch");
        storage.listing = Some(listing_file.path().to_path_buf());
        config.storage.push(storage);

        let location = tempfile::tempdir().unwrap();
        let notifier = RecordingNotifier {
            messages: RefCell::new(Vec::new()),
        };

        run_inode_log(&config, location.path(), &notifier);
        assert!(notifier.messages.borrow().is_empty());
    }
}
