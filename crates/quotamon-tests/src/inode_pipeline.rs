//! End-to-end inode log: fileset listing through snapshot persistence and
//! criticality scanning to the admin report.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Write;

use quotamon_backend::{
    read_fileset_snapshot, BackendKind, FilesetInfo, MemoryBackend, QuotaKind, QuotaRecord,
};
use quotamon_cli::config::{QuotamonConfig, StorageSystemConfig};
use quotamon_cli::notify::Notifier;
use quotamon_cli::run::run_inode_log;

struct RecordingNotifier {
    messages: RefCell<Vec<(String, String)>>,
}

impl RecordingNotifier {
    fn new() -> Self {
        Self {
            messages: RefCell::new(Vec::new()),
        }
    }
}

impl Notifier for RecordingNotifier {
    fn send(&self, subject: &str, body: &str) -> anyhow::Result<()> {
        self.messages
            .borrow_mut()
            .push((subject.to_string(), body.to_string()));
        Ok(())
    }
}

fn inode_record(used: u64, limit: u64) -> QuotaRecord {
    let mut rec = QuotaRecord::zeroed();
    rec.files_usage = used;
    rec.files_limit = limit;
    rec
}

fn backend_with_filesets(
    filesystem: &str,
    filesets: Vec<(&str, FilesetInfo, QuotaRecord)>,
) -> MemoryBackend {
    let mut listing = HashMap::new();
    let mut by_id = HashMap::new();
    for (id, info, rec) in filesets {
        listing.insert(id.to_string(), info);
        by_id.insert(id.to_string(), vec![rec]);
    }
    MemoryBackend::new()
        .with_quota(filesystem, HashMap::from([(QuotaKind::Fileset, by_id)]))
        .with_filesets(filesystem, listing)
}

fn config_for(backend: &MemoryBackend, kind: BackendKind) -> (QuotamonConfig, tempfile::NamedTempFile) {
    let mut file = tempfile::NamedTempFile::with_suffix(".json").unwrap();
    file.write_all(serde_json::to_string(backend).unwrap().as_bytes())
        .unwrap();

    let mut config = QuotamonConfig::default();
    config.storage.push(StorageSystemConfig {
        name: "projectsA".to_string(),
        filesystem: "scratch".to_string(),
        backend: kind,
        data_replication_factor: 1,
        listing: Some(file.path().to_path_buf()),
        shared_fileset_prefix: None,
        project_fileset_prefix: None,
    });
    (config, file)
}

#[test]
fn test_snapshot_written_and_readable() {
    let backend = backend_with_filesets(
        "scratch",
        vec![(
            "1",
            FilesetInfo {
                fileset_name: "gvo00002".to_string(),
                alloc_inodes: 500,
                max_inodes: 1000,
            },
            inode_record(100, 0),
        )],
    );
    let (config, _listing_file) = config_for(&backend, BackendKind::Gpfs);

    let location = tempfile::tempdir().unwrap();
    let notifier = RecordingNotifier::new();
    let stats = run_inode_log(&config, location.path(), &notifier);

    assert_eq!(stats.get("scratch_inodes_log"), Some(0));

    let entries: Vec<_> = std::fs::read_dir(location.path())
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    assert_eq!(entries.len(), 1);

    let restored = read_fileset_snapshot(&entries[0].path()).unwrap();
    assert_eq!(restored["1"].fileset_name, "gvo00002");
    assert_eq!(restored["1"].max_inodes, 1000);
}

#[test]
fn test_critical_fileset_reaches_admin_report() {
    let backend = backend_with_filesets(
        "scratch",
        vec![
            (
                "1",
                FilesetInfo {
                    fileset_name: "gvo00002".to_string(),
                    alloc_inodes: 960,
                    max_inodes: 1000,
                },
                inode_record(901, 0),
            ),
            (
                "2",
                FilesetInfo {
                    fileset_name: "gvo00013".to_string(),
                    alloc_inodes: 100,
                    max_inodes: 1000,
                },
                inode_record(900, 0),
            ),
        ],
    );
    let (config, _listing_file) = config_for(&backend, BackendKind::Gpfs);

    let location = tempfile::tempdir().unwrap();
    let notifier = RecordingNotifier::new();
    run_inode_log(&config, location.path(), &notifier);

    let messages = notifier.messages.borrow();
    assert_eq!(messages.len(), 1);
    // 901 of 1000 crosses the 0.9 threshold; 900 exactly does not.
    assert!(messages[0].1.contains("gvo00002"));
    assert!(!messages[0].1.contains("gvo00013"));
}

#[test]
fn test_lustre_uses_quota_limit_for_ceiling() {
    let backend = backend_with_filesets(
        "scratch",
        vec![(
            "1",
            FilesetInfo {
                fileset_name: "project1".to_string(),
                alloc_inodes: 0,
                max_inodes: 0,
            },
            inode_record(95, 100),
        )],
    );
    let (config, _listing_file) = config_for(&backend, BackendKind::Lustre);

    let location = tempfile::tempdir().unwrap();
    let notifier = RecordingNotifier::new();
    run_inode_log(&config, location.path(), &notifier);

    let messages = notifier.messages.borrow();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].1.contains("project1"));
    assert!(messages[0].1.contains("[allocated: 0]"));
}
