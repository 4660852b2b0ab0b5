//! End-to-end reconciliation: raw device listing through aggregation and
//! the batched dispatcher to the recorded sink.

use std::collections::HashMap;

use quotamon_backend::{MemoryBackend, QuotaKind, QuotaRecord};
use quotamon_cli::config::StorageSystemConfig;
use quotamon_cli::run::process_storage;
use quotamon_sink::RecordingSink;

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

fn storage_config(name: &str, filesystem: &str, replication: u64) -> StorageSystemConfig {
    StorageSystemConfig {
        name: name.to_string(),
        filesystem: filesystem.to_string(),
        backend: quotamon_backend::BackendKind::Gpfs,
        data_replication_factor: replication,
        listing: None,
        shared_fileset_prefix: None,
        project_fileset_prefix: None,
    }
}

fn user_backend(filesystem: &str, entries: Vec<(&str, Vec<QuotaRecord>)>) -> MemoryBackend {
    let mut by_id = HashMap::new();
    for (id, records) in entries {
        by_id.insert(id.to_string(), records);
    }
    MemoryBackend::new().with_quota(filesystem, HashMap::from([(QuotaKind::User, by_id)]))
}

#[test]
fn test_wire_records_carry_normalized_counters() {
    // Replication factor 2: block counters halve, inode counters stay.
    let mut rec = record(1000, 500, Some("1"));
    rec.block_grace = "7 days".to_string();
    let backend = user_backend("scratch", vec![("2540001", vec![rec])])
        .with_owner("2540001", "u1")
        .with_fileset_name("1", "proj1");

    let sink = RecordingSink::new();
    process_storage(&storage_config("projectsA", "scratch", 2), &backend, &sink, false).unwrap();

    let calls = sink.calls();
    assert_eq!(calls.len(), 1);
    let wire = &calls[0].records[0];
    assert_eq!(wire.owner.name(), "u1");
    assert_eq!(wire.fileset.as_deref(), Some("proj1"));
    assert_eq!(wire.used, 500);
    assert_eq!(wire.soft, 250);
    assert_eq!(wire.files_used, 10);
    assert_eq!(wire.files_soft, 100);
    assert!(!wire.expired);
    assert_eq!(wire.remaining, 7 * 86_400);
}

#[test]
fn test_wire_round_trip_matches_aggregated_value() {
    let backend = user_backend(
        "scratch",
        vec![("2540001", vec![record(120, 100, Some("1")), record(30, 0, Some("1"))])],
    )
    .with_owner("2540001", "u1")
    .with_fileset_name("1", "proj1");

    let sink = RecordingSink::new();
    process_storage(&storage_config("projectsA", "scratch", 1), &backend, &sink, false).unwrap();

    let wire = sink.calls()[0].records[0].clone();
    let restored = wire.to_value(0);

    // The flattened record reconstructs to the merged counters.
    assert_eq!(restored.used, 150);
    assert_eq!(restored.soft, 100);
    assert_eq!(restored.files_used, 20);
    assert_eq!(restored.expired, quotamon_core::GraceStatus::none());
}

#[test]
fn test_large_owner_set_is_chunked() {
    let mut entries = Vec::new();
    let ids: Vec<String> = (0..250).map(|i| format!("25{:05}", i)).collect();
    for id in &ids {
        entries.push((id.as_str(), vec![record(10, 50, None)]));
    }
    let mut backend = user_backend("scratch", entries);
    for id in &ids {
        backend = backend.with_owner(id.clone(), format!("u{}", id));
    }

    let sink = RecordingSink::new();
    process_storage(&storage_config("projectsA", "scratch", 1), &backend, &sink, false).unwrap();

    let calls = sink.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[0].records.len(), 101);
    assert_eq!(calls[1].records.len(), 101);
    assert_eq!(calls[2].records.len(), 48);
    assert_eq!(sink.total_records(), 250);
    assert!(calls.iter().all(|c| c.kind == QuotaKind::User));
}

#[test]
fn test_dry_run_full_pipeline_touches_no_sink() {
    let backend = user_backend("scratch", vec![("2540001", vec![record(100, 50, None)])])
        .with_owner("2540001", "u1");

    let sink = RecordingSink::new();
    let outcome = process_storage(
        &storage_config("projectsA", "scratch", 1),
        &backend,
        &sink,
        true,
    )
    .unwrap();

    assert_eq!(sink.call_count(), 0);
    assert_eq!(outcome.exceeding_users, vec!["u1".to_string()]);
}
