//! Gzip snapshot persistence for raw fileset listings.
//!
//! One JSON document per (storage-system, filesystem, timestamp), compressed
//! at maximum level, named by a timestamped, filesystem-qualified key.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use thiserror::Error;

use crate::record::FilesetListing;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Snapshot file name for one (storage-system, filesystem, timestamp).
pub fn snapshot_filename(storage_name: &str, filesystem: &str, at: &DateTime<Utc>) -> String {
    format!(
        "{}_inodes_{}_{}.gz",
        storage_name,
        at.format("%Y%m%d-%H:%M"),
        filesystem
    )
}

/// Writes the raw fileset listing as gzipped JSON under `dir`, creating the
/// directory if needed. Returns the path written.
pub fn write_fileset_snapshot(
    dir: &Path,
    storage_name: &str,
    filesystem: &str,
    at: &DateTime<Utc>,
    listing: &FilesetListing,
) -> Result<PathBuf, SnapshotError> {
    std::fs::create_dir_all(dir)?;

    let path = dir.join(snapshot_filename(storage_name, filesystem, at));
    let file = File::create(&path)?;
    let mut encoder = GzEncoder::new(file, Compression::best());
    encoder.write_all(&serde_json::to_vec(listing)?)?;
    encoder.finish()?;

    tracing::info!(
        "Stored fileset snapshot for filesystem {} at {}",
        filesystem,
        path.display()
    );
    Ok(path)
}

/// Reads a snapshot back into a fileset listing.
pub fn read_fileset_snapshot(path: &Path) -> Result<FilesetListing, SnapshotError> {
    let file = File::open(path)?;
    let mut decoder = GzDecoder::new(file);
    let mut contents = String::new();
    decoder.read_to_string(&mut contents)?;
    Ok(serde_json::from_str(&contents)?)
}
