//! Quotamon storage-backend boundary.
//!
//! Raw per-device quota records and fileset listings as reported by the
//! storage backend (GPFS, Lustre), the `StorageBackend` trait behind which
//! the actual drivers live, and gzip snapshot persistence for raw listings.

pub mod backend;
pub mod error;
pub mod record;
pub mod snapshot;

pub use backend::{MemoryBackend, StorageBackend};
pub use error::{BackendError, BackendResult};
pub use record::{
    BackendKind, DeviceQuotaListing, FilesetInfo, FilesetListing, QuotaKind, QuotaRecord,
};
pub use snapshot::{read_fileset_snapshot, snapshot_filename, write_fileset_snapshot, SnapshotError};
