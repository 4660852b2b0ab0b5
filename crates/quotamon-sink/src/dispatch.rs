use std::collections::HashMap;

use quotamon_core::{QuotaKind, QuotaValue};

use crate::sink::{QuotaSink, SinkError};
use crate::wire::WireRecord;

/// A buffer is flushed as soon as it holds more records than this, capping
/// request payload size and bounding memory for very large owner sets.
pub const BATCH_FLUSH_THRESHOLD: usize = 100;

/// Suffix deriving the shared sink key from the storage name.
pub const SHARED_SINK_SUFFIX: &str = "_shared";

/// Batched pusher toward the remote sink for one storage system.
///
/// Holds two buffers, one per sink key (normal and shared), flushing each
/// whenever it grows past [`BATCH_FLUSH_THRESHOLD`] and once more on scope
/// exit. Delivery is best-effort, chunked, with no cross-chunk atomicity:
/// a failed push is logged and re-raised, never retried here, and earlier
/// chunks are not rolled back.
pub struct BatchDispatcher<'a, S: QuotaSink + ?Sized> {
    sink: &'a S,
    kind: QuotaKind,
    storage_name: String,
    storage_name_shared: String,
    buffers: HashMap<String, Vec<WireRecord>>,
    dry_run: bool,
}

impl<'a, S: QuotaSink + ?Sized> BatchDispatcher<'a, S> {
    pub fn new(sink: &'a S, storage_name: &str, kind: QuotaKind, dry_run: bool) -> Self {
        let storage_name_shared = format!("{}{}", storage_name, SHARED_SINK_SUFFIX);
        let buffers = HashMap::from([
            (storage_name.to_string(), Vec::new()),
            (storage_name_shared.clone(), Vec::new()),
        ]);
        Self {
            sink,
            kind,
            storage_name: storage_name.to_string(),
            storage_name_shared,
            buffers,
            dry_run,
        }
    }

    /// Runs `body` against a fresh dispatcher and flushes the remaining
    /// buffers on every exit path. An error from the body does not suppress
    /// the final flush attempt, but it is the error reported upward.
    pub fn scope<T, F>(
        sink: &'a S,
        storage_name: &str,
        kind: QuotaKind,
        dry_run: bool,
        body: F,
    ) -> Result<T, SinkError>
    where
        F: FnOnce(&mut BatchDispatcher<'a, S>) -> Result<T, SinkError>,
    {
        let mut pusher = BatchDispatcher::new(sink, storage_name, kind, dry_run);
        match body(&mut pusher) {
            Ok(value) => {
                pusher.flush_remaining()?;
                Ok(value)
            }
            Err(err) => {
                tracing::error!(
                    "Error while pushing quota for {}: {}",
                    pusher.storage_name,
                    err
                );
                if let Err(flush_err) = pusher.flush_remaining() {
                    tracing::error!(
                        "Final flush for {} failed: {}",
                        pusher.storage_name,
                        flush_err
                    );
                }
                Err(err)
            }
        }
    }

    /// Flattens and buffers one quota value for `owner` on `fileset`,
    /// selecting the shared sink when asked.
    pub fn push_quota(
        &mut self,
        owner: &str,
        fileset: Option<&str>,
        quota: &QuotaValue,
        shared: bool,
    ) -> Result<(), SinkError> {
        let key = if shared {
            self.storage_name_shared.clone()
        } else {
            self.storage_name.clone()
        };
        let record = WireRecord::from_value(self.kind, owner, fileset, quota);
        self.push_record(&key, record)
    }

    /// Buffers one wire record for the given sink key, flushing the buffer
    /// once it grows past the batch threshold. A key the dispatcher was not
    /// constructed with is logged and dropped.
    pub fn push_record(&mut self, sink_key: &str, record: WireRecord) -> Result<(), SinkError> {
        let Some(buffer) = self.buffers.get_mut(sink_key) else {
            tracing::error!(
                "Can not buffer record for unknown sink key {} (dispatcher bound to {})",
                sink_key,
                self.storage_name
            );
            return Ok(());
        };
        buffer.push(record);

        if buffer.len() > BATCH_FLUSH_THRESHOLD {
            self.flush(sink_key)?;
        }
        Ok(())
    }

    /// Flushes whatever the buffers still hold, normal sink first.
    pub fn flush_remaining(&mut self) -> Result<(), SinkError> {
        let normal = self.storage_name.clone();
        let shared = self.storage_name_shared.clone();
        self.flush(&normal)?;
        self.flush(&shared)
    }

    fn flush(&mut self, sink_key: &str) -> Result<(), SinkError> {
        let Some(records) = self.buffers.get(sink_key) else {
            return Ok(());
        };
        if records.is_empty() {
            return Ok(());
        }

        self.deliver(sink_key, records)?;

        // Cleared only after a successful delivery; a failed chunk stays
        // buffered for the one final flush attempt at scope exit.
        if let Some(buffer) = self.buffers.get_mut(sink_key) {
            buffer.clear();
        }
        Ok(())
    }

    fn deliver(&self, sink_key: &str, records: &[WireRecord]) -> Result<(), SinkError> {
        if self.dry_run {
            tracing::info!(
                "Would push {} records to sink {}: {}",
                records.len(),
                sink_key,
                serde_json::to_string(records).unwrap_or_else(|_| "<unserializable>".to_string())
            );
            return Ok(());
        }

        tracing::debug!("Pushing {} records to sink {}", records.len(), sink_key);
        self.sink.push(sink_key, self.kind, records).map_err(|err| {
            tracing::error!("Could not push quota chunk to sink {}: {}", sink_key, err);
            err
        })
    }
}
