//! Quotamon remote-sink side: flattened wire records, the sink transport
//! boundary, and the batched dispatcher that pushes reconciled quota in
//! bounded chunks.

pub mod dispatch;
pub mod sink;
pub mod wire;

pub use dispatch::{BatchDispatcher, BATCH_FLUSH_THRESHOLD, SHARED_SINK_SUFFIX};
pub use sink::{HttpSink, QuotaSink, RecordingSink, SinkCall, SinkError};
pub use wire::{OwnerRef, WireRecord};
