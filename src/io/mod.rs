//! Collaborators at the edge of the collection core: record sinks, telemetry and queues.
//!
//! Each contract has a production implementation and an in-memory one for tests.

pub(crate) mod path_utils;
mod queue;
mod sink;
mod telemetry;

pub use queue::{DirectoryQueue, MemoryQueue, Queue, QueuedItem, put_object};
pub use sink::{JsonLinesSink, MemorySink, RecordSink};
pub use telemetry::{LogTelemetry, MemoryTelemetry, Telemetry, TelemetryRecord};
