//! The recursive, paginated collection engine.
//!
//! A [`CollectionNode`] describes one resource and how each of its records fans out into child
//! resources. A [`Collector`] walks that tree depth-first and writes every record it does not
//! divert to its sinks, tagged with the node's record type and the URL it came from.

mod collector;
mod node;

pub use collector::Collector;
pub use node::{CollectionNode, RecordDiverter, metadata_segment, overlay};
