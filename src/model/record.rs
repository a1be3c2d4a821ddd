use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Insertion-ordered metadata carried from a parent crawl node down to its children
pub type Metadata = serde_json::Map<String, Value>;

/// Metadata key holding the URL a record was fetched from
pub const ORIGINATING_URL: &str = "OriginatingUrl";

/// How a response body is parsed into records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display, strum::EnumString)]
pub enum ResponseShape {
    /// A JSON array; each non-null element is one record
    #[default]
    Array,

    /// A single JSON object
    Object,
}

/// Routing information attached to every record handed to a sink
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RecordContext {
    pub record_type: String,
    pub metadata: Metadata,
}

impl RecordContext {
    #[must_use]
    pub fn new(record_type: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            record_type: record_type.into(),
            metadata,
        }
    }

    #[must_use]
    pub fn originating_url(&self) -> Option<&str> {
        self.metadata.get(ORIGINATING_URL).and_then(Value::as_str)
    }
}

/// A record paired with its context, produced when a node diverts records away from normal output
#[derive(Debug, Clone, PartialEq)]
pub struct RecordWithContext {
    pub record: Value,
    pub context: RecordContext,
}

impl RecordWithContext {
    #[must_use]
    pub const fn new(record: Value, context: RecordContext) -> Self {
        Self { record, context }
    }
}
