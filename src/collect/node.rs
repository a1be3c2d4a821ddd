use crate::Result;
use crate::model::{Metadata, RecordWithContext, ResponseShape};
use crate::web::ResponseSignature;
use async_trait::async_trait;
use core::fmt::{Debug, Formatter};
use serde_json::Value;
use std::sync::Arc;

type UrlFn = Arc<dyn Fn(&Metadata) -> Result<String> + Send + Sync>;
type MetadataFn = Arc<dyn Fn(&Value) -> Metadata + Send + Sync>;
type ChildrenFn = Arc<dyn Fn(&Value, &Metadata) -> Vec<CollectionNode> + Send + Sync>;
type HaltFn = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Redirects a node's records to a side effect instead of the sinks.
///
/// The returned records replace the original one as input for child expansion.
#[async_trait]
pub trait RecordDiverter: Send + Sync + Debug {
    async fn process_record(&self, record: &Value, metadata: &Metadata) -> Result<Vec<RecordWithContext>>;
}

/// A crawl description: one resource, how to parse it and what to fetch for each record.
///
/// Every hook receives the record and the accumulated metadata explicitly. Nodes are cheap to
/// clone; the hooks are shared.
#[derive(Clone)]
pub struct CollectionNode {
    record_type: String,
    api_name: String,
    initial_url: UrlFn,
    response_shape: ResponseShape,
    additional_metadata: Metadata,
    produce_additional_metadata: Option<MetadataFn>,
    produce_children: Option<ChildrenFn>,
    process_record: Option<Arc<dyn RecordDiverter>>,
    halt_collection: Option<HaltFn>,
    allowlist: Vec<ResponseSignature>,
    request_body: Option<Value>,
    conditional: bool,
}

impl CollectionNode {
    /// A node whose URL is derived from the metadata accumulated by its ancestors
    #[must_use]
    pub fn new(
        record_type: impl Into<String>,
        api_name: impl Into<String>,
        initial_url: impl Fn(&Metadata) -> Result<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            record_type: record_type.into(),
            api_name: api_name.into(),
            initial_url: Arc::new(initial_url),
            response_shape: ResponseShape::Array,
            additional_metadata: Metadata::new(),
            produce_additional_metadata: None,
            produce_children: None,
            process_record: None,
            halt_collection: None,
            allowlist: Vec::new(),
            request_body: None,
            conditional: false,
        }
    }

    /// A node with a fixed URL
    #[must_use]
    pub fn for_url(record_type: impl Into<String>, api_name: impl Into<String>, url: impl Into<String>) -> Self {
        let url: String = url.into();
        Self::new(record_type, api_name, move |_| Ok(url.clone()))
    }

    #[must_use]
    pub const fn with_shape(mut self, shape: ResponseShape) -> Self {
        self.response_shape = shape;
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.additional_metadata = metadata;
        self
    }

    #[must_use]
    pub fn with_metadata_producer(mut self, producer: impl Fn(&Value) -> Metadata + Send + Sync + 'static) -> Self {
        self.produce_additional_metadata = Some(Arc::new(producer));
        self
    }

    #[must_use]
    pub fn with_children(mut self, producer: impl Fn(&Value, &Metadata) -> Vec<Self> + Send + Sync + 'static) -> Self {
        self.produce_children = Some(Arc::new(producer));
        self
    }

    #[must_use]
    pub fn with_diverter(mut self, diverter: Arc<dyn RecordDiverter>) -> Self {
        self.process_record = Some(diverter);
        self
    }

    /// Stop paginating after the page containing a record for which `halt` is true
    #[must_use]
    pub fn with_halt(mut self, halt: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        self.halt_collection = Some(Arc::new(halt));
        self
    }

    #[must_use]
    pub fn with_allowlist(mut self, allowlist: Vec<ResponseSignature>) -> Self {
        self.allowlist = allowlist;
        self
    }

    /// Fetch with POST and this JSON body
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.request_body = Some(body);
        self
    }

    /// Send `If-None-Match` with the ETag stored for the URL; a 304 yields no records
    #[must_use]
    pub const fn conditional(mut self) -> Self {
        self.conditional = true;
        self
    }

    #[must_use]
    pub fn record_type(&self) -> &str {
        &self.record_type
    }

    #[must_use]
    pub fn api_name(&self) -> &str {
        &self.api_name
    }

    #[must_use]
    pub const fn response_shape(&self) -> ResponseShape {
        self.response_shape
    }

    #[must_use]
    pub const fn additional_metadata(&self) -> &Metadata {
        &self.additional_metadata
    }

    #[must_use]
    pub fn allowlist(&self) -> &[ResponseSignature] {
        &self.allowlist
    }

    #[must_use]
    pub const fn request_body(&self) -> Option<&Value> {
        self.request_body.as_ref()
    }

    #[must_use]
    pub const fn is_conditional(&self) -> bool {
        self.conditional
    }

    pub fn initial_url(&self, metadata: &Metadata) -> Result<String> {
        (self.initial_url)(metadata)
    }

    #[must_use]
    pub fn produce_additional_metadata(&self, record: &Value) -> Metadata {
        self.produce_additional_metadata
            .as_ref()
            .map_or_else(Metadata::new, |producer| producer(record))
    }

    #[must_use]
    pub fn produce_children(&self, record: &Value, metadata: &Metadata) -> Vec<Self> {
        self.produce_children
            .as_ref()
            .map_or_else(Vec::new, |producer| producer(record, metadata))
    }

    #[must_use]
    pub fn diverter(&self) -> Option<&Arc<dyn RecordDiverter>> {
        self.process_record.as_ref()
    }

    #[must_use]
    pub fn halt_collection(&self, record: &Value) -> bool {
        self.halt_collection.as_ref().is_some_and(|halt| halt(record))
    }
}

impl Debug for CollectionNode {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CollectionNode")
            .field("record_type", &self.record_type)
            .field("api_name", &self.api_name)
            .field("response_shape", &self.response_shape)
            .field("additional_metadata", &self.additional_metadata)
            .field("has_children", &self.produce_children.is_some())
            .field("process_record", &self.process_record)
            .field("allowlist", &self.allowlist)
            .field("request_body", &self.request_body)
            .field("conditional", &self.conditional)
            .finish_non_exhaustive()
    }
}

/// Overlay `top` onto `base`; keys in `top` win
pub fn overlay(base: &mut Metadata, top: &Metadata) {
    for (key, value) in top {
        let _ = base.insert(key.clone(), value.clone());
    }
}

/// Read a metadata value as the string that would appear in a URL
pub fn metadata_segment(metadata: &Metadata, key: &str) -> Result<String> {
    match metadata.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(other) => Err(ohno::app_err!("metadata '{key}' is not a string or number: {other}")),
        None => Err(ohno::app_err!("metadata '{key}' is missing")),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde_json::json;

    fn metadata(value: Value) -> Metadata {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_url_from_metadata() {
        let node = CollectionNode::new("T", "A", |m| Ok(format!("https://x/teams/{}/members", metadata_segment(m, "TeamId")?)));
        assert_eq!(node.initial_url(&metadata(json!({"TeamId": 7}))).unwrap(), "https://x/teams/7/members");
        assert!(node.initial_url(&Metadata::new()).unwrap_err().to_string().contains("TeamId"));
    }

    #[test]
    fn test_default_hooks() {
        let node = CollectionNode::for_url("T", "A", "https://x");
        assert!(node.produce_additional_metadata(&json!({})).is_empty());
        assert!(node.produce_children(&json!({}), &Metadata::new()).is_empty());
        assert!(!node.halt_collection(&json!({})));
        assert!(node.diverter().is_none());
        assert_eq!(node.response_shape(), ResponseShape::Array);
    }

    #[test]
    fn test_overlay() {
        let mut base = metadata(json!({"a": 1, "b": 2}));
        overlay(&mut base, &metadata(json!({"b": 3, "c": 4})));
        assert_eq!(Value::Object(base), json!({"a": 1, "b": 3, "c": 4}));
    }
}
