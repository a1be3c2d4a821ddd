use super::node::{CollectionNode, overlay};
use crate::auth::AuthProvider;
use crate::io::RecordSink;
use crate::model::{Metadata, ORIGINATING_URL, RecordContext, ResponseShape};
use crate::web::{BatchingRequest, GitHubClient, HttpResponse};
use crate::{Outcome, Result, try_outcome};
use core::future::Future;
use core::pin::Pin;
use ohno::{EnrichableExt, IntoAppError, bail};
use serde_json::Value;
use std::sync::Arc;

const LOG_TARGET: &str = " collector";

type NodeFuture<'a> = Pin<Box<dyn Future<Output = Result<Outcome<u64>>> + Send + 'a>>;

/// Expands a [`CollectionNode`] tree depth-first, page by page.
///
/// Each record is expanded into its children as soon as its page arrives, so memory stays
/// bounded by one page per level of the active branch. Any fatal error aborts the whole
/// traversal.
#[derive(Debug, Clone)]
pub struct Collector {
    client: Arc<GitHubClient>,
    auth: Arc<dyn AuthProvider>,
    sinks: Vec<Arc<dyn RecordSink>>,
}

impl Collector {
    #[must_use]
    pub fn new(client: Arc<GitHubClient>, auth: Arc<dyn AuthProvider>, sinks: Vec<Arc<dyn RecordSink>>) -> Self {
        Self { client, auth, sinks }
    }

    #[must_use]
    pub const fn client(&self) -> &Arc<GitHubClient> {
        &self.client
    }

    #[must_use]
    pub fn auth(&self) -> &dyn AuthProvider {
        self.auth.as_ref()
    }

    #[must_use]
    pub fn sinks(&self) -> &[Arc<dyn RecordSink>] {
        &self.sinks
    }

    /// Traverse the tree rooted at `root`, returning the number of records written
    pub async fn process(&self, root: &CollectionNode) -> Result<Outcome<u64>> {
        self.process_node(root, Metadata::new()).await
    }

    fn process_node<'a>(&'a self, node: &'a CollectionNode, inherited: Metadata) -> NodeFuture<'a> {
        Box::pin(async move {
            let mut metadata = node.additional_metadata().clone();
            overlay(&mut metadata, &inherited);

            let url = node.initial_url(&metadata)?;
            log::debug!(target: LOG_TARGET, "Collecting {} from {url}", node.record_type());

            let mut batch = BatchingRequest::new(Arc::clone(&self.client), url, node.api_name()).with_allowlist(node.allowlist().to_vec());
            if let Some(body) = node.request_body() {
                batch = batch.with_body(body.clone());
            }
            if node.is_conditional() {
                batch = batch.conditional(node.record_type());
            }

            let mut written = 0;

            while batch.has_next() {
                let Some(page) = try_outcome!(batch.next_page(self.auth.as_ref()).await?) else {
                    break;
                };

                if !page.response.is_success() {
                    // not modified or tolerated: nothing to parse
                    continue;
                }

                for record in parse_records(&page.response, node.response_shape(), &page.url)? {
                    let mut record_metadata = metadata.clone();
                    let _ = record_metadata.insert(ORIGINATING_URL.to_string(), Value::String(page.url.clone()));

                    let diverted = match node.diverter() {
                        Some(diverter) => Some(diverter.process_record(&record, &record_metadata).await?),
                        None => None,
                    };

                    let dispatch: Vec<Value> = match &diverted {
                        Some(records) => records.iter().map(|r| r.record.clone()).collect(),
                        None => vec![record.clone()],
                    };

                    for input in &dispatch {
                        let mut child_metadata = metadata.clone();
                        overlay(&mut child_metadata, &node.produce_additional_metadata(input));

                        for child in node.produce_children(input, &child_metadata) {
                            let outcome = self
                                .process_node(&child, child_metadata.clone())
                                .await
                                .map_err(|e| e.enrich_with(|| format!("collecting {} below '{}'", child.record_type(), page.url)))?;
                            written += try_outcome!(outcome);
                        }
                    }

                    if diverted.is_none() {
                        self.write(&record, node.record_type(), record_metadata).await?;
                        written += 1;
                    }

                    if node.halt_collection(&record) {
                        log::debug!(target: LOG_TARGET, "Halting {} after {}", node.record_type(), page.url);
                        batch.stop();
                    }
                }
            }

            Ok(Outcome::Complete(written))
        })
    }

    async fn write(&self, record: &Value, record_type: &str, metadata: Metadata) -> Result<()> {
        let context = RecordContext::new(record_type, metadata);
        for sink in &self.sinks {
            sink.write_record(record, &context).await?;
        }
        Ok(())
    }
}

fn parse_records(response: &HttpResponse, shape: ResponseShape, url: &str) -> Result<Vec<Value>> {
    let value: Value = response.json().into_app_err_with(|| format!("parsing records from '{url}'"))?;

    match (shape, value) {
        (ResponseShape::Array, Value::Array(items)) => Ok(items.into_iter().filter(|item| !item.is_null()).collect()),
        (ResponseShape::Object, Value::Null) => Ok(Vec::new()),
        (ResponseShape::Object, value @ Value::Object(_)) => Ok(vec![value]),
        (shape, _) => bail!("response from '{url}' does not have the expected {shape} shape"),
    }
}
