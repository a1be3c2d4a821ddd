use super::api::GitHubApi;
use super::repository_metadata;
use crate::collect::{CollectionNode, Collector};
use crate::model::data_contract::{
    CLONE_INSTANCE_RECORD_TYPE, CLONES_API_NAME, PATH_INSTANCE_RECORD_TYPE, PATHS_API_NAME, REFERRER_INSTANCE_RECORD_TYPE,
    REFERRERS_API_NAME, VIEW_INSTANCE_RECORD_TYPE, VIEWS_API_NAME,
};
use crate::model::{Repository, ResponseShape};
use crate::{Outcome, Result, try_outcome};
use std::sync::Arc;

const LOG_TARGET: &str = "   traffic";

/// Collects the traffic statistics GitHub keeps for the last two weeks of a repository.
///
/// Requests are conditional, so an unchanged resource costs no quota and writes nothing.
#[derive(Debug, Clone)]
pub struct TrafficProcessor {
    collector: Arc<Collector>,
    api: GitHubApi,
}

impl TrafficProcessor {
    #[must_use]
    pub const fn new(collector: Arc<Collector>, api: GitHubApi) -> Self {
        Self { collector, api }
    }

    pub async fn process(&self, repository: &Repository) -> Result<Outcome<u64>> {
        let metadata = repository_metadata(repository);
        let nodes = [
            (REFERRER_INSTANCE_RECORD_TYPE, REFERRERS_API_NAME, "popular/referrers", ResponseShape::Array),
            (PATH_INSTANCE_RECORD_TYPE, PATHS_API_NAME, "popular/paths", ResponseShape::Array),
            (VIEW_INSTANCE_RECORD_TYPE, VIEWS_API_NAME, "views", ResponseShape::Object),
            (CLONE_INSTANCE_RECORD_TYPE, CLONES_API_NAME, "clones", ResponseShape::Object),
        ]
        .map(|(record_type, api_name, kind, shape)| {
            CollectionNode::for_url(record_type, api_name, self.api.traffic(repository, kind))
                .with_shape(shape)
                .with_metadata(metadata.clone())
                .conditional()
        });

        let mut written = 0;
        for node in &nodes {
            for sink in self.collector.sinks() {
                sink.set_output_path_prefix(&repository.output_prefix());
                sink.new_output(node.record_type()).await?;
            }

            written += try_outcome!(self.collector.process(node).await?);
        }

        log::info!(target: LOG_TARGET, "{repository}: {written} traffic records");
        Ok(Outcome::Complete(written))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::auth::TokenAuth;
    use crate::cache::{ConditionalRequestEntry, KeyValueCache, MemoryCache};
    use crate::io::{MemorySink, MemoryTelemetry, RecordSink, Telemetry};
    use crate::web::{GitHubClient, HttpResponse, HttpTransport, NoopRateLimiter, RetryPolicy, ScriptedTransport};

    const TRAFFIC: &str = "https://api.github.com/repos/contoso/widgets/traffic";

    struct Fixture {
        transport: Arc<ScriptedTransport>,
        sink: Arc<MemorySink>,
        requests_cache: Arc<MemoryCache<ConditionalRequestEntry>>,
        processor: TrafficProcessor,
    }

    fn fixture() -> Fixture {
        let transport = Arc::new(ScriptedTransport::new());
        let sink = Arc::new(MemorySink::new());
        let requests_cache = Arc::new(MemoryCache::new());
        let client = GitHubClient::new(
            Arc::clone(&transport) as Arc<dyn HttpTransport>,
            Arc::new(NoopRateLimiter),
            Arc::new(MemoryTelemetry::new()) as Arc<dyn Telemetry>,
        )
        .with_retry_policy(RetryPolicy::none())
        .with_conditional_cache(Arc::clone(&requests_cache) as Arc<dyn KeyValueCache<ConditionalRequestEntry>>);
        let collector = Collector::new(
            Arc::new(client),
            Arc::new(TokenAuth::new("bot", "t")),
            vec![Arc::clone(&sink) as Arc<dyn RecordSink>],
        );

        Fixture {
            transport,
            sink,
            requests_cache,
            processor: TrafficProcessor::new(Arc::new(collector), GitHubApi::from_base_url("https://api.github.com")),
        }
    }

    fn repo() -> Repository {
        Repository::new(1, "contoso", 2, "widgets")
    }

    #[tokio::test]
    async fn test_collects_all_traffic_kinds() {
        let f = fixture();
        f.transport.push(
            &format!("{TRAFFIC}/popular/referrers"),
            HttpResponse::from_body(200, r#"[{"referrer": "google.com", "count": 4}, {"referrer": "github.com", "count": 2}]"#),
        );
        f.transport.push(&format!("{TRAFFIC}/popular/paths"), HttpResponse::from_body(200, "[]"));
        f.transport.push(&format!("{TRAFFIC}/views"), HttpResponse::from_body(200, r#"{"count": 14, "uniques": 3, "views": []}"#));
        f.transport.push(&format!("{TRAFFIC}/clones"), HttpResponse::from_body(200, r#"{"count": 1, "uniques": 1, "clones": []}"#));

        let written = f.processor.process(&repo()).await.unwrap().complete().unwrap();

        assert_eq!(written, 4);
        assert_eq!(f.sink.records_of_type(REFERRER_INSTANCE_RECORD_TYPE).len(), 2);
        assert_eq!(f.sink.records_of_type(VIEW_INSTANCE_RECORD_TYPE)[0]["count"], 14);
        assert_eq!(f.sink.outputs().len(), 4);
        assert_eq!(f.sink.prefix(), "1/2");
    }

    #[tokio::test]
    async fn test_unchanged_traffic_is_not_written_again() {
        let f = fixture();
        let views = format!("{TRAFFIC}/views");
        f.transport.push(
            &views,
            HttpResponse::from_body(200, r#"{"count": 14, "uniques": 3, "views": []}"#).with_header("etag", r#"W/"views-1""#),
        );
        f.transport.push(&views, HttpResponse::from_body(304, ""));
        for kind in ["popular/referrers", "popular/paths"] {
            f.transport.push(&format!("{TRAFFIC}/{kind}"), HttpResponse::from_body(200, "[]"));
        }
        f.transport.push(&format!("{TRAFFIC}/clones"), HttpResponse::from_body(200, r#"{"count": 0, "uniques": 0, "clones": []}"#));

        let first = f.processor.process(&repo()).await.unwrap().complete().unwrap();
        assert_eq!(first, 2);
        assert_eq!(f.requests_cache.len().await, 1);

        let second = f.processor.process(&repo()).await.unwrap().complete().unwrap();
        assert_eq!(second, 1);
        assert_eq!(f.sink.records_of_type(VIEW_INSTANCE_RECORD_TYPE).len(), 1);

        let requests = f.transport.requests();
        let revalidation = requests.iter().rfind(|r| r.url == views).unwrap();
        assert_eq!(revalidation.header("If-None-Match"), Some(r#"W/"views-1""#));
    }
}
