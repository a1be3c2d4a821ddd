use super::repository_metadata;
use crate::cache::{KeyValueCache, PointCollectorEntry};
use crate::collect::{CollectionNode, Collector, overlay};
use crate::io::Telemetry;
use crate::model::PointCollectorInput;
use crate::{Outcome, Result, try_outcome};
use chrono::{TimeDelta, Utc};
use core::time::Duration;
use std::sync::Arc;

const LOG_TARGET: &str = "     point";

/// Whether `url` was fetched within the last `freshness`
pub(super) async fn recently_collected(
    cache: &dyn KeyValueCache<PointCollectorEntry>,
    url: &str,
    freshness: Duration,
) -> Result<bool> {
    let Some(entry) = cache.retrieve(&PointCollectorEntry::key_for(url)).await? else {
        return Ok(false);
    };

    let freshness = TimeDelta::from_std(freshness).unwrap_or(TimeDelta::MAX);
    Ok(Utc::now() - entry.timestamp < freshness)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointOutcome {
    /// The resource was fetched; this many records were written
    Collected(u64),

    /// The resource was fetched recently enough to be left alone
    Fresh,
}

/// Fetches one resource described by a [`PointCollectorInput`]
#[derive(Debug, Clone)]
pub struct PointProcessor {
    collector: Arc<Collector>,
    point_cache: Arc<dyn KeyValueCache<PointCollectorEntry>>,
    freshness: Duration,
    telemetry: Arc<dyn Telemetry>,
}

impl PointProcessor {
    #[must_use]
    pub fn new(
        collector: Arc<Collector>,
        point_cache: Arc<dyn KeyValueCache<PointCollectorEntry>>,
        freshness: Duration,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        Self {
            collector,
            point_cache,
            freshness,
            telemetry,
        }
    }

    pub async fn process(&self, input: &PointCollectorInput) -> Result<Outcome<PointOutcome>> {
        let repository = input.repository()?;

        if !input.ignores_cache_for(&input.api_name) && recently_collected(self.point_cache.as_ref(), &input.url, self.freshness).await? {
            log::info!(target: LOG_TARGET, "'{}' was collected within {:?}, skipping", input.url, self.freshness);
            self.telemetry.track_event(
                "PointCollectorFresh",
                &[("Url", input.url.clone()), ("ApiName", input.api_name.clone())],
            );
            return Ok(Outcome::Complete(PointOutcome::Fresh));
        }

        let mut metadata = input.context.clone();
        overlay(&mut metadata, &repository_metadata(&repository));

        let node = CollectionNode::for_url(input.record_type.as_str(), input.api_name.as_str(), input.url.as_str())
            .with_shape(input.response_type)
            .with_allowlist(input.allowlisted_responses.clone())
            .with_metadata(metadata);

        for sink in self.collector.sinks() {
            sink.set_output_path_prefix(&repository.output_prefix());
            sink.new_output(&input.record_type).await?;
        }

        let written = try_outcome!(self.collector.process(&node).await?);
        self.point_cache.cache(PointCollectorEntry::new(&input.url)).await?;

        log::debug!(target: LOG_TARGET, "'{}' yielded {written} records", input.url);
        Ok(Outcome::Complete(PointOutcome::Collected(written)))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::auth::TokenAuth;
    use crate::cache::MemoryCache;
    use crate::io::{MemorySink, MemoryTelemetry, RecordSink};
    use crate::model::data_contract::{USER_INSTANCE_RECORD_TYPE, USERS_API_NAME};
    use crate::model::{Repository, ResponseShape};
    use crate::web::{GitHubClient, HttpResponse, HttpTransport, NoopRateLimiter, ResponseSignature, RetryPolicy, ScriptedTransport};
    use serde_json::json;

    const URL: &str = "https://api.github.com/users/octocat";

    struct Fixture {
        transport: Arc<ScriptedTransport>,
        sink: Arc<MemorySink>,
        cache: Arc<MemoryCache<PointCollectorEntry>>,
        processor: PointProcessor,
    }

    fn fixture() -> Fixture {
        fixture_with(RetryPolicy::none())
    }

    fn fixture_with(retry_policy: RetryPolicy) -> Fixture {
        let transport = Arc::new(ScriptedTransport::new());
        let sink = Arc::new(MemorySink::new());
        let cache = Arc::new(MemoryCache::new());
        let telemetry = Arc::new(MemoryTelemetry::new());

        let client = GitHubClient::new(
            Arc::clone(&transport) as Arc<dyn HttpTransport>,
            Arc::new(NoopRateLimiter),
            Arc::clone(&telemetry) as Arc<dyn Telemetry>,
        )
        .with_retry_policy(retry_policy);
        let collector = Collector::new(
            Arc::new(client),
            Arc::new(TokenAuth::new("bot", "t")),
            vec![Arc::clone(&sink) as Arc<dyn RecordSink>],
        );

        let processor = PointProcessor::new(
            Arc::new(collector),
            Arc::clone(&cache) as Arc<dyn KeyValueCache<PointCollectorEntry>>,
            Duration::from_secs(300),
            telemetry,
        );

        Fixture {
            transport,
            sink,
            cache,
            processor,
        }
    }

    fn input() -> PointCollectorInput {
        let mut input = PointCollectorInput::new(URL, USER_INSTANCE_RECORD_TYPE, USERS_API_NAME, &Repository::new(1, "contoso", 2, "widgets"));
        let _ = input.context.insert("Source".into(), json!("webhook"));
        input
    }

    #[tokio::test]
    async fn test_fetches_and_records_freshness() {
        let f = fixture();
        f.transport.push(URL, HttpResponse::from_body(200, r#"{"login": "octocat"}"#));

        let outcome = f.processor.process(&input()).await.unwrap();
        assert_eq!(outcome, Outcome::Complete(PointOutcome::Collected(1)));

        let records = f.sink.records();
        assert_eq!(records[0].1.record_type, USER_INSTANCE_RECORD_TYPE);
        assert_eq!(records[0].1.metadata["Source"], "webhook");
        assert_eq!(records[0].1.metadata["RepositoryId"], 2);
        assert_eq!(f.sink.prefix(), "1/2");
        assert_eq!(f.cache.len().await, 1);

        let again = f.processor.process(&input()).await.unwrap();
        assert_eq!(again, Outcome::Complete(PointOutcome::Fresh));
        assert_eq!(f.transport.request_count(URL), 1);
    }

    #[tokio::test]
    async fn test_ignore_cache_forces_fetch() {
        let f = fixture();
        f.transport.push(URL, HttpResponse::from_body(200, r#"{"login": "octocat"}"#));
        f.cache.cache(PointCollectorEntry::new(URL)).await.unwrap();

        let mut forced = input();
        forced.ignore_cache_for_apis.push(USERS_API_NAME.to_string());
        let _ = f.processor.process(&forced).await.unwrap();
        assert_eq!(f.transport.request_count(URL), 1);
    }

    #[tokio::test]
    async fn test_array_response_and_allowlist() {
        let f = fixture();
        f.transport.push(URL, HttpResponse::from_body(200, r#"[{"id": 1}, null, {"id": 2}]"#));

        let mut listing = input();
        listing.response_type = ResponseShape::Array;
        let outcome = f.processor.process(&listing).await.unwrap();
        assert_eq!(outcome, Outcome::Complete(PointOutcome::Collected(2)));

        let f = fixture();
        f.transport.push(URL, HttpResponse::from_body(404, r#"{"message": "Not Found"}"#));
        let mut tolerant = input();
        tolerant.allowlisted_responses.push(ResponseSignature::exact(404, "Not Found"));
        let outcome = f.processor.process(&tolerant).await.unwrap();
        assert_eq!(outcome, Outcome::Complete(PointOutcome::Collected(0)));
    }

    #[tokio::test]
    async fn test_resource_not_yet_visible_is_fetched_again() {
        let f = fixture_with(RetryPolicy::none().with_not_found_once());
        f.transport.push(URL, HttpResponse::from_body(404, r#"{"message": "Not Found"}"#));
        f.transport.push(URL, HttpResponse::from_body(200, r#"{"login": "octocat"}"#));

        let outcome = f.processor.process(&input()).await.unwrap();
        assert_eq!(outcome, Outcome::Complete(PointOutcome::Collected(1)));
        assert_eq!(f.transport.request_count(URL), 2);
    }

    #[tokio::test]
    async fn test_context_must_identify_organization() {
        let f = fixture();
        let mut orphan = input();
        let _ = orphan.context.remove("OrganizationLogin");
        assert!(f.processor.process(&orphan).await.is_err());
        assert!(f.transport.requests().is_empty());
    }
}
