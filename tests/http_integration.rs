//! Integration tests for the HTTP client, rate limiter and collection engine against wiremock

use chrono::Utc;
use core::time::Duration;
use ghcollect::Outcome;
use ghcollect::auth::{AuthProvider, CommandTokenSource, InstallationAuth, TokenAuth, TokenCache};
use ghcollect::cache::{KeyValueCache, MemoryCache, RateLimitEntry};
use ghcollect::collect::{CollectionNode, Collector};
use ghcollect::io::{MemorySink, MemoryTelemetry, RecordSink, Telemetry};
use ghcollect::model::ORIGINATING_URL;
use ghcollect::web::{GitHubClient, GitHubRateLimiter, HttpTransport, NoopRateLimiter, ReqwestTransport, ResponseSignature};
use serde_json::Value;
use std::sync::Arc;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn transport() -> Arc<dyn HttpTransport> {
    Arc::new(ReqwestTransport::new("ghcollect-tests", "0.0.0").unwrap())
}

fn auth() -> TokenAuth {
    TokenAuth::new("bot", "secret")
}

fn unthrottled_client(telemetry: &Arc<MemoryTelemetry>) -> GitHubClient {
    GitHubClient::new(transport(), Arc::new(NoopRateLimiter), Arc::clone(telemetry) as Arc<dyn Telemetry>)
}

#[tokio::test]
async fn test_collector_follows_link_header() {
    let server = MockServer::start().await;
    let next = format!("{}/orgs/contoso/repos?page=2", server.uri());

    Mock::given(method("GET"))
        .and(path("/orgs/contoso/repos"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"[{"id": 3}]"#))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/orgs/contoso/repos"))
        .and(header("authorization", "token secret"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"[{"id": 1}, {"id": 2}]"#)
                .insert_header("link", format!(r#"<{next}>; rel="next", <{next}>; rel="last""#).as_str()),
        )
        .mount(&server)
        .await;

    let telemetry = Arc::new(MemoryTelemetry::new());
    let sink = Arc::new(MemorySink::new());
    let collector = Collector::new(
        Arc::new(unthrottled_client(&telemetry)),
        Arc::new(auth()),
        vec![Arc::clone(&sink) as Arc<dyn RecordSink>],
    );

    let node = CollectionNode::for_url("GitHub.Orgs.RepoInstance", "GitHub.Orgs.Repos", format!("{}/orgs/contoso/repos", server.uri()));
    let written = collector.process(&node).await.unwrap().complete().unwrap();

    assert_eq!(written, 3);
    let records = sink.records();
    assert_eq!(records[2].0["id"], 3);
    assert_eq!(records[2].1.metadata[ORIGINATING_URL], next.as_str());
    assert_eq!(collector.client().successful_requests(), 2);
}

#[tokio::test]
async fn test_bad_gateway_is_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/users/octocat"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/users/octocat"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"login": "octocat"}"#))
        .mount(&server)
        .await;

    let telemetry = Arc::new(MemoryTelemetry::new());
    let client = unthrottled_client(&telemetry);
    let response = client
        .get(&format!("{}/users/octocat", server.uri()), "GitHub.Users", &auth())
        .await
        .unwrap()
        .complete()
        .unwrap();

    let user: Value = response.json().unwrap();
    assert_eq!(user["login"], "octocat");
    assert_eq!(client.successful_requests(), 1);
    assert_eq!(client.failed_requests(), 0);
    assert_eq!(telemetry.exceptions().len(), 1);
}

#[tokio::test]
async fn test_allowlisted_not_found_is_tolerated() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/teams/7/members"))
        .respond_with(ResponseTemplate::new(404).set_body_string(r#"{"message": "Not Found"}"#))
        .mount(&server)
        .await;

    let telemetry = Arc::new(MemoryTelemetry::new());
    let sink = Arc::new(MemorySink::new());
    let collector = Collector::new(
        Arc::new(unthrottled_client(&telemetry)),
        Arc::new(auth()),
        vec![Arc::clone(&sink) as Arc<dyn RecordSink>],
    );

    let node = CollectionNode::for_url("GitHub.Teams.MemberInstance", "GitHub.Teams.Members", format!("{}/teams/7/members", server.uri()))
        .with_allowlist(vec![ResponseSignature::exact(404, "Not Found")]);

    assert_eq!(collector.process(&node).await.unwrap(), Outcome::Complete(0));
    assert!(sink.records().is_empty());
    assert_eq!(telemetry.events_named("AllowlistedResponse").len(), 1);
}

#[tokio::test]
async fn test_quota_headers_throttle_the_next_request() {
    let server = MockServer::start().await;
    let reset = (Utc::now().timestamp() + 600).to_string();

    Mock::given(method("GET"))
        .and(path("/repos/contoso/widgets"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"{"id": 2}"#)
                .insert_header("x-ratelimit-limit", "5000")
                .insert_header("x-ratelimit-remaining", "100")
                .insert_header("x-ratelimit-reset", reset.as_str()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let cache = Arc::new(MemoryCache::<RateLimitEntry>::new());
    let telemetry = Arc::new(MemoryTelemetry::new());
    let limiter = GitHubRateLimiter::new(
        "*",
        Arc::clone(&cache) as Arc<dyn KeyValueCache<RateLimitEntry>>,
        transport(),
        Arc::clone(&telemetry) as Arc<dyn Telemetry>,
        format!("{}/rate_limit", server.uri()),
    )
    .with_threshold(80)
    .with_throw_on_limit(true);

    let client = GitHubClient::new(transport(), Arc::new(limiter), Arc::clone(&telemetry) as Arc<dyn Telemetry>);
    let url = format!("{}/repos/contoso/widgets", server.uri());
    let auth = auth();

    let first = client.get(&url, "GitHub.Repos", &auth).await.unwrap();
    assert!(first.is_complete());

    let stored = cache
        .retrieve(&RateLimitEntry::key_for("*", auth.identity()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.entity.remaining, 100);

    let second = client.get(&url, "GitHub.Repos", &auth).await.unwrap();
    let delay = second.retry_after().unwrap();
    assert!(delay > Duration::from_secs(500) && delay <= Duration::from_secs(600));

    let delays = telemetry.events_named("RateLimiterDelay");
    assert_eq!(delays[0].property("Reason"), Some("Usage Threshold"));
}

#[cfg(unix)]
#[tokio::test]
#[cfg_attr(miri, ignore = "Miri cannot spawn processes")]
async fn test_installation_token_from_command_is_sent_and_reused() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/orgs/contoso/teams"))
        .and(header("authorization", "Bearer ghs-contoso"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"[{"id": 1}]"#))
        .expect(2)
        .mount(&server)
        .await;

    // `sh -c` binds the appended organization to $0; each run leaves a mark in the log
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("issued");
    let script = format!(
        r#"echo x >> '{}'; echo "{{\"token\":\"ghs-$0\",\"expires_at\":\"2999-01-01T00:00:00Z\"}}""#,
        log.display()
    );
    let command = ["sh".to_string(), "-c".to_string(), script];
    let source = CommandTokenSource::from_command_line(&command, Duration::from_secs(10)).unwrap();
    let auth = InstallationAuth::new("contoso", Arc::new(source), Arc::new(TokenCache::default()));

    let telemetry = Arc::new(MemoryTelemetry::new());
    let sink = Arc::new(MemorySink::new());
    let collector = Collector::new(
        Arc::new(unthrottled_client(&telemetry)),
        Arc::new(auth),
        vec![Arc::clone(&sink) as Arc<dyn RecordSink>],
    );

    let node = CollectionNode::for_url("GitHub.Orgs.TeamInstance", "GitHub.Orgs.Teams", format!("{}/orgs/contoso/teams", server.uri()));
    assert_eq!(collector.process(&node).await.unwrap().complete().unwrap(), 1);
    assert_eq!(collector.process(&node).await.unwrap().complete().unwrap(), 1);

    assert_eq!(std::fs::read_to_string(&log).unwrap().lines().count(), 1);
}
