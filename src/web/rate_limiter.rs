//! Client-side throttling against GitHub's reported request quota.
//!
//! Quota snapshots are shared through a [`KeyValueCache`] so every worker using the same
//! identity sees the same numbers. Writes are last-writer-wins: GitHub's own counters are
//! authoritative and the next response corrects any stale snapshot.

use super::transport::{HttpMethod, HttpRequest, HttpResponse, HttpTransport};
use crate::auth::AuthProvider;
use crate::cache::{KeyValueCache, RateLimitEntry};
use crate::io::Telemetry;
use crate::{Outcome, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use core::fmt::Debug;
use core::time::Duration;
use ohno::IntoAppError;
use std::sync::Arc;

const LOG_TARGET: &str = "   limiter";

/// Quota scope shared by every caller that does not have per-organization credentials
pub const GLOBAL_SCOPE: &str = "*";

pub const RATE_LIMIT_LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";
pub const RATE_LIMIT_RESET_HEADER: &str = "x-ratelimit-reset";

const DEFAULT_THRESHOLD: u8 = 80;
const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(60);

/// Retry-After values at or below this are treated as already elapsed
const MIN_RETRY_AFTER: Duration = Duration::from_millis(1);

#[async_trait]
pub trait RateLimiter: Send + Sync + Debug {
    /// Called before every attempt. Returns [`Outcome::RetryAfter`] when the caller should give
    /// the unit of work back instead of waiting.
    async fn wait_if_needed(&self, auth: &dyn AuthProvider) -> Result<Outcome<()>>;

    /// Record the quota headers of a response
    async fn update_stats(&self, identity: &str, response: &HttpResponse) -> Result<()>;

    /// Record a server-imposed pause
    async fn update_retry_after(&self, identity: &str, retry_after: Duration) -> Result<()>;
}

/// Never waits
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRateLimiter;

#[async_trait]
impl RateLimiter for NoopRateLimiter {
    async fn wait_if_needed(&self, _auth: &dyn AuthProvider) -> Result<Outcome<()>> {
        Ok(Outcome::Complete(()))
    }

    async fn update_stats(&self, _identity: &str, _response: &HttpResponse) -> Result<()> {
        Ok(())
    }

    async fn update_retry_after(&self, _identity: &str, _retry_after: Duration) -> Result<()> {
        Ok(())
    }
}

/// Quota fields carried by a GitHub response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub limit: u64,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
}

impl Quota {
    /// Parse the `x-ratelimit-*` headers; `None` unless all three are present and valid
    #[must_use]
    pub fn from_response(response: &HttpResponse) -> Option<Self> {
        let number = |name: &str| response.header(name).and_then(|v| v.trim().parse::<u64>().ok());

        let limit = number(RATE_LIMIT_LIMIT_HEADER)?;
        let remaining = number(RATE_LIMIT_REMAINING_HEADER)?;
        let reset = i64::try_from(number(RATE_LIMIT_RESET_HEADER)?).ok()?;

        Some(Self {
            limit,
            remaining,
            reset_at: DateTime::from_timestamp(reset, 0)?,
        })
    }
}

/// Percentage of the quota already consumed, or `None` when the limit is unknown
#[must_use]
pub fn usage_percent(limit: u64, remaining: u64) -> Option<u64> {
    if limit == 0 {
        return None;
    }

    Some(100u64.saturating_sub(remaining.saturating_mul(100) / limit))
}

fn until(instant: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (instant - now).to_std().unwrap_or(Duration::ZERO)
}

/// Throttles against the quota snapshot stored for `(scope, identity)`.
///
/// In throw mode an exhausted quota yields [`Outcome::RetryAfter`] immediately. Otherwise the
/// limiter sleeps: until a Retry-After elapses, or for one probe interval at a time while usage
/// stays above the threshold, refreshing the snapshot from `/rate_limit` after each sleep.
#[derive(Debug)]
pub struct GitHubRateLimiter {
    scope: String,
    cache: Arc<dyn KeyValueCache<RateLimitEntry>>,
    transport: Arc<dyn HttpTransport>,
    telemetry: Arc<dyn Telemetry>,
    usage_url: String,
    threshold: u8,
    throw_on_limit: bool,
    probe_interval: Duration,
}

impl GitHubRateLimiter {
    #[must_use]
    pub fn new(
        scope: impl Into<String>,
        cache: Arc<dyn KeyValueCache<RateLimitEntry>>,
        transport: Arc<dyn HttpTransport>,
        telemetry: Arc<dyn Telemetry>,
        usage_url: impl Into<String>,
    ) -> Self {
        Self {
            scope: scope.into(),
            cache,
            transport,
            telemetry,
            usage_url: usage_url.into(),
            threshold: DEFAULT_THRESHOLD,
            throw_on_limit: false,
            probe_interval: DEFAULT_PROBE_INTERVAL,
        }
    }

    /// Usage percentage above which requests are delayed
    #[must_use]
    pub const fn with_threshold(mut self, threshold: u8) -> Self {
        self.threshold = threshold;
        self
    }

    #[must_use]
    pub const fn with_throw_on_limit(mut self, throw_on_limit: bool) -> Self {
        self.throw_on_limit = throw_on_limit;
        self
    }

    #[must_use]
    pub const fn with_probe_interval(mut self, probe_interval: Duration) -> Self {
        self.probe_interval = probe_interval;
        self
    }

    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }

    fn report_delay(&self, delay: Duration, max_delay: Duration, usage: Option<u64>, reason: &str) {
        self.telemetry.track_event(
            "RateLimiterDelay",
            &[
                ("Scope", self.scope.clone()),
                ("Delay", format!("{}", delay.as_secs_f64())),
                ("MaxDelay", format!("{}", max_delay.as_secs_f64())),
                ("Usage", usage.map_or_else(String::new, |u| u.to_string())),
                ("Reason", reason.to_string()),
            ],
        );
    }

    async fn probe_usage(&self, auth: &dyn AuthProvider) -> Result<()> {
        let request = HttpRequest::authorized(HttpMethod::Get, &self.usage_url, auth).await?;
        let response = self
            .transport
            .send(&request)
            .await
            .into_app_err_with(|| format!("probing rate limit usage at '{}'", self.usage_url))?;
        self.update_stats(auth.identity(), &response).await
    }

    async fn retrieve(&self, identity: &str) -> Result<Option<RateLimitEntry>> {
        Ok(self
            .cache
            .retrieve(&RateLimitEntry::key_for(&self.scope, identity))
            .await?
            .map(|v| v.entity))
    }
}

#[async_trait]
impl RateLimiter for GitHubRateLimiter {
    async fn wait_if_needed(&self, auth: &dyn AuthProvider) -> Result<Outcome<()>> {
        let identity = auth.identity();
        let mut refreshed = false;

        loop {
            let Some(state) = self.retrieve(identity).await? else {
                return Ok(Outcome::Complete(()));
            };

            let now = Utc::now();
            let usage = usage_percent(state.limit, state.remaining);

            if let Some(retry_at) = state.retry_after {
                let delay = until(retry_at, now);
                if delay > MIN_RETRY_AFTER {
                    self.report_delay(delay, delay, usage, "Honor Retry-After");

                    if self.throw_on_limit {
                        log::info!(target: LOG_TARGET, "Retry-After in effect for {identity} in scope '{}', deferring by {delay:?}", self.scope);
                        return Ok(Outcome::RetryAfter(delay));
                    }

                    log::info!(target: LOG_TARGET, "Retry-After in effect for {identity} in scope '{}', sleeping {delay:?}", self.scope);
                    tokio::time::sleep(delay).await;
                    continue;
                }
            }

            let Some(usage) = usage else {
                return Ok(Outcome::Complete(()));
            };

            if usage <= u64::from(self.threshold) {
                return Ok(Outcome::Complete(()));
            }

            // the window this snapshot describes has rolled over; its numbers say nothing now
            if state.reset_at <= now {
                if refreshed {
                    return Ok(Outcome::Complete(()));
                }

                log::debug!(target: LOG_TARGET, "Quota snapshot for {identity} in scope '{}' is past its reset, refreshing", self.scope);
                refreshed = true;
                self.probe_usage(auth).await?;
                continue;
            }

            let until_reset = until(state.reset_at, now);

            if self.throw_on_limit {
                self.report_delay(until_reset, until_reset, Some(usage), "Usage Threshold");
                log::info!(
                    target: LOG_TARGET,
                    "Quota usage {usage}% for {identity} exceeds {}%, deferring by {until_reset:?}",
                    self.threshold
                );
                return Ok(Outcome::RetryAfter(until_reset));
            }

            self.report_delay(self.probe_interval, until_reset, Some(usage), "Usage Threshold");
            log::info!(
                target: LOG_TARGET,
                "Quota usage {usage}% for {identity} exceeds {}%, sleeping {:?} before probing again",
                self.threshold,
                self.probe_interval
            );
            tokio::time::sleep(self.probe_interval).await;
            self.probe_usage(auth).await?;
        }
    }

    async fn update_stats(&self, identity: &str, response: &HttpResponse) -> Result<()> {
        let Some(quota) = Quota::from_response(response) else {
            return Ok(());
        };

        let now = Utc::now();
        let retry_after = self
            .retrieve(identity)
            .await?
            .and_then(|existing| existing.retry_after)
            .filter(|retry_at| *retry_at > now);

        log::trace!(
            target: LOG_TARGET,
            "{identity} in scope '{}': {}/{} remaining, resets at {}",
            self.scope,
            quota.remaining,
            quota.limit,
            quota.reset_at
        );

        self.cache
            .cache(RateLimitEntry {
                scope: self.scope.clone(),
                identity: identity.to_string(),
                limit: quota.limit,
                remaining: quota.remaining,
                reset_at: quota.reset_at,
                retry_after,
            })
            .await
    }

    async fn update_retry_after(&self, identity: &str, retry_after: Duration) -> Result<()> {
        let now = Utc::now();
        let retry_at = now + TimeDelta::from_std(retry_after).into_app_err("Retry-After is out of range")?;

        let entry = match self.retrieve(identity).await? {
            Some(existing) => RateLimitEntry {
                retry_after: Some(retry_at),
                ..existing
            },
            None => RateLimitEntry {
                scope: self.scope.clone(),
                identity: identity.to_string(),
                limit: 0,
                remaining: 0,
                reset_at: now,
                retry_after: Some(retry_at),
            },
        };

        log::debug!(target: LOG_TARGET, "{identity} in scope '{}' must wait until {retry_at}", self.scope);
        self.cache.cache(entry).await
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::auth::TokenAuth;
    use crate::cache::MemoryCache;
    use crate::io::MemoryTelemetry;
    use crate::web::ScriptedTransport;

    const USAGE_URL: &str = "https://api.github.com/rate_limit";

    struct Fixture {
        cache: Arc<MemoryCache<RateLimitEntry>>,
        transport: Arc<ScriptedTransport>,
        telemetry: Arc<MemoryTelemetry>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                cache: Arc::new(MemoryCache::new()),
                transport: Arc::new(ScriptedTransport::new()),
                telemetry: Arc::new(MemoryTelemetry::new()),
            }
        }

        fn limiter(&self, threshold: u8, throw_on_limit: bool) -> GitHubRateLimiter {
            GitHubRateLimiter::new(
                GLOBAL_SCOPE,
                Arc::clone(&self.cache) as Arc<dyn KeyValueCache<RateLimitEntry>>,
                Arc::clone(&self.transport) as Arc<dyn HttpTransport>,
                Arc::clone(&self.telemetry) as Arc<dyn Telemetry>,
                USAGE_URL,
            )
            .with_threshold(threshold)
            .with_throw_on_limit(throw_on_limit)
            .with_probe_interval(Duration::from_millis(5))
        }

        async fn seed(&self, limit: u64, remaining: u64, retry_after: Option<DateTime<Utc>>) {
            self.cache
                .cache(RateLimitEntry {
                    scope: GLOBAL_SCOPE.to_string(),
                    identity: "bot".to_string(),
                    limit,
                    remaining,
                    reset_at: Utc::now() + TimeDelta::minutes(10),
                    retry_after,
                })
                .await
                .unwrap();
        }
    }

    fn quota_response(limit: u64, remaining: u64, reset: i64) -> HttpResponse {
        HttpResponse::from_body(200, "{}")
            .with_header(RATE_LIMIT_LIMIT_HEADER, &limit.to_string())
            .with_header(RATE_LIMIT_REMAINING_HEADER, &remaining.to_string())
            .with_header(RATE_LIMIT_RESET_HEADER, &reset.to_string())
    }

    #[test]
    fn test_usage_percent() {
        assert_eq!(usage_percent(100, 2), Some(98));
        assert_eq!(usage_percent(100, 90), Some(10));
        assert_eq!(usage_percent(5000, 5000), Some(0));
        assert_eq!(usage_percent(0, 0), None);
    }

    #[test]
    fn test_quota_requires_all_headers() {
        assert!(Quota::from_response(&HttpResponse::from_body(200, "")).is_none());

        let quota = Quota::from_response(&quota_response(5000, 4999, 1_700_000_000)).unwrap();
        assert_eq!(quota.limit, 5000);
        assert_eq!(quota.remaining, 4999);
        assert_eq!(quota.reset_at.timestamp(), 1_700_000_000);
    }

    #[tokio::test]
    async fn test_unknown_state_proceeds() {
        let fixture = Fixture::new();
        let auth = TokenAuth::new("bot", "t");
        let outcome = fixture.limiter(90, true).wait_if_needed(&auth).await.unwrap();
        assert_eq!(outcome, Outcome::Complete(()));
    }

    #[tokio::test]
    async fn test_threshold_exceeded_defers_in_throw_mode() {
        let fixture = Fixture::new();
        fixture.seed(100, 2, None).await;
        let auth = TokenAuth::new("bot", "t");

        let outcome = fixture.limiter(90, true).wait_if_needed(&auth).await.unwrap();
        let delay = outcome.retry_after().unwrap();
        assert!(delay > Duration::from_secs(500));

        let events = fixture.telemetry.events_named("RateLimiterDelay");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].property("Reason"), Some("Usage Threshold"));
        assert_eq!(events[0].property("Usage"), Some("98"));
    }

    #[tokio::test]
    async fn test_below_threshold_proceeds() {
        let fixture = Fixture::new();
        fixture.seed(100, 90, None).await;
        let auth = TokenAuth::new("bot", "t");

        let outcome = fixture.limiter(90, true).wait_if_needed(&auth).await.unwrap();
        assert_eq!(outcome, Outcome::Complete(()));
        assert!(fixture.telemetry.records().is_empty());
    }

    #[tokio::test]
    async fn test_retry_after_defers_in_throw_mode() {
        let fixture = Fixture::new();
        fixture.seed(100, 100, Some(Utc::now() + TimeDelta::seconds(30))).await;
        let auth = TokenAuth::new("bot", "t");

        let delay = fixture.limiter(90, true).wait_if_needed(&auth).await.unwrap().retry_after().unwrap();
        assert!(delay <= Duration::from_secs(30));
        assert!(delay > Duration::from_secs(20));

        let events = fixture.telemetry.events_named("RateLimiterDelay");
        assert_eq!(events[0].property("Reason"), Some("Honor Retry-After"));
    }

    #[tokio::test]
    async fn test_elapsed_retry_after_is_ignored() {
        let fixture = Fixture::new();
        fixture.seed(100, 100, Some(Utc::now() - TimeDelta::seconds(1))).await;
        let auth = TokenAuth::new("bot", "t");

        let outcome = fixture.limiter(90, true).wait_if_needed(&auth).await.unwrap();
        assert_eq!(outcome, Outcome::Complete(()));
    }

    #[tokio::test]
    async fn test_snapshot_past_its_reset_is_refreshed_before_deferring() {
        let fixture = Fixture::new();
        fixture
            .cache
            .cache(RateLimitEntry {
                scope: GLOBAL_SCOPE.to_string(),
                identity: "bot".to_string(),
                limit: 100,
                remaining: 1,
                reset_at: Utc::now() - TimeDelta::minutes(5),
                retry_after: None,
            })
            .await
            .unwrap();
        let reset = (Utc::now() + TimeDelta::minutes(60)).timestamp();
        fixture.transport.push(USAGE_URL, quota_response(100, 100, reset));
        let auth = TokenAuth::new("bot", "t");

        let outcome = fixture.limiter(90, true).wait_if_needed(&auth).await.unwrap();
        assert_eq!(outcome, Outcome::Complete(()));
        assert_eq!(fixture.transport.request_count(USAGE_URL), 1);
        assert!(fixture.telemetry.events_named("RateLimiterDelay").is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_still_stale_after_refresh_proceeds() {
        let fixture = Fixture::new();
        fixture
            .cache
            .cache(RateLimitEntry {
                scope: GLOBAL_SCOPE.to_string(),
                identity: "bot".to_string(),
                limit: 100,
                remaining: 0,
                reset_at: Utc::now() - TimeDelta::minutes(5),
                retry_after: None,
            })
            .await
            .unwrap();
        fixture.transport.push(USAGE_URL, HttpResponse::from_body(200, "{}"));
        let auth = TokenAuth::new("bot", "t");

        let outcome = fixture.limiter(90, true).wait_if_needed(&auth).await.unwrap();
        assert_eq!(outcome, Outcome::Complete(()));
        assert_eq!(fixture.transport.request_count(USAGE_URL), 1);
    }

    #[tokio::test]
    async fn test_blocking_mode_polls_until_quota_recovers() {
        let fixture = Fixture::new();
        fixture.seed(100, 1, None).await;
        let reset = (Utc::now() + TimeDelta::minutes(30)).timestamp();
        fixture.transport.push(USAGE_URL, quota_response(100, 3, reset));
        fixture.transport.push(USAGE_URL, quota_response(100, 100, reset));
        let auth = TokenAuth::new("bot", "t");

        let outcome = fixture.limiter(90, false).wait_if_needed(&auth).await.unwrap();
        assert_eq!(outcome, Outcome::Complete(()));
        assert_eq!(fixture.transport.request_count(USAGE_URL), 2);
        assert_eq!(fixture.telemetry.events_named("RateLimiterDelay").len(), 2);

        let stored = fixture.cache.retrieve(&RateLimitEntry::key_for(GLOBAL_SCOPE, "bot")).await.unwrap().unwrap();
        assert_eq!(stored.entity.remaining, 100);
    }

    #[tokio::test]
    async fn test_rate_limit_check_failure_propagates() {
        let fixture = Fixture::new();
        fixture.seed(100, 1, None).await;
        let auth = TokenAuth::new("bot", "t");

        let err = fixture.limiter(90, false).wait_if_needed(&auth).await.unwrap_err();
        assert!(err.to_string().contains("probing rate limit usage"));
    }

    #[tokio::test]
    async fn test_update_stats_preserves_pending_retry_after() {
        let fixture = Fixture::new();
        let limiter = fixture.limiter(90, true);

        limiter.update_retry_after("bot", Duration::from_secs(60)).await.unwrap();
        limiter
            .update_stats("bot", &quota_response(5000, 4000, Utc::now().timestamp() + 600))
            .await
            .unwrap();

        let stored = fixture.cache.retrieve(&RateLimitEntry::key_for(GLOBAL_SCOPE, "bot")).await.unwrap().unwrap();
        assert_eq!(stored.entity.limit, 5000);
        assert!(stored.entity.retry_after.is_some());
    }

    #[tokio::test]
    async fn test_responses_without_quota_headers_are_ignored() {
        let fixture = Fixture::new();
        let limiter = fixture.limiter(90, true);
        limiter.update_stats("bot", &HttpResponse::from_body(200, "{}")).await.unwrap();
        assert!(fixture.cache.is_empty().await);
    }
}
