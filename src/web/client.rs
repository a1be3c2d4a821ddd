//! The GitHub API client every flow goes through.
//!
//! One logical request runs as a sequence of attempts. Before each attempt the rate limiter may
//! delay or defer the request; after each attempt the quota headers are recorded and the retry
//! policy decides whether to go again. Once retries are exhausted a non-success response is
//! either tolerated (it matches an allowlisted signature) or fatal.

use super::rate_limiter::RateLimiter;
use super::retry::{Attempt, RetryPolicy, parse_retry_after};
use super::signature::ResponseSignature;
use super::transport::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, TransportError};
use crate::auth::AuthProvider;
use crate::cache::{ConditionalRequestEntry, KeyValueCache, NoopCache};
use crate::io::Telemetry;
use crate::{Outcome, Result, try_outcome};
use core::sync::atomic::{AtomicU64, Ordering};
use core::time::Duration;
use ohno::{IntoAppError, bail};
use serde_json::Value;
use std::sync::Arc;

const LOG_TARGET: &str = "      http";

/// How many server-imposed pauses a single request honors before giving up
const MAX_RETRY_AFTER_ROUNDS: usize = 5;

/// One logical API request
#[derive(Debug, Clone, Copy)]
pub struct ApiRequest<'a> {
    pub method: HttpMethod,
    pub url: &'a str,
    pub api_name: &'a str,
    pub body: Option<&'a Value>,
    pub allowlist: &'a [ResponseSignature],

    /// When set, the request is made conditional on the stored ETag for this URL
    pub conditional_record_type: Option<&'a str>,
}

impl<'a> ApiRequest<'a> {
    #[must_use]
    pub const fn get(url: &'a str, api_name: &'a str) -> Self {
        Self {
            method: HttpMethod::Get,
            url,
            api_name,
            body: None,
            allowlist: &[],
            conditional_record_type: None,
        }
    }
}

#[derive(Debug)]
pub struct GitHubClient {
    transport: Arc<dyn HttpTransport>,
    limiter: Arc<dyn RateLimiter>,
    conditional_cache: Arc<dyn KeyValueCache<ConditionalRequestEntry>>,
    telemetry: Arc<dyn Telemetry>,
    retry_policy: RetryPolicy,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
}

impl GitHubClient {
    #[must_use]
    pub fn new(transport: Arc<dyn HttpTransport>, limiter: Arc<dyn RateLimiter>, telemetry: Arc<dyn Telemetry>) -> Self {
        Self {
            transport,
            limiter,
            conditional_cache: Arc::new(NoopCache::new()),
            telemetry,
            retry_policy: RetryPolicy::canonical(),
            successful_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn with_conditional_cache(mut self, cache: Arc<dyn KeyValueCache<ConditionalRequestEntry>>) -> Self {
        self.conditional_cache = cache;
        self
    }

    /// Policy cloned, with fresh attempt counters, for every request
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    #[must_use]
    pub fn telemetry(&self) -> &Arc<dyn Telemetry> {
        &self.telemetry
    }

    #[must_use]
    pub fn successful_requests(&self) -> u64 {
        self.successful_requests.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn failed_requests(&self) -> u64 {
        self.failed_requests.load(Ordering::Relaxed)
    }

    pub async fn get(&self, url: &str, api_name: &str, auth: &dyn AuthProvider) -> Result<Outcome<HttpResponse>> {
        self.send(&ApiRequest::get(url, api_name), auth).await
    }

    /// Parsed array body, or an empty list for a tolerated non-success response
    pub async fn get_json_array(&self, url: &str, api_name: &str, auth: &dyn AuthProvider) -> Result<Outcome<Vec<Value>>> {
        let response = try_outcome!(self.get(url, api_name, auth).await?);
        if !response.is_success() {
            return Ok(Outcome::Complete(Vec::new()));
        }

        let value: Value = response.json().into_app_err_with(|| format!("parsing response from '{url}'"))?;
        match value {
            Value::Array(items) => Ok(Outcome::Complete(items)),
            other => bail!("expected a JSON array from '{url}', got {}", json_kind(&other)),
        }
    }

    /// Run one logical request through the limiter, the retry policy and the allowlist
    pub async fn send(&self, request: &ApiRequest<'_>, auth: &dyn AuthProvider) -> Result<Outcome<HttpResponse>> {
        let identity = auth.identity();
        let mut policy = self.retry_policy.clone();
        let mut retry_after_rounds = 0;

        let etag = match request.conditional_record_type {
            Some(_) => self
                .conditional_cache
                .retrieve(&ConditionalRequestEntry::key_for(request.url))
                .await?
                .map(|v| v.entity.etag),
            None => None,
        };

        for attempt_index in 0u32.. {
            try_outcome!(self.limiter.wait_if_needed(auth).await?);

            let mut http = HttpRequest::authorized(request.method, request.url, auth).await?;
            if let Some(etag) = &etag {
                http = http.with_header("If-None-Match", etag);
            }
            if let Some(body) = request.body {
                http = http.with_body(serde_json::to_string(body).into_app_err("serializing request body")?);
            }

            log::debug!(target: LOG_TARGET, "{} {} (attempt {attempt_index})", request.method, request.url);
            let result = self.transport.send(&http).await;

            if let Ok(response) = &result {
                self.limiter.update_stats(identity, response).await?;

                if response.is_success() || response.is_not_modified() {
                    let _ = self.successful_requests.fetch_add(1, Ordering::Relaxed);
                    self.remember_etag(request, response).await?;
                    return Ok(Outcome::Complete(response.clone()));
                }
            }

            let attempt = match &result {
                Ok(response) => Attempt::Response(response),
                Err(error) => Attempt::Failure(error),
            };

            let server_delay = result.as_ref().ok().and_then(|r| parse_retry_after(r.headers()));

            if let Some(decision) = policy.next_delay(&attempt) {
                let delay = server_delay.unwrap_or(decision.delay);
                self.report_attempt(request, identity, &result, attempt_index, Some(delay));
                log::debug!(
                    target: LOG_TARGET,
                    "Retrying {} after {delay:?} ({} rule)",
                    request.url,
                    decision.rule
                );
                if let Some(server_delay) = server_delay {
                    self.limiter.update_retry_after(identity, server_delay).await?;
                }
                tokio::time::sleep(delay).await;
                continue;
            }

            let response = match result {
                Ok(response) => response,
                Err(error) => {
                    let _ = self.failed_requests.fetch_add(1, Ordering::Relaxed);
                    self.report_attempt(request, identity, &Err(error.clone()), attempt_index, None);
                    return Err(error).into_app_err_with(|| format!("request to '{}' ({}) failed", request.url, request.api_name));
                }
            };

            // a quota pause the retry rules do not cover goes back through the limiter
            if let Some(server_delay) = server_delay
                && is_quota_status(response.status())
                && retry_after_rounds < MAX_RETRY_AFTER_ROUNDS
            {
                retry_after_rounds += 1;
                self.limiter.update_retry_after(identity, server_delay).await?;
                continue;
            }

            let message = response.message();
            if let Some(signature) = request
                .allowlist
                .iter()
                .find(|s| s.matches(response.status(), message.as_deref()))
            {
                self.telemetry.track_event(
                    "AllowlistedResponse",
                    &[
                        ("Url", request.url.to_string()),
                        ("ApiName", request.api_name.to_string()),
                        ("ResponseStatusCode", response.status().to_string()),
                        ("Pattern", signature.pattern().to_string()),
                    ],
                );
                log::debug!(target: LOG_TARGET, "Tolerating {} from {}", response.status(), request.url);
                return Ok(Outcome::Complete(response));
            }

            let _ = self.failed_requests.fetch_add(1, Ordering::Relaxed);
            self.report_attempt(request, identity, &Ok(response.clone()), attempt_index, None);
            bail!(
                "request to '{}' ({}) failed with status {}: {}",
                request.url,
                request.api_name,
                response.status(),
                response.excerpt()
            );
        }

        bail!("request to '{}' exhausted its attempts", request.url)
    }

    async fn remember_etag(&self, request: &ApiRequest<'_>, response: &HttpResponse) -> Result<()> {
        let Some(record_type) = request.conditional_record_type else {
            return Ok(());
        };

        if response.status() != 200 {
            return Ok(());
        }

        if let Some(etag) = response.header("etag") {
            self.conditional_cache
                .cache(ConditionalRequestEntry::new(request.url, record_type, etag))
                .await?;
        }

        Ok(())
    }

    /// Track a failed attempt; `delay` is `Some` when it will be retried
    fn report_attempt(
        &self,
        request: &ApiRequest<'_>,
        identity: &str,
        result: &core::result::Result<HttpResponse, TransportError>,
        attempt_index: u32,
        delay: Option<Duration>,
    ) {
        let (status, content, error) = match result {
            Ok(response) => (response.status().to_string(), response.excerpt(), format!("HTTP {}", response.status())),
            Err(error) => (String::new(), String::new(), error.to_string()),
        };

        self.telemetry.track_exception(
            &error,
            &[
                ("Url", request.url.to_string()),
                ("ApiName", request.api_name.to_string()),
                ("Identity", identity.to_string()),
                ("ResponseStatusCode", status),
                ("AttemptIndex", attempt_index.to_string()),
                ("Retried", delay.is_some().to_string()),
                ("Fatal", delay.is_none().to_string()),
                ("DelayBeforeRetry", delay.map_or_else(String::new, |d| d.as_secs_f64().to_string())),
                ("ResponseContent", content),
            ],
        );
    }
}

const fn is_quota_status(status: u16) -> bool {
    status == 403 || status == 429
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
