//! The raw HTTP seam: requests, responses and the transport that moves them.

use crate::Result;
use crate::auth::AuthProvider;
use async_trait::async_trait;
use bytes::Bytes;
use core::fmt::{Debug, Display, Formatter};
use core::time::Duration;
use ohno::IntoAppError;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::borrow::Cow;

const LOG_TARGET: &str = " transport";

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const ACCEPT_GITHUB_JSON: &str = "application/vnd.github+json";
const MAX_EXCERPT_CHARS: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum HttpMethod {
    #[strum(serialize = "GET")]
    Get,
    #[strum(serialize = "POST")]
    Post,
}

#[derive(Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpRequest {
    #[must_use]
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Build a request carrying the provider's credentials and the default `Accept` header
    pub async fn authorized(method: HttpMethod, url: impl Into<String>, auth: &dyn AuthProvider) -> Result<Self> {
        let mut request = Self::new(method, url).with_header("Accept", ACCEPT_GITHUB_JSON);

        if let Some(header) = auth.authorization_header().await? {
            request = request.with_header("Authorization", &format!("{} {}", header.scheme, header.token));
        }

        for (name, value) in auth.extra_headers() {
            request = request.with_header(&name, &value);
        }

        Ok(request)
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

impl Debug for HttpRequest {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        // credentials stay out of logs
        let headers: Vec<_> = self
            .headers
            .iter()
            .map(|(n, v)| (n.as_str(), if n.eq_ignore_ascii_case("authorization") { "<redacted>" } else { v.as_str() }))
            .collect();

        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &headers)
            .field("body", &self.body)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    status: u16,
    headers: HeaderMap,
    body: Bytes,
}

impl HttpResponse {
    #[must_use]
    pub const fn new(status: u16, headers: HeaderMap, body: Bytes) -> Self {
        Self { status, headers, body }
    }

    /// Convenience constructor with an empty header map
    #[must_use]
    pub fn from_body(status: u16, body: impl Into<Bytes>) -> Self {
        Self::new(status, HeaderMap::new(), body.into())
    }

    /// Add a header; names or values that are not valid HTTP are ignored
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            let _ = self.headers.insert(name, value);
        }
        self
    }

    #[must_use]
    pub const fn status(&self) -> u16 {
        self.status
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    #[must_use]
    pub const fn is_not_modified(&self) -> bool {
        self.status == 304
    }

    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|h| h.to_str().ok())
    }

    #[must_use]
    pub const fn body(&self) -> &Bytes {
        &self.body
    }

    #[must_use]
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).into_app_err("parsing JSON response body")
    }

    /// The `$.message` string GitHub puts in error bodies
    #[must_use]
    pub fn message(&self) -> Option<String> {
        let value: Value = serde_json::from_slice(&self.body).ok()?;
        value.get("message")?.as_str().map(ToString::to_string)
    }

    /// A bounded prefix of the body for error messages and telemetry
    #[must_use]
    pub fn excerpt(&self) -> String {
        self.text().chars().take(MAX_EXCERPT_CHARS).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    Interrupted,
    Other,
}

/// A request that never produced a response
#[derive(Debug, Clone)]
pub struct TransportError {
    kind: TransportErrorKind,
    message: String,
}

impl TransportError {
    #[must_use]
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    /// Failures known to clear up when simply re-attempted
    #[must_use]
    pub const fn is_flaky(&self) -> bool {
        matches!(
            self.kind,
            TransportErrorKind::Timeout | TransportErrorKind::Connect | TransportErrorKind::Interrupted
        )
    }
}

impl Display for TransportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} error: {}", self.kind, self.message)
    }
}

impl core::error::Error for TransportError {}

#[async_trait]
pub trait HttpTransport: Send + Sync + Debug {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Transport backed by a shared `reqwest` client
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport identifying itself as `product/version`
    pub fn new(product_name: &str, product_version: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("{product_name}/{product_version}"))
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .into_app_err("building HTTP client")?;

        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        log::trace!(target: LOG_TARGET, "{} {}", request.method, request.url);

        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if let Some(body) = &request.body {
            builder = builder.header("Content-Type", "application/json").body(body.clone());
        }

        let response = builder.send().await.map_err(|e| classify(&e))?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| classify(&e))?;

        Ok(HttpResponse::new(status, headers, body))
    }
}

fn classify(error: &reqwest::Error) -> TransportError {
    let kind = if error.is_timeout() {
        TransportErrorKind::Timeout
    } else if error.is_connect() {
        TransportErrorKind::Connect
    } else if error.is_body() || error.is_decode() || error.is_request() {
        TransportErrorKind::Interrupted
    } else {
        TransportErrorKind::Other
    };

    TransportError::new(kind, format!("{error:#}"))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_response_message_and_excerpt() {
        let response = HttpResponse::from_body(404, r#"{"message": "Not Found", "documentation_url": "x"}"#);
        assert_eq!(response.message().as_deref(), Some("Not Found"));
        assert!(!response.is_success());
        assert!(response.excerpt().contains("Not Found"));

        let long = HttpResponse::from_body(500, "x".repeat(2000));
        assert_eq!(long.excerpt().len(), MAX_EXCERPT_CHARS);
        assert_eq!(long.message(), None);
    }

    #[test]
    fn test_response_headers() {
        let response = HttpResponse::from_body(200, "[]").with_header("ETag", "\"abc\"");
        assert_eq!(response.header("etag"), Some("\"abc\""));
        assert!(response.is_success());
    }

    #[test]
    fn test_request_header_replacement() {
        let request = HttpRequest::new(HttpMethod::Get, "https://x")
            .with_header("Accept", "a")
            .with_header("accept", "b");
        assert_eq!(request.headers.len(), 1);
        assert_eq!(request.header("ACCEPT"), Some("b"));
    }

    #[test]
    fn test_request_debug_redacts_credentials() {
        let request = HttpRequest::new(HttpMethod::Get, "https://x").with_header("Authorization", "token secret");
        let debug = format!("{request:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_flaky_classification() {
        assert!(TransportError::new(TransportErrorKind::Timeout, "t").is_flaky());
        assert!(TransportError::new(TransportErrorKind::Connect, "c").is_flaky());
        assert!(!TransportError::new(TransportErrorKind::Other, "o").is_flaky());
    }
}
