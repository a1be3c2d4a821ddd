use super::client::{ApiRequest, GitHubClient};
use super::signature::ResponseSignature;
use super::transport::{HttpMethod, HttpResponse};
use crate::auth::AuthProvider;
use crate::{Outcome, Result};
use serde_json::Value;
use std::sync::Arc;

const LINK_HEADER: &str = "link";

/// Extract the `rel="next"` URL from a `Link` header
#[must_use]
pub fn next_link(header: &str) -> Option<String> {
    header.split(", ").find_map(|entry| {
        let mut parts = entry.split("; ");
        let url = parts.next()?;
        let relation = parts.next()?;
        (relation == r#"rel="next""#).then(|| url.trim_start_matches('<').trim_end_matches('>').to_string())
    })
}

/// One fetched page
#[derive(Debug, Clone)]
pub struct Page {
    pub url: String,
    pub response: HttpResponse,
}

/// Walks a paginated resource by following the server's `next` links
#[derive(Debug)]
pub struct BatchingRequest {
    client: Arc<GitHubClient>,
    next_url: Option<String>,
    method: HttpMethod,
    api_name: String,
    body: Option<Value>,
    allowlist: Vec<ResponseSignature>,
    conditional_record_type: Option<String>,
}

impl BatchingRequest {
    #[must_use]
    pub fn new(client: Arc<GitHubClient>, url: impl Into<String>, api_name: impl Into<String>) -> Self {
        Self {
            client,
            next_url: Some(url.into()),
            method: HttpMethod::Get,
            api_name: api_name.into(),
            body: None,
            allowlist: Vec::new(),
            conditional_record_type: None,
        }
    }

    /// Fetch with POST and this JSON body
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.method = HttpMethod::Post;
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn with_allowlist(mut self, allowlist: Vec<ResponseSignature>) -> Self {
        self.allowlist = allowlist;
        self
    }

    #[must_use]
    pub fn conditional(mut self, record_type: impl Into<String>) -> Self {
        self.conditional_record_type = Some(record_type.into());
        self
    }

    #[must_use]
    pub const fn has_next(&self) -> bool {
        self.next_url.is_some()
    }

    /// Stop after the page already fetched
    pub fn stop(&mut self) {
        self.next_url = None;
    }

    /// Fetch the next page. Only a success response can link onward.
    pub async fn next_page(&mut self, auth: &dyn AuthProvider) -> Result<Outcome<Option<Page>>> {
        let Some(url) = self.next_url.take() else {
            return Ok(Outcome::Complete(None));
        };

        let request = ApiRequest {
            method: self.method,
            url: &url,
            api_name: &self.api_name,
            body: self.body.as_ref(),
            allowlist: &self.allowlist,
            conditional_record_type: self.conditional_record_type.as_deref(),
        };

        let response = match self.client.send(&request, auth).await? {
            Outcome::Complete(response) => response,
            Outcome::RetryAfter(delay) => {
                // the same page is fetched again when the work resumes
                self.next_url = Some(url);
                return Ok(Outcome::RetryAfter(delay));
            }
        };

        if response.is_success() {
            self.next_url = response.header(LINK_HEADER).and_then(next_link);
        }

        Ok(Outcome::Complete(Some(Page { url, response })))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::auth::TokenAuth;
    use crate::io::{MemoryTelemetry, Telemetry};
    use crate::web::{HttpTransport, NoopRateLimiter, ScriptedTransport};

    #[test]
    fn test_next_link() {
        let header = r#"<https://api.github.com/repositories/1/issues?page=2>; rel="next", <https://api.github.com/repositories/1/issues?page=5>; rel="last""#;
        assert_eq!(
            next_link(header).as_deref(),
            Some("https://api.github.com/repositories/1/issues?page=2")
        );
    }

    #[test]
    fn test_next_link_absent() {
        let header = r#"<https://api.github.com/repositories/1/issues?page=1>; rel="prev", <https://api.github.com/repositories/1/issues?page=1>; rel="first""#;
        assert_eq!(next_link(header), None);
        assert_eq!(next_link(""), None);
    }

    #[test]
    fn test_next_link_must_be_exact_relation() {
        assert_eq!(next_link(r#"<https://x/2>; rel="next page""#), None);
        assert_eq!(next_link("<https://x/2>;rel=\"next\""), None);
    }

    #[tokio::test]
    async fn test_pages_until_no_next_link() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(
            "https://x/items",
            HttpResponse::from_body(200, "[1]").with_header("link", r#"<https://x/items?page=2>; rel="next""#),
        );
        transport.push("https://x/items?page=2", HttpResponse::from_body(200, "[2]"));

        let client = Arc::new(GitHubClient::new(
            Arc::clone(&transport) as Arc<dyn HttpTransport>,
            Arc::new(NoopRateLimiter),
            Arc::new(MemoryTelemetry::new()) as Arc<dyn Telemetry>,
        ));
        let auth = TokenAuth::new("bot", "t");

        let mut batch = BatchingRequest::new(client, "https://x/items", "Items");
        let mut urls = Vec::new();
        while batch.has_next() {
            if let Some(page) = batch.next_page(&auth).await.unwrap().complete().unwrap() {
                urls.push(page.url);
            }
        }

        assert_eq!(urls, ["https://x/items", "https://x/items?page=2"]);
    }
}
