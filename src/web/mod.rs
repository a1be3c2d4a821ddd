//! Talking to the GitHub REST API.
//!
//! [`HttpTransport`] moves bytes, [`GitHubClient`] layers rate limiting, retries, conditional
//! requests and allowlisting on top of it, and [`BatchingRequest`] follows pagination links.

mod client;
mod pagination;
mod rate_limiter;
pub mod retry;
mod scripted;
mod signature;
mod transport;

pub use client::{ApiRequest, GitHubClient};
pub use pagination::{BatchingRequest, Page, next_link};
pub use rate_limiter::{GLOBAL_SCOPE, GitHubRateLimiter, NoopRateLimiter, Quota, RateLimiter, usage_percent};
pub use retry::RetryPolicy;
pub use scripted::ScriptedTransport;
pub use signature::ResponseSignature;
pub use transport::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, TransportError, TransportErrorKind};
