//! Credentials for GitHub requests.
//!
//! The collection core only consumes an [`AuthProvider`]; how tokens are minted is
//! up to the implementation. [`TokenAuth`] wraps a personal access token, [`AnonymousAuth`]
//! sends no credentials, and [`InstallationAuth`] caches short-lived tokens issued by a
//! [`TokenSource`] such as [`CommandTokenSource`].

mod command;
mod token_cache;

use crate::Result;
use async_trait::async_trait;
use core::fmt::Debug;

pub use command::CommandTokenSource;
pub use token_cache::{InstallationAuth, IssuedToken, TokenCache, TokenSource};

/// Value of an `Authorization` header, split into scheme and credential
#[derive(Clone, PartialEq, Eq)]
pub struct AuthorizationHeader {
    pub scheme: String,
    pub token: String,
}

impl Debug for AuthorizationHeader {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AuthorizationHeader")
            .field("scheme", &self.scheme)
            .field("token", &"<redacted>")
            .finish()
    }
}

#[async_trait]
pub trait AuthProvider: Send + Sync + Debug {
    /// Name the quota is tracked under (an organization login or a user identity)
    fn identity(&self) -> &str;

    /// Credentials to attach, or `None` for anonymous requests
    async fn authorization_header(&self) -> Result<Option<AuthorizationHeader>>;

    fn extra_headers(&self) -> Vec<(String, String)> {
        Vec::new()
    }
}

/// Personal access token authentication
#[derive(Clone)]
pub struct TokenAuth {
    identity: String,
    token: String,
}

impl TokenAuth {
    #[must_use]
    pub fn new(identity: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            token: token.into(),
        }
    }
}

impl Debug for TokenAuth {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TokenAuth").field("identity", &self.identity).finish_non_exhaustive()
    }
}

#[async_trait]
impl AuthProvider for TokenAuth {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn authorization_header(&self) -> Result<Option<AuthorizationHeader>> {
        Ok(Some(AuthorizationHeader {
            scheme: "token".to_string(),
            token: self.token.clone(),
        }))
    }
}

/// Unauthenticated access, subject to GitHub's much lower anonymous quota
#[derive(Debug, Clone)]
pub struct AnonymousAuth {
    identity: String,
}

impl AnonymousAuth {
    #[must_use]
    pub fn new() -> Self {
        Self {
            identity: "anonymous".to_string(),
        }
    }
}

impl Default for AnonymousAuth {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthProvider for AnonymousAuth {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn authorization_header(&self) -> Result<Option<AuthorizationHeader>> {
        Ok(None)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_token_auth() {
        let auth = TokenAuth::new("contoso", "s3cret");
        assert_eq!(auth.identity(), "contoso");

        let header = auth.authorization_header().await.unwrap().unwrap();
        assert_eq!(header.scheme, "token");
        assert_eq!(header.token, "s3cret");
        assert!(!format!("{header:?}").contains("s3cret"));
        assert!(!format!("{auth:?}").contains("s3cret"));
    }

    #[tokio::test]
    async fn test_anonymous_auth() {
        let auth = AnonymousAuth::default();
        assert_eq!(auth.identity(), "anonymous");
        assert!(auth.authorization_header().await.unwrap().is_none());
        assert!(auth.extra_headers().is_empty());
    }
}
