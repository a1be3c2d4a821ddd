use super::{AuthProvider, AuthorizationHeader};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use core::fmt::{Debug, Formatter};
use core::time::Duration;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

const LOG_TARGET: &str = "      auth";

/// Tokens are replaced this long before they expire
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(15 * 60);

#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl Debug for IssuedToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IssuedToken").field("expires_at", &self.expires_at).finish_non_exhaustive()
    }
}

/// Mints short-lived tokens for an organization (e.g. GitHub App installation tokens)
#[async_trait]
pub trait TokenSource: Send + Sync + Debug {
    async fn issue_token(&self, organization: &str) -> Result<IssuedToken>;
}

/// Per-organization token cache with an explicit refresh margin.
///
/// Owned by whoever builds the auth providers and shared between them; there is no
/// process-wide state.
#[derive(Debug)]
pub struct TokenCache {
    refresh_margin: TimeDelta,
    tokens: Mutex<HashMap<String, IssuedToken>>,
}

impl TokenCache {
    #[must_use]
    pub fn new(refresh_margin: Duration) -> Self {
        Self {
            refresh_margin: TimeDelta::from_std(refresh_margin).unwrap_or(TimeDelta::MAX),
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Return a cached token that stays valid past the refresh margin, or issue a new one
    pub async fn get_or_issue(&self, organization: &str, source: &dyn TokenSource, now: DateTime<Utc>) -> Result<String> {
        let mut tokens = self.tokens.lock().await;

        if let Some(cached) = tokens.get(organization)
            && cached.expires_at.signed_duration_since(now) > self.refresh_margin
        {
            return Ok(cached.token.clone());
        }

        log::debug!(target: LOG_TARGET, "Issuing a new token for '{organization}'");
        let issued = source.issue_token(organization).await?;
        let token = issued.token.clone();
        let _ = tokens.insert(organization.to_string(), issued);
        Ok(token)
    }

    pub async fn invalidate(&self, organization: &str) {
        let _ = self.tokens.lock().await.remove(organization);
    }
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new(DEFAULT_REFRESH_MARGIN)
    }
}

/// Auth provider for one organization backed by a [`TokenSource`] and a shared [`TokenCache`]
#[derive(Debug, Clone)]
pub struct InstallationAuth {
    organization: String,
    source: Arc<dyn TokenSource>,
    cache: Arc<TokenCache>,
}

impl InstallationAuth {
    #[must_use]
    pub fn new(organization: impl Into<String>, source: Arc<dyn TokenSource>, cache: Arc<TokenCache>) -> Self {
        Self {
            organization: organization.into(),
            source,
            cache,
        }
    }
}

#[async_trait]
impl AuthProvider for InstallationAuth {
    fn identity(&self) -> &str {
        &self.organization
    }

    async fn authorization_header(&self) -> Result<Option<AuthorizationHeader>> {
        let token = self
            .cache
            .get_or_issue(&self.organization, self.source.as_ref(), Utc::now())
            .await?;

        Ok(Some(AuthorizationHeader {
            scheme: "Bearer".to_string(),
            token,
        }))
    }
}
