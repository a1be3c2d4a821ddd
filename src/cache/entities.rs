//! Entities persisted by the collection flows.

use super::{CacheEntity, CacheKey};
use crate::dedup::sha256_hex;
use crate::model::Repository;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Last validator token seen for a URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConditionalRequestEntry {
    pub url: String,
    pub record_type: String,
    pub etag: String,
}

impl ConditionalRequestEntry {
    #[must_use]
    pub fn new(url: &str, record_type: &str, etag: &str) -> Self {
        Self {
            url: url.to_string(),
            record_type: record_type.to_string(),
            etag: etag.to_string(),
        }
    }

    #[must_use]
    pub fn key_for(url: &str) -> CacheKey {
        CacheKey::new(sha256_hex(url.as_bytes()), "")
    }
}

impl CacheEntity for ConditionalRequestEntry {
    const TABLE: &'static str = "conditionalrequest";

    fn key(&self) -> CacheKey {
        Self::key_for(&self.url)
    }
}

/// Content hash of a record already ingested, and the session that ingested it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RecordEntry {
    pub repository: Repository,
    pub record_type: String,
    pub record_sha: String,
    pub session_id: String,
}

impl RecordEntry {
    #[must_use]
    pub fn new(repository: Repository, record_type: &str, record_sha: &str, session_id: &str) -> Self {
        Self {
            repository,
            record_type: record_type.to_string(),
            record_sha: record_sha.to_string(),
            session_id: session_id.to_string(),
        }
    }

    #[must_use]
    pub fn key_for(repository: &Repository, record_sha: &str) -> CacheKey {
        CacheKey::new(repository.partition_key(), record_sha)
    }
}

impl CacheEntity for RecordEntry {
    const TABLE: &'static str = "records";

    fn key(&self) -> CacheKey {
        Self::key_for(&self.repository, &self.record_sha)
    }
}

/// Marks a repository item (such as a commit SHA) as collected by a given collector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RepositoryItemEntry {
    pub repository: Repository,
    pub record_type: String,
    pub record_value: String,
    pub collector_identifier: String,
}

impl RepositoryItemEntry {
    #[must_use]
    pub fn new(repository: Repository, record_type: &str, record_value: &str, collector_identifier: &str) -> Self {
        Self {
            repository,
            record_type: record_type.to_string(),
            record_value: record_value.to_string(),
            collector_identifier: collector_identifier.to_string(),
        }
    }

    #[must_use]
    pub fn key_for(repository: &Repository, record_type: &str, record_value: &str) -> CacheKey {
        CacheKey::new(repository.partition_key(), format!("{record_type}_{record_value}"))
    }
}

impl CacheEntity for RepositoryItemEntry {
    const TABLE: &'static str = "repositoryitems";

    fn key(&self) -> CacheKey {
        Self::key_for(&self.repository, &self.record_type, &self.record_value)
    }
}

/// Completion marker for one fully collected API of a repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OnboardingEntry {
    pub repository: Repository,
    pub api_name: String,
    pub output_locator: String,
    pub onboarded_on: DateTime<Utc>,
}

impl OnboardingEntry {
    #[must_use]
    pub fn new(repository: Repository, api_name: &str, output_locator: &str) -> Self {
        Self {
            repository,
            api_name: api_name.to_string(),
            output_locator: output_locator.to_string(),
            onboarded_on: Utc::now(),
        }
    }

    #[must_use]
    pub fn key_for(repository: &Repository, api_name: &str) -> CacheKey {
        CacheKey::new(repository.partition_key(), api_name)
    }
}

impl CacheEntity for OnboardingEntry {
    const TABLE: &'static str = "onboarding";

    fn key(&self) -> CacheKey {
        Self::key_for(&self.repository, &self.api_name)
    }
}

/// Watermark of the newest timeline event already reconciled for a repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EventsTimelineEntry {
    pub repository: Repository,
    pub session_id: String,
    pub last_seen_event_id: String,
    pub last_seen_event_date: DateTime<Utc>,
}

impl EventsTimelineEntry {
    #[must_use]
    pub fn key_for(repository: &Repository) -> CacheKey {
        CacheKey::new(repository.partition_key(), "")
    }
}

impl CacheEntity for EventsTimelineEntry {
    const TABLE: &'static str = "eventstimeline";

    fn key(&self) -> CacheKey {
        Self::key_for(&self.repository)
    }
}

/// A URL fetched by the point collector; the entry timestamp drives freshness
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PointCollectorEntry {
    pub url: String,
}

impl PointCollectorEntry {
    #[must_use]
    pub fn new(url: &str) -> Self {
        Self { url: url.to_string() }
    }

    #[must_use]
    pub fn key_for(url: &str) -> CacheKey {
        CacheKey::new(sha256_hex(url.as_bytes()), "")
    }
}

impl CacheEntity for PointCollectorEntry {
    const TABLE: &'static str = "pointcollector";

    fn key(&self) -> CacheKey {
        Self::key_for(&self.url)
    }
}

/// Quota snapshot for one identity within one scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RateLimitEntry {
    pub scope: String,
    pub identity: String,
    pub limit: u64,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
    #[serde(default)]
    pub retry_after: Option<DateTime<Utc>>,
}

impl RateLimitEntry {
    #[must_use]
    pub fn key_for(scope: &str, identity: &str) -> CacheKey {
        CacheKey::new(identity, scope)
    }
}

impl CacheEntity for RateLimitEntry {
    const TABLE: &'static str = "ratelimiter";

    fn key(&self) -> CacheKey {
        Self::key_for(&self.scope, &self.identity)
    }
}

/// Number of webhook events seen for a repository since the last signal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EventStatsEntry {
    pub repository: Repository,
    pub event_count: u32,
}

impl EventStatsEntry {
    #[must_use]
    pub const fn new(repository: Repository, event_count: u32) -> Self {
        Self { repository, event_count }
    }

    #[must_use]
    pub fn key_for(repository: &Repository) -> CacheKey {
        CacheKey::new(repository.partition_key(), "")
    }
}

impl CacheEntity for EventStatsEntry {
    const TABLE: &'static str = "eventstats";

    fn key(&self) -> CacheKey {
        Self::key_for(&self.repository)
    }
}
