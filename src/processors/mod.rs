//! Flows composed from the collection engine, the caches and the hashers.
//!
//! - [`WebhookProcessor`] ingests one webhook delivery and records its dedup hash.
//! - [`EventsTimelineProcessor`] polls a repository's event timeline and ingests whatever the
//!   webhook path missed.
//! - [`OnboardingProcessor`] backfills an organization or a repository.
//! - [`PointProcessor`] fetches a single resource.
//! - [`TrafficProcessor`] collects a repository's traffic statistics.

mod api;
mod collectors;
mod delta;
mod onboarding;
mod point;
mod traffic;
mod webhook;

use crate::model::{Metadata, Repository};
use serde_json::Value;

pub use api::{COMMENTS_PER_PAGE, GitHubApi};
pub use collectors::{CommitDecision, DefaultCollector, PushCollector};
pub use delta::{EventsTimelineProcessor, TimelineSummary};
pub use onboarding::{ISSUE_COMMENT_RESTART_THRESHOLD, OnboardingProcessor};
pub use point::{PointOutcome, PointProcessor};
pub use traffic::TrafficProcessor;
pub use webhook::WebhookProcessor;

/// Identity of `repository` as record metadata
#[must_use]
pub fn repository_metadata(repository: &Repository) -> Metadata {
    let mut metadata = Metadata::new();
    let _ = metadata.insert("OrganizationId".into(), Value::from(repository.organization_id()));
    let _ = metadata.insert("OrganizationLogin".into(), Value::from(repository.organization_login()));
    let _ = metadata.insert("RepositoryId".into(), Value::from(repository.repository_id()));
    let _ = metadata.insert("RepositoryName".into(), Value::from(repository.repository_name()));
    metadata
}
