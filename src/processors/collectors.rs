//! Follow-up collection triggered by individual webhook payloads.

use super::api::GitHubApi;
use super::point::recently_collected;
use super::repository_metadata;
use crate::cache::{KeyValueCache, MAX_CONFLICT_ATTEMPTS, PointCollectorEntry, RepositoryItemEntry};
use crate::collect::{CollectionNode, Collector};
use crate::io::{Queue, Telemetry, put_object};
use crate::model::data_contract::{
    COMMIT_API_NAME, COMMIT_INSTANCE_RECORD_TYPE, ORGANIZATION_INSTANCE_RECORD_TYPE, ORGANIZATIONS_API_NAME, USER_INSTANCE_RECORD_TYPE,
    USERS_API_NAME,
};
use crate::model::{PointCollectorInput, Repository, ResponseShape};
use crate::web::ResponseSignature;
use crate::{Outcome, Result, try_outcome};
use core::time::Duration;
use ohno::bail;
use serde_json::Value;
use std::sync::Arc;

const LOG_TARGET: &str = "  commits";

/// Placeholder SHA GitHub uses for a branch that did not exist before the push
const ZERO_SHA: &str = "0000000000000000000000000000000000000000";

/// Offloads the organization and sender of a payload to the point queue
#[derive(Debug, Clone)]
pub struct DefaultCollector {
    point_queue: Arc<dyn Queue>,
    point_cache: Arc<dyn KeyValueCache<PointCollectorEntry>>,
    freshness: Duration,
}

impl DefaultCollector {
    #[must_use]
    pub fn new(point_queue: Arc<dyn Queue>, point_cache: Arc<dyn KeyValueCache<PointCollectorEntry>>, freshness: Duration) -> Self {
        Self {
            point_queue,
            point_cache,
            freshness,
        }
    }

    pub async fn process(&self, payload: &Value, repository: &Repository) -> Result<()> {
        let targets = [
            ("organization", ORGANIZATION_INSTANCE_RECORD_TYPE, ORGANIZATIONS_API_NAME),
            ("sender", USER_INSTANCE_RECORD_TYPE, USERS_API_NAME),
        ];

        for (property, record_type, api_name) in targets {
            let Some(url) = payload.get(property).and_then(|p| p.get("url")).and_then(Value::as_str) else {
                continue;
            };

            if recently_collected(self.point_cache.as_ref(), url, self.freshness).await? {
                log::debug!(target: LOG_TARGET, "Skipping '{url}', collected recently");
                continue;
            }

            let input = PointCollectorInput::new(url, record_type, api_name, repository);
            put_object(self.point_queue.as_ref(), &input, None).await?;
        }

        Ok(())
    }
}

/// What happened to one commit SHA referenced by a push
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum CommitDecision {
    /// First sighting; cached and fetched
    Collect,

    /// Cached earlier by this same session, which must have been retried; fetched again
    Recollect,

    /// Cached by another session
    Skip,
}

/// The default behavior plus a fetch of every commit a push references
#[derive(Debug, Clone)]
pub struct PushCollector {
    default: DefaultCollector,
    collector: Arc<Collector>,
    item_cache: Arc<dyn KeyValueCache<RepositoryItemEntry>>,
    telemetry: Arc<dyn Telemetry>,
    api: GitHubApi,
}

impl PushCollector {
    #[must_use]
    pub fn new(
        default: DefaultCollector,
        collector: Arc<Collector>,
        item_cache: Arc<dyn KeyValueCache<RepositoryItemEntry>>,
        telemetry: Arc<dyn Telemetry>,
        api: GitHubApi,
    ) -> Self {
        Self {
            default,
            collector,
            item_cache,
            telemetry,
            api,
        }
    }

    pub async fn process(&self, payload: &Value, repository: &Repository, session_id: &str) -> Result<Outcome<Vec<CommitDecision>>> {
        self.default.process(payload, repository).await?;

        let mut decisions = Vec::new();
        for (path, sha) in referenced_commits(payload) {
            if sha == ZERO_SHA {
                continue;
            }

            let identifier = format!("{session_id}_{path}");
            let decision = self.decide(repository, &sha, &identifier).await?;

            if decision != CommitDecision::Skip {
                try_outcome!(self.fetch_commit(repository, &sha).await?);
            }

            decisions.push(decision);
        }

        Ok(Outcome::Complete(decisions))
    }

    async fn decide(&self, repository: &Repository, sha: &str, identifier: &str) -> Result<CommitDecision> {
        let key = RepositoryItemEntry::key_for(repository, COMMIT_INSTANCE_RECORD_TYPE, sha);

        for attempt in 1..=MAX_CONFLICT_ATTEMPTS {
            if let Some(existing) = self.item_cache.retrieve(&key).await? {
                return Ok(self.cache_hit(sha, identifier, &existing.entity.collector_identifier));
            }

            let entry = RepositoryItemEntry::new(repository.clone(), COMMIT_INSTANCE_RECORD_TYPE, sha, identifier);
            if self.item_cache.cache_atomic(None, entry).await? {
                self.telemetry.track_event(
                    "CollectorCacheMiss",
                    &[
                        ("RecordType", COMMIT_INSTANCE_RECORD_TYPE.to_string()),
                        ("RecordValue", sha.to_string()),
                        ("CollectorIdentifier", identifier.to_string()),
                    ],
                );
                return Ok(CommitDecision::Collect);
            }

            log::debug!(target: LOG_TARGET, "Commit {sha} in {repository} was cached concurrently (attempt {attempt})");
        }

        bail!("commit {sha} in {repository} kept changing concurrently after {MAX_CONFLICT_ATTEMPTS} attempts")
    }

    fn cache_hit(&self, sha: &str, identifier: &str, cached_identifier: &str) -> CommitDecision {
        let decision = if cached_identifier == identifier {
            CommitDecision::Recollect
        } else {
            CommitDecision::Skip
        };

        self.telemetry.track_event(
            "CollectorCacheHit",
            &[
                ("RecordType", COMMIT_INSTANCE_RECORD_TYPE.to_string()),
                ("RecordValue", sha.to_string()),
                ("CollectorIdentifier", identifier.to_string()),
                ("CachedCollectorIdentifier", cached_identifier.to_string()),
                (
                    "Decision",
                    if decision == CommitDecision::Skip { "Skip" } else { "Re-collect" }.to_string(),
                ),
            ],
        );
        decision
    }

    async fn fetch_commit(&self, repository: &Repository, sha: &str) -> Result<Outcome<u64>> {
        let node = CollectionNode::for_url(COMMIT_INSTANCE_RECORD_TYPE, COMMIT_API_NAME, self.api.commit(repository, sha))
            .with_shape(ResponseShape::Object)
            .with_metadata(repository_metadata(repository))
            .with_allowlist(vec![
                ResponseSignature::exact(404, "Not Found"),
                ResponseSignature::exact(422, &format!("No commit found for SHA: {sha}")),
            ]);

        for sink in self.collector.sinks() {
            sink.new_output(COMMIT_INSTANCE_RECORD_TYPE).await?;
        }

        self.collector.process(&node).await
    }
}

/// `(json path, sha)` for `$.before`, `$.after`, `$.head_commit.id` and each `$.commits[i].id`
fn referenced_commits(payload: &Value) -> Vec<(String, String)> {
    let mut commits = Vec::new();
    let mut add = |path: String, value: Option<&Value>| {
        if let Some(sha) = value.and_then(Value::as_str) {
            commits.push((path, sha.to_string()));
        }
    };

    add("$.before".to_string(), payload.get("before"));
    add("$.after".to_string(), payload.get("after"));
    add("$.head_commit.id".to_string(), payload.get("head_commit").and_then(|c| c.get("id")));

    if let Some(items) = payload.get("commits").and_then(Value::as_array) {
        for (index, commit) in items.iter().enumerate() {
            add(format!("$.commits[{index}].id"), commit.get("id"));
        }
    }

    commits
}
