use super::collectors::{DefaultCollector, PushCollector};
use super::repository_metadata;
use crate::cache::{EventsBookkeeper, KeyValueCache, RecordEntry};
use crate::dedup::{HasherFactory, remove_path};
use crate::io::{RecordSink, Telemetry};
use crate::model::{RecordContext, Repository};
use crate::{Outcome, Result, try_outcome};
use ohno::{IntoAppError, bail};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

const LOG_TARGET: &str = "   webhook";

/// Ingests one webhook delivery: record it, remember its hash, then collect what it references
#[derive(Debug, Clone)]
pub struct WebhookProcessor {
    sinks: Vec<Arc<dyn RecordSink>>,
    record_cache: Arc<dyn KeyValueCache<RecordEntry>>,
    bookkeeper: EventsBookkeeper,
    event_count_limit: u32,
    hashers: HasherFactory,
    telemetry: Arc<dyn Telemetry>,
    default_collector: DefaultCollector,
    push_collector: PushCollector,
}

impl WebhookProcessor {
    #[expect(clippy::too_many_arguments, reason = "every collaborator is injected")]
    #[must_use]
    pub fn new(
        sinks: Vec<Arc<dyn RecordSink>>,
        record_cache: Arc<dyn KeyValueCache<RecordEntry>>,
        bookkeeper: EventsBookkeeper,
        event_count_limit: u32,
        hashers: HasherFactory,
        telemetry: Arc<dyn Telemetry>,
        default_collector: DefaultCollector,
        push_collector: PushCollector,
    ) -> Self {
        Self {
            sinks,
            record_cache,
            bookkeeper,
            event_count_limit,
            hashers,
            telemetry,
            default_collector,
            push_collector,
        }
    }

    /// Process a delivery and return the properties that describe it.
    ///
    /// A payload that does not identify its organization is reported and ignored, yielding an
    /// empty map.
    pub async fn process(&self, event_type: &str, body: &str, session_id: &str) -> Result<Outcome<BTreeMap<String, String>>> {
        let mut payload: Value = serde_json::from_str(body).into_app_err_with(|| format!("parsing '{event_type}' webhook payload"))?;
        if !payload.is_object() {
            bail!("'{event_type}' webhook payload is not a JSON object");
        }

        let _ = remove_path(&mut payload, "$.installation");

        let repository = match repository_of(&payload) {
            Ok(repository) => repository,
            Err(reason) => {
                log::warn!(target: LOG_TARGET, "Ignoring '{event_type}' payload: {reason}");
                self.telemetry.track_event(
                    "UnexpectedWebhookPayload",
                    &[
                        ("EventType", event_type.to_string()),
                        ("SessionId", session_id.to_string()),
                        ("Reason", reason.to_string()),
                    ],
                );
                return Ok(Outcome::Complete(BTreeMap::new()));
            }
        };

        for sink in &self.sinks {
            sink.set_output_path_prefix(&repository.output_prefix());
        }

        if repository.is_repository_scoped() {
            self.count_event(&repository).await;
        }

        if event_type != "ping" {
            self.remember(event_type, &payload, &repository, session_id).await?;
        }

        let context = RecordContext::new(event_type, repository_metadata(&repository));
        for sink in &self.sinks {
            sink.new_output(event_type).await?;
            sink.write_record(&payload, &context).await?;
        }

        if event_type == "push" {
            let decisions = try_outcome!(self.push_collector.process(&payload, &repository, session_id).await?);
            log::debug!(target: LOG_TARGET, "Push to {repository}: commit decisions {decisions:?}");
        } else {
            self.default_collector.process(&payload, &repository).await?;
        }

        Ok(Outcome::Complete(session_properties(event_type, &payload, &repository)))
    }

    async fn count_event(&self, repository: &Repository) {
        if let Some(count) = self.bookkeeper.increment_count(repository).await
            && count >= self.event_count_limit
        {
            log::info!(target: LOG_TARGET, "{repository} reached {count} events, signaling");
            self.bookkeeper.signal_count(repository).await;
            self.bookkeeper.reset_count(repository).await;
        }
    }

    async fn remember(&self, event_type: &str, payload: &Value, repository: &Repository, session_id: &str) -> Result<()> {
        let hash = self
            .hashers
            .payload_hasher(event_type)
            .compute(payload, repository, self.telemetry.as_ref())?;

        // a redelivery finds the entry from the first delivery and leaves it in place
        let _ = self
            .record_cache
            .cache_atomic(None, RecordEntry::new(repository.clone(), event_type, &hash, session_id))
            .await?;

        self.telemetry.track_event(
            "CachedWebhookPayload",
            &[
                ("EventType", event_type.to_string()),
                ("SessionId", session_id.to_string()),
                ("RecordSha", hash),
                ("OrganizationId", repository.organization_id().to_string()),
                ("RepositoryId", repository.repository_id().to_string()),
            ],
        );
        Ok(())
    }
}

/// Identify the repository a payload belongs to, or say why it cannot be
fn repository_of(payload: &Value) -> core::result::Result<Repository, &'static str> {
    let repository = payload.get("repository");
    let repository_id = repository.and_then(|r| r.get("id")).and_then(Value::as_i64);
    let repository_name = repository.and_then(|r| r.get("name")).and_then(Value::as_str);

    if repository_name.is_some() && repository_id.is_none() {
        return Err("repository name without repository id");
    }

    let organization = payload.get("organization");
    let Some(organization_id) = organization.and_then(|o| o.get("id")).and_then(Value::as_i64) else {
        return Err("missing organization id");
    };
    let Some(organization_login) = organization.and_then(|o| o.get("login")).and_then(Value::as_str) else {
        return Err("missing organization login");
    };

    Ok(Repository::new(
        organization_id,
        organization_login,
        repository_id.unwrap_or(0),
        repository_name.unwrap_or_default(),
    ))
}

fn session_properties(event_type: &str, payload: &Value, repository: &Repository) -> BTreeMap<String, String> {
    let mut properties = BTreeMap::from([
        ("EventType".to_string(), event_type.to_string()),
        ("OrganizationId".to_string(), repository.organization_id().to_string()),
        ("OrganizationLogin".to_string(), repository.organization_login().to_string()),
        ("RepositoryId".to_string(), repository.repository_id().to_string()),
        ("RepositoryName".to_string(), repository.repository_name().to_string()),
    ]);

    let mut add = |key: &str, object: &str, property: &str| {
        if let Some(value) = payload.get(object).and_then(|o| o.get(property)) {
            let rendered = value.as_str().map_or_else(|| value.to_string(), str::to_string);
            let _ = properties.insert(key.to_string(), rendered);
        }
    };

    match event_type {
        "issues" => add("IssueNumber", "issue", "number"),
        "issue_comment" => {
            add("IssueNumber", "issue", "number");
            add("CommentId", "comment", "id");
        }
        "pull_request" => add("PullRequestNumber", "pull_request", "number"),
        "pull_request_review_comment" => {
            add("PullRequestNumber", "pull_request", "number");
            add("CommentId", "comment", "id");
        }
        _ => {}
    }

    properties
}
