use super::api::GitHubApi;
use crate::auth::AuthProvider;
use crate::cache::{EventsTimelineEntry, KeyValueCache, RecordEntry};
use crate::dedup::HasherFactory;
use crate::io::{RecordSink, Telemetry};
use crate::model::data_contract::EVENTS_API_NAME;
use crate::model::{Metadata, RecordContext, Repository};
use crate::web::GitHubClient;
use crate::{Outcome, Result, try_outcome};
use chrono::{DateTime, Utc};
use ohno::{IntoAppError, app_err};
use serde_json::Value;
use std::sync::Arc;

const LOG_TARGET: &str = "     delta";

/// Counters describing one pass over a repository's event timeline
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimelineSummary {
    pub pages: u32,
    pub failed_pages: u32,
    pub captured: u64,
    pub missed: u64,
    pub unexpected: u64,
}

/// Newest event seen so far during a pass; becomes the next watermark
#[derive(Debug, Clone)]
struct Newest {
    id: String,
    created_at: DateTime<Utc>,
}

enum Continuation {
    NextPage,
    Stop,
}

/// Reconciles a repository's event timeline against the webhook record cache.
///
/// Events whose hash was cached by the webhook path are skipped; anything else is a missed
/// delivery and is ingested here.
#[derive(Debug, Clone)]
pub struct EventsTimelineProcessor {
    client: Arc<GitHubClient>,
    auth: Arc<dyn AuthProvider>,
    api: GitHubApi,
    sinks: Vec<Arc<dyn RecordSink>>,
    record_cache: Arc<dyn KeyValueCache<RecordEntry>>,
    timeline_cache: Arc<dyn KeyValueCache<EventsTimelineEntry>>,
    hashers: HasherFactory,
    max_pages: u32,
}

impl EventsTimelineProcessor {
    #[expect(clippy::too_many_arguments, reason = "every collaborator is injected")]
    #[must_use]
    pub fn new(
        client: Arc<GitHubClient>,
        auth: Arc<dyn AuthProvider>,
        api: GitHubApi,
        sinks: Vec<Arc<dyn RecordSink>>,
        record_cache: Arc<dyn KeyValueCache<RecordEntry>>,
        timeline_cache: Arc<dyn KeyValueCache<EventsTimelineEntry>>,
        hashers: HasherFactory,
        max_pages: u32,
    ) -> Self {
        Self {
            client,
            auth,
            api,
            sinks,
            record_cache,
            timeline_cache,
            hashers,
            max_pages,
        }
    }

    fn telemetry(&self) -> &dyn Telemetry {
        self.client.telemetry().as_ref()
    }

    pub async fn process(&self, repository: &Repository, session_id: &str) -> Result<Outcome<TimelineSummary>> {
        let watermark = self
            .timeline_cache
            .retrieve(&EventsTimelineEntry::key_for(repository))
            .await?
            .map(|v| v.entity);

        for sink in &self.sinks {
            sink.set_output_path_prefix(&repository.output_prefix());
        }

        let mut summary = TimelineSummary::default();
        let mut newest = None;

        for page in 1..=self.max_pages {
            let url = self.api.events(repository, page);
            summary.pages += 1;

            let continuation = match self
                .process_page(&url, repository, watermark.as_ref(), session_id, &mut newest, &mut summary)
                .await
            {
                Ok(Outcome::Complete(continuation)) => continuation,
                Ok(Outcome::RetryAfter(delay)) => return Ok(Outcome::RetryAfter(delay)),
                Err(e) => {
                    log::warn!(target: LOG_TARGET, "Could not process '{url}': {e:#}");
                    self.telemetry().track_exception(
                        &format!("{e:#}"),
                        &[
                            ("Url", url.clone()),
                            ("Page", page.to_string()),
                            ("SessionId", session_id.to_string()),
                        ],
                    );
                    summary.failed_pages += 1;
                    Continuation::NextPage
                }
            };

            if matches!(continuation, Continuation::Stop) {
                break;
            }
        }

        if let Some(newest) = newest {
            self.advance_watermark(repository, session_id, watermark.as_ref(), newest).await?;
        }

        log::info!(
            target: LOG_TARGET,
            "{repository}: {} captured, {} missed, {} unexpected across {} pages",
            summary.captured,
            summary.missed,
            summary.unexpected,
            summary.pages
        );
        Ok(Outcome::Complete(summary))
    }

    async fn process_page(
        &self,
        url: &str,
        repository: &Repository,
        watermark: Option<&EventsTimelineEntry>,
        session_id: &str,
        newest: &mut Option<Newest>,
        summary: &mut TimelineSummary,
    ) -> Result<Outcome<Continuation>> {
        let events = try_outcome!(self.client.get_json_array(url, EVENTS_API_NAME, self.auth.as_ref()).await?);
        if events.is_empty() {
            return Ok(Outcome::Complete(Continuation::Stop));
        }

        for event in &events {
            let id = event_id(event).ok_or_else(|| app_err!("event without an id in '{url}'"))?;
            let created_at = created_at(event)?;

            if let Some(watermark) = watermark {
                if id == watermark.last_seen_event_id {
                    return Ok(Outcome::Complete(Continuation::Stop));
                }

                if created_at < watermark.last_seen_event_date {
                    log::warn!(
                        target: LOG_TARGET,
                        "Event {id} predates the watermark {}; another pass probably ran concurrently",
                        watermark.last_seen_event_id
                    );
                    return Ok(Outcome::Complete(Continuation::Stop));
                }
            }

            if newest.is_none() {
                *newest = Some(Newest {
                    id: id.clone(),
                    created_at,
                });
            }

            self.process_event(event, &id, repository, session_id, summary).await?;
        }

        Ok(Outcome::Complete(Continuation::NextPage))
    }

    async fn process_event(
        &self,
        event: &Value,
        id: &str,
        repository: &Repository,
        session_id: &str,
        summary: &mut TimelineSummary,
    ) -> Result<()> {
        let event_type = event.get("type").and_then(Value::as_str).unwrap_or_default();
        let payload = event.get("payload").cloned().unwrap_or(Value::Null);

        let hash = self
            .hashers
            .event_hasher(event_type)
            .compute(&payload, repository, self.telemetry())?;

        let properties = [
            ("EventId", id.to_string()),
            ("EventType", event_type.to_string()),
            ("RecordSha", hash.clone()),
            ("OrganizationId", repository.organization_id().to_string()),
            ("RepositoryId", repository.repository_id().to_string()),
        ];

        if self.record_cache.exists(&RecordEntry::key_for(repository, &hash)).await? {
            summary.captured += 1;
            self.telemetry().track_event("CapturedEvent", &properties);
            return Ok(());
        }

        // forks of user repositories sometimes appear without organization details
        let Some(event_repository) = event_repository(event) else {
            summary.unexpected += 1;
            self.telemetry().track_event(
                "UnexpectedEvent",
                &[
                    ("EventId", id.to_string()),
                    ("EventType", event_type.to_string()),
                    ("RecordSha", hash),
                    ("Reason", "missing repository or organization".to_string()),
                ],
            );
            return Ok(());
        };

        summary.missed += 1;
        self.telemetry().track_event("MissedEvent", &properties);

        let context = RecordContext::new(event_type, missed_event_metadata(event, id, &event_repository));
        for sink in &self.sinks {
            sink.new_output(event_type).await?;
            sink.write_record(&payload, &context).await?;
        }

        // a concurrent writer that got there first recorded the same content
        let _ = self
            .record_cache
            .cache_atomic(None, RecordEntry::new(repository.clone(), event_type, &hash, session_id))
            .await?;
        Ok(())
    }

    async fn advance_watermark(
        &self,
        repository: &Repository,
        session_id: &str,
        watermark: Option<&EventsTimelineEntry>,
        newest: Newest,
    ) -> Result<()> {
        let advance = watermark.is_none_or(|w| w.last_seen_event_id != newest.id && newest.created_at > w.last_seen_event_date);
        if !advance {
            return Ok(());
        }

        log::debug!(target: LOG_TARGET, "{repository}: watermark is now event {}", newest.id);
        self.timeline_cache
            .cache(EventsTimelineEntry {
                repository: repository.clone(),
                session_id: session_id.to_string(),
                last_seen_event_id: newest.id,
                last_seen_event_date: newest.created_at,
            })
            .await
    }
}

fn event_id(event: &Value) -> Option<String> {
    match event.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn created_at(event: &Value) -> Result<DateTime<Utc>> {
    let raw = event
        .get("created_at")
        .and_then(Value::as_str)
        .ok_or_else(|| app_err!("event without 'created_at'"))?;

    Ok(DateTime::parse_from_rfc3339(raw)
        .into_app_err_with(|| format!("parsing event date '{raw}'"))?
        .with_timezone(&Utc))
}

/// The repository of a timeline event; `repo.name` is `owner/name`
fn event_repository(event: &Value) -> Option<Repository> {
    let repo = event.get("repo")?;
    let org = event.get("org")?;

    let repository_id = repo.get("id")?.as_i64()?;
    let full_name = repo.get("name")?.as_str()?;
    let repository_name = full_name.rsplit_once('/').map_or(full_name, |(_, name)| name);

    Some(Repository::new(
        org.get("id")?.as_i64()?,
        org.get("login")?.as_str()?,
        repository_id,
        repository_name,
    ))
}

fn missed_event_metadata(event: &Value, id: &str, repository: &Repository) -> Metadata {
    let mut metadata = Metadata::new();
    let actor_id = event.get("actor").and_then(|a| a.get("id")).cloned().unwrap_or(Value::Null);
    let created_at = event.get("created_at").cloned().unwrap_or(Value::Null);

    let _ = metadata.insert("ActorId".into(), actor_id);
    let _ = metadata.insert("RepositoryId".into(), Value::from(repository.repository_id()));
    let _ = metadata.insert("RepositoryName".into(), Value::from(repository.repository_name()));
    let _ = metadata.insert("OrganizationId".into(), Value::from(repository.organization_id()));
    let _ = metadata.insert("OrganizationLogin".into(), Value::from(repository.organization_login()));
    let _ = metadata.insert("CreatedAt".into(), created_at);
    let _ = metadata.insert("EventId".into(), Value::from(id));
    metadata
}
