use super::api::GitHubApi;
use super::repository_metadata;
use crate::cache::{KeyValueCache, OnboardingEntry};
use crate::collect::{CollectionNode, Collector, RecordDiverter, metadata_segment};
use crate::io::{Queue, Telemetry, put_object};
use crate::model::data_contract::{
    COMMIT_COMMENT_INSTANCE_RECORD_TYPE, COMMIT_COMMENTS_API_NAME, COMMIT_INSTANCE_RECORD_TYPE, COMMITS_API_NAME,
    ISSUE_COMMENT_INSTANCE_RECORD_TYPE, ISSUE_COMMENTS_API_NAME, ISSUE_INSTANCE_RECORD_TYPE, ISSUES_API_NAME,
    MILESTONE_INSTANCE_RECORD_TYPE, MILESTONES_API_NAME, PULL_REQUEST_COMMENT_INSTANCE_RECORD_TYPE, PULL_REQUEST_COMMENTS_API_NAME,
    PULL_REQUEST_INSTANCE_RECORD_TYPE, PULL_REQUEST_REVIEW_INSTANCE_RECORD_TYPE, PULL_REQUEST_REVIEWS_API_NAME,
    PULL_REQUESTS_API_NAME, REPO_INSTANCE_RECORD_TYPE, REPOSITORIES_API_NAME, TEAM_INSTANCE_RECORD_TYPE,
    TEAM_MEMBER_INSTANCE_RECORD_TYPE, TEAM_MEMBERS_API_NAME, TEAM_REPOSITORIES_API_NAME, TEAM_REPOSITORY_INSTANCE_RECORD_TYPE,
    TEAMS_API_NAME,
};
use crate::model::{Metadata, OnboardingInput, OnboardingType, RecordWithContext, Repository};
use crate::web::ResponseSignature;
use crate::{Outcome, Result, try_outcome};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use ohno::{app_err, bail};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

const LOG_TARGET: &str = "   onboard";

/// After this many issue comments, the listing restarts from the last comment's creation time
pub const ISSUE_COMMENT_RESTART_THRESHOLD: u64 = 40_000;

const ISSUE_COMMENTS_EPOCH: &str = "1960-01-01T01:00:00Z";

/// Backfills everything an organization or a repository exposes.
///
/// Each API is crawled at most once per repository unless the input asks to ignore the
/// completion cache for it.
#[derive(Debug, Clone)]
pub struct OnboardingProcessor {
    collector: Arc<Collector>,
    api: GitHubApi,
    onboarding_cache: Arc<dyn KeyValueCache<OnboardingEntry>>,
    onboarding_queue: Arc<dyn Queue>,
    telemetry: Arc<dyn Telemetry>,
    restart_threshold: u64,
}

impl OnboardingProcessor {
    #[must_use]
    pub fn new(
        collector: Arc<Collector>,
        api: GitHubApi,
        onboarding_cache: Arc<dyn KeyValueCache<OnboardingEntry>>,
        onboarding_queue: Arc<dyn Queue>,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        Self {
            collector,
            api,
            onboarding_cache,
            onboarding_queue,
            telemetry,
            restart_threshold: ISSUE_COMMENT_RESTART_THRESHOLD,
        }
    }

    #[must_use]
    pub fn with_restart_threshold(mut self, threshold: u64) -> Self {
        self.restart_threshold = threshold.max(1);
        self
    }

    /// Crawl every API of the input's organization or repository, returning the records written
    pub async fn process(&self, input: &OnboardingInput) -> Result<Outcome<u64>> {
        let repository = input.to_repository();
        let nodes = match input.onboarding_type {
            OnboardingType::Organization => self.organization_nodes(input, &repository),
            OnboardingType::Repository => {
                if !repository.is_repository_scoped() {
                    bail!("repository onboarding for '{repository}' requires a repository id and name");
                }
                self.repository_nodes(&repository)
            }
        };

        log::info!(target: LOG_TARGET, "Onboarding {} {repository}", input.onboarding_type);

        let mut written = 0;
        for node in nodes {
            written += try_outcome!(self.collect_api(input, &repository, &node).await?);
        }

        Ok(Outcome::Complete(written))
    }

    async fn collect_api(&self, input: &OnboardingInput, repository: &Repository, node: &CollectionNode) -> Result<Outcome<u64>> {
        let api_name = node.api_name();
        let key = OnboardingEntry::key_for(repository, api_name);

        if !input.ignores_cache_for(api_name)
            && let Some(entry) = self.onboarding_cache.retrieve(&key).await?
        {
            log::info!(target: LOG_TARGET, "{repository}: {api_name} already onboarded on {}", entry.entity.onboarded_on);
            self.telemetry.track_event(
                "OnboardingIgnoredApi",
                &[
                    ("ApiName", api_name.to_string()),
                    ("OrganizationId", repository.organization_id().to_string()),
                    ("RepositoryId", repository.repository_id().to_string()),
                    ("OnboardedOn", entry.entity.onboarded_on.to_rfc3339()),
                ],
            );
            return Ok(Outcome::Complete(0));
        }

        for sink in self.collector.sinks() {
            sink.set_output_path_prefix(&repository.output_prefix());
            sink.new_output(node.record_type()).await?;
        }

        let written = try_outcome!(self.collector.process(node).await?);
        log::info!(target: LOG_TARGET, "{repository}: {api_name} yielded {written} records");

        let locator = self.collector.sinks().first().map(|s| s.output_locator()).unwrap_or_default();
        self.onboarding_cache
            .cache(OnboardingEntry::new(repository.clone(), api_name, &locator))
            .await?;

        Ok(Outcome::Complete(written))
    }

    fn organization_nodes(&self, input: &OnboardingInput, organization: &Repository) -> Vec<CollectionNode> {
        let metadata = repository_metadata(organization);
        let members_api = self.api.clone();
        let repos_api = self.api.clone();

        let teams = CollectionNode::for_url(TEAM_INSTANCE_RECORD_TYPE, TEAMS_API_NAME, self.api.organization_teams(organization))
            .with_metadata(metadata.clone())
            .with_metadata_producer(|team| metadata_with("TeamId", team.get("id")))
            .with_children(move |_, _| {
                let members_api = members_api.clone();
                let repos_api = repos_api.clone();
                vec![
                    CollectionNode::new(TEAM_MEMBER_INSTANCE_RECORD_TYPE, TEAM_MEMBERS_API_NAME, move |m| {
                        Ok(members_api.team_members(&metadata_segment(m, "TeamId")?))
                    }),
                    CollectionNode::new(TEAM_REPOSITORY_INSTANCE_RECORD_TYPE, TEAM_REPOSITORIES_API_NAME, move |m| {
                        Ok(repos_api.team_repositories(&metadata_segment(m, "TeamId")?))
                    })
                    .with_allowlist(vec![ResponseSignature::exact(404, "Not Found")]),
                ]
            });

        let repositories = CollectionNode::for_url(
            REPO_INSTANCE_RECORD_TYPE,
            REPOSITORIES_API_NAME,
            self.api.organization_repositories(organization),
        )
        .with_metadata(metadata)
        .with_diverter(Arc::new(RepositoryEnqueuer {
            queue: Arc::clone(&self.onboarding_queue),
            organization: organization.clone(),
            ignore_cache: input.ignore_cache,
            ignore_cache_for_apis: input.ignore_cache_for_apis.clone(),
        }));

        vec![teams, repositories]
    }

    fn repository_nodes(&self, repository: &Repository) -> Vec<CollectionNode> {
        let metadata = repository_metadata(repository);
        let reviews_api = self.api.clone();
        let reviews_repository = repository.clone();

        vec![
            CollectionNode::for_url(COMMIT_INSTANCE_RECORD_TYPE, COMMITS_API_NAME, self.api.commits(repository))
                .with_metadata(metadata.clone())
                .with_allowlist(vec![ResponseSignature::exact(409, "Git Repository is empty.")]),
            CollectionNode::for_url(
                COMMIT_COMMENT_INSTANCE_RECORD_TYPE,
                COMMIT_COMMENTS_API_NAME,
                self.api.commit_comments(repository),
            )
            .with_metadata(metadata.clone()),
            CollectionNode::for_url(PULL_REQUEST_INSTANCE_RECORD_TYPE, PULL_REQUESTS_API_NAME, self.api.pulls(repository))
                .with_metadata(metadata.clone())
                .with_metadata_producer(|pull| {
                    let mut produced = metadata_with("PullNumber", pull.get("number"));
                    let _ = produced.insert("PullRequestId".into(), pull.get("id").cloned().unwrap_or(Value::Null));
                    produced
                })
                .with_children(move |_, _| {
                    let api = reviews_api.clone();
                    let repository = reviews_repository.clone();
                    vec![CollectionNode::new(
                        PULL_REQUEST_REVIEW_INSTANCE_RECORD_TYPE,
                        PULL_REQUEST_REVIEWS_API_NAME,
                        move |m| Ok(api.pull_reviews(&repository, &metadata_segment(m, "PullNumber")?)),
                    )]
                }),
            CollectionNode::for_url(
                PULL_REQUEST_COMMENT_INSTANCE_RECORD_TYPE,
                PULL_REQUEST_COMMENTS_API_NAME,
                self.api.pull_comments(repository),
            )
            .with_metadata(metadata.clone()),
            CollectionNode::for_url(ISSUE_INSTANCE_RECORD_TYPE, ISSUES_API_NAME, self.api.issues(repository)).with_metadata(metadata.clone()),
            issue_comments_node(&self.api, repository, ISSUE_COMMENTS_EPOCH, self.restart_threshold).with_metadata(metadata.clone()),
            CollectionNode::for_url(MILESTONE_INSTANCE_RECORD_TYPE, MILESTONES_API_NAME, self.api.milestones(repository)).with_metadata(metadata),
        ]
    }
}

/// Lists issue comments created since `since`.
///
/// Deep pagination of this listing degrades, so once `threshold` comments have been read the
/// node halts and hands over to a fresh listing starting one second after the last comment.
fn issue_comments_node(api: &GitHubApi, repository: &Repository, since: &str, threshold: u64) -> CollectionNode {
    let seen = Arc::new(AtomicU64::new(0));
    let restarted = Arc::new(AtomicBool::new(false));
    let halted = Arc::clone(&restarted);
    let child_api = api.clone();
    let child_repository = repository.clone();

    CollectionNode::for_url(
        ISSUE_COMMENT_INSTANCE_RECORD_TYPE,
        ISSUE_COMMENTS_API_NAME,
        api.issue_comments(repository, since),
    )
    .with_children(move |comment, _| {
        let count = seen.fetch_add(1, Ordering::Relaxed) + 1;
        if count % threshold != 0 {
            return Vec::new();
        }

        match restart_point(comment) {
            Some(next_since) => {
                log::info!(target: LOG_TARGET, "{child_repository}: restarting issue comments from {next_since} after {count} comments");
                restarted.store(true, Ordering::Relaxed);
                vec![issue_comments_node(&child_api, &child_repository, &next_since, threshold)]
            }
            None => {
                log::warn!(target: LOG_TARGET, "{child_repository}: comment {count} has no usable 'created_at', not restarting");
                Vec::new()
            }
        }
    })
    .with_halt(move |_| halted.load(Ordering::Relaxed))
}

/// One second after the comment's creation time
fn restart_point(comment: &Value) -> Option<String> {
    let created_at = comment.get("created_at")?.as_str()?;
    let created_at = DateTime::parse_from_rfc3339(created_at).ok()?.with_timezone(&Utc);
    Some((created_at + TimeDelta::seconds(1)).to_rfc3339_opts(SecondsFormat::Secs, true))
}

fn metadata_with(key: &str, value: Option<&Value>) -> Metadata {
    let mut metadata = Metadata::new();
    let _ = metadata.insert(key.into(), value.cloned().unwrap_or(Value::Null));
    metadata
}

/// Turns each repository of an organization into a repository onboarding request
#[derive(Debug)]
struct RepositoryEnqueuer {
    queue: Arc<dyn Queue>,
    organization: Repository,
    ignore_cache: bool,
    ignore_cache_for_apis: Vec<String>,
}

#[async_trait]
impl RecordDiverter for RepositoryEnqueuer {
    async fn process_record(&self, record: &Value, _metadata: &Metadata) -> Result<Vec<RecordWithContext>> {
        let repository_id = record
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| app_err!("repository of '{}' without an id", self.organization))?;
        let repository_name = record
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| app_err!("repository {repository_id} of '{}' without a name", self.organization))?;

        let repository = Repository::new(
            self.organization.organization_id(),
            self.organization.organization_login(),
            repository_id,
            repository_name,
        );

        let mut input = OnboardingInput::for_repository(&repository);
        input.ignore_cache = self.ignore_cache;
        input.ignore_cache_for_apis.clone_from(&self.ignore_cache_for_apis);

        log::debug!(target: LOG_TARGET, "Queueing onboarding of {repository}");
        put_object(self.queue.as_ref(), &input, None).await?;
        Ok(Vec::new())
    }
}
