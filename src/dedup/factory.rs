//! Hasher selection by event type.
//!
//! Webhook payloads carry wrapper objects that timeline events lack. Exclusions are layered:
//! organization scope, then repository scope, then whatever is specific to the event type.
//! For every event type, the webhook hasher and the timeline hasher must agree on equivalent
//! payloads.

use super::Hasher;
use std::collections::HashMap;

const ORGANIZATION_MANDATORY: &[&str] = &["$.organization", "$.sender"];
const ORGANIZATION_OPTIONAL: &[&str] = &["$.enterprise"];
const REPOSITORY_MANDATORY: &[&str] = &["$.repository"];

const ISSUE_COMMENT_EXCLUSIONS: &[&str] = &["$.issue.comments", "$.issue.updated_at", "$.issue.state", "$.issue.closed_at"];
const PULL_REQUEST_MANDATORY: &[&str] = &["$.pull_request.rebaseable"];
const PULL_REQUEST_OPTIONAL: &[&str] = &["$.pull_request.head.repo.pushed_at", "$.pull_request.base.repo.pushed_at"];
const FORK_EXCLUSIONS: &[&str] = &["$.forkee.license"];

fn paths(layers: &[&[&str]]) -> Vec<String> {
    layers.iter().flat_map(|layer| layer.iter().map(|p| (*p).to_string())).collect()
}

fn repository_scoped(mandatory: &[&str], optional: &[&str]) -> Hasher {
    Hasher::json(
        paths(&[ORGANIZATION_MANDATORY, REPOSITORY_MANDATORY, mandatory]),
        paths(&[ORGANIZATION_OPTIONAL, optional]),
    )
}

/// Builds hashers for both payload shapes, applying configured optional-exclusion overrides
#[derive(Debug, Clone, Default)]
pub struct HasherFactory {
    optional_overrides: HashMap<String, Vec<String>>,
}

impl HasherFactory {
    /// `optional_overrides` replaces the optional exclusion set for the named event types
    #[must_use]
    pub const fn new(optional_overrides: HashMap<String, Vec<String>>) -> Self {
        Self { optional_overrides }
    }

    /// Hasher for a webhook delivery, selected by the `X-GitHub-Event` name
    #[must_use]
    pub fn payload_hasher(&self, event_type: &str) -> Hasher {
        let hasher = match event_type {
            "push" => return Hasher::push("after"),
            "membership" | "organization" | "project" | "project_card" | "project_column" | "team" => {
                Hasher::json(paths(&[ORGANIZATION_MANDATORY]), paths(&[ORGANIZATION_OPTIONAL]))
            }
            "fork" => repository_scoped(FORK_EXCLUSIONS, &[]),
            "issues" | "issue" => repository_scoped(&[], &["$.changes"]),
            "issue_comment" => repository_scoped(ISSUE_COMMENT_EXCLUSIONS, &[]),
            "pull_request" => repository_scoped(PULL_REQUEST_MANDATORY, PULL_REQUEST_OPTIONAL),
            "commit_comment" => repository_scoped(&["$.action"], &[]),
            _ => repository_scoped(&[], &[]),
        };

        self.apply_override(event_type, hasher)
    }

    /// Hasher for a timeline event payload, selected by the event's `type`
    #[must_use]
    pub fn event_hasher(&self, event_type: &str) -> Hasher {
        let hasher = match event_type {
            "PushEvent" => return Hasher::push("head"),
            "IssueCommentEvent" => Hasher::json(paths(&[ISSUE_COMMENT_EXCLUSIONS]), Vec::new()),
            "PullRequestEvent" => Hasher::json(paths(&[PULL_REQUEST_MANDATORY]), paths(&[PULL_REQUEST_OPTIONAL])),
            "ForkEvent" => Hasher::json(paths(&[FORK_EXCLUSIONS]), Vec::new()),
            _ => Hasher::identity(),
        };

        self.apply_override(event_type, hasher)
    }

    fn apply_override(&self, event_type: &str, hasher: Hasher) -> Hasher {
        match self.optional_overrides.get(event_type) {
            Some(optional) => hasher.with_optional_exclusions(optional.clone()),
            None => hasher,
        }
    }
}
