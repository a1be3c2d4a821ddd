use crate::model::Repository;

/// Page size for comment listings; the issue comment restart threshold must be a multiple of it
pub const COMMENTS_PER_PAGE: u64 = 50;

/// URL builder for the REST endpoints the processors crawl
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitHubApi {
    base_url: String,
}

impl GitHubApi {
    /// `scheme://domain`, e.g. `https://api.github.com`
    #[must_use]
    pub fn new(scheme: &str, domain: &str) -> Self {
        Self::from_base_url(format!("{scheme}://{domain}"))
    }

    #[must_use]
    pub fn from_base_url(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn rate_limit(&self) -> String {
        format!("{}/rate_limit", self.base_url)
    }

    #[must_use]
    pub fn organization(&self, repository: &Repository) -> String {
        format!("{}/orgs/{}", self.base_url, repository.organization_login())
    }

    #[must_use]
    pub fn repository(&self, repository: &Repository) -> String {
        format!(
            "{}/repos/{}/{}",
            self.base_url,
            repository.organization_login(),
            repository.repository_name()
        )
    }

    #[must_use]
    pub fn team(&self, team_id: &str) -> String {
        format!("{}/teams/{team_id}", self.base_url)
    }

    #[must_use]
    pub fn commit(&self, repository: &Repository, sha: &str) -> String {
        format!("{}/commits/{sha}", self.repository(repository))
    }

    /// One page of the repository's event timeline
    #[must_use]
    pub fn events(&self, repository: &Repository, page: u32) -> String {
        format!("{}/events?page={page}", self.repository(repository))
    }

    #[must_use]
    pub fn organization_teams(&self, repository: &Repository) -> String {
        format!("{}/teams", self.organization(repository))
    }

    #[must_use]
    pub fn organization_repositories(&self, repository: &Repository) -> String {
        format!("{}/repos", self.organization(repository))
    }

    #[must_use]
    pub fn team_members(&self, team_id: &str) -> String {
        format!("{}/members", self.team(team_id))
    }

    #[must_use]
    pub fn team_repositories(&self, team_id: &str) -> String {
        format!("{}/repos", self.team(team_id))
    }

    #[must_use]
    pub fn commits(&self, repository: &Repository) -> String {
        format!("{}/commits", self.repository(repository))
    }

    #[must_use]
    pub fn commit_comments(&self, repository: &Repository) -> String {
        format!("{}/comments?per_page={COMMENTS_PER_PAGE}", self.repository(repository))
    }

    #[must_use]
    pub fn pulls(&self, repository: &Repository) -> String {
        format!("{}/pulls?state=all", self.repository(repository))
    }

    #[must_use]
    pub fn pull_reviews(&self, repository: &Repository, pull_number: &str) -> String {
        format!("{}/pulls/{pull_number}/reviews", self.repository(repository))
    }

    #[must_use]
    pub fn pull_comments(&self, repository: &Repository) -> String {
        format!("{}/pulls/comments?per_page={COMMENTS_PER_PAGE}", self.repository(repository))
    }

    #[must_use]
    pub fn issues(&self, repository: &Repository) -> String {
        format!("{}/issues?state=all", self.repository(repository))
    }

    /// Issue comments created at or after `since`, oldest first
    #[must_use]
    pub fn issue_comments(&self, repository: &Repository, since: &str) -> String {
        format!(
            "{}/issues/comments?since={since}&sort=created&per_page={COMMENTS_PER_PAGE}",
            self.repository(repository)
        )
    }

    #[must_use]
    pub fn milestones(&self, repository: &Repository) -> String {
        format!("{}/milestones?state=all", self.repository(repository))
    }

    /// `kind` is one of `popular/referrers`, `popular/paths`, `views` or `clones`
    #[must_use]
    pub fn traffic(&self, repository: &Repository, kind: &str) -> String {
        format!("{}/traffic/{kind}", self.repository(repository))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_urls() {
        let api = GitHubApi::new("https", "api.github.com");
        let repo = Repository::new(1, "contoso", 2, "widgets");

        assert_eq!(api.rate_limit(), "https://api.github.com/rate_limit");
        assert_eq!(api.organization(&repo), "https://api.github.com/orgs/contoso");
        assert_eq!(api.commit(&repo, "abc"), "https://api.github.com/repos/contoso/widgets/commits/abc");
        assert_eq!(api.events(&repo, 3), "https://api.github.com/repos/contoso/widgets/events?page=3");
        assert_eq!(api.team("9"), "https://api.github.com/teams/9");
        assert_eq!(
            api.issue_comments(&repo, "1960-01-01T01:00:00Z"),
            "https://api.github.com/repos/contoso/widgets/issues/comments?since=1960-01-01T01:00:00Z&sort=created&per_page=50"
        );
        assert_eq!(
            api.traffic(&repo, "popular/paths"),
            "https://api.github.com/repos/contoso/widgets/traffic/popular/paths"
        );
    }

    #[test]
    fn test_trailing_slash_is_trimmed() {
        assert_eq!(GitHubApi::from_base_url("http://127.0.0.1:8080/").base_url(), "http://127.0.0.1:8080");
    }
}
