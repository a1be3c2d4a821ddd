//! Record type and API names shared by every collection flow.
//!
//! Record types route output; API names key the completion cache and telemetry.

pub const ORGANIZATION_INSTANCE_RECORD_TYPE: &str = "GitHub.OrgInstance";
pub const USER_INSTANCE_RECORD_TYPE: &str = "GitHub.UserInstance";
pub const TEAM_MEMBER_INSTANCE_RECORD_TYPE: &str = "GitHub.Teams.MemberInstance";
pub const TEAM_INSTANCE_RECORD_TYPE: &str = "GitHub.Orgs.TeamInstance";
pub const TEAM_REPOSITORY_INSTANCE_RECORD_TYPE: &str = "GitHub.Teams.RepositoryInstance";
pub const REPO_INSTANCE_RECORD_TYPE: &str = "GitHub.Orgs.RepoInstance";
pub const PATH_INSTANCE_RECORD_TYPE: &str = "GitHub.Repos.PathInstance";
pub const VIEW_INSTANCE_RECORD_TYPE: &str = "GitHub.Repos.ViewInstance";
pub const CLONE_INSTANCE_RECORD_TYPE: &str = "GitHub.Repos.CloneInstance";
pub const REFERRER_INSTANCE_RECORD_TYPE: &str = "GitHub.Repos.ReferrerInstance";
pub const MILESTONE_INSTANCE_RECORD_TYPE: &str = "GitHub.Repos.MilestoneInstance";
pub const COMMIT_INSTANCE_RECORD_TYPE: &str = "GitHub.Repos.CommitInstance";
pub const COMMIT_COMMENT_INSTANCE_RECORD_TYPE: &str = "GitHub.Repos.CommentInstance";
pub const PULL_REQUEST_INSTANCE_RECORD_TYPE: &str = "GitHub.Repos.PullInstance";
pub const PULL_REQUEST_REVIEW_INSTANCE_RECORD_TYPE: &str = "GitHub.Repos.Pulls.ReviewsInstance";
pub const PULL_REQUEST_COMMENT_INSTANCE_RECORD_TYPE: &str = "GitHub.Repos.Pulls.CommentInstance";
pub const ISSUE_INSTANCE_RECORD_TYPE: &str = "GitHub.Repos.IssueInstance";
pub const ISSUE_COMMENT_INSTANCE_RECORD_TYPE: &str = "GitHub.Repos.Issues.CommentInstance";

pub const ORGANIZATIONS_API_NAME: &str = "GitHub.Orgs";
pub const USERS_API_NAME: &str = "GitHub.Users";
pub const TEAM_MEMBERS_API_NAME: &str = "GitHub.Teams.Members";
pub const TEAMS_API_NAME: &str = "GitHub.Orgs.Teams";
pub const TEAM_REPOSITORIES_API_NAME: &str = "GitHub.Teams.Repos";
pub const REPOSITORIES_API_NAME: &str = "GitHub.Orgs.Repos";
pub const PATHS_API_NAME: &str = "GitHub.Repos.Paths";
pub const VIEWS_API_NAME: &str = "GitHub.Repos.Views";
pub const CLONES_API_NAME: &str = "GitHub.Repos.Clones";
pub const REFERRERS_API_NAME: &str = "GitHub.Repos.Referrers";
pub const MILESTONES_API_NAME: &str = "GitHub.Repos.Milestones";
pub const COMMIT_API_NAME: &str = "GitHub.Repos.CommitInstance";
pub const COMMITS_API_NAME: &str = "GitHub.Repos.Commits";
pub const COMMIT_COMMENTS_API_NAME: &str = "GitHub.Repos.Comments";
pub const PULL_REQUESTS_API_NAME: &str = "GitHub.Repos.Pulls";
pub const PULL_REQUEST_REVIEWS_API_NAME: &str = "GitHub.Repos.Pulls.Reviews";
pub const PULL_REQUEST_COMMENTS_API_NAME: &str = "GitHub.Repos.Pulls.Comments";
pub const ISSUES_API_NAME: &str = "GitHub.Repos.Issues";
pub const ISSUE_COMMENTS_API_NAME: &str = "GitHub.Repos.Issues.Comments";
pub const EVENTS_API_NAME: &str = "GitHub.Repos.Events";
