use core::fmt::{Display, Formatter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Identifies the repository (or organization) an event belongs to.
///
/// A repository id of 0 together with an empty name denotes an organization-scoped
/// event with no specific repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Repository {
    organization_id: i64,
    repository_id: i64,
    organization_login: Arc<str>,
    repository_name: Arc<str>,
}

impl Repository {
    #[must_use]
    pub fn new(organization_id: i64, organization_login: &str, repository_id: i64, repository_name: &str) -> Self {
        Self {
            organization_id,
            repository_id,
            organization_login: Arc::from(organization_login),
            repository_name: Arc::from(repository_name),
        }
    }

    /// An organization-scoped identity with no specific repository
    #[must_use]
    pub fn organization(organization_id: i64, organization_login: &str) -> Self {
        Self::new(organization_id, organization_login, 0, "")
    }

    #[must_use]
    pub const fn organization_id(&self) -> i64 {
        self.organization_id
    }

    #[must_use]
    pub const fn repository_id(&self) -> i64 {
        self.repository_id
    }

    #[must_use]
    pub fn organization_login(&self) -> &str {
        &self.organization_login
    }

    #[must_use]
    pub fn repository_name(&self) -> &str {
        &self.repository_name
    }

    /// Whether this names an actual repository rather than just an organization
    #[must_use]
    pub fn is_repository_scoped(&self) -> bool {
        self.repository_id != 0 && !self.repository_name.is_empty()
    }

    /// Cache partition key shared by all per-repository entities
    #[must_use]
    pub fn partition_key(&self) -> String {
        format!("{}_{}", self.organization_id, self.repository_id)
    }

    /// Path prefix for record output
    #[must_use]
    pub fn output_prefix(&self) -> String {
        format!("{}/{}", self.organization_id, self.repository_id)
    }
}

impl Display for Repository {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        if self.repository_name.is_empty() {
            write!(f, "{}", self.organization_login)
        } else {
            write!(f, "{}/{}", self.organization_login, self.repository_name)
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_equality_by_value() {
        let a = Repository::new(1, "contoso", 2, "widgets");
        let b = Repository::new(1, "contoso", 2, "widgets");
        assert_eq!(a, b);
        assert_ne!(a, Repository::new(1, "contoso", 3, "widgets"));
    }

    #[test]
    fn test_organization_scope() {
        let org = Repository::organization(7, "contoso");
        assert!(!org.is_repository_scoped());
        assert_eq!(org.partition_key(), "7_0");
        assert_eq!(org.to_string(), "contoso");
    }

    #[test]
    fn test_display_and_keys() {
        let repo = Repository::new(7, "contoso", 42, "widgets");
        assert!(repo.is_repository_scoped());
        assert_eq!(repo.to_string(), "contoso/widgets");
        assert_eq!(repo.partition_key(), "7_42");
        assert_eq!(repo.output_prefix(), "7/42");
    }

    #[test]
    fn test_serializes_with_pascal_case_names() {
        let repo = Repository::new(7, "contoso", 42, "widgets");
        let json = serde_json::to_value(&repo).unwrap();
        assert_eq!(json["OrganizationId"], 7);
        assert_eq!(json["RepositoryName"], "widgets");

        let back: Repository = serde_json::from_value(json).unwrap();
        assert_eq!(back, repo);
    }
}
