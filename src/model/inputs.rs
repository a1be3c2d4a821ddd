//! Work items accepted by the onboarding and point processors.
//!
//! These are the payloads placed on queues, so they serialize with the same
//! PascalCase field names as every other queue message.

use super::record::{Metadata, ResponseShape};
use super::repository::Repository;
use crate::Result;
use crate::web::ResponseSignature;
use ohno::app_err;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display, strum::EnumString)]
pub enum OnboardingType {
    #[default]
    Organization,
    Repository,
}

/// Request to backfill an organization or a single repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OnboardingInput {
    #[serde(default)]
    pub organization_id: i64,
    #[serde(default)]
    pub organization_login: String,
    #[serde(default)]
    pub repository_id: i64,
    #[serde(default)]
    pub repository_name: String,
    #[serde(default)]
    pub ignore_cache: bool,
    #[serde(default)]
    pub onboarding_type: OnboardingType,
    #[serde(default)]
    pub ignore_cache_for_apis: Vec<String>,
}

impl OnboardingInput {
    #[must_use]
    pub fn for_organization(organization_id: i64, organization_login: &str) -> Self {
        Self {
            organization_id,
            organization_login: organization_login.to_string(),
            repository_id: 0,
            repository_name: String::new(),
            ignore_cache: false,
            onboarding_type: OnboardingType::Organization,
            ignore_cache_for_apis: Vec::new(),
        }
    }

    #[must_use]
    pub fn for_repository(repository: &Repository) -> Self {
        Self {
            organization_id: repository.organization_id(),
            organization_login: repository.organization_login().to_string(),
            repository_id: repository.repository_id(),
            repository_name: repository.repository_name().to_string(),
            ignore_cache: false,
            onboarding_type: OnboardingType::Repository,
            ignore_cache_for_apis: Vec::new(),
        }
    }

    #[must_use]
    pub fn to_repository(&self) -> Repository {
        Repository::new(
            self.organization_id,
            &self.organization_login,
            self.repository_id,
            &self.repository_name,
        )
    }

    /// Whether completion-cache entries must be ignored for the given API
    #[must_use]
    pub fn ignores_cache_for(&self, api_name: &str) -> bool {
        self.ignore_cache || self.ignore_cache_for_apis.iter().any(|api| api == api_name)
    }
}

/// Request to fetch a single resource
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PointCollectorInput {
    pub url: String,
    pub record_type: String,
    pub api_name: String,

    /// Must carry `OrganizationId` and `OrganizationLogin`; may carry `RepositoryId` and `RepositoryName`
    #[serde(default)]
    pub context: Metadata,

    #[serde(default = "default_point_response_shape")]
    pub response_type: ResponseShape,

    #[serde(default)]
    pub allowlisted_responses: Vec<ResponseSignature>,

    #[serde(default)]
    pub ignore_cache: bool,

    #[serde(default)]
    pub ignore_cache_for_apis: Vec<String>,
}

const fn default_point_response_shape() -> ResponseShape {
    ResponseShape::Object
}

impl PointCollectorInput {
    #[must_use]
    pub fn new(url: impl Into<String>, record_type: &str, api_name: &str, repository: &Repository) -> Self {
        let mut context = Metadata::new();
        let _ = context.insert("OrganizationId".into(), Value::from(repository.organization_id()));
        let _ = context.insert("OrganizationLogin".into(), Value::from(repository.organization_login()));
        let _ = context.insert("RepositoryId".into(), Value::from(repository.repository_id()));
        let _ = context.insert("RepositoryName".into(), Value::from(repository.repository_name()));

        Self {
            url: url.into(),
            record_type: record_type.to_string(),
            api_name: api_name.to_string(),
            context,
            response_type: ResponseShape::Object,
            allowlisted_responses: Vec::new(),
            ignore_cache: false,
            ignore_cache_for_apis: Vec::new(),
        }
    }

    /// Recover the repository identity from the request context
    pub fn repository(&self) -> Result<Repository> {
        let organization_login = self
            .context
            .get("OrganizationLogin")
            .and_then(Value::as_str)
            .ok_or_else(|| app_err!("point collector request must contain the attribute 'Context.OrganizationLogin'"))?;
        let organization_id = self
            .context
            .get("OrganizationId")
            .and_then(Value::as_i64)
            .ok_or_else(|| app_err!("point collector request must contain the attribute 'Context.OrganizationId'"))?;
        let repository_id = self.context.get("RepositoryId").and_then(Value::as_i64).unwrap_or(0);
        let repository_name = self.context.get("RepositoryName").and_then(Value::as_str).unwrap_or_default();

        Ok(Repository::new(organization_id, organization_login, repository_id, repository_name))
    }

    #[must_use]
    pub fn ignores_cache_for(&self, api_name: &str) -> bool {
        self.ignore_cache || self.ignore_cache_for_apis.iter().any(|api| api == api_name)
    }
}
