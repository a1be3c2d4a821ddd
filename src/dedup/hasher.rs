use super::sha256_hex;
use crate::Result;
use crate::io::Telemetry;
use crate::model::Repository;
use ohno::{IntoAppError, app_err};
use serde::Serialize;
use serde_json::{Map, Value};

/// Canonical form of a push, shared by the webhook and timeline shapes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Push<'a> {
    pub repository: &'a Repository,
    pub before_commit_sha: &'a str,
    pub after_commit_sha: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Strategy {
    /// Hash the payload after removing excluded paths
    Json { mandatory: Vec<String>, optional: Vec<String> },

    /// Hash a [`Push`] built from `$.before` and the given after-SHA property
    Push { after_property: &'static str },
}

/// Reduces one payload shape to a digest comparable with the other shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hasher {
    strategy: Strategy,
}

impl Hasher {
    #[must_use]
    pub const fn json(mandatory: Vec<String>, optional: Vec<String>) -> Self {
        Self {
            strategy: Strategy::Json { mandatory, optional },
        }
    }

    /// Hash the payload as-is
    #[must_use]
    pub const fn identity() -> Self {
        Self::json(Vec::new(), Vec::new())
    }

    #[must_use]
    pub const fn push(after_property: &'static str) -> Self {
        Self {
            strategy: Strategy::Push { after_property },
        }
    }

    /// Replace the optional exclusion set; push hashers are unaffected
    #[must_use]
    pub fn with_optional_exclusions(mut self, exclusions: Vec<String>) -> Self {
        if let Strategy::Json { optional, .. } = &mut self.strategy {
            *optional = exclusions;
        }
        self
    }

    #[must_use]
    pub fn mandatory_exclusions(&self) -> &[String] {
        match &self.strategy {
            Strategy::Json { mandatory, .. } => mandatory,
            Strategy::Push { .. } => &[],
        }
    }

    #[must_use]
    pub fn optional_exclusions(&self) -> &[String] {
        match &self.strategy {
            Strategy::Json { optional, .. } => optional,
            Strategy::Push { .. } => &[],
        }
    }

    /// Lowercase hex SHA-256 of the normalized payload
    pub fn compute(&self, payload: &Value, repository: &Repository, telemetry: &dyn Telemetry) -> Result<String> {
        match &self.strategy {
            Strategy::Json { mandatory, optional } => {
                let mut clone = payload.clone();

                for path in mandatory {
                    if !remove_path(&mut clone, path) {
                        telemetry.track_event(
                            "ExcludedAttributeDetails",
                            &[
                                ("AttributePath", path.clone()),
                                ("Required", "true".into()),
                                ("Exists", "false".into()),
                            ],
                        );
                    }
                }

                for path in optional {
                    let existed = remove_path(&mut clone, path);
                    telemetry.track_event(
                        "ExcludedAttributeDetails",
                        &[
                            ("AttributePath", path.clone()),
                            ("Required", "false".into()),
                            ("Exists", existed.to_string()),
                        ],
                    );
                }

                let serialized = serde_json::to_vec(&canonicalize(&clone)).into_app_err("serializing payload for hashing")?;
                Ok(sha256_hex(&serialized))
            }

            Strategy::Push { after_property } => {
                let push = Push {
                    repository,
                    before_commit_sha: required_str(payload, "before")?,
                    after_commit_sha: required_str(payload, after_property)?,
                };
                let serialized = serde_json::to_vec(&push).into_app_err("serializing push for hashing")?;
                Ok(sha256_hex(&serialized))
            }
        }
    }
}

fn required_str<'a>(payload: &'a Value, property: &str) -> Result<&'a str> {
    payload
        .get(property)
        .and_then(Value::as_str)
        .ok_or_else(|| app_err!("push payload is missing the string property '$.{property}'"))
}

/// Remove the property a dotted `$.a.b.c` path points at; returns whether it existed
pub fn remove_path(value: &mut Value, path: &str) -> bool {
    let segments: Vec<&str> = path.trim_start_matches('$').split('.').filter(|s| !s.is_empty()).collect();
    let Some((last, parents)) = segments.split_last() else {
        return false;
    };

    let mut current = value;
    for segment in parents {
        match current.get_mut(*segment) {
            Some(next) => current = next,
            None => return false,
        }
    }

    current.as_object_mut().is_some_and(|object| object.remove(*last).is_some())
}

/// Rebuild the value with object keys sorted at every level
#[must_use]
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(object) => {
            let mut keys: Vec<&String> = object.keys().collect();
            keys.sort();
            let mut sorted = Map::with_capacity(object.len());
            for key in keys {
                let _ = sorted.insert(key.clone(), canonicalize(&object[key.as_str()]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
