use crate::Result;
use ohno::IntoAppError;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A non-success response that callers treat as "no data" instead of a failure.
///
/// Matches when the status is equal and the body's `$.message` matches the pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResponseSignature {
    status: u16,
    #[serde(serialize_with = "serialize_regex", deserialize_with = "deserialize_regex")]
    message: Regex,
}

impl ResponseSignature {
    /// Signature whose message must equal `message` exactly
    #[must_use]
    pub fn exact(status: u16, message: &str) -> Self {
        let pattern = format!("^{}$", regex::escape(message));
        let message = Regex::new(&pattern).unwrap_or_else(|_| unreachable!("escaped literals always compile"));
        Self { status, message }
    }

    /// Signature whose message must match the given regular expression
    pub fn matching(status: u16, pattern: &str) -> Result<Self> {
        let message = Regex::new(pattern).into_app_err_with(|| format!("invalid response message pattern '{pattern}'"))?;
        Ok(Self { status, message })
    }

    #[must_use]
    pub const fn status(&self) -> u16 {
        self.status
    }

    #[must_use]
    pub fn pattern(&self) -> &str {
        self.message.as_str()
    }

    #[must_use]
    pub fn matches(&self, status: u16, message: Option<&str>) -> bool {
        status == self.status && message.is_some_and(|m| self.message.is_match(m))
    }
}

impl PartialEq for ResponseSignature {
    fn eq(&self, other: &Self) -> bool {
        self.status == other.status && self.message.as_str() == other.message.as_str()
    }
}

fn serialize_regex<S: Serializer>(regex: &Regex, serializer: S) -> core::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(regex.as_str())
}

fn deserialize_regex<'de, D: Deserializer<'de>>(deserializer: D) -> core::result::Result<Regex, D::Error> {
    let pattern = String::deserialize(deserializer)?;
    Regex::new(&pattern).map_err(serde::de::Error::custom)
}
