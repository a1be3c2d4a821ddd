//! Runtime configuration.
//!
//! The configuration is read from TOML, YAML or JSON, picked by file extension. Without an
//! explicit path, `ghcollect.{toml,yml,yaml,json}` in the working directory is used if present,
//! and the built-in defaults otherwise. The defaults live in `default_config.toml`, which the
//! build script validates.

use crate::Result;
use camino::{Utf8Path, Utf8PathBuf};
use ohno::{IntoAppError, app_err, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;

/// The default configuration, embedded from `default_config.toml`
pub const DEFAULT_CONFIG_TOML: &str = include_str!("../../default_config.toml");

/// Comment listings are paged at this size; the restart threshold must land on a page boundary
const COMMENT_PAGE_SIZE: u64 = 50;

/// GitHub serves at most this many pages of a repository's event timeline
const MAX_TIMELINE_PAGES: u32 = 10;

/// Quota policy of one flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FlowPolicy {
    /// Usage percentage above which the flow is throttled
    pub threshold: u8,

    /// Give up and ask to be rescheduled instead of waiting for quota
    #[serde(default)]
    pub throw_on_rate_limit: bool,
}

impl FlowPolicy {
    const fn new(threshold: u8, throw_on_rate_limit: bool) -> Self {
        Self {
            threshold,
            throw_on_rate_limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Flows {
    #[serde(default = "default_webhook_policy")]
    pub webhook: FlowPolicy,

    #[serde(default = "default_delta_policy")]
    pub delta: FlowPolicy,

    #[serde(default = "default_onboarding_policy")]
    pub onboarding: FlowPolicy,

    #[serde(default = "default_point_policy")]
    pub point: FlowPolicy,

    #[serde(default = "default_traffic_policy")]
    pub traffic: FlowPolicy,
}

impl Flows {
    fn iter(&self) -> impl Iterator<Item = (&'static str, &FlowPolicy)> {
        [
            ("webhook", &self.webhook),
            ("delta", &self.delta),
            ("onboarding", &self.onboarding),
            ("point", &self.point),
            ("traffic", &self.traffic),
        ]
        .into_iter()
    }
}

impl Default for Flows {
    fn default() -> Self {
        Self {
            webhook: default_webhook_policy(),
            delta: default_delta_policy(),
            onboarding: default_onboarding_policy(),
            point: default_point_policy(),
            traffic: default_traffic_policy(),
        }
    }
}

const fn default_webhook_policy() -> FlowPolicy {
    FlowPolicy::new(99, false)
}

const fn default_delta_policy() -> FlowPolicy {
    FlowPolicy::new(85, false)
}

const fn default_onboarding_policy() -> FlowPolicy {
    FlowPolicy::new(50, false)
}

const fn default_point_policy() -> FlowPolicy {
    FlowPolicy::new(80, true)
}

const fn default_traffic_policy() -> FlowPolicy {
    FlowPolicy::new(85, false)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Hashing {
    /// Event type to the optional exclusion paths that replace the built-in ones
    #[serde(default)]
    pub optional_exclusions: BTreeMap<String, Vec<String>>,
}

/// Selects how requests are authenticated when no personal access token is given
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Auth {
    /// Program and leading arguments that print an installation token for the organization
    /// appended as the last argument; empty to use `GITHUB_TOKEN`
    #[serde(default)]
    pub token_command: Vec<String>,

    /// Installation tokens are replaced this long before they expire
    #[serde(default = "default_refresh_margin_secs")]
    pub refresh_margin_secs: u64,

    /// Time allowed for one run of `token_command`
    #[serde(default = "default_token_command_timeout_secs")]
    pub token_command_timeout_secs: u64,
}

const fn default_refresh_margin_secs() -> u64 {
    15 * 60
}

const fn default_token_command_timeout_secs() -> u64 {
    30
}

impl Default for Auth {
    fn default() -> Self {
        Self {
            token_command: Vec::new(),
            refresh_margin_secs: default_refresh_margin_secs(),
            token_command_timeout_secs: default_token_command_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_api_domain")]
    pub api_domain: String,

    #[serde(default = "default_scheme")]
    pub scheme: String,

    #[serde(default)]
    pub per_organization_quota: bool,

    #[serde(default = "default_usage_probe_interval_secs")]
    pub usage_probe_interval_secs: u64,

    #[serde(default = "default_event_count_limit")]
    pub event_count_limit: u32,

    #[serde(default = "default_point_collection_freshness_secs")]
    pub point_collection_freshness_secs: u64,

    #[serde(default = "default_timeline_max_pages")]
    pub timeline_max_pages: u32,

    #[serde(default = "default_issue_comment_restart_threshold")]
    pub issue_comment_restart_threshold: u64,

    #[serde(default = "default_product_name")]
    pub product_name: String,

    #[serde(default = "default_product_version")]
    pub product_version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<Utf8PathBuf>,

    #[serde(default)]
    pub auth: Auth,

    #[serde(default)]
    pub flows: Flows,

    #[serde(default)]
    pub hashing: Hashing,
}

fn default_api_domain() -> String {
    "api.github.com".into()
}

fn default_scheme() -> String {
    "https".into()
}

const fn default_usage_probe_interval_secs() -> u64 {
    60
}

const fn default_event_count_limit() -> u32 {
    100
}

const fn default_point_collection_freshness_secs() -> u64 {
    300
}

const fn default_timeline_max_pages() -> u32 {
    MAX_TIMELINE_PAGES
}

const fn default_issue_comment_restart_threshold() -> u64 {
    40_000
}

fn default_product_name() -> String {
    "ghcollect".into()
}

fn default_product_version() -> String {
    env!("CARGO_PKG_VERSION").into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_domain: default_api_domain(),
            scheme: default_scheme(),
            per_organization_quota: false,
            usage_probe_interval_secs: default_usage_probe_interval_secs(),
            event_count_limit: default_event_count_limit(),
            point_collection_freshness_secs: default_point_collection_freshness_secs(),
            timeline_max_pages: default_timeline_max_pages(),
            issue_comment_restart_threshold: default_issue_comment_restart_threshold(),
            product_name: default_product_name(),
            product_version: default_product_version(),
            state_dir: None,
            auth: Auth::default(),
            flows: Flows::default(),
            hashing: Hashing::default(),
        }
    }
}

impl Config {
    /// Load the configuration and return it with any non-fatal warnings.
    ///
    /// `config_path` wins; otherwise `ghcollect.{toml,yml,yaml,json}` under `dir` is tried, and
    /// the defaults are used when none exists.
    pub fn load(dir: &Utf8Path, config_path: Option<&Utf8PathBuf>) -> Result<(Self, Vec<String>)> {
        let (final_path, text) = if let Some(path) = config_path {
            let text = fs::read_to_string(path).into_app_err_with(|| format!("reading configuration from {path}"))?;
            (path.clone(), text)
        } else {
            let candidates = ["toml", "yml", "yaml", "json"].map(|ext| dir.join(format!("ghcollect.{ext}")));

            let mut found = None;
            for path in &candidates {
                match fs::read_to_string(path) {
                    Ok(text) => {
                        found = Some((path.clone(), text));
                        break;
                    }
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e).into_app_err_with(|| format!("reading configuration from {path}")),
                }
            }

            let Some(result) = found else {
                return Ok((Self::default(), Vec::new()));
            };
            result
        };

        let config = Self::parse(&final_path, &text)?;
        let warnings = config.validate().into_app_err_with(|| format!("validating configuration from {final_path}"))?;
        Ok((config, warnings))
    }

    fn parse(path: &Utf8Path, text: &str) -> Result<Self> {
        let extension = path.extension().unwrap_or_default();
        let config = match extension {
            "toml" => toml::from_str(text).into_app_err_with(|| format!("parsing TOML configuration from {path}"))?,
            "yml" | "yaml" => serde_yaml::from_str(text).into_app_err_with(|| format!("parsing YAML configuration from {path}"))?,
            "json" => serde_json::from_str(text).into_app_err_with(|| format!("parsing JSON configuration from {path}"))?,
            _ => return Err(app_err!("unsupported configuration file extension: {extension}")),
        };
        Ok(config)
    }

    /// Reject settings no flow can run with; return warnings for suspicious ones
    pub fn validate(&self) -> Result<Vec<String>> {
        if self.api_domain.trim().is_empty() {
            bail!("api_domain must not be empty");
        }

        if self.scheme != "https" && self.scheme != "http" {
            bail!("scheme must be 'https' or 'http', not '{}'", self.scheme);
        }

        for (flow, policy) in self.flows.iter() {
            if policy.threshold > 100 {
                bail!("flows.{flow}.threshold must be between 0 and 100, not {}", policy.threshold);
            }
        }

        if self.issue_comment_restart_threshold == 0 || self.issue_comment_restart_threshold % COMMENT_PAGE_SIZE != 0 {
            bail!(
                "issue_comment_restart_threshold must be a positive multiple of {COMMENT_PAGE_SIZE}, not {}",
                self.issue_comment_restart_threshold
            );
        }

        if self.timeline_max_pages == 0 {
            bail!("timeline_max_pages must be at least 1");
        }

        if self.auth.token_command.first().is_some_and(|program| program.trim().is_empty()) {
            bail!("auth.token_command must start with a program name");
        }

        if !self.auth.token_command.is_empty() && self.auth.token_command_timeout_secs == 0 {
            bail!("auth.token_command_timeout_secs must be at least 1");
        }

        let mut warnings = Vec::new();

        for (flow, policy) in self.flows.iter() {
            if policy.threshold == 100 {
                warnings.push(format!("flows.{flow}.threshold is 100, so the {flow} flow is never throttled"));
            }
        }

        if self.timeline_max_pages > MAX_TIMELINE_PAGES {
            warnings.push(format!(
                "timeline_max_pages is {}, but only {MAX_TIMELINE_PAGES} pages of events are ever served",
                self.timeline_max_pages
            ));
        }

        // installation tokens live for an hour
        if !self.auth.token_command.is_empty() && self.auth.refresh_margin_secs >= 3600 {
            warnings.push(format!(
                "auth.refresh_margin_secs is {}, so a new installation token is issued for every request",
                self.auth.refresh_margin_secs
            ));
        }

        if !self.auth.token_command.is_empty() && !self.per_organization_quota {
            warnings.push("auth.token_command is set, but quota is tracked under one shared scope; consider per_organization_quota".into());
        }

        for (event_type, paths) in &self.hashing.optional_exclusions {
            if let Some(path) = paths.iter().find(|p| !p.starts_with("$.")) {
                warnings.push(format!("hashing.optional_exclusions.{event_type}: '{path}' is not a '$.'-rooted path"));
            }
        }

        Ok(warnings)
    }

    /// Write this configuration in the format implied by the extension of `output_path`
    pub fn save(&self, output_path: &Utf8Path) -> Result<()> {
        let extension = output_path.extension().unwrap_or_default();
        let text = match extension {
            "toml" => toml::to_string_pretty(self)
                .into_app_err_with(|| format!("serializing configuration to TOML for saving to {output_path}"))?,
            "yml" | "yaml" => serde_yaml::to_string(self)
                .into_app_err_with(|| format!("serializing configuration to YAML for saving to {output_path}"))?,
            "json" => serde_json::to_string_pretty(self)
                .into_app_err_with(|| format!("serializing configuration to JSON for saving to {output_path}"))?,
            _ => return Err(app_err!("unsupported configuration file extension: {extension}")),
        };

        fs::write(output_path, text).into_app_err_with(|| format!("writing configuration to {output_path}"))?;
        Ok(())
    }

    /// Write the default configuration, keeping its comments when the target is TOML
    pub fn save_default(output_path: &Utf8Path) -> Result<()> {
        if output_path.extension() == Some("toml") {
            fs::write(output_path, DEFAULT_CONFIG_TOML).into_app_err_with(|| format!("writing configuration to {output_path}"))?;
            return Ok(());
        }

        Self::default().save(output_path)
    }

    /// `scheme://api_domain`
    #[must_use]
    pub fn api_base_url(&self) -> String {
        format!("{}://{}", self.scheme, self.api_domain)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn utf8_dir(dir: &tempfile::TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap()
    }

    #[test]
    fn test_embedded_default_matches_default() {
        let parsed: Config = toml::from_str(DEFAULT_CONFIG_TOML).unwrap();
        assert_eq!(parsed, Config::default());
        assert!(parsed.validate().unwrap().is_empty());
    }

    #[test]
    fn test_flow_defaults() {
        let config = Config::default();
        assert_eq!(config.flows.webhook.threshold, 99);
        assert_eq!(config.flows.onboarding.threshold, 50);
        assert!(config.flows.point.throw_on_rate_limit);
        assert!(!config.flows.delta.throw_on_rate_limit);
        assert_eq!(config.api_base_url(), "https://api.github.com");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.flows.delta.threshold = 101;
        assert!(config.validate().unwrap_err().to_string().contains("flows.delta.threshold"));

        let mut config = Config::default();
        config.api_domain = " ".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.issue_comment_restart_threshold = 120;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.scheme = "ftp".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.auth.token_command = vec![String::new()];
        assert!(config.validate().unwrap_err().to_string().contains("auth.token_command"));
    }

    #[test]
    fn test_token_command_warnings() {
        let mut config = Config::default();
        config.auth.refresh_margin_secs = 7200;
        assert!(config.validate().unwrap().is_empty(), "margin is irrelevant without a token command");

        config.auth.token_command = vec!["issue-token".into()];
        assert_eq!(config.validate().unwrap().len(), 2);

        config.per_organization_quota = true;
        let warnings = config.validate().unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("refresh_margin_secs"));
    }

    #[test]
    fn test_auth_section_parses() {
        let config: Config = toml::from_str("[auth]\ntoken_command = [\"gh-app-token\", \"--app\", \"7\"]\n").unwrap();
        assert_eq!(config.auth.token_command, ["gh-app-token", "--app", "7"]);
        assert_eq!(config.auth.refresh_margin_secs, 900);
        assert!(toml::from_str::<Config>("[auth]\ncommand = []\n").is_err());
    }

    #[test]
    fn test_validate_warnings() {
        let mut config = Config::default();
        config.flows.webhook.threshold = 100;
        config.timeline_max_pages = 20;
        let _ = config
            .hashing
            .optional_exclusions
            .insert("issues".into(), vec!["changes".into()]);

        assert_eq!(config.validate().unwrap().len(), 3);
    }

    #[test]
    #[cfg_attr(miri, ignore = "Miri cannot call GetTempPathW")]
    fn test_load_without_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let (config, warnings) = Config::load(&utf8_dir(&dir), None).unwrap();
        assert_eq!(config, Config::default());
        assert!(warnings.is_empty());
    }

    #[test]
    #[cfg_attr(miri, ignore = "Miri cannot call GetTempPathW")]
    fn test_load_discovers_partial_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let root = utf8_dir(&dir);
        fs::write(root.join("ghcollect.yaml"), "scheme: http\napi_domain: 127.0.0.1:9000\nflows:\n  delta:\n    threshold: 10\n").unwrap();

        let (config, _) = Config::load(&root, None).unwrap();
        assert_eq!(config.api_base_url(), "http://127.0.0.1:9000");
        assert_eq!(config.flows.delta.threshold, 10);
        assert_eq!(config.flows.webhook.threshold, 99);
    }

    #[test]
    #[cfg_attr(miri, ignore = "Miri cannot call GetTempPathW")]
    fn test_save_and_reload_each_format() {
        let dir = tempfile::tempdir().unwrap();
        let root = utf8_dir(&dir);
        let mut config = Config::default();
        config.event_count_limit = 7;
        config.state_dir = Some(root.join("state"));

        for name in ["c.toml", "c.yaml", "c.json"] {
            let path = root.join(name);
            config.save(&path).unwrap();
            let (loaded, _) = Config::load(&root, Some(&path)).unwrap();
            assert_eq!(loaded, config, "{name}");
        }
    }

    #[test]
    #[cfg_attr(miri, ignore = "Miri cannot call GetTempPathW")]
    fn test_save_default_keeps_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = utf8_dir(&dir).join("ghcollect.toml");
        Config::save_default(&path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), DEFAULT_CONFIG_TOML);
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        assert!(toml::from_str::<Config>("api_domian = \"x\"").is_err());
        assert!(Config::parse(Utf8Path::new("c.ini"), "").is_err());
    }
}
