//! Wiring shared by every collection command.

use camino::Utf8PathBuf;
use chrono::Utc;
use clap::{Args, ValueEnum};
use core::time::Duration;
use directories::ProjectDirs;
use ghcollect::auth::{AnonymousAuth, AuthProvider, CommandTokenSource, InstallationAuth, TokenAuth, TokenCache, TokenSource};
use ghcollect::cache::{CacheEntity, FileCache, KeyValueCache};
use ghcollect::collect::Collector;
use ghcollect::config::{Config, FlowPolicy};
use ghcollect::dedup::HasherFactory;
use ghcollect::io::{DirectoryQueue, JsonLinesSink, LogTelemetry, Queue, RecordSink, Telemetry};
use ghcollect::model::Repository;
use ghcollect::processors::GitHubApi;
use ghcollect::web::{GLOBAL_SCOPE, GitHubClient, GitHubRateLimiter, HttpTransport, ReqwestTransport};
use ghcollect::{Outcome, Result};
use ohno::IntoAppError;
use std::process;
use std::sync::Arc;

/// Exit code asking an external scheduler to run the command again later (`EX_TEMPFAIL`)
pub const EXIT_RETRY_LATER: i32 = 75;

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// No logging output
    None,
    /// Only error messages
    Error,
    /// Warning and error messages
    Warn,
    /// Info, warning, and error messages
    Info,
    /// Debug and above messages
    Debug,
    /// All messages including trace
    Trace,
}

/// Arguments shared by every collection command
#[derive(Args, Debug)]
pub struct CommonArgs {
    /// GitHub personal access token; requests are anonymous without one unless `auth.token_command` is configured
    #[arg(long, value_name = "TOKEN", env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// Path to configuration file [default: one of ghcollect.[toml|yml|yaml|json] ]
    #[arg(long, short = 'c', value_name = "PATH")]
    pub config: Option<Utf8PathBuf>,

    /// Directory holding caches, queues and collected records [default: platform data directory]
    #[arg(long, value_name = "PATH")]
    pub state_dir: Option<Utf8PathBuf>,

    /// Set the logging level for diagnostic output
    #[arg(long, value_name = "LEVEL", default_value = "warn", global = true)]
    pub log_level: LogLevel,
}

/// Repository coordinates given on the command line
#[derive(Args, Debug, Clone)]
pub struct RepositoryArgs {
    /// Organization login
    #[arg(long, value_name = "LOGIN")]
    pub org: String,

    /// Organization id
    #[arg(long, value_name = "ID")]
    pub org_id: i64,

    /// Repository name
    #[arg(long, value_name = "NAME")]
    pub repo: String,

    /// Repository id
    #[arg(long, value_name = "ID")]
    pub repo_id: i64,
}

impl RepositoryArgs {
    #[must_use]
    pub fn to_repository(&self) -> Repository {
        Repository::new(self.org_id, &self.org, self.repo_id, &self.repo)
    }
}

/// Process-wide collaborators, built once per command from the configuration
#[derive(Debug)]
pub struct Common {
    pub config: Config,
    pub api: GitHubApi,
    pub telemetry: Arc<dyn Telemetry>,
    auth: Credentials,
    state_dir: Utf8PathBuf,
    transport: Arc<dyn HttpTransport>,
}

impl Common {
    pub fn new(args: &CommonArgs) -> Result<Self> {
        init_logging(args.log_level);

        let (config, warnings) = Config::load(&Utf8PathBuf::from("."), args.config.as_ref())?;
        for warning in &warnings {
            log::warn!("Configuration: {warning}");
        }

        let state_dir = match (&args.state_dir, &config.state_dir) {
            (Some(dir), _) | (None, Some(dir)) => dir.clone(),
            (None, None) => default_state_dir()?,
        };
        log::debug!("Using state directory '{state_dir}'");

        let timeout = Duration::from_secs(config.auth.token_command_timeout_secs);
        let auth = match (CommandTokenSource::from_command_line(&config.auth.token_command, timeout), &args.github_token) {
            (Some(source), github_token) => {
                if github_token.is_some() {
                    log::info!("Using installation tokens from auth.token_command instead of the GitHub token");
                }
                Credentials::Installation {
                    source: Arc::new(source),
                    tokens: Arc::new(TokenCache::new(Duration::from_secs(config.auth.refresh_margin_secs))),
                }
            }
            (None, Some(token)) => Credentials::Shared(Arc::new(TokenAuth::new(config.product_name.as_str(), token.as_str()))),
            (None, None) => {
                log::warn!("No GitHub token provided; requests are subject to the anonymous quota");
                Credentials::Shared(Arc::new(AnonymousAuth::new()))
            }
        };

        let transport = Arc::new(ReqwestTransport::new(&config.product_name, &config.product_version)?);

        Ok(Self {
            api: GitHubApi::new(&config.scheme, &config.api_domain),
            config,
            telemetry: Arc::new(LogTelemetry),
            auth,
            state_dir,
            transport,
        })
    }

    /// File-backed cache for entity `E` under `state_dir/cache`
    pub fn cache<E: CacheEntity>(&self) -> Arc<dyn KeyValueCache<E>> {
        Arc::new(FileCache::<E>::new(self.state_dir.join("cache")))
    }

    /// Queue directory `state_dir/queues/<name>`
    pub fn queue(&self, name: &str) -> Arc<dyn Queue> {
        Arc::new(DirectoryQueue::new(self.state_dir.join("queues"), name))
    }

    pub fn sinks(&self) -> Vec<Arc<dyn RecordSink>> {
        vec![Arc::new(JsonLinesSink::new(self.state_dir.join("output")))]
    }

    pub fn hashers(&self) -> HasherFactory {
        HasherFactory::new(self.config.hashing.optional_exclusions.clone().into_iter().collect())
    }

    /// Client throttled by `policy`, tracking quota under the scope chosen for `organization_login`
    pub fn client(&self, policy: FlowPolicy, organization_login: &str) -> Arc<GitHubClient> {
        Arc::new(self.http_client(policy, organization_login))
    }

    pub fn http_client(&self, policy: FlowPolicy, organization_login: &str) -> GitHubClient {
        let scope = if self.config.per_organization_quota {
            organization_login
        } else {
            GLOBAL_SCOPE
        };

        let limiter = GitHubRateLimiter::new(
            scope,
            self.cache(),
            Arc::clone(&self.transport),
            Arc::clone(&self.telemetry),
            self.api.rate_limit(),
        )
        .with_threshold(policy.threshold)
        .with_throw_on_limit(policy.throw_on_rate_limit)
        .with_probe_interval(Duration::from_secs(self.config.usage_probe_interval_secs));

        GitHubClient::new(Arc::clone(&self.transport), Arc::new(limiter), Arc::clone(&self.telemetry))
            .with_conditional_cache(self.cache())
    }

    /// Credentials for requests made on behalf of `organization_login`
    pub fn auth_for(&self, organization_login: &str) -> Arc<dyn AuthProvider> {
        match &self.auth {
            Credentials::Shared(auth) => Arc::clone(auth),
            Credentials::Installation { source, tokens } => {
                Arc::new(InstallationAuth::new(organization_login, Arc::clone(source), Arc::clone(tokens)))
            }
        }
    }

    pub fn collector(&self, policy: FlowPolicy, organization_login: &str) -> Arc<Collector> {
        self.collector_for(self.client(policy, organization_login), organization_login)
    }

    pub fn collector_for(&self, client: Arc<GitHubClient>, organization_login: &str) -> Arc<Collector> {
        Arc::new(Collector::new(client, self.auth_for(organization_login), self.sinks()))
    }
}

#[derive(Debug)]
enum Credentials {
    /// One provider for every organization
    Shared(Arc<dyn AuthProvider>),

    /// Installation tokens issued per organization
    Installation {
        source: Arc<dyn TokenSource>,
        tokens: Arc<TokenCache>,
    },
}

/// Session identifier for runs that were not given one
pub fn new_session_id() -> String {
    Utc::now().format("%Y%m%dT%H%M%S%.3fZ").to_string()
}

/// Print the result of a flow, or ask to be rescheduled when it ran out of quota
pub fn finish<T>(outcome: Outcome<T>, report: impl FnOnce(T)) {
    match outcome {
        Outcome::Complete(value) => report(value),
        Outcome::RetryAfter(delay) => {
            eprintln!("Rate limit reached; retry in {}s", delay.as_secs());
            process::exit(EXIT_RETRY_LATER);
        }
    }
}

fn default_state_dir() -> Result<Utf8PathBuf> {
    let dirs = ProjectDirs::from("", "", "ghcollect").into_app_err("unable to determine the platform data directory")?;
    Utf8PathBuf::from_path_buf(dirs.data_dir().to_path_buf())
        .map_err(|path| ohno::app_err!("data directory '{}' is not valid UTF-8", path.display()))
}

fn init_logging(log_level: LogLevel) {
    let level = match log_level {
        LogLevel::None => return,
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    };

    let env = env_logger::Env::default().filter_or("RUST_LOG", level);

    env_logger::Builder::from_env(env)
        .format_module_path(false)
        .format_target(matches!(log_level, LogLevel::Debug | LogLevel::Trace))
        .init();
}
