use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 18790;
pub const DEFAULT_BIND: &str = "127.0.0.1";
/// Concurrent dispatches per sub-batch; bounds outbound mail calls and DB writes.
pub const DEFAULT_SUB_BATCH_SIZE: usize = 5;
/// At or below this many active subscriptions the invocation runs in-process.
pub const DEFAULT_LOCAL_THRESHOLD: usize = 100;
pub const DEFAULT_MAX_REPORTED_FAILURES: usize = 20;
pub const DEFAULT_FETCH_ATTEMPTS: u32 = 3;
pub const DEFAULT_FETCH_BACKOFF_MS: u64 = 250;
pub const DEFAULT_WORKER_TIMEOUT_SECS: u64 = 25;

/// Top-level config (drip.toml + DRIP_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DripConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub mail: MailConfig,
    #[serde(default)]
    pub packs: PacksConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_sub_batch_size")]
    pub sub_batch_size: usize,
    #[serde(default = "default_local_threshold")]
    pub local_threshold: usize,
    #[serde(default = "default_max_reported_failures")]
    pub max_reported_failures: usize,
    #[serde(default = "default_fetch_attempts")]
    pub fetch_attempts: u32,
    /// First retry delay; doubles on each further attempt.
    #[serde(default = "default_fetch_backoff_ms")]
    pub fetch_backoff_ms: u64,
    /// Elapsed-time acceleration for demos: due after N minutes, cron ignored.
    pub step_minutes_override: Option<u32>,
    /// Base URL of the worker pool. Without it, large populations run locally.
    pub worker_url: Option<String>,
    #[serde(default = "default_worker_timeout_secs")]
    pub worker_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sub_batch_size: DEFAULT_SUB_BATCH_SIZE,
            local_threshold: DEFAULT_LOCAL_THRESHOLD,
            max_reported_failures: DEFAULT_MAX_REPORTED_FAILURES,
            fetch_attempts: DEFAULT_FETCH_ATTEMPTS,
            fetch_backoff_ms: DEFAULT_FETCH_BACKOFF_MS,
            step_minutes_override: None,
            worker_url: None,
            worker_timeout_secs: DEFAULT_WORKER_TIMEOUT_SECS,
        }
    }
}

/// Bearer tokens guarding the trigger and worker endpoints.
///
/// An unset token leaves the endpoint open; only do that on a private network.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    pub trigger_token: Option<String>,
    pub worker_token: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailProvider {
    /// Log rendered messages instead of sending them.
    #[default]
    Log,
    /// POST to a transactional-email HTTP API.
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    #[serde(default)]
    pub provider: MailProvider,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    #[serde(default = "default_from")]
    pub from: String,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            provider: MailProvider::Log,
            endpoint: None,
            api_key: None,
            from: default_from(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacksConfig {
    /// Directory of `*.toml` pack files loaded once at startup.
    #[serde(default = "default_packs_dir")]
    pub dir: String,
}

impl Default for PacksConfig {
    fn default() -> Self {
        Self {
            dir: default_packs_dir(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.drip/drip.db", home)
}
fn default_sub_batch_size() -> usize {
    DEFAULT_SUB_BATCH_SIZE
}
fn default_local_threshold() -> usize {
    DEFAULT_LOCAL_THRESHOLD
}
fn default_max_reported_failures() -> usize {
    DEFAULT_MAX_REPORTED_FAILURES
}
fn default_fetch_attempts() -> u32 {
    DEFAULT_FETCH_ATTEMPTS
}
fn default_fetch_backoff_ms() -> u64 {
    DEFAULT_FETCH_BACKOFF_MS
}
fn default_worker_timeout_secs() -> u64 {
    DEFAULT_WORKER_TIMEOUT_SECS
}
fn default_from() -> String {
    "Drip <drip@localhost>".to_string()
}
fn default_packs_dir() -> String {
    "packs".to_string()
}

impl DripConfig {
    /// Load config from a TOML file with DRIP_* env var overrides.
    ///
    /// Nested keys use a double underscore: `DRIP_SCHEDULER__LOCAL_THRESHOLD=50`.
    /// A missing file is fine; every section has defaults.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Self::figment(&path)
            .extract()
            .map_err(|e| crate::error::DripError::Config(e.to_string()))
    }

    fn figment(path: &str) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("DRIP_").split("__"))
    }

    /// Sanity checks that serde defaults cannot express.
    pub fn validate(&self) -> crate::error::Result<()> {
        use crate::error::DripError;

        if self.scheduler.sub_batch_size == 0 {
            return Err(DripError::Config(
                "scheduler.sub_batch_size must be at least 1".to_string(),
            ));
        }
        if self.scheduler.local_threshold == 0 {
            return Err(DripError::Config(
                "scheduler.local_threshold must be at least 1".to_string(),
            ));
        }
        if self.scheduler.fetch_attempts == 0 {
            return Err(DripError::Config(
                "scheduler.fetch_attempts must be at least 1".to_string(),
            ));
        }
        if self.mail.provider == MailProvider::Http && self.mail.endpoint.is_none() {
            return Err(DripError::Config(
                "mail.endpoint is required when mail.provider = \"http\"".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.drip/drip.toml", home)
}
