use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 9175;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_DISPATCH_TIMEOUT_MS: u64 = 5_000; // one webhook attempt
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 10; // consecutive failures before auto-pause
pub const DEFAULT_HISTORY_RETENTION: usize = 100; // samples kept per job
pub const DEFAULT_MAX_IDLE_SLEEP_SECS: u64 = 3_600; // loop wakes at least hourly
pub const DEFAULT_MAX_CONCURRENT_DISPATCHES: usize = 100;

/// Top-level config (cronhook.toml + CRONHOOK_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CronhookConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
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

/// Tuning knobs for the scheduling engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Deadline for a single webhook POST.
    #[serde(default = "default_dispatch_timeout_ms")]
    pub dispatch_timeout_ms: u64,
    /// A job is paused on the tick after its failure count reaches this value.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Maximum history samples retained per job.
    #[serde(default = "default_history_retention")]
    pub history_retention: usize,
    /// Upper bound on how long the loop sleeps, even with an empty index.
    #[serde(default = "default_max_idle_sleep_secs")]
    pub max_idle_sleep_secs: u64,
    /// Global cap on in-flight webhook requests.
    #[serde(default = "default_max_concurrent_dispatches")]
    pub max_concurrent_dispatches: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            dispatch_timeout_ms: default_dispatch_timeout_ms(),
            failure_threshold: default_failure_threshold(),
            history_retention: default_history_retention(),
            max_idle_sleep_secs: default_max_idle_sleep_secs(),
            max_concurrent_dispatches: default_max_concurrent_dispatches(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset, e.g. "info" or "debug".
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_dispatch_timeout_ms() -> u64 {
    DEFAULT_DISPATCH_TIMEOUT_MS
}
fn default_failure_threshold() -> u32 {
    DEFAULT_FAILURE_THRESHOLD
}
fn default_history_retention() -> usize {
    DEFAULT_HISTORY_RETENTION
}
fn default_max_idle_sleep_secs() -> u64 {
    DEFAULT_MAX_IDLE_SLEEP_SECS
}
fn default_max_concurrent_dispatches() -> usize {
    DEFAULT_MAX_CONCURRENT_DISPATCHES
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cronhook/cronhook.db", home)
}

impl CronhookConfig {
    /// Load config from a TOML file with CRONHOOK_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `CRONHOOK_SCHEDULER__FAILURE_THRESHOLD=3`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Self::figment(&path)
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))
    }

    fn figment(path: &str) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("CRONHOOK_").split("__"))
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cronhook/cronhook.toml", home)
}
