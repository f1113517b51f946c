//! Configuration file support for update-schedulerd
//!
//! Loads and validates the daemon configuration from TOML. Every field has a
//! default, so a missing file or a missing section is not an error.
//! Default location: /etc/update-scheduler/update-scheduler.toml

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use update_scheduler_common::RetryPolicy;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/update-scheduler/update-scheduler.toml";

/// Clock configuration (`[scheduler]`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClockConfig {
    /// Reconciliation interval in seconds
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Manual trigger debounce window in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

/// Observer configuration (`[observer]`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObserverConfig {
    /// Upper bound on one snapshot, in seconds
    #[serde(default = "default_observer_timeout_secs")]
    pub timeout_secs: u64,
}

/// Executor configuration (`[executor]`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Maximum actions executing at once
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    /// Maximum actions planned per cycle
    #[serde(default = "default_max_actions_per_cycle")]
    pub max_actions_per_cycle: usize,
}

/// Retry configuration (`[retry]`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per action, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Fraction of each delay that may be randomly cut, 0 to 1
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

/// Desired-state source (`[desired]`)
///
/// `source` selects the variant and defaults to `file` when omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase", from = "RawDesiredSource")]
pub enum DesiredSourceConfig {
    /// YAML document on disk
    File { path: PathBuf },
    /// Hashes in a Redis database
    Redis {
        host: String,
        port: u16,
        db: i64,
        table: String,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum SourceKind {
    #[default]
    File,
    Redis,
}

/// Flat `[desired]` table as written; fields of the other variant are ignored.
#[derive(Debug, Deserialize)]
struct RawDesiredSource {
    #[serde(default)]
    source: SourceKind,
    path: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
    db: Option<i64>,
    table: Option<String>,
}

impl From<RawDesiredSource> for DesiredSourceConfig {
    fn from(raw: RawDesiredSource) -> Self {
        match raw.source {
            SourceKind::File => DesiredSourceConfig::File {
                path: raw.path.unwrap_or_else(default_desired_path),
            },
            SourceKind::Redis => DesiredSourceConfig::Redis {
                host: raw.host.unwrap_or_else(default_redis_host),
                port: raw.port.unwrap_or_else(default_redis_port),
                db: raw.db.unwrap_or_default(),
                table: raw.table.unwrap_or_else(default_redis_table),
            },
        }
    }
}

/// Orchestrator backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Kubernetes-compatible REST API
    Kubernetes,
    /// In-process store (dry runs)
    Memory,
}

/// One object kind the scheduler manages (`[[orchestrator.kinds]]`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindConfig {
    /// Kind name, e.g. "Job"
    pub kind: String,
    /// API group/version, e.g. "batch/v1" or "v1"
    pub api_version: String,
    /// Plural resource name used in URLs, e.g. "jobs"
    pub plural: String,
    #[serde(default = "default_true")]
    pub namespaced: bool,
}

impl KindConfig {
    pub fn new(kind: &str, api_version: &str, plural: &str, namespaced: bool) -> Self {
        Self {
            kind: kind.to_string(),
            api_version: api_version.to_string(),
            plural: plural.to_string(),
            namespaced,
        }
    }
}

/// Orchestrator configuration (`[orchestrator]`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_backend")]
    pub backend: Backend,

    /// API server URL; in-cluster environment is used when unset
    #[serde(default)]
    pub api_server: Option<String>,

    #[serde(default = "default_token_path")]
    pub token_path: PathBuf,

    #[serde(default = "default_ca_cert_path")]
    pub ca_cert_path: PathBuf,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Value of the managed-by label on objects this daemon owns
    #[serde(default = "default_managed_by")]
    pub managed_by: String,

    #[serde(default = "default_kinds")]
    pub kinds: Vec<KindConfig>,

    /// Namespaces to observe (empty = all)
    #[serde(default)]
    pub namespaces: Vec<String>,
}

/// Logging configuration (`[logging]`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

/// Complete update-schedulerd configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub scheduler: ClockConfig,

    #[serde(default)]
    pub observer: ObserverConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub desired: DesiredSourceConfig,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

// Default functions
fn default_interval_secs() -> u64 {
    30
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_observer_timeout_secs() -> u64 {
    10
}

fn default_worker_pool_size() -> usize {
    4
}

fn default_max_actions_per_cycle() -> usize {
    100
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.2
}

fn default_desired_path() -> PathBuf {
    PathBuf::from("/etc/update-scheduler/desired.yaml")
}

fn default_redis_host() -> String {
    "127.0.0.1".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_redis_table() -> String {
    "DESIRED_OBJECT".to_string()
}

fn default_backend() -> Backend {
    Backend::Kubernetes
}

fn default_token_path() -> PathBuf {
    PathBuf::from("/var/run/secrets/kubernetes.io/serviceaccount/token")
}

fn default_ca_cert_path() -> PathBuf {
    PathBuf::from("/var/run/secrets/kubernetes.io/serviceaccount/ca.crt")
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_managed_by() -> String {
    "update-scheduler".to_string()
}

fn default_kinds() -> Vec<KindConfig> {
    vec![
        KindConfig::new("Pod", "v1", "pods", true),
        KindConfig::new("Job", "batch/v1", "jobs", true),
        KindConfig::new("Node", "v1", "nodes", false),
    ]
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

// Default implementations
impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_observer_timeout_secs(),
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: default_worker_pool_size(),
            max_actions_per_cycle: default_max_actions_per_cycle(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

impl Default for DesiredSourceConfig {
    fn default() -> Self {
        DesiredSourceConfig::File {
            path: default_desired_path(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            api_server: None,
            token_path: default_token_path(),
            ca_cert_path: default_ca_cert_path(),
            request_timeout_secs: default_request_timeout_secs(),
            managed_by: default_managed_by(),
            kinds: default_kinds(),
            namespaces: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl RetryConfig {
    /// Builds the executor's retry policy.
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.initial_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
        )
        .with_multiplier(self.multiplier)
        .with_jitter(self.jitter)
    }
}

impl SchedulerConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content).map_err(|e| match e {
                ConfigError::Parse { message, .. } => ConfigError::Parse {
                    path: path.display().to_string(),
                    message,
                },
                other => other,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Logging is not up yet; the level itself comes from this file
                eprintln!(
                    "update-schedulerd: Config file {} not found, using defaults",
                    path.display()
                );
                Ok(Self::default())
            }
            Err(e) => Err(ConfigError::Io {
                path: path.display().to_string(),
                source: e,
            }),
        }
    }

    /// Parse configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: "<string>".to_string(),
            message: e.to_string(),
        })
    }

    /// Reconciliation interval
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.scheduler.interval_secs)
    }

    /// Manual trigger debounce window
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.scheduler.debounce_ms)
    }

    /// Observer snapshot timeout
    pub fn observer_timeout(&self) -> Duration {
        Duration::from_secs(self.observer.timeout_secs)
    }

    /// Orchestrator request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.orchestrator.request_timeout_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.interval_secs == 0 {
            return Err(ConfigError::invalid("scheduler.interval_secs", "must be > 0"));
        }

        if self.observer.timeout_secs == 0 {
            return Err(ConfigError::invalid("observer.timeout_secs", "must be > 0"));
        }

        if self.executor.worker_pool_size == 0 {
            return Err(ConfigError::invalid("executor.worker_pool_size", "must be > 0"));
        }

        if self.executor.max_actions_per_cycle == 0 {
            return Err(ConfigError::invalid(
                "executor.max_actions_per_cycle",
                "must be > 0",
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::invalid("retry.max_attempts", "must be > 0"));
        }

        if !(self.retry.multiplier >= 1.0) {
            return Err(ConfigError::invalid("retry.multiplier", "must be >= 1.0"));
        }

        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(ConfigError::invalid("retry.jitter", "must be within [0, 1]"));
        }

        if self.retry.max_backoff_ms < self.retry.initial_backoff_ms {
            return Err(ConfigError::invalid(
                "retry.max_backoff_ms",
                "must be >= retry.initial_backoff_ms",
            ));
        }

        if self.orchestrator.request_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "orchestrator.request_timeout_secs",
                "must be > 0",
            ));
        }

        if self.orchestrator.backend == Backend::Kubernetes && self.orchestrator.kinds.is_empty() {
            return Err(ConfigError::invalid(
                "orchestrator.kinds",
                "at least one kind is required for the kubernetes backend",
            ));
        }

        if let DesiredSourceConfig::Redis { port: 0, .. } = self.desired {
            return Err(ConfigError::invalid("desired.port", "must be > 0"));
        }

        Ok(())
    }
}
