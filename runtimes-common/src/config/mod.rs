//! Configuration for the accumulator and the report generator.
//!
//! Values are layered: built-in defaults, then the TOML file
//! (`~/.runtimes.toml` unless another path is given), then `RUNTIMES_*`
//! environment variables. Command-line flags are applied by each binary on
//! top of the loaded [`Config`]. The result is validated once and then
//! shared read-only.

pub mod env;
pub mod source;

pub use env::{EnvError, EnvParser};
pub use source::{ConfigSource, Sourced};

use crate::suites::{RegistryError, SuiteRegistry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Default config file name, resolved against the home directory.
pub const CONFIG_FILE_NAME: &str = ".runtimes.toml";

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid environment configuration: {}", join_errors(.0))]
    Env(Vec<EnvError>),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

fn join_errors(errors: &[EnvError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Complete configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
    #[serde(default)]
    pub report: ReportConfig,
    /// Suite name to accepted aliases; replaces the built-in registry when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suites: Option<BTreeMap<String, SuiteAliases>>,
    /// Platform key to enabled suites.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platforms: Option<BTreeMap<String, Vec<String>>>,
    /// Environment variables that overrode file or default values.
    #[serde(skip)]
    pub env_overrides: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteAliases {
    pub names: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum pending build events before the oldest is dropped.
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    /// Number of concurrent workers.
    #[serde(default = "default_worker_count")]
    pub count: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Per-request timeout for log downloads.
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,
    /// Basic-auth user sent after a 401.
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout(),
            user: None,
            password: None,
        }
    }
}

/// Basic credentials for artifact downloads.
#[derive(Clone, PartialEq, Eq)]
pub struct FetchCredentials {
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for FetchCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchCredentials")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database holding runtime records.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address for the ingest, health and metrics API.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Bearer token required on `POST /events`; open when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<IngestToken>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            token: None,
        }
    }
}

/// Shared secret event sources present as `Authorization: Bearer <token>`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IngestToken(String);

impl IngestToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Compare against a presented token without stopping at the first
    /// differing byte.
    pub fn matches(&self, presented: &str) -> bool {
        let expected = self.0.as_bytes();
        let presented = presented.as_bytes();
        expected.len() == presented.len()
            && expected
                .iter()
                .zip(presented)
                .fold(0u8, |diff, (a, b)| diff | (a ^ b))
                == 0
    }
}

impl std::fmt::Debug for IngestToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("IngestToken(***)")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// How long to wait for queued events to drain after a shutdown signal.
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout_secs: default_drain_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Number of most recent records to average.
    #[serde(default = "default_points")]
    pub points: usize,
    /// Tests whose mean is below this (ms) are left out of reports.
    #[serde(default)]
    pub threshold: f64,
    /// Directory that receives one subdirectory per platform.
    #[serde(default = "default_outdir")]
    pub outdir: PathBuf,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            points: default_points(),
            threshold: 0.0,
            outdir: default_outdir(),
        }
    }
}

fn default_queue_capacity() -> usize {
    100
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_fetch_timeout() -> u64 {
    300
}

fn default_store_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("runtimes")
        .join("runtimes.db")
}

fn default_bind() -> String {
    "127.0.0.1:8787".to_string()
}

fn default_drain_timeout() -> u64 {
    60
}

fn default_points() -> usize {
    5
}

fn default_outdir() -> PathBuf {
    PathBuf::from("runtime_output")
}

impl Config {
    /// Default location of the config file, if a home directory exists.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(CONFIG_FILE_NAME))
    }

    /// Load from `path`, or from the default location when it exists.
    ///
    /// An explicit path must exist; a missing default file means defaults.
    /// Environment overrides are applied and the result validated.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(default) if default.exists() => Self::from_file(&default)?,
                _ => Self::default(),
            },
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file without applying the environment.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Apply `RUNTIMES_*` overrides, collecting every invalid variable.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        let mut parser = EnvParser::new();
        let mut applied = Vec::new();

        applied.push(
            parser
                .get_usize_range("QUEUE_CAPACITY", self.queue.capacity, 1, 1_000_000)
                .apply_to(&mut self.queue.capacity),
        );
        applied.push(
            parser
                .get_usize_range("WORKERS", self.workers.count, 1, 1024)
                .apply_to(&mut self.workers.count),
        );
        applied.push(
            parser
                .get_u64_range("FETCH_TIMEOUT_SECS", self.fetch.timeout_secs, 1, 86_400)
                .apply_to(&mut self.fetch.timeout_secs),
        );
        applied.push(
            parser
                .get_optional_string("FETCH_USER")
                .apply_to(&mut self.fetch.user),
        );
        applied.push(
            parser
                .get_optional_string("FETCH_PASSWORD")
                .apply_to(&mut self.fetch.password),
        );
        applied.push(
            parser
                .get_path("DB_PATH", self.store.path.clone())
                .apply_to(&mut self.store.path),
        );
        applied.push(
            parser
                .get_string("BIND", &self.server.bind)
                .apply_to(&mut self.server.bind),
        );
        applied.push(
            parser
                .get_optional_string("SERVER_TOKEN")
                .map(|token| token.map(IngestToken::new))
                .apply_to(&mut self.server.token),
        );
        applied.push(
            parser
                .get_u64_range("DRAIN_TIMEOUT_SECS", self.shutdown.drain_timeout_secs, 0, 86_400)
                .apply_to(&mut self.shutdown.drain_timeout_secs),
        );
        applied.push(
            parser
                .get_usize_range("REPORT_POINTS", self.report.points, 1, 10_000)
                .apply_to(&mut self.report.points),
        );
        applied.push(
            parser
                .get_f64_range("REPORT_THRESHOLD", self.report.threshold, 0.0, f64::MAX)
                .apply_to(&mut self.report.threshold),
        );
        applied.push(
            parser
                .get_path("REPORT_OUTDIR", self.report.outdir.clone())
                .apply_to(&mut self.report.outdir),
        );

        if parser.has_errors() {
            return Err(ConfigError::Env(parser.take_errors()));
        }
        self.env_overrides.extend(applied.into_iter().flatten());
        Ok(())
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.capacity == 0 {
            return Err(ConfigError::Invalid("queue.capacity must be at least 1".into()));
        }
        if self.workers.count == 0 {
            return Err(ConfigError::Invalid("workers.count must be at least 1".into()));
        }
        if self.report.points == 0 {
            return Err(ConfigError::Invalid("report.points must be at least 1".into()));
        }
        if self.report.threshold.is_nan() || self.report.threshold < 0.0 {
            return Err(ConfigError::Invalid("report.threshold must be >= 0".into()));
        }
        if self.fetch.user.is_some() != self.fetch.password.is_some() {
            return Err(ConfigError::Invalid(
                "fetch.user and fetch.password must be set together".into(),
            ));
        }
        if self.server.token.as_ref().is_some_and(|t| t.0.is_empty()) {
            return Err(ConfigError::Invalid("server.token must not be empty".into()));
        }
        if self.suites.is_some() != self.platforms.is_some() {
            return Err(ConfigError::Invalid(
                "[suites] and [platforms] must be configured together".into(),
            ));
        }
        self.registry()?;
        Ok(())
    }

    /// The suite registry: configured tables, or the built-in one.
    pub fn registry(&self) -> Result<SuiteRegistry, RegistryError> {
        match (&self.suites, &self.platforms) {
            (Some(suites), Some(platforms)) => SuiteRegistry::from_tables(
                suites
                    .iter()
                    .map(|(name, aliases)| (name.clone(), aliases.names.clone()))
                    .collect(),
                platforms.clone(),
            ),
            _ => Ok(SuiteRegistry::builtin()),
        }
    }

    /// Download credentials, when both halves are configured.
    pub fn credentials(&self) -> Option<FetchCredentials> {
        match (&self.fetch.user, &self.fetch.password) {
            (Some(user), Some(password)) => Some(FetchCredentials {
                user: user.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch.timeout_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown.drain_timeout_secs)
    }
}

#[cfg(test)]
pub(crate) fn env_test_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|e| e.into_inner())
}
