//! Configuration loading and validation
//!
//! Analytics settings arrive as environment-style key/value pairs. Three
//! layers are merged, later layers winning:
//! - built-in defaults
//! - `$XDG_CONFIG_HOME/runlens/config.toml` (`[analytics]` table, optional)
//! - `RUNLENS_*` environment variables
//!
//! Every layer goes through the same validation, so a malformed value fails
//! the load with an error naming the field and the raw value. There is no
//! per-field fallback to defaults.
//!
//! Paths follow the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/runlens/` (~/.config/runlens/)
//! - State/Logs: `$XDG_STATE_HOME/runlens/` (~/.local/state/runlens/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Canonical setting names paired with the environment variable that sets them.
const SETTINGS: &[(&str, &str)] = &[
    (KEY_ENABLED, "RUNLENS_ENABLED"),
    (KEY_LOG_LEVEL, "RUNLENS_LOG_LEVEL"),
    (KEY_COLLECT_CACHE, "RUNLENS_COLLECT_CACHE"),
    (KEY_COLLECT_DOCKER, "RUNLENS_COLLECT_DOCKER"),
    (KEY_COLLECT_API, "RUNLENS_COLLECT_API"),
    (KEY_COLLECT_FAILURES, "RUNLENS_COLLECT_FAILURES"),
    (KEY_SAMPLE_RATE, "RUNLENS_SAMPLE_RATE"),
    (KEY_CACHE_KEY_PREFIX, "RUNLENS_CACHE_KEY_PREFIX"),
    (KEY_MAX_DATA_SIZE, "RUNLENS_MAX_DATA_SIZE"),
    (KEY_RETENTION_DAYS, "RUNLENS_RETENTION_DAYS"),
    (KEY_SANITIZE_PATTERNS, "RUNLENS_SANITIZE_PATTERNS"),
];

pub const KEY_ENABLED: &str = "enabled";
pub const KEY_LOG_LEVEL: &str = "logLevel";
pub const KEY_COLLECT_CACHE: &str = "collectCache";
pub const KEY_COLLECT_DOCKER: &str = "collectDocker";
pub const KEY_COLLECT_API: &str = "collectApi";
pub const KEY_COLLECT_FAILURES: &str = "collectFailures";
pub const KEY_SAMPLE_RATE: &str = "sampleRate";
pub const KEY_CACHE_KEY_PREFIX: &str = "cacheKeyPrefix";
pub const KEY_MAX_DATA_SIZE: &str = "maxDataSize";
pub const KEY_RETENTION_DAYS: &str = "retentionDays";
pub const KEY_SANITIZE_PATTERNS: &str = "sanitizePatterns";

pub const DEFAULT_CACHE_KEY_PREFIX: &str = "runlens-analytics";
pub const DEFAULT_MAX_DATA_SIZE: u64 = 10 * 1024 * 1024;
pub const DEFAULT_RETENTION_DAYS: u32 = 30;
pub const DEFAULT_SANITIZE_PATTERNS: &[&str] = &[
    "token",
    "password",
    "secret",
    "key",
    "auth",
    "credential",
    "bearer",
    "private",
];

/// Log verbosity accepted by `logLevel`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err("must be one of debug, info, warn, error".to_string()),
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated analytics configuration.
///
/// Built once per process and shared behind an `Arc`. Fields are read-only;
/// the only constructors run full validation.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticsConfig {
    enabled: bool,
    log_level: LogLevel,
    collect_cache: bool,
    collect_docker: bool,
    collect_api: bool,
    collect_failures: bool,
    sample_rate: f64,
    cache_key_prefix: String,
    max_data_size: u64,
    retention_days: u32,
    sanitize_patterns: Vec<String>,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_level: LogLevel::default(),
            collect_cache: true,
            collect_docker: true,
            collect_api: true,
            collect_failures: true,
            sample_rate: 1.0,
            cache_key_prefix: DEFAULT_CACHE_KEY_PREFIX.to_string(),
            max_data_size: DEFAULT_MAX_DATA_SIZE,
            retention_days: DEFAULT_RETENTION_DAYS,
            sanitize_patterns: DEFAULT_SANITIZE_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

impl AnalyticsConfig {
    /// Build a config from key/value pairs layered over the defaults.
    ///
    /// Keys use the canonical names (`enabled`, `sampleRate`, ...). Unknown
    /// keys are ignored. Any malformed value is a fatal [`Error::Config`].
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();

        for (key, value) in pairs {
            let key = key.as_ref();
            let raw = value.as_ref();
            match key {
                KEY_ENABLED => config.enabled = parse_bool(key, raw)?,
                KEY_LOG_LEVEL => {
                    config.log_level = raw
                        .parse()
                        .map_err(|reason: String| Error::config(key, raw, reason))?
                }
                KEY_COLLECT_CACHE => config.collect_cache = parse_bool(key, raw)?,
                KEY_COLLECT_DOCKER => config.collect_docker = parse_bool(key, raw)?,
                KEY_COLLECT_API => config.collect_api = parse_bool(key, raw)?,
                KEY_COLLECT_FAILURES => config.collect_failures = parse_bool(key, raw)?,
                KEY_SAMPLE_RATE => config.sample_rate = parse_sample_rate(key, raw)?,
                KEY_CACHE_KEY_PREFIX => {
                    let prefix = raw.trim();
                    if prefix.is_empty() {
                        return Err(Error::config(key, raw, "must not be empty"));
                    }
                    config.cache_key_prefix = prefix.to_string();
                }
                KEY_MAX_DATA_SIZE => config.max_data_size = parse_positive(key, raw)?,
                KEY_RETENTION_DAYS => {
                    config.retention_days = u32::try_from(parse_positive(key, raw)?)
                        .map_err(|_| Error::config(key, raw, "is too large"))?
                }
                KEY_SANITIZE_PATTERNS => {
                    config.sanitize_patterns = parse_patterns(key, raw)?;
                }
                other => {
                    tracing::debug!(key = other, "Ignoring unknown analytics setting");
                }
            }
        }

        Ok(config)
    }

    /// Build a config from `RUNLENS_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_pairs(env_pairs(std::env::vars()))
    }

    /// Load configuration from the default file path and the environment.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a specific TOML file plus the environment.
    ///
    /// A missing file is not an error; its layer is simply empty.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut merged: BTreeMap<String, String> = BTreeMap::new();

        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            merged.extend(file_pairs(&content)?);
        } else {
            tracing::debug!("No config file found at {:?}, using defaults", path);
        }

        merged.extend(env_pairs(std::env::vars()));

        let config = Self::from_pairs(merged)?;
        tracing::debug!(?config, "Analytics configuration loaded");
        Ok(config)
    }

    /// Master on/off switch.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn log_level(&self) -> LogLevel {
        self.log_level
    }

    pub fn collect_cache(&self) -> bool {
        self.collect_cache
    }

    pub fn collect_docker(&self) -> bool {
        self.collect_docker
    }

    pub fn collect_api(&self) -> bool {
        self.collect_api
    }

    pub fn collect_failures(&self) -> bool {
        self.collect_failures
    }

    /// Probability in `[0, 1]` that a collection cycle gathers metrics.
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn cache_key_prefix(&self) -> &str {
        &self.cache_key_prefix
    }

    /// Payload size ceiling for stored blobs, in bytes.
    pub fn max_data_size(&self) -> u64 {
        self.max_data_size
    }

    /// Advisory TTL for stored data.
    pub fn retention_days(&self) -> u32 {
        self.retention_days
    }

    /// Lower-cased sensitive key substrings.
    pub fn sanitize_patterns(&self) -> &[String] {
        &self.sanitize_patterns
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/runlens/config.toml` (~/.config/runlens/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("runlens").join("config.toml")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/runlens/` (~/.local/state/runlens/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("runlens")
    }

    /// Returns the log file path
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("runlens.log")
    }
}

/// Map `RUNLENS_*` variables to canonical setting names.
fn env_pairs<I>(vars: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (String, String)>,
{
    vars.into_iter()
        .filter_map(|(name, value)| {
            SETTINGS
                .iter()
                .find(|(_, env)| *env == name)
                .map(|(key, _)| (key.to_string(), value))
        })
        .collect()
}

/// On-disk layout of `config.toml`.
#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    analytics: FileSettings,
}

/// `[analytics]` table. Values stay raw here and are validated together with
/// the environment layer.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct FileSettings {
    enabled: Option<FileValue>,
    log_level: Option<FileValue>,
    collect_cache: Option<FileValue>,
    collect_docker: Option<FileValue>,
    collect_api: Option<FileValue>,
    collect_failures: Option<FileValue>,
    sample_rate: Option<FileValue>,
    cache_key_prefix: Option<FileValue>,
    max_data_size: Option<FileValue>,
    retention_days: Option<FileValue>,
    sanitize_patterns: Option<FileValue>,
}

/// A setting as written in TOML.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FileValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    List(Vec<String>),
}

impl FileValue {
    fn into_raw(self) -> String {
        match self {
            FileValue::Bool(b) => b.to_string(),
            FileValue::Integer(i) => i.to_string(),
            FileValue::Float(f) => f.to_string(),
            FileValue::Text(s) => s,
            FileValue::List(items) => items.join(","),
        }
    }
}

impl FileSettings {
    fn into_pairs(self) -> Vec<(String, String)> {
        [
            (KEY_ENABLED, self.enabled),
            (KEY_LOG_LEVEL, self.log_level),
            (KEY_COLLECT_CACHE, self.collect_cache),
            (KEY_COLLECT_DOCKER, self.collect_docker),
            (KEY_COLLECT_API, self.collect_api),
            (KEY_COLLECT_FAILURES, self.collect_failures),
            (KEY_SAMPLE_RATE, self.sample_rate),
            (KEY_CACHE_KEY_PREFIX, self.cache_key_prefix),
            (KEY_MAX_DATA_SIZE, self.max_data_size),
            (KEY_RETENTION_DAYS, self.retention_days),
            (KEY_SANITIZE_PATTERNS, self.sanitize_patterns),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| (key.to_string(), v.into_raw())))
        .collect()
    }
}

/// Key/value pairs of the `[analytics]` table of a TOML file.
fn file_pairs(content: &str) -> Result<Vec<(String, String)>> {
    let file: ConfigFile = toml::from_str(content)?;
    Ok(file.analytics.into_pairs())
}

fn parse_bool(field: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(Error::config(
            field,
            raw,
            "expected true/1/yes or false/0/no",
        )),
    }
}

fn parse_sample_rate(field: &str, raw: &str) -> Result<f64> {
    let rate: f64 = raw
        .trim()
        .parse()
        .map_err(|_| Error::config(field, raw, "must be a number"))?;
    if !rate.is_finite() || !(0.0..=1.0).contains(&rate) {
        return Err(Error::config(field, raw, "must be between 0 and 1"));
    }
    Ok(rate)
}

/// Numeric and greater than 0. Fractions round up to the next whole unit.
fn parse_positive(field: &str, raw: &str) -> Result<u64> {
    let trimmed = raw.trim();
    if let Ok(value) = trimmed.parse::<u64>() {
        if value == 0 {
            return Err(Error::config(field, raw, "must be greater than 0"));
        }
        return Ok(value);
    }

    let value: f64 = trimmed
        .parse()
        .map_err(|_| Error::config(field, raw, "must be a number"))?;
    if !value.is_finite() || value <= 0.0 {
        return Err(Error::config(field, raw, "must be greater than 0"));
    }
    let whole = value.ceil();
    if whole >= u64::MAX as f64 {
        return Err(Error::config(field, raw, "is too large"));
    }
    Ok(whole as u64)
}

fn parse_patterns(field: &str, raw: &str) -> Result<Vec<String>> {
    let patterns: Vec<String> = raw
        .split(',')
        .map(|p| p.trim().to_lowercase())
        .filter(|p| !p.is_empty())
        .collect();
    if patterns.is_empty() {
        return Err(Error::config(field, raw, "must list at least one pattern"));
    }
    Ok(patterns)
}
