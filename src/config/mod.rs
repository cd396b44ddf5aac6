//! Configuration
//!
//! Settings come from an optional JSON5 file named by `REELAY_CONFIG`, then
//! environment variables override individual keys. Only the bot token is
//! mandatory; everything else has a default.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::bot::DEFAULT_SHUTDOWN_GRACE_SECS;
use crate::channels::telegram::DEFAULT_TELEGRAM_API_BASE;
use crate::delivery::{DeliveryLimits, DEFAULT_DOWNLOAD_BUDGET_SECS, DEFAULT_HARD_CEILING_BYTES};
use crate::links::DEFAULT_ALLOWED_DOMAINS;
use crate::logging::{mask_secret, LogFormat, LoggingConfig};
use crate::media::DEFAULT_PROBE_TIMEOUT_SECS;
use crate::relay::{DEFAULT_REFERENCE_TIMEOUT_SECS, DEFAULT_UPLOAD_TIMEOUT_SECS};
use crate::resolver::DEFAULT_ZYLA_API_URL;
use crate::sessions::DEFAULT_SESSION_IDLE_SECS;

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "REELAY_CONFIG";

pub const DEFAULT_PORT: u16 = 10000;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}

fn invalid(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        message: message.into(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub api_base: String,
    pub connect_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_base: DEFAULT_TELEGRAM_API_BASE.to_string(),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResolverConfig {
    pub api_url: String,
    /// Empty disables lookups; every link then reports "not found".
    pub api_key: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_ZYLA_API_URL.to_string(),
            api_key: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LimitsConfig {
    pub hard_ceiling_bytes: u64,
    pub download_budget_secs: u64,
    pub upload_timeout_secs: u64,
    pub reference_timeout_secs: u64,
    pub probe_timeout_secs: u64,
    /// Idle sessions older than this are dropped.
    pub session_idle_secs: u64,
    /// How long shutdown waits for running deliveries to report.
    pub shutdown_grace_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            hard_ceiling_bytes: DEFAULT_HARD_CEILING_BYTES,
            download_budget_secs: DEFAULT_DOWNLOAD_BUDGET_SECS,
            upload_timeout_secs: DEFAULT_UPLOAD_TIMEOUT_SECS,
            reference_timeout_secs: DEFAULT_REFERENCE_TIMEOUT_SECS,
            probe_timeout_secs: DEFAULT_PROBE_TIMEOUT_SECS,
            session_idle_secs: DEFAULT_SESSION_IDLE_SECS,
            shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE_SECS,
        }
    }
}

impl LimitsConfig {
    pub fn delivery_limits(&self) -> DeliveryLimits {
        DeliveryLimits {
            hard_ceiling_bytes: self.hard_ceiling_bytes,
            download_budget: Duration::from_secs(self.download_budget_secs),
        }
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    pub fn reference_timeout(&self) -> Duration {
        Duration::from_secs(self.reference_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn session_idle(&self) -> Duration {
        Duration::from_secs(self.session_idle_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StagingConfig {
    pub dir: PathBuf,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            dir: std::env::temp_dir().join("reelay-staging"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LinksConfig {
    pub allowed_domains: Vec<String>,
}

impl Default for LinksConfig {
    fn default() -> Self {
        Self {
            allowed_domains: DEFAULT_ALLOWED_DOMAINS.iter().map(|d| d.to_string()).collect(),
        }
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelayConfig {
    pub telegram: TelegramConfig,
    pub resolver: ResolverConfig,
    pub limits: LimitsConfig,
    pub server: ServerConfig,
    pub staging: StagingConfig,
    pub links: LinksConfig,
    pub logging: LoggingConfig,
}

impl RelayConfig {
    /// Check the settings a running relay depends on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.telegram.bot_token.trim().is_empty() {
            return Err(ConfigError::Missing("TELEGRAM_BOT_TOKEN"));
        }
        url::Url::parse(&self.telegram.api_base)
            .map_err(|e| invalid("telegram.apiBase", e.to_string()))?;
        url::Url::parse(&self.resolver.api_url)
            .map_err(|e| invalid("resolver.apiUrl", e.to_string()))?;

        let limits = &self.limits;
        for (key, value) in [
            ("limits.hardCeilingBytes", limits.hard_ceiling_bytes),
            ("limits.downloadBudgetSecs", limits.download_budget_secs),
            ("limits.uploadTimeoutSecs", limits.upload_timeout_secs),
            ("limits.referenceTimeoutSecs", limits.reference_timeout_secs),
            ("limits.probeTimeoutSecs", limits.probe_timeout_secs),
            ("limits.sessionIdleSecs", limits.session_idle_secs),
            ("limits.shutdownGraceSecs", limits.shutdown_grace_secs),
        ] {
            if value == 0 {
                return Err(invalid(key, "must be greater than zero"));
            }
        }

        if self.links.allowed_domains.iter().all(|d| d.trim().is_empty()) {
            return Err(invalid("links.allowedDomains", "at least one domain is required"));
        }
        if self.staging.dir.as_os_str().is_empty() {
            return Err(invalid("staging.dir", "must not be empty"));
        }
        Ok(())
    }

    /// JSON view with secrets masked, for display.
    pub fn redacted(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Some(token) = value.pointer_mut("/telegram/botToken") {
            *token = Value::String(mask_secret(&self.telegram.bot_token));
        }
        if let Some(key) = value.pointer_mut("/resolver/apiKey") {
            *key = Value::String(mask_secret(&self.resolver.api_key));
        }
        value
    }
}

/// Load from `REELAY_CONFIG` (if set) and the process environment.
pub fn load_config() -> Result<RelayConfig, ConfigError> {
    let path = std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from);
    load_config_from(path.as_deref(), |key| std::env::var(key).ok())
}

/// Load from an optional file, then apply overrides from `env`.
pub fn load_config_from<F>(path: Option<&Path>, env: F) -> Result<RelayConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let config = load_unchecked_from(path, env)?;
    config.validate()?;
    Ok(config)
}

/// Like [`load_config`] without [`RelayConfig::validate`], for CLI tools
/// that do not need a bot token.
pub fn load_config_unchecked() -> Result<RelayConfig, ConfigError> {
    let path = std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from);
    load_unchecked_from(path.as_deref(), |key| std::env::var(key).ok())
}

fn load_unchecked_from<F>(path: Option<&Path>, env: F) -> Result<RelayConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match path {
        Some(path) => read_config_file(path)?,
        None => RelayConfig::default(),
    };
    apply_env_overrides(&mut config, &env)?;
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<RelayConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    json5::from_str(&raw).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Non-blank value of `key`.
fn env_string<F>(env: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn env_parse<F, T>(env: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_string(env, key)
        .map(|raw| raw.parse::<T>().map_err(|e| invalid(key, format!("'{raw}': {e}"))))
        .transpose()
}

fn apply_env_overrides<F>(config: &mut RelayConfig, env: &F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(token) = env_string(env, "TELEGRAM_BOT_TOKEN") {
        config.telegram.bot_token = token;
    }
    if let Some(base) = env_string(env, "TELEGRAM_API_BASE") {
        config.telegram.api_base = base;
    }
    if let Some(key) = env_string(env, "ZYLA_API_KEY") {
        config.resolver.api_key = key;
    }
    if let Some(url) = env_string(env, "ZYLA_API_URL") {
        config.resolver.api_url = url;
    }
    if let Some(port) = env_parse(env, "PORT")? {
        config.server.port = port;
    }

    let limits = &mut config.limits;
    if let Some(v) = env_parse(env, "REELAY_HARD_CEILING_BYTES")? {
        limits.hard_ceiling_bytes = v;
    }
    if let Some(v) = env_parse(env, "REELAY_DOWNLOAD_BUDGET_SECS")? {
        limits.download_budget_secs = v;
    }
    if let Some(v) = env_parse(env, "REELAY_UPLOAD_TIMEOUT_SECS")? {
        limits.upload_timeout_secs = v;
    }
    if let Some(v) = env_parse(env, "REELAY_REFERENCE_TIMEOUT_SECS")? {
        limits.reference_timeout_secs = v;
    }
    if let Some(v) = env_parse(env, "REELAY_PROBE_TIMEOUT_SECS")? {
        limits.probe_timeout_secs = v;
    }
    if let Some(v) = env_parse(env, "REELAY_SESSION_IDLE_SECS")? {
        limits.session_idle_secs = v;
    }
    if let Some(v) = env_parse(env, "REELAY_SHUTDOWN_GRACE_SECS")? {
        limits.shutdown_grace_secs = v;
    }

    if let Some(dir) = env_string(env, "REELAY_STAGING_DIR") {
        config.staging.dir = PathBuf::from(dir);
    }
    if let Some(domains) = env_string(env, "REELAY_ALLOWED_DOMAINS") {
        config.links.allowed_domains = domains
            .split(',')
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string)
            .collect();
    }
    if let Some(level) = env_string(env, "REELAY_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(format) = env_string(env, "REELAY_LOG_FORMAT") {
        config.logging.format = format
            .parse::<LogFormat>()
            .map_err(|e| invalid("REELAY_LOG_FORMAT", e))?;
    }
    Ok(())
}
