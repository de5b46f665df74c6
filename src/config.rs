//! Configuration for shelfgen.

use std::time::Duration;

use secrecy::SecretString;

use crate::engine::RetryPolicy;
use crate::error::ConfigError;

/// Main configuration for the server.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub engine: EngineConfig,
    pub storage: StorageConfig,
    pub session: SessionConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Ok(Self {
            server: ServerConfig::from_env()?,
            engine: EngineConfig::from_env()?,
            storage: StorageConfig::from_env()?,
            session: SessionConfig::from_env()?,
        })
    }
}

/// Public-surface configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Public base URL the engine delivers callbacks to. The engine runs in
    /// the vendor's cloud, so this must be reachable from the internet
    /// (a tunnel during development).
    pub callback_base_url: String,
}

impl ServerConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let callback_base_url = require_env(
            "CALLBACK_BASE_URL",
            "Set the public base URL the engine can deliver callbacks to",
        )?;

        if !callback_base_url.starts_with("http://") && !callback_base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue {
                key: "CALLBACK_BASE_URL".to_string(),
                message: "must be an absolute http(s) URL".to_string(),
            });
        }

        Ok(Self {
            callback_base_url: callback_base_url.trim_end_matches('/').to_string(),
        })
    }
}

/// Remote execution service configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base URL of the design-automation API.
    pub base_url: String,
    /// Fully qualified activity id the workitems target
    /// (e.g. "acme.ShelvingUpdate+prod").
    pub activity_id: String,
    /// Bearer token for workitem submission. Token acquisition/refresh is
    /// external; the server only forwards it.
    pub access_token: SecretString,
    /// Retry policy for transient submission failures.
    pub retry: RetryPolicy,
}

impl EngineConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let retry = RetryPolicy {
            max_retries: parse_optional_env("ENGINE_MAX_RETRIES", 3)?,
            base_delay: Duration::from_millis(parse_optional_env("ENGINE_RETRY_BASE_MS", 500)?),
            max_delay: Duration::from_millis(parse_optional_env("ENGINE_RETRY_MAX_MS", 10_000)?),
        };

        Ok(Self {
            base_url: optional_env("ENGINE_BASE_URL")?
                .unwrap_or_else(|| "https://developer.api.autodesk.com/da/us-east/v3".to_string()),
            activity_id: require_env(
                "ENGINE_ACTIVITY_ID",
                "Set the fully qualified activity id workitems should target",
            )?,
            access_token: SecretString::from(require_env(
                "ENGINE_ACCESS_TOKEN",
                "Set a bearer token for the design-automation API",
            )?),
            retry,
        })
    }
}

/// Object-store and derivative-pipeline configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub base_url: String,
    /// Bucket holding job artifacts.
    pub bucket: String,
    /// Bearer token for the store. Defaults to the engine token — the two
    /// services usually share one app credential.
    pub access_token: SecretString,
    /// Expiry for signed read URLs, in minutes.
    pub signed_url_minutes: u32,
    /// Base URL of the derivative (translation) service.
    pub derivative_base_url: String,
}

impl StorageConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let access_token = match optional_env("STORAGE_ACCESS_TOKEN")? {
            Some(token) => SecretString::from(token),
            None => SecretString::from(require_env(
                "ENGINE_ACCESS_TOKEN",
                "Set STORAGE_ACCESS_TOKEN or ENGINE_ACCESS_TOKEN for the object store",
            )?),
        };

        Ok(Self {
            base_url: optional_env("STORAGE_BASE_URL")?
                .unwrap_or_else(|| "https://developer.api.autodesk.com/oss/v2".to_string()),
            bucket: require_env(
                "STORAGE_BUCKET",
                "Set the object-store bucket that holds job artifacts",
            )?,
            access_token,
            signed_url_minutes: parse_optional_env("SIGNED_URL_MINUTES", 10)?,
            derivative_base_url: optional_env("DERIVATIVE_BASE_URL")?.unwrap_or_else(|| {
                "https://developer.api.autodesk.com/modelderivative/v2".to_string()
            }),
        })
    }
}

/// Session-mode configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long a session pull may block waiting for the next input.
    /// `None` (configured as 0) waits until the remote service's own
    /// execution limit aborts the job.
    pub poll_timeout: Option<Duration>,
}

impl SessionConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let secs: u64 = parse_optional_env("SESSION_POLL_TIMEOUT_SECS", 900)?;
        Ok(Self {
            poll_timeout: (secs > 0).then(|| Duration::from_secs(secs)),
        })
    }
}

/// Read an environment variable, treating empty values as unset.
fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(v) if v.trim().is_empty() => Ok(None),
        Ok(v) => Ok(Some(v)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
    }
}

fn require_env(key: &str, hint: &str) -> Result<String, ConfigError> {
    optional_env(key)?.ok_or_else(|| ConfigError::MissingRequired {
        key: key.to_string(),
        hint: hint.to_string(),
    })
}

fn parse_optional_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    optional_env(key)?
        .map(|s| {
            s.parse().map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{e}"),
            })
        })
        .transpose()
        .map(|v| v.unwrap_or(default))
}
