//! Console configuration, read from the environment.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use nexus_auth::{FileStorage, GuardConfig, MemoryStorage, SessionStorage};
use nexus_observability::LogFormat;

pub const DEFAULT_API_URL: &str = "http://localhost:8000";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("NEXUS_API_URL must be an http(s) URL, got '{0}'")]
    InvalidApiUrl(String),

    #[error("NEXUS_REQUEST_TIMEOUT_SECS must be a positive integer, got '{0}'")]
    InvalidTimeout(String),

    #[error("{var} must be an absolute path starting with '/', got '{value}'")]
    InvalidRoutePath { var: &'static str, value: String },

    #[error(transparent)]
    InvalidLogFormat(#[from] nexus_observability::UnknownLogFormat),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleConfig {
    /// Base URL of the API, without trailing slash.
    pub api_base_url: String,
    /// Directory for the persisted session; in-memory when `None`.
    pub session_dir: Option<PathBuf>,
    pub request_timeout: Duration,
    pub guard: GuardConfig,
    pub log_format: LogFormat,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            session_dir: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            guard: GuardConfig::default(),
            log_format: LogFormat::default(),
        }
    }
}

impl ConsoleConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup; unset or blank variables take
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        match get("NEXUS_API_URL") {
            Some(url) if url.starts_with("http://") || url.starts_with("https://") => {
                config.api_base_url = url.trim_end_matches('/').to_string();
            }
            Some(url) => return Err(ConfigError::InvalidApiUrl(url)),
            None => tracing::warn!("NEXUS_API_URL not set; using {DEFAULT_API_URL}"),
        }

        config.session_dir = get("NEXUS_SESSION_DIR").map(PathBuf::from);

        if let Some(raw) = get("NEXUS_REQUEST_TIMEOUT_SECS") {
            let secs = raw
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or_else(|| ConfigError::InvalidTimeout(raw.clone()))?;
            config.request_timeout = Duration::from_secs(secs);
        }

        if let Some(path) = get("NEXUS_LOGIN_PATH") {
            config.guard.login_path = route_path("NEXUS_LOGIN_PATH", path)?;
        }
        if let Some(path) = get("NEXUS_FORBIDDEN_PATH") {
            config.guard.forbidden_path = route_path("NEXUS_FORBIDDEN_PATH", path)?;
        }

        if let Some(format) = get("NEXUS_LOG_FORMAT") {
            config.log_format = format.parse()?;
        }

        Ok(config)
    }

    /// Storage backing the session, per `session_dir`.
    pub fn storage(&self) -> Arc<dyn SessionStorage> {
        match &self.session_dir {
            Some(dir) => {
                let storage = FileStorage::new(dir.clone());
                tracing::debug!(dir = %storage.dir().display(), "session persisted to files");
                Arc::new(storage)
            }
            None => {
                tracing::warn!("NEXUS_SESSION_DIR not set; session will not survive a restart");
                Arc::new(MemoryStorage::new())
            }
        }
    }
}

fn route_path(var: &'static str, value: String) -> Result<String, ConfigError> {
    if value.starts_with('/') {
        Ok(value)
    } else {
        Err(ConfigError::InvalidRoutePath { var, value })
    }
}
