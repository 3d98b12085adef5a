//! Configuration for rapply.
//!
//! [`ApplyConfig`] is loaded once at startup from `~/.rapply/config.toml`
//! (or an explicit path), then overridden by `RAPPLY_*` environment
//! variables. The resulting value is passed explicitly to every component
//! that needs it.

pub mod env;
pub mod source;

pub use env::{EnvError, EnvParser};
pub use source::{ConfigSource, Sourced};

use crate::errors::{ApplyError, Result};
use crate::types::Protocol;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplyConfig {
    #[serde(default)]
    pub log: LogSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub connection: ConnectionSection,
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub data_collector: DataCollectorSection,
}

/// Local log settings plus the log level forwarded to the remote agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_location")]
    pub location: PathBuf,
    /// Log level for the remote agent run. Unset leaves the agent default.
    #[serde(default)]
    pub target_level: Option<String>,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            location: default_log_location(),
            target_level: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSection {
    /// Local cache for downloaded agent packages.
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSection {
    #[serde(default)]
    pub default_protocol: Protocol,
    #[serde(default)]
    pub default_user: Option<String>,
    #[serde(default = "default_sudo")]
    pub sudo: bool,
    #[serde(default)]
    pub sudo_command: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            default_protocol: Protocol::Ssh,
            default_user: None,
            sudo: default_sudo(),
            sudo_command: None,
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentSection {
    /// Local directory of `*.crt` / `*.pem` files to trust on the target.
    #[serde(default)]
    pub trusted_certs_dir: Option<PathBuf>,
    /// License acceptance value written into the remote agent config.
    #[serde(default)]
    pub license: Option<String>,
}

/// Optional reporting endpoint for remote runs. Both fields must be set
/// for the endpoint to be used.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataCollectorSection {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

impl DataCollectorSection {
    /// `(url, token)` when both are configured.
    pub fn endpoint(&self) -> Option<(&str, &str)> {
        match (self.url.as_deref(), self.token.as_deref()) {
            (Some(url), Some(token)) => Some((url, token)),
            _ => None,
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_log_location() -> PathBuf {
    base_dir().join("logs").join("default.log")
}

fn default_cache_path() -> PathBuf {
    base_dir().join("cache")
}

fn default_sudo() -> bool {
    true
}

fn default_connect_timeout_secs() -> u64 {
    30
}

/// Base directory for rapply state (`~/.rapply`).
pub fn base_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".rapply")
}

impl ApplyConfig {
    /// Default configuration file path.
    pub fn default_path() -> PathBuf {
        base_dir().join("config.toml")
    }

    /// Load configuration and apply environment overrides.
    ///
    /// A missing default file yields defaults; a missing explicit file is an
    /// error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                if !path.exists() {
                    return Err(ApplyError::ConfigNotFound {
                        path: path.to_path_buf(),
                    });
                }
                Self::load_from_path(path)?
            }
            None => {
                let path = Self::default_path();
                if path.exists() {
                    Self::load_from_path(&path)?
                } else {
                    debug!(path = %path.display(), "No configuration file, using defaults");
                    Self::default()
                }
            }
        };

        let mut parser = EnvParser::new();
        config.apply_env_overrides(&mut parser);
        if parser.has_errors() {
            return Err(ApplyError::ConfigEnv {
                errors: parser
                    .take_errors()
                    .into_iter()
                    .map(|e| e.to_string())
                    .collect(),
            });
        }
        Ok(config)
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| ApplyError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents, path)
    }

    pub fn from_toml_str(contents: &str, path: &Path) -> Result<Self> {
        toml::from_str(contents).map_err(|e| ApplyError::ConfigParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Apply `RAPPLY_*` overrides. Invalid values are left in `parser`.
    pub fn apply_env_overrides(&mut self, parser: &mut EnvParser) {
        self.log.level = parser.get_log_level("LOG_LEVEL", &self.log.level).value;

        let target_level = parser.get_log_level(
            "TARGET_LOG_LEVEL",
            self.log.target_level.as_deref().unwrap_or("info"),
        );
        if target_level.is_from_env() {
            self.log.target_level = Some(target_level.value);
        }

        let location = parser.get_path(
            "LOG_LOCATION",
            &self.log.location.to_string_lossy(),
            false,
        );
        self.log.location = location.value;

        let cache = parser.get_path("CACHE_PATH", &self.cache.path.to_string_lossy(), false);
        self.cache.path = cache.value;

        self.connection.default_protocol = parser
            .get_protocol("DEFAULT_PROTOCOL", self.connection.default_protocol)
            .value;
        self.connection.sudo = parser.get_bool("SUDO", self.connection.sudo).value;
        self.connection.connect_timeout_secs = parser
            .get_u64_range(
                "CONNECT_TIMEOUT",
                self.connection.connect_timeout_secs,
                1,
                600,
            )
            .value;

        override_optional(
            &mut self.connection.default_user,
            parser.get_optional_string("DEFAULT_USER"),
        );
        override_optional(
            &mut self.connection.sudo_command,
            parser.get_optional_string("SUDO_COMMAND"),
        );
        override_optional(&mut self.agent.license, parser.get_optional_string("LICENSE"));
        override_optional(
            &mut self.agent.trusted_certs_dir,
            parser.get_optional_path("TRUSTED_CERTS_DIR"),
        );
        override_optional(
            &mut self.data_collector.url,
            parser.get_optional_string("DATA_COLLECTOR_URL"),
        );
        override_optional(
            &mut self.data_collector.token,
            parser.get_optional_string("DATA_COLLECTOR_TOKEN"),
        );
    }
}

fn override_optional<T>(slot: &mut Option<T>, value: Sourced<Option<T>>) {
    if value.is_from_env() {
        debug!(
            var = value.env_var.as_deref().unwrap_or(""),
            "Config value overridden from environment"
        );
        *slot = value.value;
    }
}

#[cfg(test)]
pub(crate) fn env_test_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
