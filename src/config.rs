use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::auth::store::{FileTokenStore, MemoryTokenStore, TokenStore};
use crate::cache::{PolicyRegistry, PolicyRule};

// ---------------------------------------------------------------------------
// Environment override tracking
// ---------------------------------------------------------------------------

/// Tracks which configuration settings are overridden by environment variables.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    overrides: HashMap<String, String>,
}

impl EnvOverrides {
    /// Check whether a setting key (e.g. "transport.endpoint") is overridden by an env var.
    pub fn is_overridden(&self, key: &str) -> bool {
        self.overrides.contains_key(key)
    }

    /// Get the env var name that overrides the given setting key.
    pub fn env_var_for(&self, key: &str) -> Option<&str> {
        self.overrides.get(key).map(String::as_str)
    }

    /// Get all overrides as a map of setting key -> env var name.
    pub fn all(&self) -> &HashMap<String, String> {
        &self.overrides
    }

    fn record(&mut self, key: &str, env_var: &str) {
        self.overrides.insert(key.to_string(), env_var.to_string());
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A configuration value that cannot be turned into a working component.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid URL for {field} ('{value}'): {source}")]
    InvalidUrl {
        field: &'static str,
        value: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("Token store backend '{0}' is not available in this build")]
    UnsupportedBackend(StorageBackend),
}

// ---------------------------------------------------------------------------
// Main configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Env var overrides are not serialized to TOML.
    #[serde(skip)]
    pub env_overrides: EnvOverrides,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    /// Operation endpoint.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    File,
    Keyring,
    Memory,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Keyring => write!(f, "keyring"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

impl FromStr for StorageBackend {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "file" => Ok(Self::File),
            "keyring" => Ok(Self::Keyring),
            "memory" => Ok(Self::Memory),
            _ => Err(format!("Unknown storage backend: {s}")),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Token file for the `file` backend.
    #[serde(default = "default_token_path")]
    pub token_path: PathBuf,
    /// Refresh exchange endpoint. Defaults to `/auth/refresh` on the
    /// operation endpoint's host.
    #[serde(default)]
    pub refresh_endpoint: Option<String>,
    /// Public mutation that trades credentials for a token grant.
    #[serde(default = "default_login_operation")]
    pub login_operation: String,
    /// Refresh before sending when the access token is about to expire.
    #[serde(default)]
    pub proactive_refresh: bool,
    #[serde(default = "default_refresh_skew_secs")]
    pub refresh_skew_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            token_path: default_token_path(),
            refresh_endpoint: None,
            login_operation: default_login_operation(),
            proactive_refresh: false,
            refresh_skew_secs: default_refresh_skew_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Per-operation rules layered over the reference-data defaults.
    #[serde(default)]
    pub policies: HashMap<String, PolicyRule>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            policies: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

fn default_endpoint() -> String {
    "http://localhost:4000/graphql".to_string()
}
const fn default_request_timeout_secs() -> u64 {
    15
}
const fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_token_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("storefront-client")
        .join("session.json")
}
fn default_login_operation() -> String {
    "login".to_string()
}
const fn default_refresh_skew_secs() -> u64 {
    60
}
const fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}

// ---------------------------------------------------------------------------
// Config loading and env overrides
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a TOML file, then apply environment variable
    /// overrides. Any setting prefixed with `STOREFRONT_` takes precedence over
    /// the file value and is tracked in `env_overrides`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            config
        } else {
            tracing::debug!("Config file not found at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// `config.toml` under the platform config dir.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("storefront-client")
            .join("config.toml")
    }

    /// Apply environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        let mut ov = EnvOverrides::default();

        macro_rules! env_str {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = val;
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_bool {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_parse {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    if let Ok(parsed) = val.parse() {
                        $field = parsed;
                        ov.record($key, $env);
                    }
                }
            };
        }
        macro_rules! env_opt_str {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = if val.is_empty() { None } else { Some(val) };
                    ov.record($key, $env);
                }
            };
        }

        // -- Transport --
        env_str!("transport.endpoint", "STOREFRONT_ENDPOINT", self.transport.endpoint);
        env_parse!(
            "transport.request_timeout_secs",
            "STOREFRONT_REQUEST_TIMEOUT_SECS",
            self.transport.request_timeout_secs
        );
        env_parse!(
            "transport.connect_timeout_secs",
            "STOREFRONT_CONNECT_TIMEOUT_SECS",
            self.transport.connect_timeout_secs
        );

        // -- Session --
        env_parse!("session.backend", "STOREFRONT_SESSION_BACKEND", self.session.backend);
        if let Ok(val) = std::env::var("STOREFRONT_TOKEN_PATH") {
            self.session.token_path = PathBuf::from(val);
            ov.record("session.token_path", "STOREFRONT_TOKEN_PATH");
        }
        env_opt_str!(
            "session.refresh_endpoint",
            "STOREFRONT_REFRESH_ENDPOINT",
            self.session.refresh_endpoint
        );
        env_bool!(
            "session.proactive_refresh",
            "STOREFRONT_PROACTIVE_REFRESH",
            self.session.proactive_refresh
        );
        env_parse!(
            "session.refresh_skew_secs",
            "STOREFRONT_REFRESH_SKEW_SECS",
            self.session.refresh_skew_secs
        );

        // -- Cache --
        env_bool!("cache.enabled", "STOREFRONT_CACHE_ENABLED", self.cache.enabled);

        // -- Logging --
        env_str!("logging.level", "STOREFRONT_LOG_LEVEL", self.logging.level);
        env_bool!("logging.json", "STOREFRONT_LOG_JSON", self.logging.json);

        self.env_overrides = ov;
    }

    /// Check that every URL parses and timeouts are non-zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.endpoint_url()?;
        self.refresh_url()?;
        if self.transport.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "transport.request_timeout_secs",
                reason: "must be greater than zero".into(),
            });
        }
        if self.transport.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "transport.connect_timeout_secs",
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }

    pub fn endpoint_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.transport.endpoint).map_err(|source| ConfigError::InvalidUrl {
            field: "transport.endpoint",
            value: self.transport.endpoint.clone(),
            source,
        })
    }

    /// The refresh endpoint, derived from the operation endpoint when unset.
    pub fn refresh_url(&self) -> Result<Url, ConfigError> {
        match &self.session.refresh_endpoint {
            Some(raw) => Url::parse(raw).map_err(|source| ConfigError::InvalidUrl {
                field: "session.refresh_endpoint",
                value: raw.clone(),
                source,
            }),
            None => self
                .endpoint_url()?
                .join("/auth/refresh")
                .map_err(|source| ConfigError::InvalidUrl {
                    field: "session.refresh_endpoint",
                    value: "/auth/refresh".into(),
                    source,
                }),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.transport.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.transport.connect_timeout_secs)
    }

    pub fn refresh_skew(&self) -> Duration {
        Duration::from_secs(self.session.refresh_skew_secs)
    }

    /// Reference-data rules with the configured rules on top.
    pub fn policy_registry(&self) -> PolicyRegistry {
        let mut registry = PolicyRegistry::with_reference_defaults();
        registry.extend(
            self.cache
                .policies
                .iter()
                .map(|(name, rule)| (name.clone(), rule.clone())),
        );
        registry
    }

    /// Build the configured token store backend.
    pub fn token_store(&self) -> Result<Arc<dyn TokenStore>, ConfigError> {
        match self.session.backend {
            StorageBackend::File => Ok(Arc::new(FileTokenStore::new(&self.session.token_path))),
            StorageBackend::Memory => Ok(Arc::new(MemoryTokenStore::new())),
            #[cfg(feature = "system-keyring")]
            StorageBackend::Keyring => Ok(Arc::new(crate::auth::store::KeyringTokenStore::new())),
            #[cfg(not(feature = "system-keyring"))]
            StorageBackend::Keyring => Err(ConfigError::UnsupportedBackend(StorageBackend::Keyring)),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
