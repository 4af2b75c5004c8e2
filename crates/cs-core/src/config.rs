use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level client configuration loaded from `~/.config/coding-space/config.toml`.
///
/// **Security**: This struct never stores tokens or key material. Credentials
/// live in the state store with their own lifecycle; config only carries
/// endpoints and tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClientConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub keys: KeyCacheConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl ClientConfig {
    /// Load config from the default path, falling back to defaults when the
    /// file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(path)
        } else {
            let cfg = ClientConfig::default();
            cfg.validate()?;
            Ok(cfg)
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let cfg: ClientConfig =
            toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Semantic validation for settings that are not expressible via type checks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.api.validate()?;
        self.session.validate()?;
        self.keys.validate()?;
        self.runtime.validate()?;
        Ok(())
    }

    fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("coding-space")
            .join("config.toml")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

/// Remote API endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the backing service, no trailing slash.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Fixed per-request timeout, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ApiConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::Validation(format!(
                "api.base_url '{}' must start with http:// or https://",
                self.base_url
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "api.request_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_base_url() -> String {
    "http://localhost:8000".into()
}
fn default_request_timeout_secs() -> u64 {
    10
}

/// Authenticated-session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How long an issued session stays valid, in days.
    #[serde(default = "default_session_ttl_days")]
    pub ttl_days: i64,
    /// Override for the state-slot directory; defaults to the per-user
    /// config dir when unset.
    #[serde(default)]
    pub state_dir: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_days: default_session_ttl_days(),
            state_dir: None,
        }
    }
}

impl SessionConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.ttl_days <= 0 {
            return Err(ConfigError::Validation(
                "session.ttl_days must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_session_ttl_days() -> i64 {
    7
}

/// Public-key cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyCacheConfig {
    /// Trust window for a fetched public key, in hours.
    #[serde(default = "default_key_ttl_hours")]
    pub ttl_hours: i64,
}

impl Default for KeyCacheConfig {
    fn default() -> Self {
        Self {
            ttl_hours: default_key_ttl_hours(),
        }
    }
}

impl KeyCacheConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.ttl_hours <= 0 {
            return Err(ConfigError::Validation(
                "keys.ttl_hours must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_key_ttl_hours() -> i64 {
    24
}

/// External code-execution engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Explicit interpreter path; when unset, well-known names are searched.
    #[serde(default)]
    pub interpreter_path: Option<String>,
    /// Interval between interpreter availability probes, in milliseconds.
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,
    /// Maximum number of availability probes before bootstrap gives up.
    #[serde(default = "default_probe_attempts")]
    pub probe_attempts: u32,
    /// Hard ceiling for one whole bootstrap attempt, in milliseconds.
    #[serde(default = "default_bootstrap_timeout_ms")]
    pub bootstrap_timeout_ms: u64,
    /// How long a caller waits for a concurrent bootstrap to reach a
    /// terminal state before giving up, in milliseconds.
    #[serde(default = "default_wait_budget_ms")]
    pub wait_budget_ms: u64,
    /// Time budget for one submitted program, in milliseconds.
    #[serde(default = "default_exec_timeout_ms")]
    pub exec_timeout_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            interpreter_path: None,
            probe_interval_ms: default_probe_interval_ms(),
            probe_attempts: default_probe_attempts(),
            bootstrap_timeout_ms: default_bootstrap_timeout_ms(),
            wait_budget_ms: default_wait_budget_ms(),
            exec_timeout_ms: default_exec_timeout_ms(),
        }
    }
}

impl RuntimeConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.probe_attempts == 0 {
            return Err(ConfigError::Validation(
                "runtime.probe_attempts must be greater than zero".to_string(),
            ));
        }
        for (name, value) in [
            ("runtime.probe_interval_ms", self.probe_interval_ms),
            ("runtime.bootstrap_timeout_ms", self.bootstrap_timeout_ms),
            ("runtime.wait_budget_ms", self.wait_budget_ms),
            ("runtime.exec_timeout_ms", self.exec_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Validation(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }
        if self.wait_budget_ms < self.bootstrap_timeout_ms {
            return Err(ConfigError::Validation(
                "runtime.wait_budget_ms must cover runtime.bootstrap_timeout_ms".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_probe_interval_ms() -> u64 {
    100
}
fn default_probe_attempts() -> u32 {
    50
}
fn default_bootstrap_timeout_ms() -> u64 {
    20_000
}
fn default_wait_budget_ms() -> u64 {
    30_000
}
fn default_exec_timeout_ms() -> u64 {
    10_000
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
