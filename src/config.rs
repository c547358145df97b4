use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde::Deserialize;

// -----------------------------------------------------------------------------
// Config (root)
// -----------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub transport: TransportConfig,
}

impl Config {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let path = Path::new(path);
        let contents = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        serde_saphyr::from_str(&contents).map_err(ConfigError::Yaml)
    }
}

// -----------------------------------------------------------------------------
// ServerConfig
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    4000
}

// -----------------------------------------------------------------------------
// TransportConfig
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct TransportConfig {
    /// Path the long-poll endpoint is mounted at.
    #[serde(default = "default_mount_path")]
    pub mount_path: String,
    /// Bound on the flush and publish waits, in milliseconds.
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    /// Bound on the subscribe-ack wait, in milliseconds.
    #[serde(default = "default_pubsub_timeout_ms")]
    pub pubsub_timeout_ms: u64,
    /// Credential lifetime, in seconds.
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
    /// Token signing secret. A process-local random secret is generated
    /// when unset, which invalidates tokens across restarts.
    #[serde(default)]
    pub secret: Option<String>,
    /// Default log filter when RUST_LOG is unset.
    #[serde(default = "default_log")]
    pub log: String,
    #[serde(default)]
    pub check_origin: CheckOrigin,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mount_path: default_mount_path(),
            window_ms: default_window_ms(),
            pubsub_timeout_ms: default_pubsub_timeout_ms(),
            max_age_secs: default_max_age_secs(),
            secret: None,
            log: default_log(),
            check_origin: CheckOrigin::default(),
        }
    }
}

fn default_mount_path() -> String {
    "/longpoll".to_string()
}

fn default_window_ms() -> u64 {
    10_000
}

fn default_pubsub_timeout_ms() -> u64 {
    2_000
}

fn default_max_age_secs() -> u64 {
    1_209_600
}

fn default_log() -> String {
    "info".to_string()
}

/// Origin policy for the long-poll mount: a blanket on/off switch or an
/// explicit allow-list of origins.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CheckOrigin {
    Enabled(bool),
    Allow(Vec<String>),
}

impl Default for CheckOrigin {
    fn default() -> Self {
        CheckOrigin::Enabled(false)
    }
}

// -----------------------------------------------------------------------------
// ConfigError
// -----------------------------------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_saphyr::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "failed to read config file: {e}"),
            ConfigError::Yaml(e) => write!(f, "failed to parse config file: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Yaml(e) => Some(e),
        }
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------
