//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/resync/config.toml)
//! 3. Environment variables (RESYNC_* prefix)
//!
//! Environment variables take precedence over config file values.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::session::{
    Backoff, SessionOptions, SessionTarget, DEFAULT_ACK_TOKEN, DEFAULT_PROBE_TOKEN,
};

/// Environment variable prefix
const ENV_PREFIX: &str = "RESYNC";

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// WebSocket address of the state server
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Session identifier appended to the server URL (e.g. a game id)
    #[serde(default)]
    pub session: Option<String>,

    /// Delay before the first reconnect, in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound on the reconnect delay, in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Seconds between liveness probes
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,

    /// Frame sent as a liveness probe
    #[serde(default = "default_probe_token")]
    pub probe_token: String,

    /// Frame the server acknowledges a probe with
    #[serde(default = "default_ack_token")]
    pub ack_token: String,

    /// Log level for resync crates
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Write logs to this file instead of stderr
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            session: None,
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            heartbeat_secs: default_heartbeat_secs(),
            probe_token: default_probe_token(),
            ack_token: default_ack_token(),
            log_level: default_log_level(),
            log_file: None,
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (RESYNC_SERVER_URL, RESYNC_SESSION, ...)
    /// 2. Config file (~/.config/resync/config.toml or RESYNC_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration, preferring a path given on the command line
    pub fn load_with_cli_override(path: Option<&PathBuf>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // RESYNC_SERVER_URL
        if let Ok(val) = std::env::var(format!("{}_SERVER_URL", ENV_PREFIX)) {
            if !val.is_empty() {
                self.server_url = val;
            }
        }

        // RESYNC_SESSION
        if let Ok(val) = std::env::var(format!("{}_SESSION", ENV_PREFIX)) {
            self.session = if val.is_empty() { None } else { Some(val) };
        }

        override_number("BASE_DELAY_MS", &mut self.base_delay_ms);
        override_number("MAX_DELAY_MS", &mut self.max_delay_ms);
        override_number("HEARTBEAT_SECS", &mut self.heartbeat_secs);

        // RESYNC_LOG_LEVEL
        if let Ok(val) = std::env::var(format!("{}_LOG_LEVEL", ENV_PREFIX)) {
            if !val.is_empty() {
                self.log_level = val;
            }
        }
    }

    /// Check that the values make sense together
    pub fn validate(&self) -> Result<()> {
        if self.base_delay_ms == 0 {
            bail!("base_delay_ms must be greater than zero");
        }
        if self.max_delay_ms < self.base_delay_ms {
            bail!(
                "max_delay_ms ({}) must not be smaller than base_delay_ms ({})",
                self.max_delay_ms,
                self.base_delay_ms
            );
        }
        if self.heartbeat_secs == 0 {
            bail!("heartbeat_secs must be greater than zero");
        }
        if self.probe_token.is_empty() || self.ack_token.is_empty() {
            bail!("probe_token and ack_token must not be empty");
        }
        Ok(())
    }

    /// Save configuration to the default file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to a specific file
    pub fn save_to_path(&self, config_path: &PathBuf) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with RESYNC_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("resync")
            .join("config.toml")
    }

    /// Build the session target from `server_url` and `session`
    pub fn target(&self) -> Result<SessionTarget> {
        let target = SessionTarget::parse(&self.server_url)
            .with_context(|| format!("Invalid server_url '{}'", self.server_url))?;

        match self.session {
            Some(ref session) => target
                .with_segment(session)
                .with_context(|| format!("Invalid session '{}'", session)),
            None => Ok(target),
        }
    }

    /// Session tunables derived from this configuration
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            backoff: Backoff::new(
                Duration::from_millis(self.base_delay_ms),
                Duration::from_millis(self.max_delay_ms),
            ),
            heartbeat_interval: Duration::from_secs(self.heartbeat_secs),
            probe_token: self.probe_token.clone(),
            ack_token: self.ack_token.clone(),
        }
    }
}

/// Override a numeric setting from RESYNC_<name>, ignoring unparsable values
fn override_number<T: FromStr>(name: &str, target: &mut T) {
    let var = format!("{}_{}", ENV_PREFIX, name);
    if let Ok(val) = std::env::var(&var) {
        match val.parse() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!("Ignoring {}={:?}: not a number", var, val),
        }
    }
}

fn default_server_url() -> String {
    "ws://localhost:8000/ws".to_string()
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    5000
}

fn default_heartbeat_secs() -> u64 {
    10
}

fn default_probe_token() -> String {
    DEFAULT_PROBE_TOKEN.to_string()
}

fn default_ack_token() -> String {
    DEFAULT_ACK_TOKEN.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}
