//! Hub configuration
//!
//! Resolution follows a fixed priority order:
//! 1. Command-line arguments / their environment fallbacks (applied by the binary)
//! 2. TOML config file (explicit path, else `~/.config/intake/hub.toml`,
//!    else `/etc/intake/hub.toml`)
//! 3. Built-in defaults

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_PORT: u16 = 5780;
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_LOG_LEVEL: &str = "intake_hub=info,tower_http=info";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HubConfig {
    pub database_path: PathBuf,
    pub bind_address: String,
    pub port: u16,
    pub engine: EngineConfig,
    pub presence: PresenceConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Longest a mutation waits for its submission's critical section
    pub mutation_timeout_ms: u64,
    /// Events buffered per subscriber before it is considered lagging
    pub event_bus_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PresenceConfig {
    /// A record not refreshed within this window is evicted
    pub heartbeat_timeout_secs: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub level: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            engine: EngineConfig::default(),
            presence: PresenceConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mutation_timeout_ms: 2000,
            event_bus_capacity: 1000,
        }
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: 45,
            sweep_interval_secs: 5,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl EngineConfig {
    pub fn mutation_timeout(&self) -> Duration {
        crate::time::millis_to_duration(self.mutation_timeout_ms)
    }
}

impl PresenceConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl HubConfig {
    /// Parse a TOML document; absent keys take their defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: HubConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `explicit` if given, else from the first platform config
    /// file that exists, else built-in defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(Error::Config(format!(
                        "Config file not found: {}",
                        path.display()
                    )));
                }
                Some(path.to_path_buf())
            }
            None => find_config_file(),
        };

        match path {
            Some(path) => {
                let content = std::fs::read_to_string(&path)?;
                let config = Self::from_toml_str(&content)?;
                info!("Loaded configuration from {}", path.display());
                Ok(config)
            }
            None => {
                debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.engine.mutation_timeout_ms == 0 {
            return Err(Error::Config(
                "engine.mutation_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.engine.event_bus_capacity == 0 {
            return Err(Error::Config(
                "engine.event_bus_capacity must be greater than zero".to_string(),
            ));
        }
        if self.presence.heartbeat_timeout_secs == 0 {
            return Err(Error::Config(
                "presence.heartbeat_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.presence.sweep_interval_secs == 0 {
            return Err(Error::Config(
                "presence.sweep_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.bind_address.trim().is_empty() {
            return Err(Error::Config("bind_address must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

fn find_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("intake").join("hub.toml"));
    let system_config = PathBuf::from("/etc/intake/hub.toml");

    user_config
        .into_iter()
        .chain(std::iter::once(system_config))
        .find(|p| p.exists())
}

/// Default database location under the platform data directory
pub fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("intake"))
        .unwrap_or_else(|| PathBuf::from("./intake_data"))
        .join("intake.db")
}
