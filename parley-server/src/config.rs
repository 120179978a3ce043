//! Server configuration
//!
//! Loaded from the XDG config file when present, defaults otherwise.

use serde::{Deserialize, Serialize};

use parley_utils::{config_file, ParleyError, Result};

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
}

/// Server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the TCP listener binds to
    pub listen_addr: String,
    /// Bound of each session's outbound message queue
    pub outbound_capacity: usize,
    /// Seconds a new connection may take to complete the Join handshake
    pub handshake_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:1500".into(),
            outbound_capacity: 64,
            handshake_timeout_secs: 10,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default config file
    ///
    /// A missing file yields the defaults; an unreadable or malformed file
    /// is an error so typos do not silently revert settings.
    pub fn load() -> Result<Self> {
        let path = config_file();
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&path)?;
        Self::from_toml(&contents)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| ParleyError::config(format!("Invalid configuration: {}", e)))
    }
}
