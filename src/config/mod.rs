//! Configuration module
//!
//! Handles loading and saving meshdisco configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::protocol::{DiscoveryMessage, DEFAULT_PORT, MAX_HOST_LEN, MSG_TYPE_SIMPLE};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Discovery settings
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

/// General configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Host or service identifier to advertise
    #[serde(default = "default_host_server")]
    pub host_server: String,
    /// Port the advertised service listens on
    #[serde(default = "default_service_port")]
    pub service_port: u16,
    /// Enable verbose logging
    #[serde(default)]
    pub verbose: bool,
}

fn default_host_server() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

fn default_service_port() -> u16 {
    8080
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            host_server: default_host_server(),
            service_port: default_service_port(),
            verbose: false,
        }
    }
}

/// Discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Port discovery datagrams are sent to and received on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Interface to bind to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Where announcements are sent
    #[serde(default = "default_target")]
    pub target: String,
    /// Announcement interval in ms
    #[serde(default = "default_announce_interval")]
    pub announce_interval_ms: u64,
    /// Wire variant for announcements (0 = simple)
    #[serde(default)]
    pub msg_type: u8,
    /// State code to advertise
    #[serde(default)]
    pub state: u8,
    /// Optional payload to advertise
    pub payload: Option<String>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_target() -> String {
    format!("255.255.255.255:{}", DEFAULT_PORT)
}

fn default_announce_interval() -> u64 {
    5000
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_bind_address(),
            target: default_target(),
            announce_interval_ms: default_announce_interval(),
            msg_type: MSG_TYPE_SIMPLE,
            state: 0,
            payload: None,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default location
    pub fn load_default() -> ConfigResult<Self> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("meshdisco/config.toml")),
            Some(PathBuf::from("./meshdisco.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                tracing::debug!("Loading configuration from {}", path.display());
                return Self::load(path);
            }
        }

        Ok(Self::default())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Reject values the wire format cannot carry
    pub fn validate(&self) -> ConfigResult<()> {
        if self.general.host_server.len() > MAX_HOST_LEN {
            return Err(ConfigError::Invalid(format!(
                "host_server is {} bytes (max: {})",
                self.general.host_server.len(),
                MAX_HOST_LEN
            )));
        }
        Ok(())
    }

    /// The message this host advertises
    pub fn announcement(&self) -> DiscoveryMessage {
        let msg = DiscoveryMessage::new(
            self.discovery.state,
            self.general.service_port,
            self.general.host_server.clone(),
        );
        match &self.discovery.payload {
            Some(payload) => msg.with_payload(payload.clone()),
            None => msg,
        }
    }

    /// Address the listener binds to
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.discovery.bind_address, self.discovery.port)
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config() -> ConfigResult<String> {
    let config = Config {
        general: GeneralConfig {
            host_server: "svc-a".to_string(),
            service_port: 8080,
            verbose: false,
        },
        discovery: DiscoveryConfig {
            payload: Some("{\"queues\":[\"prices\"]}".to_string()),
            ..Default::default()
        },
    };

    Ok(toml::to_string_pretty(&config)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.discovery.port, DEFAULT_PORT);
        assert_eq!(config.discovery.msg_type, MSG_TYPE_SIMPLE);
        assert_eq!(config.listen_address(), format!("0.0.0.0:{}", DEFAULT_PORT));
    }

    #[test]
    fn test_save_and_load() {
        let config = Config::default();
        let file = NamedTempFile::new().unwrap();

        config.save(file.path()).unwrap();

        let loaded = Config::load(file.path()).unwrap();
        assert_eq!(loaded.discovery.port, config.discovery.port);
        assert_eq!(loaded.general.host_server, config.general.host_server);
    }

    #[test]
    fn test_sample_config() {
        let sample = generate_sample_config().unwrap();
        let parsed: Config = toml::from_str(&sample).unwrap();
        assert_eq!(parsed.general.host_server, "svc-a");

        let msg = parsed.announcement();
        assert_eq!(msg.port, 8080);
        assert_eq!(msg.payload.as_deref(), Some("{\"queues\":[\"prices\"]}"));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[general]\nhost_server = \"svc-b\"\n\n[discovery]\nstate = 2").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.general.service_port, 8080);
        assert_eq!(config.discovery.state, 2);
        assert_eq!(config.discovery.announce_interval_ms, 5000);
        assert_eq!(config.announcement().payload, None);
    }

    #[test]
    fn test_oversized_host_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[general]\nhost_server = \"{}\"", "h".repeat(256)).unwrap();

        assert!(matches!(
            Config::load(file.path()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let result = Config::load(Path::new("/nonexistent/meshdisco.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }
}
