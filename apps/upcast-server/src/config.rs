//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use upcast_core::Config;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Streaming receiver to connect to.
    /// Override: `UPCAST_HOST`
    pub host: Option<String>,

    /// RTSP port of the receiver.
    /// Override: `UPCAST_RTSP_PORT`
    pub rtsp_port: u16,

    /// User agent sent with every RTSP request.
    /// Override: `UPCAST_USER_AGENT`
    pub user_agent: String,

    /// Volume in percent applied once the session is recording.
    /// Override: `UPCAST_VOLUME`
    pub volume: Option<u32>,

    /// Seconds allowed for connecting and for each exchange.
    pub io_timeout_secs: u64,

    /// Raise audio threads to realtime scheduling.
    pub realtime_scheduling: bool,

    /// Priority used when realtime scheduling is enabled.
    pub realtime_priority: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let core = Config::default();
        Self {
            host: None,
            rtsp_port: core.rtsp_port,
            user_agent: core.user_agent,
            volume: None,
            io_timeout_secs: 10,
            realtime_scheduling: core.realtime_scheduling,
            realtime_priority: core.realtime_priority,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("UPCAST_RTSP_PORT") {
            if let Ok(port) = val.parse() {
                self.rtsp_port = port;
            }
        }

        if let Ok(val) = std::env::var("UPCAST_USER_AGENT") {
            if !val.trim().is_empty() {
                self.user_agent = val;
            }
        }

        if let Ok(val) = std::env::var("UPCAST_VOLUME") {
            if let Ok(volume) = val.parse() {
                self.volume = Some(volume);
            }
        }

        // Note: UPCAST_HOST is handled by clap via #[arg(env = ...)] in main.rs
    }

    /// Converts to upcast-core's Config type.
    pub fn to_core_config(&self) -> Config {
        Config {
            user_agent: self.user_agent.clone(),
            rtsp_port: self.rtsp_port,
            realtime_scheduling: self.realtime_scheduling,
            realtime_priority: self.realtime_priority,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_core() {
        let config = ServerConfig::default();
        let core = config.to_core_config();
        assert_eq!(core, Config::default());
        assert!(config.host.is_none());
    }

    #[test]
    fn loads_yaml_with_partial_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "host: 10.0.0.5\nuser_agent: Test/1.0\nvolume: 40").unwrap();

        let config = ServerConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.host.as_deref(), Some("10.0.0.5"));
        assert_eq!(config.user_agent, "Test/1.0");
        assert_eq!(config.volume, Some(40));
        assert_eq!(config.io_timeout_secs, 10);

        let core = config.to_core_config();
        assert_eq!(core.user_agent, "Test/1.0");
        assert!(core.validate().is_ok());
    }

    #[test]
    fn unreadable_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.yaml");
        let err = ServerConfig::load(Some(&missing)).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn malformed_yaml_is_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "rtsp_port: [not, a, port]").unwrap();
        let err = ServerConfig::load(Some(file.path())).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
