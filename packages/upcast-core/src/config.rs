//! Configuration types.
//!
//! [`Config`] holds the tunables shared by the discovery, sink and streaming
//! sides. [`ModuleArgs`] parses the `key=value` argument strings modules are
//! loaded with.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while parsing module arguments or validating configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("malformed module arguments: {0}")]
    Syntax(String),

    #[error("unknown module argument '{0}'")]
    UnknownKey(String),

    #[error("missing required module argument '{0}'")]
    MissingKey(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Device type that discovery watches for.
pub const MEDIA_RENDERER_URN: &str = "urn:schemas-upnp-org:device:MediaRenderer:1";

/// Service a sink needs on its device.
pub const RENDERING_CONTROL_URN: &str = "urn:schemas-upnp-org:service:RenderingControl:1";

/// Module loaded once per discovered renderer.
pub const DEVICE_MODULE_NAME: &str = "module-upnp-sink";

/// Configuration for the upcast control plane.
///
/// All fields have sensible defaults.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    // Discovery
    /// Module the discovery side loads per renderer.
    pub device_module_name: String,

    /// Device type discovery reacts to.
    pub media_renderer_urn: String,

    /// Service each sink binds its volume controls to.
    pub rendering_control_urn: String,

    // Streaming
    /// User agent sent on every RTSP request.
    pub user_agent: String,

    /// RTSP port of the streaming receiver.
    pub rtsp_port: u16,

    // Audio thread
    /// Raise the audio thread to realtime scheduling.
    pub realtime_scheduling: bool,

    /// Priority used when `realtime_scheduling` is set (1-99 on unix).
    pub realtime_priority: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_module_name: DEVICE_MODULE_NAME.to_string(),
            media_renderer_urn: MEDIA_RENDERER_URN.to_string(),
            rendering_control_urn: RENDERING_CONTROL_URN.to_string(),
            user_agent: crate::raop::DEFAULT_USER_AGENT.to_string(),
            rtsp_port: crate::raop::DEFAULT_RTSP_PORT,
            realtime_scheduling: true,
            realtime_priority: 5,
        }
    }
}

impl Config {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device_module_name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "device_module_name must not be empty".to_string(),
            ));
        }
        if self.user_agent.trim().is_empty() {
            return Err(ConfigError::Invalid("user_agent must not be empty".to_string()));
        }
        if self.rtsp_port == 0 {
            return Err(ConfigError::Invalid("rtsp_port must be >= 1".to_string()));
        }
        if !(1..=99).contains(&self.realtime_priority) {
            return Err(ConfigError::Invalid(
                "realtime_priority must be within 1..=99".to_string(),
            ));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Module Arguments
// ─────────────────────────────────────────────────────────────────────────────

/// Parsed `key=value` module arguments.
///
/// Pairs are separated by whitespace. Values may be wrapped in single or
/// double quotes to carry spaces. Every key must appear in the whitelist the
/// module passes to [`parse`](Self::parse), and may appear only once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleArgs {
    values: HashMap<String, String>,
}

impl ModuleArgs {
    /// Parses `input` against the list of keys the module accepts.
    pub fn parse(input: &str, valid_keys: &[&str]) -> Result<Self, ConfigError> {
        let mut values = HashMap::new();
        let mut rest = input.trim_start();

        while !rest.is_empty() {
            let eq = rest
                .find('=')
                .ok_or_else(|| ConfigError::Syntax(format!("expected key=value in '{rest}'")))?;
            let key = &rest[..eq];
            if key.is_empty() || key.contains(char::is_whitespace) {
                return Err(ConfigError::Syntax(format!("invalid key '{key}'")));
            }
            if !valid_keys.contains(&key) {
                return Err(ConfigError::UnknownKey(key.to_string()));
            }

            let (value, remainder) = split_value(&rest[eq + 1..])?;
            if values.insert(key.to_string(), value.to_string()).is_some() {
                return Err(ConfigError::Syntax(format!("duplicate key '{key}'")));
            }
            rest = remainder.trim_start();
        }

        Ok(Self { values })
    }

    /// Value of `key`, if given.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Value of `key`, or [`ConfigError::MissingKey`].
    pub fn require(&self, key: &str) -> Result<&str, ConfigError> {
        self.get(key)
            .ok_or_else(|| ConfigError::MissingKey(key.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Splits one value off the front of `s`, honouring quotes.
fn split_value(s: &str) -> Result<(&str, &str), ConfigError> {
    match s.chars().next() {
        Some(quote @ ('"' | '\'')) => {
            let body = &s[1..];
            let end = body
                .find(quote)
                .ok_or_else(|| ConfigError::Syntax("unterminated quoted value".to_string()))?;
            Ok((&body[..end], &body[end + 1..]))
        }
        _ => {
            let end = s.find(char::is_whitespace).unwrap_or(s.len());
            Ok((&s[..end], &s[end..]))
        }
    }
}
