use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::CoreResult;

/// Default console port when none is configured.
pub const DEFAULT_CONSOLE_PORT: u16 = 16001;

/// Console runtime configuration.
///
/// An empty host means "bind every local address". When `properties_path`
/// is set, configuration changes made during a run (currently the
/// distribution directory) are persisted there as TOML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub properties_path: Option<PathBuf>,
    #[serde(default)]
    pub distribution_directory: Option<PathBuf>,
}

const fn default_port() -> u16 {
    DEFAULT_CONSOLE_PORT
}

impl ConsoleConfig {
    #[must_use]
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_owned(),
            port,
            properties_path: None,
            distribution_directory: None,
        }
    }

    /// Parse a configuration from TOML.
    ///
    /// # Errors
    ///
    /// Returns an error when the document is not valid TOML or is missing
    /// required values.
    pub fn from_toml_str(raw: &str) -> CoreResult<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Render the configuration as TOML for persistence.
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration cannot be serialized.
    pub fn to_toml_string(&self) -> CoreResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self::new("", DEFAULT_CONSOLE_PORT)
    }
}
