//! Configuration system for the MOM client
//!
//! Broker credentials are never stored in the file itself; the config names
//! environment variables and the values are resolved at connect time.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Main client configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MomConfig {
    pub client: ClientSection,
    pub broker: BrokerSection,
}

/// Client section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientSection {
    /// Client identifier (must match [a-zA-Z0-9._-]+)
    pub id: String,
}

/// Broker section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// Broker URL with protocol and port (mqtt:// or mqtts://)
    pub url: String,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    /// MQTT keep-alive interval in seconds (default: 30)
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// How long to wait for the broker to acknowledge a connect (default: 10)
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid client ID format: {0}")]
    InvalidClientId(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl MomConfig {
    /// Load configuration from TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: MomConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Build a validated configuration without a file, for CLI tools
    pub fn for_broker<S: Into<String>, U: Into<String>>(
        client_id: S,
        url: U,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            client: ClientSection {
                id: client_id.into(),
            },
            broker: BrokerSection {
                url: url.into(),
                username_env: None,
                password_env: None,
                keep_alive_secs: default_keep_alive_secs(),
                connect_timeout_secs: default_connect_timeout_secs(),
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate field constraints that TOML parsing cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_client_id(&self.client.id)?;

        if self.broker.url.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "broker.url must not be empty".to_string(),
            ));
        }

        // rumqttc rejects keep-alive intervals under five seconds
        if self.broker.keep_alive_secs < 5 {
            return Err(ConfigError::InvalidConfig(format!(
                "broker.keep_alive_secs must be at least 5, got {}",
                self.broker.keep_alive_secs
            )));
        }

        Ok(())
    }

    /// Helper method to get environment variable with consistent error handling
    fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name.and_then(|name| std::env::var(name).ok())
    }

    /// Get broker username from environment variable
    pub fn get_broker_username(&self) -> Option<String> {
        Self::get_env_var_optional(self.broker.username_env.as_ref())
    }

    /// Get broker password from environment variable
    pub fn get_broker_password(&self) -> Option<String> {
        Self::get_env_var_optional(self.broker.password_env.as_ref())
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[client]
id = "test-client"

[broker]
url = "mqtt://localhost:1883"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

/// Validate client ID format
fn validate_client_id(client_id: &str) -> Result<(), ConfigError> {
    let valid_chars = client_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');

    if client_id.is_empty() || !valid_chars {
        return Err(ConfigError::InvalidClientId(format!(
            "Client ID '{client_id}' must match pattern [a-zA-Z0-9._-]+"
        )));
    }

    Ok(())
}
