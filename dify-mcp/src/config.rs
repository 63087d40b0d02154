//! Server configuration using Figment
//!
//! Sources, lowest precedence first:
//! 1. built-in defaults
//! 2. an optional config file (TOML, YAML or JSON, picked by extension)
//! 3. `DIFY_*` environment variables, e.g. `DIFY_API_KEYS=app-a,app-b`
//! 4. command-line overrides

use crate::error::ConfigError;
use crate::invocation::InvocationOptions;
use crate::registry::Credential;
use dify_client::DEFAULT_USER;
use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Prefix of configuration environment variables
pub const ENV_PREFIX: &str = "DIFY_";

/// Default Dify service API base URL
pub const DEFAULT_BASE_URL: &str = "http://localhost/v1";

/// MCP transport to serve on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Streamable HTTP at `/mcp`
    #[default]
    Http,
    /// stdin/stdout
    Stdio,
}

impl FromStr for Transport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Transport::Http),
            "stdio" => Ok(Transport::Stdio),
            other => Err(format!(
                "unknown transport '{}', expected 'http' or 'stdio'",
                other
            )),
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Http => f.write_str("http"),
            Transport::Stdio => f.write_str("stdio"),
        }
    }
}

/// Complete server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub base_url: String,
    /// Application credentials, one workflow each
    #[serde(deserialize_with = "list_or_csv")]
    pub api_keys: Vec<Credential>,
    /// Optional tool names, one per credential
    #[serde(deserialize_with = "list_or_csv")]
    pub workflow_names: Vec<String>,
    pub user: String,
    pub invocation_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub transport: Transport,
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_keys: Vec::new(),
            workflow_names: Vec::new(),
            user: DEFAULT_USER.to_string(),
            invocation_timeout_secs: 300,
            connect_timeout_secs: 10,
            transport: Transport::default(),
            host: "127.0.0.1".to_string(),
            port: 8096,
        }
    }
}

/// Values given on the command line; unset fields leave lower layers alone
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<Transport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invocation_timeout_secs: Option<u64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ListOrCsv {
    Csv(String),
    List(Vec<String>),
}

/// Accept either a list or a comma-separated string
fn list_or_csv<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: From<String>,
{
    let items = match ListOrCsv::deserialize(deserializer)? {
        ListOrCsv::Csv(text) => text.split(',').map(str::to_string).collect(),
        ListOrCsv::List(items) => items,
    };
    Ok(items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .map(T::from)
        .collect())
}

impl ServerConfig {
    /// Load and validate configuration from all sources
    pub fn load(
        config_file: Option<&Path>,
        overrides: &ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let config: ServerConfig = Self::figment(config_file, overrides)?.extract()?;
        config.validate()?;
        debug!(
            "Loaded configuration: {} credentials, base URL {}, transport {}",
            config.api_keys.len(),
            config.base_url,
            config.transport
        );
        Ok(config)
    }

    /// Assemble the layered configuration sources
    pub fn figment(
        config_file: Option<&Path>,
        overrides: &ConfigOverrides,
    ) -> Result<Figment, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(ServerConfig::default()));
        if let Some(path) = config_file {
            figment = figment.merge(Self::file_provider(path)?);
        }
        Ok(figment
            .merge(Env::prefixed(ENV_PREFIX).map(|key| key.as_str().to_lowercase().into()))
            .merge(Serialized::defaults(overrides)))
    }

    fn file_provider(path: &Path) -> Result<Figment, ConfigError> {
        if !path.is_file() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        match extension.as_str() {
            "toml" => Ok(Figment::from(Toml::file(path))),
            "yaml" | "yml" => Ok(Figment::from(Yaml::file(path))),
            "json" => Ok(Figment::from(Json::file(path))),
            _ => Err(ConfigError::UnsupportedFormat {
                format: path.display().to_string(),
            }),
        }
    }

    /// Check the values that cannot be defaulted
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_keys.is_empty() {
            return Err(ConfigError::ValidationError {
                message: format!(
                    "at least one Dify API key is required (set {}API_KEYS or api_keys)",
                    ENV_PREFIX
                ),
            });
        }
        if !self.workflow_names.is_empty() && self.workflow_names.len() != self.api_keys.len() {
            return Err(ConfigError::ValidationError {
                message: format!(
                    "{} workflow names configured for {} API keys",
                    self.workflow_names.len(),
                    self.api_keys.len()
                ),
            });
        }
        match url::Url::parse(&self.base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => {
                return Err(ConfigError::InvalidValue {
                    key: "base_url".to_string(),
                    message: format!("unsupported scheme '{}'", url.scheme()),
                })
            }
            Err(e) => {
                return Err(ConfigError::InvalidValue {
                    key: "base_url".to_string(),
                    message: e.to_string(),
                })
            }
        }
        if self.invocation_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "invocation_timeout_secs".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "connect_timeout_secs".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.user.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "user".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn invocation_timeout(&self) -> Duration {
        Duration::from_secs(self.invocation_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Per-invocation settings derived from this configuration
    pub fn invocation_options(&self) -> InvocationOptions {
        InvocationOptions {
            user: self.user.clone(),
            timeout: self.invocation_timeout(),
        }
    }
}
