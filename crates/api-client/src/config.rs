//! Connection settings
//!
//! Every connection parameter can be given in the module arguments or fall
//! back to a `PROXMOX_*` environment variable. The environment values are
//! registered as defaults so that explicit arguments always win.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use pve_shared_types::ManagedObject;

/// Default per-request timeout in seconds.
pub const DEFAULT_API_TIMEOUT: u64 = 5;

/// Default port of the Proxmox VE API daemon.
pub const DEFAULT_API_PORT: u16 = 8006;

/// Module parameter names and their environment fallbacks.
pub const ENV_FALLBACKS: &[(&str, &str)] = &[
    ("api_host", "PROXMOX_HOST"),
    ("api_port", "PROXMOX_PORT"),
    ("api_user", "PROXMOX_USER"),
    ("api_password", "PROXMOX_PASSWORD"),
    ("api_token_id", "PROXMOX_TOKEN_ID"),
    ("api_token_secret", "PROXMOX_TOKEN_SECRET"),
    ("ca_path", "PROXMOX_CA_PATH"),
    ("validate_certs", "PROXMOX_VALIDATE_CERTS"),
    ("api_timeout", "PROXMOX_API_TIMEOUT"),
];

/// Connection configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Missing required connection parameter: {0}")]
    Missing(&'static str),

    #[error("Invalid connection parameters: {0}")]
    Invalid(String),
}

/// How the client authenticates.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Password(String),
    Token { id: String, secret: String },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Password(_) => f.write_str("Password(<redacted>)"),
            Credentials::Token { id, .. } => write!(f, "Token {{ id: {id}, secret: <redacted> }}"),
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct ApiConfig {
    pub api_host: String,
    #[serde(default)]
    pub api_port: Option<u16>,
    pub api_user: String,
    #[serde(default)]
    pub api_password: Option<String>,
    #[serde(default)]
    pub api_token_id: Option<String>,
    #[serde(default)]
    pub api_token_secret: Option<String>,
    #[serde(default)]
    pub ca_path: Option<PathBuf>,
    #[serde(default)]
    pub validate_certs: Option<bool>,
    #[serde(default = "default_api_timeout")]
    pub api_timeout: u64,
}

fn default_api_timeout() -> u64 {
    DEFAULT_API_TIMEOUT
}

impl fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiConfig")
            .field("api_host", &self.api_host)
            .field("api_port", &self.api_port)
            .field("api_user", &self.api_user)
            .field("api_password", &self.api_password.as_ref().map(|_| "<redacted>"))
            .field("api_token_id", &self.api_token_id)
            .field(
                "api_token_secret",
                &self.api_token_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("ca_path", &self.ca_path)
            .field("validate_certs", &self.validate_certs)
            .field("api_timeout", &self.api_timeout)
            .finish()
    }
}

impl ApiConfig {
    /// Load connection settings from module arguments with environment
    /// fallbacks from the process environment.
    pub fn from_module_args(args: &ManagedObject) -> Result<Self, ConfigError> {
        Self::from_module_args_with_env(args, |name| std::env::var(name).ok())
    }

    /// Same as [`ApiConfig::from_module_args`] with an explicit environment lookup.
    pub fn from_module_args_with_env<F>(args: &ManagedObject, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = config::Config::builder()
            .set_default("api_timeout", DEFAULT_API_TIMEOUT.to_string())?;

        for (param, variable) in ENV_FALLBACKS {
            if let Some(value) = env(variable) {
                builder = builder.set_default(*param, value)?;
            }
        }

        let connection: ManagedObject = args
            .iter()
            .filter(|(key, value)| {
                !value.is_null() && ENV_FALLBACKS.iter().any(|(param, _)| param == key)
            })
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        let connection = Value::Object(connection).to_string();

        let settings = builder
            .add_source(config::File::from_str(&connection, config::FileFormat::Json))
            .build()?;

        let config: ApiConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_host.trim().is_empty() {
            return Err(ConfigError::Missing("api_host"));
        }

        if self.api_user.trim().is_empty() {
            return Err(ConfigError::Missing("api_user"));
        }

        match (&self.api_password, &self.api_token_id, &self.api_token_secret) {
            (Some(_), Some(_), _) => Err(ConfigError::Invalid(
                "api_password and api_token_id are mutually exclusive".to_string(),
            )),
            (None, None, _) => Err(ConfigError::Missing("api_password or api_token_id")),
            (None, Some(_), None) => Err(ConfigError::Invalid(
                "api_token_id requires api_token_secret".to_string(),
            )),
            _ => Ok(()),
        }?;

        if self.api_timeout == 0 {
            return Err(ConfigError::Invalid(
                "api_timeout must be at least one second".to_string(),
            ));
        }

        Ok(())
    }

    pub fn credentials(&self) -> Credentials {
        match (&self.api_password, &self.api_token_id, &self.api_token_secret) {
            (Some(password), _, _) => Credentials::Password(password.clone()),
            (None, Some(id), Some(secret)) => Credentials::Token {
                id: id.clone(),
                secret: secret.clone(),
            },
            // validate() rejects every other combination
            _ => Credentials::Password(String::new()),
        }
    }

    pub fn base_url(&self) -> String {
        let host = if self.api_host.contains(':') && !self.api_host.starts_with('[') {
            format!("[{}]", self.api_host)
        } else {
            self.api_host.clone()
        };
        format!(
            "https://{}:{}/api2/json",
            host,
            self.api_port.unwrap_or(DEFAULT_API_PORT)
        )
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout)
    }

    /// Certificate validation is off unless requested.
    pub fn verify_tls(&self) -> bool {
        self.validate_certs.unwrap_or(false)
    }
}
