// src/config.rs
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;
use url::Url;

use crate::psa_client::{PsaConfig, DEFAULT_TIMEOUT_SECS};

pub const DEFAULT_DATA_FILE: &str = "./hoursync_data.json";
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";
pub const DEFAULT_SERVER_PORT: u16 = 3000;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read environment configuration")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_data_file() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_FILE)
}

fn default_server_host() -> String {
    DEFAULT_SERVER_HOST.to_string()
}

fn default_server_port() -> u16 {
    DEFAULT_SERVER_PORT
}

/// Service configuration, read from the environment (and `.env` if present).
/// Field `psa_base_url` is read from `PSA_BASE_URL`, and so on.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    // PSA source; only required by commands that talk to the PSA API
    #[serde(default)]
    pub psa_base_url: Option<String>,
    #[serde(default)]
    pub psa_token_url: Option<String>,
    #[serde(default)]
    pub psa_client_id: Option<String>,
    #[serde(default)]
    pub psa_client_secret: Option<String>,
    #[serde(default)]
    pub psa_scope: Option<String>,
    #[serde(default)]
    pub psa_api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub psa_timeout_secs: u64,

    // Triggers
    #[serde(default)]
    pub cron_secret: Option<String>,

    // Storage
    #[serde(default = "default_data_file")]
    pub data_file: PathBuf,

    // Server
    #[serde(default = "default_server_host")]
    pub server_host: String,
    #[serde(default = "default_server_port")]
    pub server_port: u16,
    #[serde(default)]
    pub cert_path: Option<PathBuf>,
    #[serde(default)]
    pub key_path: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        dotenv::dotenv().ok();
        let config = envy::from_env::<AppConfig>()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_iter<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config = envy::from_iter::<_, AppConfig>(vars)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(base) = self.psa_base_url.as_deref() {
            let base = base.trim();
            if base.is_empty() {
                return Err(ConfigError::Invalid("PSA_BASE_URL is empty".to_string()));
            }
            Url::parse(base)
                .map_err(|e| ConfigError::Invalid(format!("PSA_BASE_URL '{}': {}", base, e)))?;
        }

        if self.psa_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "PSA_TIMEOUT_SECS must be greater than zero".to_string(),
            ));
        }
        if self.cert_path.is_some() != self.key_path.is_some() {
            return Err(ConfigError::Invalid(
                "CERT_PATH and KEY_PATH must be set together".to_string(),
            ));
        }
        Ok(())
    }

    /// `None` when unset or blank, which leaves the cron trigger open.
    pub fn cron_secret(&self) -> Option<&str> {
        self.cron_secret
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn tls_paths(&self) -> Option<(PathBuf, PathBuf)> {
        match (&self.cert_path, &self.key_path) {
            (Some(cert), Some(key)) => Some((cert.clone(), key.clone())),
            _ => None,
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    /// Fails when `PSA_BASE_URL` is not set.
    pub fn psa_config(&self) -> Result<PsaConfig, ConfigError> {
        let base_url = self
            .psa_base_url
            .clone()
            .ok_or_else(|| ConfigError::Invalid("PSA_BASE_URL is not set".to_string()))?;
        Ok(PsaConfig {
            base_url,
            token_url: self.psa_token_url.clone(),
            client_id: self.psa_client_id.clone(),
            client_secret: self.psa_client_secret.clone(),
            scope: self.psa_scope.clone(),
            api_key: self.psa_api_key.clone(),
            timeout_secs: self.psa_timeout_secs,
        })
    }
}
