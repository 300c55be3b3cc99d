// Purpose: Runtime configuration for the farmlink client
// Layers: built-in defaults, then farmlink.toml, then FARMLINK_* env vars

use std::path::PathBuf;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::errors::{MarketError, MarketResult};
use crate::payment_methods::DEFAULT_MAX_FETCH_ATTEMPTS;

pub const CONFIG_FILE: &str = "farmlink.toml";
pub const ENV_PREFIX: &str = "FARMLINK_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Sled,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketConfig {
    pub backend_url: String,
    pub anon_key: String,
    #[serde(default = "default_storage_backend")]
    pub storage_backend: StorageBackend,
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,
    #[serde(default = "default_fetch_attempts")]
    pub payment_fetch_max_attempts: u32,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
}

fn default_storage_backend() -> StorageBackend {
    StorageBackend::Sled
}

fn default_storage_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("farmlink")
        .join("local_store")
}

fn default_fetch_attempts() -> u32 {
    DEFAULT_MAX_FETCH_ATTEMPTS
}

fn default_page_size() -> usize {
    20
}

fn default_timeout() -> u64 {
    15
}

#[derive(Serialize)]
struct MarketConfigDefaults {
    backend_url: String,
    anon_key: String,
    storage_backend: StorageBackend,
    storage_path: PathBuf,
    payment_fetch_max_attempts: u32,
    page_size: usize,
    request_timeout_secs: u64,
}

impl Default for MarketConfigDefaults {
    fn default() -> Self {
        Self {
            backend_url: String::new(),
            anon_key: String::new(),
            storage_backend: default_storage_backend(),
            storage_path: default_storage_path(),
            payment_fetch_max_attempts: default_fetch_attempts(),
            page_size: default_page_size(),
            request_timeout_secs: default_timeout(),
        }
    }
}

impl MarketConfig {
    /// Check values no provider can be trusted to get right.
    pub fn validate(&self) -> MarketResult<()> {
        if self.backend_url.trim().is_empty() {
            return Err(MarketError::config("backend_url must be set"));
        }
        if !(self.backend_url.starts_with("http://") || self.backend_url.starts_with("https://")) {
            return Err(MarketError::config("backend_url must be an http(s) URL"));
        }
        if self.anon_key.trim().is_empty() {
            return Err(MarketError::config("anon_key must be set"));
        }
        if self.payment_fetch_max_attempts == 0 {
            return Err(MarketError::config("payment_fetch_max_attempts must be at least 1"));
        }
        if self.page_size == 0 {
            return Err(MarketError::config("page_size must be at least 1"));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }
}

/// Defaults with no file or environment applied.
pub fn base_figment() -> Figment {
    Figment::from(Serialized::defaults(MarketConfigDefaults::default()))
}

/// Extract and validate a config from an already layered figment.
pub fn extract_config(figment: Figment) -> MarketResult<MarketConfig> {
    let config: MarketConfig = figment.extract()?;
    config.validate()?;
    Ok(config)
}

/// Load from `path` (or `farmlink.toml`) and the environment.
pub fn load_config(path: Option<&str>) -> MarketResult<MarketConfig> {
    let figment = base_figment()
        .merge(Toml::file(path.unwrap_or(CONFIG_FILE)))
        .merge(Env::prefixed(ENV_PREFIX));
    extract_config(figment)
}
