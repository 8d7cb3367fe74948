//! Application configuration management.
//!
//! This module handles loading and saving the application configuration,
//! which includes the API base URL, the credential storage backend and the
//! last email used to sign in.
//!
//! Configuration is stored at `~/.config/presente/config.json`. The
//! `PRESENTE_API_URL` and `PRESENTE_STORAGE` environment variables override
//! the file; `PRESENTE_STORE_PASSPHRASE` unlocks the encrypted file store.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::{ApiClient, DEFAULT_API_URL};
use crate::auth::SessionContext;
use crate::storage::{CredentialStore, EncryptedFileStore, KeyringStore, MemoryStore, StorageBackend};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "presente";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Encrypted store file name, inside the cache directory unless configured
const STORE_FILE: &str = "session.bin";

pub const ENV_API_URL: &str = "PRESENTE_API_URL";
pub const ENV_STORAGE: &str = "PRESENTE_STORAGE";
pub const ENV_STORE_PASSPHRASE: &str = "PRESENTE_STORE_PASSPHRASE";

fn default_api_base_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_timeout() -> u64 {
    crate::api::client::REQUEST_TIMEOUT_SECS
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default)]
    pub storage: StorageBackend,
    /// Location of the encrypted store file
    #[serde(default)]
    pub store_path: Option<PathBuf>,
    #[serde(default)]
    pub last_email: Option<String>,
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            storage: StorageBackend::default(),
            store_path: None,
            last_email: None,
            request_timeout_secs: default_timeout(),
        }
    }
}

impl Config {
    /// Load the config file and apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = var(ENV_API_URL).filter(|v| !v.trim().is_empty()) {
            self.api_base_url = url.trim().to_string();
        }
        if let Some(backend) = var(ENV_STORAGE).filter(|v| !v.trim().is_empty()) {
            self.storage = backend
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .with_context(|| format!("Invalid {}", ENV_STORAGE))?;
        }
        Ok(())
    }

    fn store_file(&self) -> Result<PathBuf> {
        match &self.store_path {
            Some(path) => Ok(path.clone()),
            None => Ok(self.cache_dir()?.join(STORE_FILE)),
        }
    }

    /// Open the configured credential store.
    pub fn open_store(&self) -> Result<Arc<dyn CredentialStore>> {
        let store: Arc<dyn CredentialStore> = match self.storage {
            StorageBackend::Memory => Arc::new(MemoryStore::new()),
            StorageBackend::Keyring => Arc::new(KeyringStore::default()),
            StorageBackend::EncryptedFile => {
                let passphrase = std::env::var(ENV_STORE_PASSPHRASE).with_context(|| {
                    format!("{} must be set to use the encrypted file store", ENV_STORE_PASSPHRASE)
                })?;
                let path = self.store_file()?;
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let store = EncryptedFileStore::open(&path, &passphrase)
                    .with_context(|| format!("Failed to open {}", path.display()))?;
                Arc::new(store)
            }
        };
        Ok(store)
    }

    /// Build an API client over a fresh session backed by `store`.
    pub fn build_client(&self, store: Arc<dyn CredentialStore>) -> Result<ApiClient> {
        let session = Arc::new(SessionContext::new(store));
        ApiClient::with_timeout(
            &self.api_base_url,
            session,
            Duration::from_secs(self.request_timeout_secs),
        )
        .context("Failed to build HTTP client")
    }
}
