//! Credential persistence for session secrets.
//!
//! This module provides the `CredentialStore` trait and its backends:
//! - `MemoryStore`: volatile, lives as long as the process
//! - `KeyringStore`: durable OS keychain storage via keyring
//! - `EncryptedFileStore`: durable passphrase-encrypted file for hosts
//!   without a keychain
//!
//! The backend is picked once at startup (see `StorageBackend`) and handed
//! to the session as an `Arc<dyn CredentialStore>`.

pub mod encrypted;
pub mod keychain;
pub mod memory;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use encrypted::EncryptedFileStore;
pub use keychain::KeyringStore;
pub use memory::MemoryStore;

/// Keys under which session values are persisted.
pub mod keys {
    pub const ACCESS_TOKEN: &str = "access_token";
    pub const REFRESH_TOKEN: &str = "refresh_token";
    pub const ROLE: &str = "user_type";
    pub const DISPLAY_NAME: &str = "first_name";
    pub const SELECTED_PROFILE: &str = "selected_profile";

    /// Every key a teardown must remove.
    pub const ALL: [&str; 5] = [
        ACCESS_TOKEN,
        REFRESH_TOKEN,
        ROLE,
        DISPLAY_NAME,
        SELECTED_PROFILE,
    ];
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encryption error: {0}")]
    Crypto(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage task failed: {0}")]
    Task(String),
}

/// Async key-value store for session secrets.
///
/// Deleting a key that does not exist succeeds.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Which `CredentialStore` implementation to open at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageBackend {
    /// Volatile; nothing survives the process.
    Memory,
    /// OS keychain.
    #[default]
    Keyring,
    /// Passphrase-encrypted file.
    EncryptedFile,
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageBackend::Memory => write!(f, "memory"),
            StorageBackend::Keyring => write!(f, "keyring"),
            StorageBackend::EncryptedFile => write!(f, "encrypted-file"),
        }
    }
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "keyring" | "keychain" => Ok(StorageBackend::Keyring),
            "encrypted-file" | "file" => Ok(StorageBackend::EncryptedFile),
            other => Err(format!("Unknown storage backend: {}", other)),
        }
    }
}
