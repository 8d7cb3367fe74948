use std::collections::HashMap;
use std::path::{Path, PathBuf};

use argon2::Argon2;
use async_trait::async_trait;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::sync::Mutex;
use tracing::debug;

use super::{CredentialStore, StoreError};

/// File header identifying the format version
const MAGIC: &[u8; 4] = b"PRS1";

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Durable store kept in a single encrypted file.
///
/// Layout: `MAGIC | salt | nonce | ciphertext`, where the plaintext is a JSON
/// object of key/value pairs. The key is derived from the passphrase with
/// Argon2 over the per-file salt; every write uses a fresh nonce.
pub struct EncryptedFileStore {
    path: PathBuf,
    salt: [u8; SALT_LEN],
    cipher: ChaCha20Poly1305,
    entries: Mutex<HashMap<String, String>>,
}

impl EncryptedFileStore {
    /// Open the store at `path`, creating it on first write.
    ///
    /// Fails with `StoreError::Crypto` when an existing file does not
    /// decrypt under `passphrase`.
    pub fn open(path: impl Into<PathBuf>, passphrase: &str) -> Result<Self, StoreError> {
        let path = path.into();

        if path.exists() {
            let contents = std::fs::read(&path)?;
            let (salt, nonce, ciphertext) = split_file(&contents)?;
            let cipher = derive_cipher(passphrase, &salt)?;
            let plaintext = cipher
                .decrypt(Nonce::from_slice(&nonce), ciphertext)
                .map_err(|_| StoreError::Crypto("Wrong passphrase or corrupt store".to_string()))?;
            let entries: HashMap<String, String> = serde_json::from_slice(&plaintext)?;
            debug!(path = %path.display(), count = entries.len(), "Opened encrypted store");

            Ok(Self {
                path,
                salt,
                cipher,
                entries: Mutex::new(entries),
            })
        } else {
            let mut salt = [0u8; SALT_LEN];
            OsRng.fill_bytes(&mut salt);
            let cipher = derive_cipher(passphrase, &salt)?;

            Ok(Self {
                path,
                salt,
                cipher,
                entries: Mutex::new(HashMap::new()),
            })
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &HashMap<String, String>) -> Result<(), StoreError> {
        let plaintext = serde_json::to_vec(entries)?;

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_ref())
            .map_err(|_| StoreError::Crypto("Failed to encrypt store".to_string()))?;

        let mut contents = Vec::with_capacity(MAGIC.len() + SALT_LEN + NONCE_LEN + ciphertext.len());
        contents.extend_from_slice(MAGIC);
        contents.extend_from_slice(&self.salt);
        contents.extend_from_slice(&nonce);
        contents.extend_from_slice(&ciphertext);

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Write a sibling file, then rename over the target
        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, &contents)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))?;
        }

        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

fn derive_cipher(passphrase: &str, salt: &[u8]) -> Result<ChaCha20Poly1305, StoreError> {
    let mut key = [0u8; KEY_LEN];
    Argon2::default()
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| StoreError::Crypto(format!("Key derivation failed: {}", e)))?;
    Ok(ChaCha20Poly1305::new(Key::from_slice(&key)))
}

fn split_file(contents: &[u8]) -> Result<([u8; SALT_LEN], [u8; NONCE_LEN], &[u8]), StoreError> {
    let header_len = MAGIC.len() + SALT_LEN + NONCE_LEN;
    if contents.len() < header_len || &contents[..MAGIC.len()] != MAGIC {
        return Err(StoreError::Crypto("Not a presente store file".to_string()));
    }

    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(&contents[MAGIC.len()..MAGIC.len() + SALT_LEN]);
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&contents[MAGIC.len() + SALT_LEN..header_len]);

    Ok((salt, nonce, &contents[header_len..]))
}

#[async_trait]
impl CredentialStore for EncryptedFileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        let previous = entries.insert(key.to_string(), value.to_string());
        if let Err(e) = self.persist(&entries) {
            // Keep memory consistent with what is on disk
            match previous {
                Some(old) => entries.insert(key.to_string(), old),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        let Some(previous) = entries.remove(key) else {
            return Ok(());
        };
        if let Err(e) = self.persist(&entries) {
            entries.insert(key.to_string(), previous);
            return Err(e);
        }
        Ok(())
    }
}
