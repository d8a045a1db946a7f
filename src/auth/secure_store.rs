//! Encrypted key-value storage for credentials.
//!
//! Values are sealed with AES-256-GCM (random 96-bit nonce prepended to the
//! ciphertext) and kept base64-encoded in a small JSON file. The key lives in
//! a separate file created on first use.

use aes_gcm::{
  aead::{Aead, KeyInit},
  Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use color_eyre::{eyre::eyre, Result};
use rand::RngCore;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Backend for small secrets.
pub trait SecureStore: Send + Sync {
  fn get(&self, key: &str) -> Result<Option<String>>;

  /// Write all entries in one step.
  fn put(&self, entries: &[(&str, &str)]) -> Result<()>;

  fn remove(&self, keys: &[&str]) -> Result<()>;
}

/// AES-GCM sealed JSON file.
pub struct EncryptedFileStore {
  path: PathBuf,
  cipher: Aes256Gcm,
  entries: Mutex<BTreeMap<String, String>>,
}

impl EncryptedFileStore {
  /// Open (or create) the store at `path`, using the key at `key_path`.
  pub fn open(path: &Path, key_path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create secure store directory: {}", e))?;
    }

    let key = load_or_create_key(key_path)?;
    let cipher =
      Aes256Gcm::new_from_slice(&key).map_err(|e| eyre!("Invalid secure store key: {}", e))?;

    let entries = if path.exists() {
      let raw = std::fs::read_to_string(path)
        .map_err(|e| eyre!("Failed to read secure store {}: {}", path.display(), e))?;
      serde_json::from_str(&raw)
        .map_err(|e| eyre!("Corrupt secure store {}: {}", path.display(), e))?
    } else {
      BTreeMap::new()
    };

    Ok(Self {
      path: path.to_path_buf(),
      cipher,
      entries: Mutex::new(entries),
    })
  }

  fn seal(&self, plaintext: &str) -> Result<String> {
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = self
      .cipher
      .encrypt(nonce, plaintext.as_bytes())
      .map_err(|e| eyre!("Failed to encrypt value: {}", e))?;

    let mut sealed = nonce_bytes.to_vec();
    sealed.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(sealed))
  }

  fn open_sealed(&self, sealed: &str) -> Result<String> {
    let data = BASE64
      .decode(sealed)
      .map_err(|e| eyre!("Invalid sealed value: {}", e))?;
    if data.len() < NONCE_LEN {
      return Err(eyre!("Invalid sealed value: too short"));
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
    let plaintext = self
      .cipher
      .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
      .map_err(|e| eyre!("Failed to decrypt value: {}", e))?;

    String::from_utf8(plaintext).map_err(|e| eyre!("Decrypted value is not UTF-8: {}", e))
  }

  /// Write to a sibling temp file, then rename over the real one.
  fn flush(&self, entries: &BTreeMap<String, String>) -> Result<()> {
    let json = serde_json::to_vec_pretty(entries)
      .map_err(|e| eyre!("Failed to serialize secure store: {}", e))?;
    let tmp = self.path.with_extension("tmp");
    std::fs::write(&tmp, json).map_err(|e| eyre!("Failed to write secure store: {}", e))?;
    std::fs::rename(&tmp, &self.path)
      .map_err(|e| eyre!("Failed to replace secure store: {}", e))?;
    Ok(())
  }
}

impl SecureStore for EncryptedFileStore {
  fn get(&self, key: &str) -> Result<Option<String>> {
    let entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    entries
      .get(key)
      .map(|sealed| self.open_sealed(sealed))
      .transpose()
  }

  fn put(&self, values: &[(&str, &str)]) -> Result<()> {
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let mut next = entries.clone();
    for (key, value) in values {
      next.insert((*key).to_string(), self.seal(value)?);
    }
    self.flush(&next)?;
    *entries = next;
    Ok(())
  }

  fn remove(&self, keys: &[&str]) -> Result<()> {
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let mut next = entries.clone();
    for key in keys {
      next.remove(*key);
    }
    self.flush(&next)?;
    *entries = next;
    Ok(())
  }
}

fn load_or_create_key(key_path: &Path) -> Result<[u8; KEY_LEN]> {
  if key_path.exists() {
    let bytes = std::fs::read(key_path)
      .map_err(|e| eyre!("Failed to read key file {}: {}", key_path.display(), e))?;
    return bytes
      .try_into()
      .map_err(|_| eyre!("Key file {} must hold {} bytes", key_path.display(), KEY_LEN));
  }

  let mut key = [0u8; KEY_LEN];
  rand::rng().fill_bytes(&mut key);

  let mut options = std::fs::OpenOptions::new();
  options.write(true).create_new(true);
  #[cfg(unix)]
  {
    use std::os::unix::fs::OpenOptionsExt;
    options.mode(0o600);
  }

  let mut file = options
    .open(key_path)
    .map_err(|e| eyre!("Failed to create key file {}: {}", key_path.display(), e))?;
  file
    .write_all(&key)
    .map_err(|e| eyre!("Failed to write key file {}: {}", key_path.display(), e))?;

  Ok(key)
}

/// Process-local store, nothing touches disk.
#[derive(Default)]
pub struct MemoryStore {
  entries: Mutex<BTreeMap<String, String>>,
}

impl SecureStore for MemoryStore {
  fn get(&self, key: &str) -> Result<Option<String>> {
    let entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(entries.get(key).cloned())
  }

  fn put(&self, values: &[(&str, &str)]) -> Result<()> {
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    for (key, value) in values {
      entries.insert((*key).to_string(), (*value).to_string());
    }
    Ok(())
  }

  fn remove(&self, keys: &[&str]) -> Result<()> {
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    for key in keys {
      entries.remove(*key);
    }
    Ok(())
  }
}
