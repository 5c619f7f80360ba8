//! Signing key lifecycle.
//!
//! One key per installation: generated on first use from the thread-local
//! CSPRNG, persisted hex-encoded, and reused for every later signature.
//! Losing the persisted key makes every earlier log unverifiable.

use crate::error::KeyError;
use rand::Rng;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Key length in bytes.
pub const KEY_LEN: usize = 32;

/// A 256-bit HMAC key.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningKey([u8; KEY_LEN]);

impl SigningKey {
    /// Generates a fresh random key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::thread_rng().fill(&mut bytes[..]);
        Self(bytes)
    }

    /// Wraps raw key bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Decodes a hex-encoded key.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::Corrupt` unless the input is exactly 32 bytes of hex.
    pub fn from_hex(encoded: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(encoded.trim()).map_err(|e| KeyError::Corrupt {
            reason: e.to_string(),
        })?;
        let bytes: [u8; KEY_LEN] = bytes.try_into().map_err(|b: Vec<u8>| KeyError::Corrupt {
            reason: format!("expected {KEY_LEN} bytes, got {}", b.len()),
        })?;
        Ok(Self(bytes))
    }

    /// Hex encoding of the key.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningKey(..)")
    }
}

/// Durable storage for the hex-encoded key.
pub trait KeyStore: Send + Sync {
    /// Reads the persisted key, or `None` if none exists.
    fn load(&self) -> Result<Option<String>, KeyError>;

    /// Persists the key unless one already exists.
    ///
    /// Returns `false`, leaving the persisted key untouched, when another
    /// writer stored one first.
    fn store(&self, encoded: &str) -> Result<bool, KeyError>;
}

/// Stores the key in a file readable only by its owner.
#[derive(Debug, Clone)]
pub struct FileKeyStore {
    path: PathBuf,
}

impl FileKeyStore {
    /// Creates a store at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the key file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, e: &std::io::Error) -> KeyError {
        KeyError::Io {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        }
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(format!(".{:08x}.tmp", rand::random::<u32>()));
        self.path.with_file_name(name)
    }
}

impl KeyStore for FileKeyStore {
    fn load(&self) -> Result<Option<String>, KeyError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents.trim().to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.io_error(&e)),
        }
    }

    fn store(&self, encoded: &str) -> Result<bool, KeyError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io_error(&e))?;
        }

        // Written in full to a private sibling, then hard-linked into place so
        // readers never observe a partial key and an existing key is kept.
        let staging = self.staging_path();
        let outcome = match write_private(&staging, encoded) {
            Ok(()) => match fs::hard_link(&staging, &self.path) {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
                Err(e) => Err(self.io_error(&e)),
            },
            Err(e) => Err(self.io_error(&e)),
        };
        let _ = fs::remove_file(&staging);
        outcome
    }
}

fn write_private(path: &Path, contents: &str) -> std::io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(contents.as_bytes())?;
    file.sync_all()
}

/// In-memory key storage, for tests and ephemeral use.
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    value: Mutex<Option<String>>,
}

impl MemoryKeyStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store already holding `key`.
    #[must_use]
    pub fn with_key(key: &SigningKey) -> Self {
        Self {
            value: Mutex::new(Some(key.to_hex())),
        }
    }
}

impl KeyStore for MemoryKeyStore {
    fn load(&self) -> Result<Option<String>, KeyError> {
        let value = self.value.lock().map_err(|_| KeyError::Poisoned)?;
        Ok(value.clone())
    }

    fn store(&self, encoded: &str) -> Result<bool, KeyError> {
        let mut value = self.value.lock().map_err(|_| KeyError::Poisoned)?;
        if value.is_some() {
            return Ok(false);
        }
        *value = Some(encoded.to_string());
        Ok(true)
    }
}

/// Hands out the installation's signing key, creating it on first use.
pub struct SecretKeyManager {
    store: Box<dyn KeyStore>,
    cached: Mutex<Option<SigningKey>>,
}

impl fmt::Debug for SecretKeyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretKeyManager").finish_non_exhaustive()
    }
}

impl SecretKeyManager {
    /// Creates a manager over a key store.
    #[must_use]
    pub fn new(store: impl KeyStore + 'static) -> Self {
        Self {
            store: Box::new(store),
            cached: Mutex::new(None),
        }
    }

    /// Creates a manager backed by a key file.
    #[must_use]
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self::new(FileKeyStore::new(path))
    }

    /// Returns the signing key, generating and persisting it if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written, or holds a
    /// corrupt key.
    pub fn get_key(&self) -> taskward_core::Result<SigningKey, KeyError> {
        Ok(self.load_or_create()?)
    }

    /// Returns the persisted signing key without creating one.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or holds a corrupt key.
    pub fn load_existing(&self) -> Result<Option<SigningKey>, KeyError> {
        // The cache only ever holds a decoded key, so a poisoned guard is still valid.
        let mut cached = self.cached.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(key) = cached.as_ref() {
            return Ok(Some(key.clone()));
        }

        let key = self
            .store
            .load()?
            .map(|encoded| SigningKey::from_hex(&encoded))
            .transpose()?;
        cached.clone_from(&key);
        Ok(key)
    }

    pub(crate) fn load_or_create(&self) -> Result<SigningKey, KeyError> {
        let mut cached = self.cached.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(key) = cached.as_ref() {
            return Ok(key.clone());
        }

        let key = match self.store.load()? {
            Some(encoded) => SigningKey::from_hex(&encoded)?,
            None => self.create()?,
        };
        *cached = Some(key.clone());
        Ok(key)
    }

    fn create(&self) -> Result<SigningKey, KeyError> {
        let key = SigningKey::generate();
        if self.store.store(&key.to_hex())? {
            tracing::info!("generated new signing key");
            return Ok(key);
        }

        tracing::debug!("signing key created concurrently, using the persisted one");
        match self.store.load()? {
            Some(encoded) => SigningKey::from_hex(&encoded),
            None => Err(KeyError::Corrupt {
                reason: "key vanished after a concurrent write".to_string(),
            }),
        }
    }
}
