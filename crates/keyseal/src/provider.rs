//! Sources of the installation key.
//!
//! The engine never reaches for a global keystore. Whoever builds a
//! [`CryptoEngine`](crate::CryptoEngine) hands it a [`KeyProvider`], which
//! decides where the key lives and how strongly it is protected.

use std::thread;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::keychain::{KeychainBackend, KeychainError};

/// Length of an AES-256 key in bytes.
pub const KEY_LEN: usize = 32;

/// Key bytes that are wiped when dropped.
pub type KeyMaterial = Zeroizing<[u8; KEY_LEN]>;

/// How strongly a provider protects its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyTier {
    /// Key held by the platform keychain.
    Hardware,
    /// Key derived locally and wrapped in a preferences file.
    Derived,
    /// Key living only in process memory.
    Ephemeral,
}

impl std::fmt::Display for KeyTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hardware => write!(f, "hardware"),
            Self::Derived => write!(f, "derived"),
            Self::Ephemeral => write!(f, "ephemeral"),
        }
    }
}

/// Errors raised by key providers.
#[derive(Debug, Error)]
pub enum KeyProviderError {
    /// The keychain backend failed.
    #[error(transparent)]
    Keychain(#[from] KeychainError),

    /// The preferences file could not be read or written.
    #[error("key preferences error: {0}")]
    Preferences(String),

    /// Stored key material has the wrong shape.
    #[error("malformed key material: {0}")]
    Malformed(String),
}

impl KeyProviderError {
    /// Whether the operation is worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Keychain(e) => e.is_transient(),
            Self::Preferences(_) | Self::Malformed(_) => false,
        }
    }
}

/// Supplies the key used for sealing, and optionally an older key for
/// blobs written by previous releases.
pub trait KeyProvider: Send + Sync {
    /// Returns the current installation key, creating it on first use.
    fn current_key(&self) -> Result<KeyMaterial, KeyProviderError>;

    /// Returns the key that legacy blobs were sealed with, if it differs
    /// from the current key.
    fn legacy_key(&self) -> Result<Option<KeyMaterial>, KeyProviderError> {
        Ok(None)
    }

    /// Protection level of the keys this provider returns.
    fn tier(&self) -> KeyTier;
}

/// Retry schedule for transient key-store failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub attempts: u32,
    /// Delay before the first retry; doubled after each further failure.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    /// A policy that tries exactly once.
    pub fn none() -> Self {
        Self {
            attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    /// Runs `op`, retrying transient failures according to this policy.
    pub fn run<T, F>(&self, what: &str, mut op: F) -> Result<T, KeyProviderError>
    where
        F: FnMut() -> Result<T, KeyProviderError>,
    {
        let attempts = self.attempts.max(1);
        let mut delay = self.backoff;
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < attempts => {
                    tracing::warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        what,
                        attempt,
                        attempts,
                        e,
                        delay
                    );
                    thread::sleep(delay);
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Generates a fresh random key.
pub fn generate_key() -> KeyMaterial {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    rand::thread_rng().fill_bytes(&mut key[..]);
    key
}

/// Decodes a base64 key as stored in a keychain.
pub(crate) fn decode_key(text: &str) -> Result<KeyMaterial, KeyProviderError> {
    let bytes = Zeroizing::new(
        STANDARD
            .decode(text.trim())
            .map_err(|e| KeyProviderError::Malformed(e.to_string()))?,
    );
    key_from_slice(&bytes)
}

pub(crate) fn key_from_slice(bytes: &[u8]) -> Result<KeyMaterial, KeyProviderError> {
    if bytes.len() != KEY_LEN {
        return Err(KeyProviderError::Malformed(format!(
            "expected {} key bytes, got {}",
            KEY_LEN,
            bytes.len()
        )));
    }
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    key.copy_from_slice(bytes);
    Ok(key)
}

/// Loads the key stored under `alias`, generating and storing one if absent.
pub(crate) fn load_or_create_key<B: KeychainBackend + ?Sized>(
    backend: &B,
    service: &str,
    alias: &str,
) -> Result<KeyMaterial, KeyProviderError> {
    match backend.get_secret(service, alias) {
        Ok(encoded) => decode_key(&encoded),
        Err(KeychainError::NotFound(_)) => {
            let key = generate_key();
            let encoded = Zeroizing::new(STANDARD.encode(&key[..]));
            backend.set_secret(service, alias, &encoded)?;
            tracing::info!("Generated new key '{}' in service '{}'", alias, service);
            Ok(key)
        }
        Err(e) => Err(e.into()),
    }
}

/// Keys kept only in memory.
///
/// Useful for tests and for sessions whose credentials must not outlive
/// the process.
pub struct MemoryKeyProvider {
    current: KeyMaterial,
    legacy: Option<KeyMaterial>,
}

impl MemoryKeyProvider {
    /// A provider with a freshly generated random key.
    pub fn random() -> Self {
        Self {
            current: generate_key(),
            legacy: None,
        }
    }

    /// A provider whose key is the SHA-256 of `seed`. The same seed always
    /// yields the same key.
    pub fn from_seed(seed: &[u8]) -> Self {
        let digest = Sha256::digest(seed);
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        key.copy_from_slice(&digest);
        Self {
            current: key,
            legacy: None,
        }
    }

    /// A provider using exactly `key`.
    pub fn from_key(key: [u8; KEY_LEN]) -> Self {
        Self {
            current: Zeroizing::new(key),
            legacy: None,
        }
    }

    /// Sets the key that legacy blobs are opened with.
    pub fn with_legacy_key(mut self, key: [u8; KEY_LEN]) -> Self {
        self.legacy = Some(Zeroizing::new(key));
        self
    }
}

impl std::fmt::Debug for MemoryKeyProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryKeyProvider")
            .field("current", &"[REDACTED]")
            .field("legacy", &self.legacy.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl KeyProvider for MemoryKeyProvider {
    fn current_key(&self) -> Result<KeyMaterial, KeyProviderError> {
        Ok(self.current.clone())
    }

    fn legacy_key(&self) -> Result<Option<KeyMaterial>, KeyProviderError> {
        Ok(self.legacy.clone())
    }

    fn tier(&self) -> KeyTier {
        KeyTier::Ephemeral
    }
}

/// A random key generated once and held by a keychain backend.
///
/// Installations upgraded from older releases may also carry their previous
/// key under `<alias>.legacy`.
#[derive(Debug)]
pub struct KeychainKeyProvider<B> {
    backend: B,
    service: String,
    alias: String,
}

impl<B: KeychainBackend> KeychainKeyProvider<B> {
    /// Creates a provider for the key stored under `(service, alias)`.
    pub fn new(backend: B, service: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            backend,
            service: service.into(),
            alias: alias.into(),
        }
    }

    /// Alias of the legacy key entry.
    pub fn legacy_alias(&self) -> String {
        format!("{}.legacy", self.alias)
    }

    /// Returns the backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }
}

impl<B: KeychainBackend> KeyProvider for KeychainKeyProvider<B> {
    fn current_key(&self) -> Result<KeyMaterial, KeyProviderError> {
        load_or_create_key(&self.backend, &self.service, &self.alias)
    }

    fn legacy_key(&self) -> Result<Option<KeyMaterial>, KeyProviderError> {
        match self.backend.get_secret(&self.service, &self.legacy_alias()) {
            Ok(encoded) => decode_key(&encoded).map(Some),
            Err(KeychainError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn tier(&self) -> KeyTier {
        KeyTier::Hardware
    }
}
