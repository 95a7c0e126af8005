//! Key provider for hosts without a keychain that can hold the data key
//! directly.
//!
//! The data key is derived once with PBKDF2-HMAC-SHA256 from a random
//! installation secret and salt. It is then wrapped with AES-256-GCM under a
//! key-encryption key (KEK) stored in the keychain, and the wrapped form is
//! kept in a JSON preferences file:
//!
//! ```json
//! { "version": 1, "salt": "...", "iterations": 600000, "wrapped_key": "..." }
//! ```
//!
//! Losing either the KEK or the preferences file makes every sealed
//! credential unrecoverable.

use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::engine::{aead_open, aead_seal};
use crate::format::NONCE_LEN;
use crate::keychain::KeychainBackend;
use crate::provider::{
    key_from_slice, load_or_create_key, KeyMaterial, KeyProvider, KeyProviderError, KeyTier,
    KEY_LEN,
};

/// PBKDF2 rounds used when none are configured.
pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 600_000;

/// Salt length in bytes.
const SALT_LEN: usize = 16;

/// Version of the preferences file layout.
const PREFERENCES_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct KeyPreferences {
    version: u32,
    salt: String,
    iterations: u32,
    wrapped_key: String,
}

/// Derived data key wrapped by a keychain-held KEK.
#[derive(Debug)]
pub struct DerivedKeyProvider<B> {
    backend: B,
    service: String,
    alias: String,
    preferences_path: PathBuf,
    iterations: u32,
}

impl<B: KeychainBackend> DerivedKeyProvider<B> {
    /// Creates a provider whose wrapped key lives at `preferences_path`.
    pub fn new(
        backend: B,
        service: impl Into<String>,
        alias: impl Into<String>,
        preferences_path: impl AsRef<Path>,
    ) -> Self {
        Self {
            backend,
            service: service.into(),
            alias: alias.into(),
            preferences_path: preferences_path.as_ref().to_path_buf(),
            iterations: DEFAULT_PBKDF2_ITERATIONS,
        }
    }

    /// Sets the PBKDF2 rounds used when a new key is derived.
    ///
    /// Existing preference files keep the count they were written with.
    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations.max(1);
        self
    }

    /// Path of the preferences file.
    pub fn preferences_path(&self) -> &Path {
        &self.preferences_path
    }

    fn kek_alias(&self) -> String {
        format!("{}.kek", self.alias)
    }

    fn kek(&self) -> Result<KeyMaterial, KeyProviderError> {
        load_or_create_key(&self.backend, &self.service, &self.kek_alias())
    }

    fn read_preferences(&self) -> Result<Option<KeyPreferences>, KeyProviderError> {
        if !self.preferences_path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.preferences_path).map_err(|e| {
            KeyProviderError::Preferences(format!(
                "failed to read {}: {}",
                self.preferences_path.display(),
                e
            ))
        })?;
        let prefs: KeyPreferences = serde_json::from_str(&contents).map_err(|e| {
            KeyProviderError::Preferences(format!(
                "failed to parse {}: {}",
                self.preferences_path.display(),
                e
            ))
        })?;
        if prefs.version != PREFERENCES_VERSION {
            return Err(KeyProviderError::Preferences(format!(
                "unsupported preferences version {}",
                prefs.version
            )));
        }
        Ok(Some(prefs))
    }

    fn unwrap_key(
        &self,
        prefs: &KeyPreferences,
        kek: &KeyMaterial,
    ) -> Result<KeyMaterial, KeyProviderError> {
        let wrapped = STANDARD
            .decode(&prefs.wrapped_key)
            .map_err(|e| KeyProviderError::Malformed(format!("wrapped key: {e}")))?;
        if wrapped.len() < NONCE_LEN {
            return Err(KeyProviderError::Malformed("wrapped key too short".to_string()));
        }
        let (nonce, sealed) = wrapped.split_at(NONCE_LEN);
        let key = aead_open(kek, nonce, sealed).map_err(|_| {
            KeyProviderError::Malformed("wrapped key does not verify under the KEK".to_string())
        })?;
        key_from_slice(&key)
    }

    fn derive_and_store(&self, kek: &KeyMaterial) -> Result<KeyMaterial, KeyProviderError> {
        let mut rng = rand::thread_rng();
        let mut secret = Zeroizing::new([0u8; KEY_LEN]);
        rng.fill_bytes(&mut secret[..]);
        let mut salt = [0u8; SALT_LEN];
        rng.fill_bytes(&mut salt);

        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        pbkdf2_hmac::<Sha256>(&secret[..], &salt, self.iterations, &mut key[..]);

        let mut nonce = [0u8; NONCE_LEN];
        rng.fill_bytes(&mut nonce);
        let sealed = aead_seal(kek, &nonce, &key[..])
            .map_err(|e| KeyProviderError::Malformed(e.to_string()))?;
        let mut wrapped = Vec::with_capacity(NONCE_LEN + sealed.len());
        wrapped.extend_from_slice(&nonce);
        wrapped.extend_from_slice(&sealed);

        let prefs = KeyPreferences {
            version: PREFERENCES_VERSION,
            salt: STANDARD.encode(salt),
            iterations: self.iterations,
            wrapped_key: STANDARD.encode(&wrapped),
        };
        self.write_preferences(&prefs)?;
        tracing::info!(
            "Derived new data key ({} PBKDF2 rounds), stored at {:?}",
            self.iterations,
            self.preferences_path
        );
        Ok(key)
    }

    /// Writes the preferences file atomically (temp file, then rename).
    fn write_preferences(&self, prefs: &KeyPreferences) -> Result<(), KeyProviderError> {
        if let Some(parent) = self.preferences_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                KeyProviderError::Preferences(format!(
                    "failed to create {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let contents = serde_json::to_string_pretty(prefs)
            .map_err(|e| KeyProviderError::Preferences(e.to_string()))?;

        let temp_path = self.preferences_path.with_extension("json.tmp");
        fs::write(&temp_path, contents).map_err(|e| {
            KeyProviderError::Preferences(format!(
                "failed to write {}: {}",
                temp_path.display(),
                e
            ))
        })?;
        fs::rename(&temp_path, &self.preferences_path).map_err(|e| {
            KeyProviderError::Preferences(format!(
                "failed to rename {} to {}: {}",
                temp_path.display(),
                self.preferences_path.display(),
                e
            ))
        })
    }
}

impl<B: KeychainBackend> KeyProvider for DerivedKeyProvider<B> {
    fn current_key(&self) -> Result<KeyMaterial, KeyProviderError> {
        let kek = self.kek()?;
        match self.read_preferences()? {
            Some(prefs) => self.unwrap_key(&prefs, &kek),
            None => self.derive_and_store(&kek),
        }
    }

    fn tier(&self) -> KeyTier {
        KeyTier::Derived
    }
}
