//! AES-256-GCM sealing of credentials.
//!
//! Every call to [`CryptoEngine::seal`] draws a fresh 96-bit nonce and
//! writes a versioned blob. Blobs from older releases, sealed under a fixed
//! IV, still open; [`Decrypted::needs_migration`] tells the caller to
//! re-seal them. The engine itself never rewrites stored data.

use std::sync::{Arc, RwLock};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use zeroize::{Zeroize, Zeroizing};

use crate::encoding::EncodingMode;
use crate::error::{CryptoError, Result};
use crate::format::{self, BlobFormat, EncryptedBlob, ParsedBlob, LEGACY_IV, NONCE_LEN};
use crate::provider::{KeyMaterial, KeyProvider, KeyTier, RetryPolicy, KEY_LEN};

/// Seals `plaintext` under `key` and `nonce`, returning `ciphertext || tag`.
pub(crate) fn aead_seal(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|_| CryptoError::CorruptCiphertext("plaintext cannot be sealed".to_string()))
}

/// Opens `ciphertext || tag`. Any verification failure is reported as
/// [`CryptoError::AuthenticationFailed`].
pub(crate) fn aead_open(
    key: &[u8; KEY_LEN],
    nonce: &[u8],
    sealed: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    if nonce.len() != NONCE_LEN {
        return Err(CryptoError::CorruptCiphertext(format!(
            "nonce must be {} bytes, got {}",
            NONCE_LEN,
            nonce.len()
        )));
    }
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce), sealed)
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::AuthenticationFailed)
}

fn random_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

/// Result of opening a blob.
pub struct Decrypted {
    plaintext: Zeroizing<String>,
    format: BlobFormat,
}

impl Decrypted {
    /// The recovered plaintext.
    pub fn plaintext(&self) -> &str {
        &self.plaintext
    }

    /// Consumes the result, returning the plaintext.
    pub fn into_plaintext(self) -> Zeroizing<String> {
        self.plaintext
    }

    /// Layout the blob was stored in.
    pub fn format(&self) -> BlobFormat {
        self.format
    }

    /// Whether the blob should be re-sealed in the current format.
    pub fn needs_migration(&self) -> bool {
        self.format == BlobFormat::Legacy
    }
}

impl std::fmt::Debug for Decrypted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decrypted")
            .field("plaintext", &"[REDACTED]")
            .field("format", &self.format)
            .finish()
    }
}

/// Encrypts and decrypts credentials with the installation key.
///
/// The key is loaded from the provider on first use and cached for the
/// lifetime of the engine. Transient key-store failures are retried
/// according to the engine's [`RetryPolicy`] before surfacing as
/// [`CryptoError::KeyUnavailable`].
pub struct CryptoEngine {
    provider: Arc<dyn KeyProvider>,
    retry: RetryPolicy,
    current: RwLock<Option<KeyMaterial>>,
    legacy: RwLock<Option<Option<KeyMaterial>>>,
}

impl CryptoEngine {
    /// Creates an engine backed by `provider`.
    pub fn new(provider: Arc<dyn KeyProvider>) -> Self {
        Self {
            provider,
            retry: RetryPolicy::default(),
            current: RwLock::new(None),
            legacy: RwLock::new(None),
        }
    }

    /// Replaces the retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Protection tier of the underlying key provider.
    pub fn tier(&self) -> KeyTier {
        self.provider.tier()
    }

    /// Encrypts `plaintext` and returns the blob as text.
    pub fn encrypt(&self, plaintext: &str, mode: EncodingMode) -> Result<String> {
        Ok(self.seal(plaintext.as_bytes())?.encode(mode))
    }

    /// Decrypts text produced by [`encrypt`](Self::encrypt) or by an older
    /// release.
    pub fn decrypt(&self, encoded: &str, mode: EncodingMode) -> Result<Decrypted> {
        let bytes = mode.decode(encoded)?;
        let (mut plain, format) = self.open(&bytes)?;
        let plaintext = String::from_utf8(std::mem::take(&mut *plain)).map_err(|e| {
            let mut bytes = e.into_bytes();
            bytes.zeroize();
            CryptoError::CorruptCiphertext("plaintext is not UTF-8".to_string())
        })?;
        Ok(Decrypted {
            plaintext: Zeroizing::new(plaintext),
            format,
        })
    }

    /// Seals raw bytes in the current format.
    pub fn seal(&self, plaintext: &[u8]) -> Result<EncryptedBlob> {
        let key = self.current_key()?;
        let nonce = random_nonce();
        let sealed = aead_seal(&key, &nonce, plaintext)?;
        Ok(format::assemble(&nonce, &sealed))
    }

    /// Opens a blob in either format.
    ///
    /// A blob that starts with the magic but does not open as a versioned
    /// blob is retried as a legacy blob before the error is returned.
    pub fn open(&self, bytes: &[u8]) -> Result<(Zeroizing<Vec<u8>>, BlobFormat)> {
        match format::parse(bytes)? {
            ParsedBlob::Current { nonce, sealed } => {
                let key = self.current_key()?;
                match aead_open(&key, nonce, sealed) {
                    Ok(plain) => Ok((plain, BlobFormat::Current)),
                    Err(err @ CryptoError::AuthenticationFailed) => self
                        .open_legacy(bytes)
                        .map(|plain| (plain, BlobFormat::Legacy))
                        .map_err(|_| err),
                    Err(err) => Err(err),
                }
            }
            ParsedBlob::Legacy { sealed } => Ok((self.open_legacy(sealed)?, BlobFormat::Legacy)),
            ParsedBlob::UnknownVersion { version, sealed } => self
                .open_legacy(sealed)
                .map(|plain| (plain, BlobFormat::Legacy))
                .map_err(|_| format::unknown_version(version)),
        }
    }

    fn open_legacy(&self, sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let key = self.legacy_or_current_key()?;
        aead_open(&key, &LEGACY_IV, sealed)
    }

    /// Encrypts in the headerless fixed-IV layout of older releases.
    ///
    /// Only useful to build fixtures for migration tests.
    #[doc(hidden)]
    pub fn encrypt_legacy(&self, plaintext: &str, mode: EncodingMode) -> Result<String> {
        let key = self.legacy_or_current_key()?;
        let sealed = aead_seal(&key, &LEGACY_IV, plaintext.as_bytes())?;
        Ok(mode.encode(&sealed))
    }

    fn current_key(&self) -> Result<KeyMaterial> {
        {
            let cached = self.current.read().map_err(|_| poisoned())?;
            if let Some(key) = cached.as_ref() {
                return Ok(key.clone());
            }
        }

        let mut cached = self.current.write().map_err(|_| poisoned())?;
        if let Some(key) = cached.as_ref() {
            return Ok(key.clone());
        }
        let key = self
            .retry
            .run("loading installation key", || self.provider.current_key())?;
        tracing::debug!("Loaded {} installation key", self.provider.tier());
        *cached = Some(key.clone());
        Ok(key)
    }

    fn legacy_or_current_key(&self) -> Result<KeyMaterial> {
        {
            let cached = self.legacy.read().map_err(|_| poisoned())?;
            if let Some(slot) = cached.as_ref() {
                return match slot {
                    Some(key) => Ok(key.clone()),
                    None => self.current_key(),
                };
            }
        }

        let loaded = {
            let mut cached = self.legacy.write().map_err(|_| poisoned())?;
            match cached.as_ref() {
                Some(slot) => slot.clone(),
                None => {
                    let key = self
                        .retry
                        .run("loading legacy key", || self.provider.legacy_key())?;
                    *cached = Some(key.clone());
                    key
                }
            }
        };
        match loaded {
            Some(key) => Ok(key),
            None => self.current_key(),
        }
    }
}

fn poisoned() -> CryptoError {
    CryptoError::KeyUnavailable("key cache lock poisoned".to_string())
}

impl std::fmt::Debug for CryptoEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoEngine")
            .field("tier", &self.provider.tier())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
