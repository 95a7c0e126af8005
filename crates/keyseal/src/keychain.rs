//! Platform keychain access for installation keys.
//!
//! Secrets are stored as strings under a `(service, alias)` pair using the
//! `keyring` crate:
//! - macOS: Keychain
//! - Windows: Credential Manager
//! - Linux: Secret Service (via D-Bus)

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use thiserror::Error;

/// Errors that can occur during keychain operations.
#[derive(Debug, Error)]
pub enum KeychainError {
    /// No secret is stored under the requested alias.
    #[error("key not found in keychain: {0}")]
    NotFound(String),

    /// The keychain refused access (locked, or permission denied).
    #[error("keychain access denied: {0}")]
    AccessDenied(String),

    /// The keychain service did not answer.
    #[error("keychain service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The stored value could not be encoded or decoded.
    #[error("key encoding error: {0}")]
    EncodingError(String),

    /// Any other platform-specific failure.
    #[error("keychain error: {0}")]
    PlatformError(String),
}

impl KeychainError {
    /// Whether retrying the same call shortly afterwards may succeed.
    ///
    /// Some keystores report spurious failures right after a key is created.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ServiceUnavailable(_) | Self::PlatformError(_))
    }
}

/// Result type for keychain operations.
pub type KeychainResult<T> = Result<T, KeychainError>;

/// Storage backend for installation secrets.
pub trait KeychainBackend: Send + Sync {
    /// Retrieve a secret.
    fn get_secret(&self, service: &str, alias: &str) -> KeychainResult<String>;

    /// Store or replace a secret.
    fn set_secret(&self, service: &str, alias: &str, value: &str) -> KeychainResult<()>;

    /// Delete a secret.
    fn delete_secret(&self, service: &str, alias: &str) -> KeychainResult<()>;
}

impl<B: KeychainBackend + ?Sized> KeychainBackend for std::sync::Arc<B> {
    fn get_secret(&self, service: &str, alias: &str) -> KeychainResult<String> {
        (**self).get_secret(service, alias)
    }

    fn set_secret(&self, service: &str, alias: &str, value: &str) -> KeychainResult<()> {
        (**self).set_secret(service, alias, value)
    }

    fn delete_secret(&self, service: &str, alias: &str) -> KeychainResult<()> {
        (**self).delete_secret(service, alias)
    }
}

/// The operating system keychain.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemKeychain;

impl SystemKeychain {
    fn entry(service: &str, alias: &str) -> KeychainResult<keyring::Entry> {
        keyring::Entry::new(service, alias).map_err(|e| map_keyring_error(e, alias))
    }
}

fn map_keyring_error(err: keyring::Error, alias: &str) -> KeychainError {
    match err {
        keyring::Error::NoEntry => KeychainError::NotFound(alias.to_string()),
        keyring::Error::NoStorageAccess(e) => KeychainError::AccessDenied(e.to_string()),
        keyring::Error::PlatformFailure(e) => KeychainError::ServiceUnavailable(e.to_string()),
        keyring::Error::TooLong(field, limit) => {
            KeychainError::EncodingError(format!("{field} exceeds {limit} characters"))
        }
        keyring::Error::Invalid(field, reason) => {
            KeychainError::EncodingError(format!("invalid {field}: {reason}"))
        }
        keyring::Error::BadEncoding(_) => {
            KeychainError::EncodingError("stored secret is not UTF-8".to_string())
        }
        keyring::Error::Ambiguous(_) => {
            KeychainError::PlatformError(format!("ambiguous keychain entry for {alias}"))
        }
        other => KeychainError::PlatformError(other.to_string()),
    }
}

impl KeychainBackend for SystemKeychain {
    fn get_secret(&self, service: &str, alias: &str) -> KeychainResult<String> {
        Self::entry(service, alias)?
            .get_password()
            .map_err(|e| map_keyring_error(e, alias))
    }

    fn set_secret(&self, service: &str, alias: &str, value: &str) -> KeychainResult<()> {
        Self::entry(service, alias)?
            .set_password(value)
            .map_err(|e| map_keyring_error(e, alias))
    }

    fn delete_secret(&self, service: &str, alias: &str) -> KeychainResult<()> {
        Self::entry(service, alias)?
            .delete_credential()
            .map_err(|e| map_keyring_error(e, alias))
    }
}

/// In-process keychain for tests and ephemeral sessions.
///
/// [`fail_next`](Self::fail_next) makes the following calls report
/// `ServiceUnavailable`, which mimics a keystore that is not yet ready.
#[derive(Debug, Default)]
pub struct MemoryKeychain {
    storage: Mutex<HashMap<String, String>>,
    pending_failures: AtomicU32,
}

impl MemoryKeychain {
    /// Create an empty keychain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` calls fail with a transient error.
    pub fn fail_next(&self, count: u32) {
        self.pending_failures.store(count, Ordering::SeqCst);
    }

    /// Number of stored secrets.
    pub fn len(&self) -> usize {
        self.storage.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Whether no secret is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn make_key(service: &str, alias: &str) -> String {
        format!("{}:{}", service, alias)
    }

    fn injected_failure(&self) -> KeychainResult<()> {
        let consumed = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match consumed {
            Ok(_) => Err(KeychainError::ServiceUnavailable(
                "keystore not ready".to_string(),
            )),
            Err(_) => Ok(()),
        }
    }

    fn storage(&self) -> KeychainResult<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.storage
            .lock()
            .map_err(|_| KeychainError::PlatformError("memory keychain poisoned".to_string()))
    }
}

impl KeychainBackend for MemoryKeychain {
    fn get_secret(&self, service: &str, alias: &str) -> KeychainResult<String> {
        self.injected_failure()?;
        self.storage()?
            .get(&Self::make_key(service, alias))
            .cloned()
            .ok_or_else(|| KeychainError::NotFound(alias.to_string()))
    }

    fn set_secret(&self, service: &str, alias: &str, value: &str) -> KeychainResult<()> {
        self.injected_failure()?;
        self.storage()?
            .insert(Self::make_key(service, alias), value.to_string());
        Ok(())
    }

    fn delete_secret(&self, service: &str, alias: &str) -> KeychainResult<()> {
        self.injected_failure()?;
        match self.storage()?.remove(&Self::make_key(service, alias)) {
            Some(_) => Ok(()),
            None => Err(KeychainError::NotFound(alias.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_and_get_secret() {
        let keychain = MemoryKeychain::new();
        keychain
            .set_secret("netvault", "installation_key", "c2VjcmV0")
            .expect("Failed to store secret");

        let value = keychain
            .get_secret("netvault", "installation_key")
            .expect("Failed to get secret");
        assert_eq!(value, "c2VjcmV0");
    }

    #[test]
    fn test_get_missing_secret() {
        let keychain = MemoryKeychain::new();
        let result = keychain.get_secret("netvault", "missing");
        assert!(matches!(result, Err(KeychainError::NotFound(_))));
    }

    #[test]
    fn test_services_are_isolated() {
        let keychain = MemoryKeychain::new();
        keychain.set_secret("a", "alias", "one").unwrap();
        keychain.set_secret("b", "alias", "two").unwrap();

        assert_eq!(keychain.get_secret("a", "alias").unwrap(), "one");
        assert_eq!(keychain.get_secret("b", "alias").unwrap(), "two");
        assert_eq!(keychain.len(), 2);
    }

    #[test]
    fn test_delete_secret() {
        let keychain = MemoryKeychain::new();
        keychain.set_secret("netvault", "alias", "value").unwrap();
        keychain.delete_secret("netvault", "alias").unwrap();

        assert!(keychain.is_empty());
        assert!(matches!(
            keychain.delete_secret("netvault", "alias"),
            Err(KeychainError::NotFound(_))
        ));
    }

    #[test]
    fn test_injected_failures_are_transient_and_bounded() {
        let keychain = MemoryKeychain::new();
        keychain.set_secret("netvault", "alias", "value").unwrap();
        keychain.fail_next(2);

        for _ in 0..2 {
            let err = keychain.get_secret("netvault", "alias").unwrap_err();
            assert!(err.is_transient());
        }
        assert_eq!(keychain.get_secret("netvault", "alias").unwrap(), "value");
    }

    #[test]
    fn test_transient_classification() {
        assert!(KeychainError::ServiceUnavailable(String::new()).is_transient());
        assert!(KeychainError::PlatformError(String::new()).is_transient());
        assert!(!KeychainError::NotFound(String::new()).is_transient());
        assert!(!KeychainError::AccessDenied(String::new()).is_transient());
        assert!(!KeychainError::EncodingError(String::new()).is_transient());
    }

    #[test]
    fn test_keyring_no_entry_maps_to_not_found() {
        let err = map_keyring_error(keyring::Error::NoEntry, "alias");
        assert!(matches!(err, KeychainError::NotFound(a) if a == "alias"));
    }
}
