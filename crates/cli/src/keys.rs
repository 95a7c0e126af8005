//! Selection of the installation key provider.

use std::sync::Arc;
use std::time::Duration;

use keyseal::{
    CryptoEngine, DerivedKeyProvider, KeyProvider, KeychainBackend, KeychainKeyProvider,
    MemoryKeyProvider, RetryPolicy, SystemKeychain,
};

use crate::config::{KeyBackend, KeysConfig};

/// Resolves [`KeyBackend::Auto`] to a concrete backend.
///
/// An installation that already has a derived-key preferences file keeps
/// using it; everything else uses the keychain directly.
pub fn resolve_backend(config: &KeysConfig) -> KeyBackend {
    match config.backend {
        KeyBackend::Auto if config.preferences_path.exists() => KeyBackend::Derived,
        KeyBackend::Auto => KeyBackend::Keychain,
        other => other,
    }
}

/// Builds the key provider for `config` over `keychain`.
pub fn provider<B>(config: &KeysConfig, keychain: B) -> Arc<dyn KeyProvider>
where
    B: KeychainBackend + 'static,
{
    match resolve_backend(config) {
        KeyBackend::Derived => Arc::new(
            DerivedKeyProvider::new(
                keychain,
                &config.service,
                &config.alias,
                &config.preferences_path,
            )
            .with_iterations(config.pbkdf2_iterations),
        ),
        KeyBackend::Memory => {
            tracing::warn!("Using an in-memory key; saved credentials will not be readable later");
            Arc::new(MemoryKeyProvider::random())
        }
        KeyBackend::Keychain | KeyBackend::Auto => Arc::new(KeychainKeyProvider::new(
            keychain,
            &config.service,
            &config.alias,
        )),
    }
}

/// Retry policy from configuration.
pub fn retry_policy(config: &KeysConfig) -> RetryPolicy {
    RetryPolicy {
        attempts: config.retry_attempts,
        backoff: Duration::from_millis(config.retry_backoff_ms),
    }
}

/// Builds the engine used by the CLI, backed by the system keychain.
pub fn engine(config: &KeysConfig) -> Arc<CryptoEngine> {
    let provider = provider(config, SystemKeychain);
    tracing::debug!("Using {} key provider", provider.tier());
    Arc::new(CryptoEngine::new(provider).with_retry_policy(retry_policy(config)))
}
