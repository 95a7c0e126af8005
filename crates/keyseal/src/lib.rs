//! # keyseal
//!
//! Authenticated encryption of stored credentials for netvault.
//!
//! ## Overview
//!
//! - **Engine**: AES-256-GCM with a random nonce per blob ([`CryptoEngine`])
//! - **Key providers**: where the installation key lives ([`KeyProvider`])
//! - **Keychain backends**: platform keychain or in-memory ([`KeychainBackend`])
//! - **Blob format**: versioned layout plus the fixed-IV layout of older
//!   releases ([`BlobFormat`])
//!
//! ## Example Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use keyseal::{CryptoEngine, EncodingMode, MemoryKeyProvider};
//!
//! let engine = CryptoEngine::new(Arc::new(MemoryKeyProvider::random()));
//! let sealed = engine.encrypt("hunter2", EncodingMode::UrlSafe).unwrap();
//! let opened = engine.decrypt(&sealed, EncodingMode::UrlSafe).unwrap();
//! assert_eq!(opened.plaintext(), "hunter2");
//! assert!(!opened.needs_migration());
//! ```

pub mod derived;
pub mod encoding;
pub mod engine;
pub mod error;
pub mod format;
pub mod keychain;
pub mod provider;

pub use derived::{DerivedKeyProvider, DEFAULT_PBKDF2_ITERATIONS};
pub use encoding::EncodingMode;
pub use engine::{CryptoEngine, Decrypted};
pub use error::{CryptoError, Result};
pub use format::{BlobFormat, EncryptedBlob, BLOB_MAGIC, CURRENT_VERSION};
pub use keychain::{KeychainBackend, KeychainError, MemoryKeychain, SystemKeychain};
pub use provider::{
    generate_key, KeyMaterial, KeyProvider, KeyProviderError, KeyTier, KeychainKeyProvider,
    MemoryKeyProvider, RetryPolicy, KEY_LEN,
};
