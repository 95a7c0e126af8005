//! Error types for the keyseal crate.

use thiserror::Error;

use crate::keychain::KeychainError;
use crate::provider::KeyProviderError;

/// Failure modes of sealing and opening credentials.
///
/// Every operation either produces the complete result or one of these
/// errors; partially decrypted data is never returned.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The installation key could not be loaded or created.
    #[error("key unavailable: {0}")]
    KeyUnavailable(String),

    /// The blob is truncated, badly encoded or not valid UTF-8 after opening.
    #[error("corrupt ciphertext: {0}")]
    CorruptCiphertext(String),

    /// The AEAD tag did not verify: the blob was modified or sealed under another key.
    #[error("authentication failed: ciphertext or tag does not verify")]
    AuthenticationFailed,

    /// The blob carries a format marker this build does not understand.
    #[error("unsupported blob format: {0}")]
    UnsupportedFormat(String),
}

/// Result type alias for keyseal operations.
pub type Result<T> = std::result::Result<T, CryptoError>;

impl From<base64::DecodeError> for CryptoError {
    fn from(err: base64::DecodeError) -> Self {
        CryptoError::CorruptCiphertext(format!("invalid transport encoding: {err}"))
    }
}

impl From<KeychainError> for CryptoError {
    fn from(err: KeychainError) -> Self {
        CryptoError::KeyUnavailable(err.to_string())
    }
}

impl From<KeyProviderError> for CryptoError {
    fn from(err: KeyProviderError) -> Self {
        CryptoError::KeyUnavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_unavailable_display() {
        let err = CryptoError::KeyUnavailable("keychain locked".to_string());
        assert_eq!(err.to_string(), "key unavailable: keychain locked");
    }

    #[test]
    fn test_corrupt_ciphertext_display() {
        let err = CryptoError::CorruptCiphertext("blob too short".to_string());
        assert_eq!(err.to_string(), "corrupt ciphertext: blob too short");
    }

    #[test]
    fn test_authentication_failed_display() {
        assert_eq!(
            CryptoError::AuthenticationFailed.to_string(),
            "authentication failed: ciphertext or tag does not verify"
        );
    }

    #[test]
    fn test_unsupported_format_display() {
        let err = CryptoError::UnsupportedFormat("version 7".to_string());
        assert_eq!(err.to_string(), "unsupported blob format: version 7");
    }

    #[test]
    fn test_from_base64_error() {
        use base64::Engine;
        let decode_err = base64::engine::general_purpose::STANDARD
            .decode("!!not base64!!")
            .unwrap_err();
        let err: CryptoError = decode_err.into();
        assert!(matches!(err, CryptoError::CorruptCiphertext(_)));
    }

    #[test]
    fn test_from_keychain_error() {
        let err: CryptoError = KeychainError::AccessDenied("locked".to_string()).into();
        assert!(matches!(err, CryptoError::KeyUnavailable(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CryptoError>();
    }
}
