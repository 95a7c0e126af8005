//! Error types for the vault crate.

use keyseal::CryptoError;
use thiserror::Error;

use crate::fingerprint::Fingerprint;

/// Errors raised by the SQLite-backed stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No row exists for the identifier.
    #[error("not found: {0}")]
    NotFound(String),

    /// The write would violate a store invariant.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The database could not be read or written.
    #[error("storage failure: {0}")]
    IoFailure(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::IoFailure(err.to_string())
    }
}

/// Errors raised while parsing or rewriting connection URIs.
#[derive(Debug, Error)]
pub enum UriError {
    /// The text is not a URI.
    #[error("invalid connection uri: {0}")]
    Invalid(String),

    /// The scheme is not one of ssh, sftp, ftp, ftps or smb.
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    /// The URI has no host component.
    #[error("connection uri has no host")]
    MissingHost,

    /// The record's operation type disagrees with the URI scheme.
    #[error("operation type {declared} does not match uri scheme {scheme}")]
    OperationMismatch {
        /// Operation type carried by the record.
        declared: String,
        /// Scheme found in the URI.
        scheme: String,
    },

    /// A host key was given for a protocol that does not pin one.
    #[error("{0} connections do not use host keys")]
    HostKeyNotSupported(String),

    /// The password is not valid UTF-8 once percent-decoded.
    #[error("password is not valid UTF-8")]
    InvalidPassword,
}

impl From<url::ParseError> for UriError {
    fn from(err: url::ParseError) -> Self {
        UriError::Invalid(err.to_string())
    }
}

/// Errors raised by the privileged filesystem capability.
#[derive(Debug, Error)]
pub enum PrivilegedError {
    /// The path was rejected before reaching the privileged channel.
    #[error("unsafe path rejected: {0}")]
    UnsafePath(String),

    /// A file was expected but the path is a directory.
    #[error("path is a directory: {0}")]
    IsDirectory(String),

    /// The path does not exist.
    #[error("path not found: {0}")]
    NotFound(String),

    /// The privileged channel itself failed.
    #[error("privileged channel failure: {0}")]
    Channel(String),
}

impl From<std::io::Error> for PrivilegedError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => PrivilegedError::NotFound(err.to_string()),
            _ => PrivilegedError::Channel(err.to_string()),
        }
    }
}

/// Umbrella error returned by the vault facade.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Uri(#[from] UriError),

    #[error(transparent)]
    Privileged(#[from] PrivilegedError),

    #[error("invalid host key fingerprint: {0}")]
    InvalidFingerprint(String),

    /// The credential exists but cannot be decrypted. This usually means the
    /// row was tampered with or the installation key was lost.
    #[error("credential {identifier} cannot be decrypted: {source}")]
    Undecryptable {
        identifier: String,
        #[source]
        source: CryptoError,
    },

    #[error("host key mismatch for {identifier}: pinned {pinned}, observed {observed}")]
    HostKeyMismatch {
        identifier: String,
        pinned: Fingerprint,
        observed: Fingerprint,
    },

    #[error("background task failed: {0}")]
    Worker(String),
}

impl From<rusqlite::Error> for VaultError {
    fn from(err: rusqlite::Error) -> Self {
        VaultError::Store(err.into())
    }
}

impl VaultError {
    /// Text suitable for end users.
    ///
    /// A missing credential and one that cannot be decrypted read the same,
    /// so the message does not reveal whether a record exists.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Store(StoreError::NotFound(_)) | Self::Undecryptable { .. } => {
                "The saved connection is not available."
            }
            Self::HostKeyMismatch { .. } => {
                "The server's host key has changed. The connection was refused."
            }
            Self::Store(StoreError::Conflict(_)) => {
                "The connection conflicts with an existing saved connection."
            }
            Self::Uri(UriError::HostKeyNotSupported(_)) => {
                "This kind of connection does not use host keys."
            }
            Self::Uri(_) => "The connection address is not valid.",
            Self::InvalidFingerprint(_) => "The host key fingerprint is not valid.",
            Self::Crypto(CryptoError::KeyUnavailable(_)) => {
                "The secure key store is not available."
            }
            Self::Privileged(_) => "The file could not be accessed.",
            Self::Crypto(_) | Self::Store(_) | Self::Worker(_) => {
                "Saved credentials could not be accessed."
            }
        }
    }

    /// Whether the error means the credential does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Store(StoreError::NotFound(_)))
    }
}

/// Result type alias for vault operations.
pub type Result<T> = std::result::Result<T, VaultError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        assert_eq!(
            StoreError::NotFound("sftp://a@h:22".to_string()).to_string(),
            "not found: sftp://a@h:22"
        );
        assert_eq!(
            StoreError::Conflict("hostkey pinned".to_string()).to_string(),
            "conflict: hostkey pinned"
        );
    }

    #[test]
    fn test_not_found_and_undecryptable_share_user_message() {
        let missing = VaultError::Store(StoreError::NotFound("id".to_string()));
        let broken = VaultError::Undecryptable {
            identifier: "id".to_string(),
            source: CryptoError::AuthenticationFailed,
        };

        assert_eq!(missing.user_message(), broken.user_message());
        assert_ne!(missing.to_string(), broken.to_string());
        assert!(missing.is_not_found());
        assert!(!broken.is_not_found());
    }

    #[test]
    fn test_undecryptable_keeps_source() {
        use std::error::Error;
        let err = VaultError::Undecryptable {
            identifier: "sftp://u@h:22".to_string(),
            source: CryptoError::AuthenticationFailed,
        };
        assert!(err.source().is_some());
        assert!(err.to_string().contains("sftp://u@h:22"));
    }

    #[test]
    fn test_io_error_mapping() {
        let err: PrivilegedError =
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, PrivilegedError::NotFound(_)));

        let err: PrivilegedError =
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no").into();
        assert!(matches!(err, PrivilegedError::Channel(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<VaultError>();
    }
}
