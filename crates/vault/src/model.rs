//! Credential records as seen by callers.

use serde::Serialize;
use zeroize::Zeroizing;

use crate::error::UriError;
use crate::fingerprint::Fingerprint;
use crate::uri::{password_of, redact, ConnectionId};

/// Remote file protocol of a saved connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Sftp,
    Ftp,
    Ftps,
    Smb,
}

impl OperationType {
    /// Maps a URI scheme to an operation type. `ssh` and `sftp` both map to
    /// [`OperationType::Sftp`].
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme.to_ascii_lowercase().as_str() {
            "ssh" | "sftp" => Some(Self::Sftp),
            "ftp" => Some(Self::Ftp),
            "ftps" => Some(Self::Ftps),
            "smb" => Some(Self::Smb),
            _ => None,
        }
    }

    /// Scheme used in canonical identifiers.
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Sftp => "sftp",
            Self::Ftp => "ftp",
            Self::Ftps => "ftps",
            Self::Smb => "smb",
        }
    }

    /// Port assumed when the URI omits one.
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Sftp => 22,
            Self::Ftp | Self::Ftps => 21,
            Self::Smb => 445,
        }
    }

    /// Whether connections of this type present an SSH host key.
    pub fn uses_host_key(&self) -> bool {
        matches!(self, Self::Sftp)
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.scheme())
    }
}

impl std::str::FromStr for OperationType {
    type Err = UriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_scheme(s).ok_or_else(|| UriError::UnsupportedScheme(s.to_string()))
    }
}

/// A credential in plaintext form, as callers hand it in and get it back.
///
/// `uri` carries the password in clear and `ssh_key_contents` the private
/// key; neither is ever persisted in this form.
#[derive(Clone, PartialEq, Eq)]
pub struct OperationData {
    pub operation_type: OperationType,
    pub uri: Zeroizing<String>,
    pub name: String,
    pub host_key: Option<Fingerprint>,
    pub ssh_key_name: Option<String>,
    pub ssh_key_contents: Option<Zeroizing<String>>,
}

impl OperationData {
    /// Creates a record, taking the operation type from the URI scheme.
    pub fn new(uri: impl Into<String>, name: impl Into<String>) -> Result<Self, UriError> {
        let uri = Zeroizing::new(uri.into());
        let id = ConnectionId::parse(&uri)?;
        Ok(Self {
            operation_type: id.operation_type(),
            uri,
            name: name.into(),
            host_key: None,
            ssh_key_name: None,
            ssh_key_contents: None,
        })
    }

    /// Sets the pinned host key.
    pub fn with_host_key(mut self, host_key: Fingerprint) -> Self {
        self.host_key = Some(host_key);
        self
    }

    /// Attaches a private key used instead of, or alongside, a password.
    pub fn with_ssh_key(mut self, name: impl Into<String>, contents: impl Into<String>) -> Self {
        self.ssh_key_name = Some(name.into());
        self.ssh_key_contents = Some(Zeroizing::new(contents.into()));
        self
    }

    /// Canonical identifier of this record.
    pub fn id(&self) -> Result<ConnectionId, UriError> {
        ConnectionId::parse(&self.uri)
    }

    /// The plaintext password carried by the URI.
    pub fn password(&self) -> Option<Zeroizing<String>> {
        password_of(&self.uri)
    }

    /// Fails when the declared operation type disagrees with the URI scheme,
    /// or when a host key is set on a protocol that does not pin one.
    pub fn check_operation_type(&self) -> Result<ConnectionId, UriError> {
        let id = self.id()?;
        if id.operation_type() != self.operation_type {
            return Err(UriError::OperationMismatch {
                declared: self.operation_type.to_string(),
                scheme: id.operation_type().to_string(),
            });
        }
        if self.host_key.is_some() && !self.operation_type.uses_host_key() {
            return Err(UriError::HostKeyNotSupported(self.operation_type.to_string()));
        }
        Ok(id)
    }
}

impl std::fmt::Debug for OperationData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationData")
            .field("operation_type", &self.operation_type)
            .field("uri", &redact(&self.uri))
            .field("name", &self.name)
            .field("host_key", &self.host_key)
            .field("ssh_key_name", &self.ssh_key_name)
            .field(
                "ssh_key_contents",
                &self.ssh_key_contents.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// A saved connection as listed, without any secret material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SavedConnection {
    pub id: ConnectionId,
    pub operation_type: OperationType,
    pub name: String,
    /// Stored URI with the password masked.
    pub display_uri: String,
    pub host_key: Option<Fingerprint>,
    pub ssh_key_name: Option<String>,
    pub has_ssh_key: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Narrows [`CredentialStore::list`](crate::CredentialStore::list).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionFilter {
    /// Only connections of this type.
    pub operation_type: Option<OperationType>,
    /// Only connections to this host (case-insensitive).
    pub host: Option<String>,
}

impl ConnectionFilter {
    /// Whether `connection` passes the filter.
    pub fn matches(&self, connection: &SavedConnection) -> bool {
        if let Some(op) = self.operation_type {
            if connection.operation_type != op {
                return false;
            }
        }
        if let Some(host) = &self.host {
            if !connection.id.host().eq_ignore_ascii_case(host) {
                return false;
            }
        }
        true
    }
}
