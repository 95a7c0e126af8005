//! Connection URIs: canonical identifiers and password protection.
//!
//! A stored URI keeps every component of the original except the password,
//! which is replaced by its sealed, base64-encoded form. Identifiers are
//! derived from the non-secret components only, so re-sealing a password
//! (which draws a new nonce) never changes where a record is found.

use std::sync::Arc;

use keyseal::{CryptoEngine, EncodingMode};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use serde::{Serialize, Serializer};
use url::Url;
use zeroize::Zeroizing;

use crate::error::{Result, UriError, VaultError};
use crate::model::OperationType;

/// Characters escaped in the user part of a canonical identifier.
const USERINFO: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b':')
    .add(b';')
    .add(b'<')
    .add(b'=')
    .add(b'>')
    .add(b'?')
    .add(b'@')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Placeholder shown instead of a password.
pub const REDACTED_PASSWORD: &str = "***";

/// Canonical identifier of a remote endpoint: `scheme://user@host:port`.
///
/// The scheme and host are lowercased, `ssh` is folded into `sftp`, the
/// port is always explicit, and password, path, query and fragment are
/// dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId {
    canonical: String,
    operation_type: OperationType,
    user: String,
    host: String,
    port: u16,
}

impl ConnectionId {
    /// Canonicalises `uri`. Parsing a canonical identifier returns it
    /// unchanged.
    pub fn parse(uri: &str) -> std::result::Result<Self, UriError> {
        let url = Url::parse(uri.trim())?;
        let operation_type = OperationType::from_scheme(url.scheme())
            .ok_or_else(|| UriError::UnsupportedScheme(url.scheme().to_string()))?;

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or(UriError::MissingHost)?
            .to_ascii_lowercase();
        let port = url.port().unwrap_or_else(|| operation_type.default_port());

        let user = percent_decode_str(url.username())
            .decode_utf8()
            .map_err(|_| UriError::Invalid("user name is not valid UTF-8".to_string()))?;
        let user = utf8_percent_encode(&user, USERINFO).to_string();

        let canonical = if user.is_empty() {
            format!("{}://{}:{}", operation_type.scheme(), host, port)
        } else {
            format!("{}://{}@{}:{}", operation_type.scheme(), user, host, port)
        };

        Ok(Self {
            canonical,
            operation_type,
            user,
            host,
            port,
        })
    }

    /// The canonical text.
    pub fn as_str(&self) -> &str {
        &self.canonical
    }

    /// Protocol of the endpoint.
    pub fn operation_type(&self) -> OperationType {
        self.operation_type
    }

    /// Percent-encoded user name; empty for anonymous connections.
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Lowercased host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Explicit port.
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl std::str::FromStr for ConnectionId {
    type Err = UriError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for ConnectionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.canonical)
    }
}

/// A stored URI with its password decrypted.
pub struct Revealed {
    /// The URI with the plaintext password in place.
    pub uri: Zeroizing<String>,
    /// Whether the stored password used the legacy blob format.
    pub needs_migration: bool,
}

impl Revealed {
    /// The percent-decoded plaintext password, if the URI has one.
    pub fn password(&self) -> Option<Zeroizing<String>> {
        password_of(&self.uri)
    }
}

impl std::fmt::Debug for Revealed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Revealed")
            .field("uri", &redact(&self.uri))
            .field("needs_migration", &self.needs_migration)
            .finish()
    }
}

/// Swaps URI passwords for sealed blobs and back.
#[derive(Debug, Clone)]
pub struct UriGuard {
    engine: Arc<CryptoEngine>,
    mode: EncodingMode,
}

impl UriGuard {
    /// Creates a guard that seals with `engine` and encodes blobs with `mode`.
    pub fn new(engine: Arc<CryptoEngine>, mode: EncodingMode) -> Self {
        Self { engine, mode }
    }

    /// The engine that seals and opens blobs.
    pub fn engine(&self) -> &Arc<CryptoEngine> {
        &self.engine
    }

    /// The transport encoding used for blobs.
    pub fn mode(&self) -> EncodingMode {
        self.mode
    }

    /// Returns `uri` with its password replaced by a sealed blob. URIs
    /// without a password are returned unchanged.
    pub fn sanitize_for_storage(&self, uri: &str) -> Result<String> {
        let mut url = Url::parse(uri).map_err(UriError::from)?;
        let Some(encoded) = url.password() else {
            return Ok(uri.to_string());
        };

        let password = Zeroizing::new(
            percent_decode_str(encoded)
                .decode_utf8()
                .map_err(|_| UriError::InvalidPassword)?
                .into_owned(),
        );
        let blob = self.engine.encrypt(&password, self.mode)?;
        url.set_password(Some(blob.as_str()))
            .map_err(|_| UriError::MissingHost)?;
        Ok(url.into())
    }

    /// Decrypts the password of a stored URI. Only call this right before
    /// authenticating.
    pub fn reveal(&self, stored: &str) -> Result<Revealed> {
        let mut url = Url::parse(stored).map_err(UriError::from)?;
        let Some(encoded) = url.password() else {
            return Ok(Revealed {
                uri: Zeroizing::new(stored.to_string()),
                needs_migration: false,
            });
        };

        let blob = percent_decode_str(encoded)
            .decode_utf8()
            .map_err(|_| UriError::InvalidPassword)?
            .into_owned();
        let decrypted = self.engine.decrypt(&blob, self.mode)?;
        url.set_password(Some(decrypted.plaintext()))
            .map_err(|_| UriError::MissingHost)?;

        Ok(Revealed {
            uri: Zeroizing::new(url.into()),
            needs_migration: decrypted.needs_migration(),
        })
    }

    /// Seals a standalone secret such as private key contents.
    pub fn seal_secret(&self, secret: &str) -> Result<String> {
        Ok(self.engine.encrypt(secret, self.mode)?)
    }

    /// Opens a secret sealed by [`seal_secret`](Self::seal_secret).
    pub fn open_secret(&self, sealed: &str) -> Result<keyseal::Decrypted> {
        self.engine.decrypt(sealed, self.mode).map_err(VaultError::from)
    }
}

/// Masks the password of `uri` for logs and listings. Never touches
/// cryptography; unparseable input is not echoed back.
pub fn redact(uri: &str) -> String {
    match Url::parse(uri) {
        Ok(mut url) => {
            if url.password().is_some() {
                let _ = url.set_password(Some(REDACTED_PASSWORD));
            }
            url.into()
        }
        Err(_) => "[unparseable uri]".to_string(),
    }
}

/// The percent-decoded password of `uri`, if it has one.
pub fn password_of(uri: &str) -> Option<Zeroizing<String>> {
    let url = Url::parse(uri).ok()?;
    let encoded = url.password()?;
    percent_decode_str(encoded)
        .decode_utf8()
        .ok()
        .map(|p| Zeroizing::new(p.into_owned()))
}

/// Whether `uri` carries a password component.
pub fn has_password(uri: &str) -> bool {
    Url::parse(uri)
        .map(|url| url.password().is_some())
        .unwrap_or(false)
}
