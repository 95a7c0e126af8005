//! Host key fingerprints.
//!
//! Accepted forms:
//! - colon-separated hex pairs, e.g. `aa:bb:cc:...` (bare hex is split into
//!   pairs); normalised to lowercase
//! - OpenSSH `SHA256:<base64>`, whose body is case-sensitive and kept as given
//! - OpenSSH `MD5:<hex pairs>`; the hex is lowercased like bare colon hex

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::VaultError;

/// A normalised host key fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Parses and normalises a fingerprint.
    pub fn parse(input: &str) -> Result<Self, VaultError> {
        let trimmed = input.trim();
        let invalid = || VaultError::InvalidFingerprint(trimmed.to_string());

        if let Some(body) = strip_prefix_ignore_case(trimmed, "SHA256:") {
            let valid = !body.is_empty()
                && body
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '='));
            return if valid {
                Ok(Self(format!("SHA256:{}", body)))
            } else {
                Err(invalid())
            };
        }

        if let Some(body) = strip_prefix_ignore_case(trimmed, "MD5:") {
            if !is_colon_hex(body) {
                return Err(invalid());
            }
            return Ok(Self(format!("MD5:{}", body.to_ascii_lowercase())));
        }

        if trimmed.contains(':') {
            if !is_colon_hex(trimmed) {
                return Err(invalid());
            }
            return Ok(Self(trimmed.to_ascii_lowercase()));
        }

        let bytes = hex::decode(trimmed).map_err(|_| invalid())?;
        if bytes.is_empty() {
            return Err(invalid());
        }
        Ok(Self(colon_hex(&bytes)))
    }

    /// Fingerprint of raw host key bytes: colon-separated SHA-256.
    pub fn of_host_key(key: &[u8]) -> Self {
        Self(colon_hex(&Sha256::digest(key)))
    }

    /// Wraps a value read back from the database. Values written by older
    /// releases are normalised when they parse, and kept verbatim otherwise.
    pub(crate) fn from_stored(value: String) -> Self {
        match Self::parse(&value) {
            Ok(fingerprint) => fingerprint,
            Err(_) => Self(value),
        }
    }

    /// The normalised text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Fingerprint {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len()
        && s.is_char_boundary(prefix.len())
        && s[..prefix.len()].eq_ignore_ascii_case(prefix)
    {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

fn is_colon_hex(s: &str) -> bool {
    s.split(':')
        .all(|pair| pair.len() == 2 && pair.chars().all(|c| c.is_ascii_hexdigit()))
}

fn colon_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| hex::encode([*b]))
        .collect::<Vec<_>>()
        .join(":")
}
