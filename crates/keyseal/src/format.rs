//! Sealed blob layouts.
//!
//! ```text
//! current:  "N" "V" | 0x02 | nonce (12) | ciphertext | tag (16)
//! legacy:                               ciphertext | tag (16)   (fixed IV)
//! ```
//!
//! The layout is picked from the marker before any key is touched. A legacy
//! ciphertext can start with the magic bytes by chance, so the engine falls
//! back to the legacy layout when a versioned reading does not open.

use crate::error::{CryptoError, Result};
use crate::encoding::EncodingMode;

/// Magic prefix of versioned blobs.
pub const BLOB_MAGIC: [u8; 2] = *b"NV";

/// Version byte written by this build.
pub const CURRENT_VERSION: u8 = 0x02;

/// Length of the magic plus version byte.
pub const HEADER_LEN: usize = BLOB_MAGIC.len() + 1;

/// AES-GCM nonce length in bytes.
pub const NONCE_LEN: usize = 12;

/// AES-GCM authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

/// Fixed IV used by releases that predate versioned blobs.
pub(crate) const LEGACY_IV: [u8; NONCE_LEN] = *b"LxbHiJhhUXcj";

/// Which layout a blob uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlobFormat {
    /// Headerless blob sealed under the fixed legacy IV.
    Legacy,
    /// Versioned blob with a random per-blob nonce.
    Current,
}

/// A sealed credential. Only the engine creates these.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptedBlob {
    bytes: Vec<u8>,
}

impl EncryptedBlob {
    pub(crate) fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Raw bytes of the blob.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Layout of this blob.
    pub fn format(&self) -> Result<BlobFormat> {
        Ok(match parse(&self.bytes)? {
            ParsedBlob::Current { .. } => BlobFormat::Current,
            ParsedBlob::Legacy { .. } => BlobFormat::Legacy,
            ParsedBlob::UnknownVersion { version, .. } => return Err(unknown_version(version)),
        })
    }

    /// Text form of the blob in the given transport encoding.
    pub fn encode(&self, mode: EncodingMode) -> String {
        mode.encode(&self.bytes)
    }
}

impl std::fmt::Debug for EncryptedBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedBlob")
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Borrowed view of a blob split into its parts.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ParsedBlob<'a> {
    Current {
        nonce: &'a [u8],
        sealed: &'a [u8],
    },
    Legacy {
        sealed: &'a [u8],
    },
    /// Magic followed by a version this build does not know. Only a legacy
    /// blob that happens to start with the magic can still open.
    UnknownVersion {
        version: u8,
        sealed: &'a [u8],
    },
}

pub(crate) fn unknown_version(version: u8) -> CryptoError {
    CryptoError::UnsupportedFormat(format!("blob version {version:#04x}"))
}

/// Splits a blob according to its marker.
pub(crate) fn parse(bytes: &[u8]) -> Result<ParsedBlob<'_>> {
    if bytes.starts_with(&BLOB_MAGIC) {
        let version = bytes.get(BLOB_MAGIC.len()).copied().ok_or_else(|| {
            CryptoError::CorruptCiphertext("blob ends after magic".to_string())
        })?;
        if version != CURRENT_VERSION {
            if bytes.len() < TAG_LEN {
                return Err(unknown_version(version));
            }
            return Ok(ParsedBlob::UnknownVersion {
                version,
                sealed: bytes,
            });
        }
        let body = &bytes[HEADER_LEN..];
        if body.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::CorruptCiphertext(format!(
                "versioned blob too short: {} bytes",
                bytes.len()
            )));
        }
        let (nonce, sealed) = body.split_at(NONCE_LEN);
        return Ok(ParsedBlob::Current { nonce, sealed });
    }

    if bytes.len() < TAG_LEN {
        return Err(CryptoError::CorruptCiphertext(format!(
            "blob too short: {} bytes",
            bytes.len()
        )));
    }
    Ok(ParsedBlob::Legacy { sealed: bytes })
}

/// Assembles a current-format blob.
pub(crate) fn assemble(nonce: &[u8; NONCE_LEN], sealed: &[u8]) -> EncryptedBlob {
    let mut bytes = Vec::with_capacity(HEADER_LEN + NONCE_LEN + sealed.len());
    bytes.extend_from_slice(&BLOB_MAGIC);
    bytes.push(CURRENT_VERSION);
    bytes.extend_from_slice(nonce);
    bytes.extend_from_slice(sealed);
    EncryptedBlob::from_bytes(bytes)
}
