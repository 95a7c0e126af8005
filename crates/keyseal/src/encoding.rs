//! Text transport encodings for sealed blobs.
//!
//! The encoding mode only decides how bytes become text; it never changes
//! the cipher. Decoding tolerates ASCII whitespace because older releases
//! wrapped their base64 output across lines.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Base64 flavour used to carry a blob inside URIs, database columns and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodingMode {
    /// RFC 4648 alphabet with padding.
    Standard,
    /// RFC 4648 alphabet without padding.
    StandardNoPad,
    /// URL and filename safe alphabet with padding.
    #[default]
    UrlSafe,
    /// URL and filename safe alphabet without padding.
    UrlSafeNoPad,
}

impl EncodingMode {
    /// Encodes raw bytes as text.
    pub fn encode(&self, bytes: &[u8]) -> String {
        match self {
            Self::Standard => STANDARD.encode(bytes),
            Self::StandardNoPad => STANDARD_NO_PAD.encode(bytes),
            Self::UrlSafe => URL_SAFE.encode(bytes),
            Self::UrlSafeNoPad => URL_SAFE_NO_PAD.encode(bytes),
        }
    }

    /// Decodes text produced by [`encode`](Self::encode), ignoring whitespace.
    pub fn decode(&self, text: &str) -> Result<Vec<u8>> {
        let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        let bytes = match self {
            Self::Standard => STANDARD.decode(compact)?,
            Self::StandardNoPad => STANDARD_NO_PAD.decode(compact)?,
            Self::UrlSafe => URL_SAFE.decode(compact)?,
            Self::UrlSafeNoPad => URL_SAFE_NO_PAD.decode(compact)?,
        };
        Ok(bytes)
    }

    /// Parses a mode name as written in configuration files.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "standard" | "default" => Some(Self::Standard),
            "standard_no_pad" => Some(Self::StandardNoPad),
            "url_safe" | "urlsafe" => Some(Self::UrlSafe),
            "url_safe_no_pad" => Some(Self::UrlSafeNoPad),
            _ => None,
        }
    }

    /// Returns the configuration name of this mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::StandardNoPad => "standard_no_pad",
            Self::UrlSafe => "url_safe",
            Self::UrlSafeNoPad => "url_safe_no_pad",
        }
    }
}

impl std::fmt::Display for EncodingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CryptoError;

    const ALL_MODES: [EncodingMode; 4] = [
        EncodingMode::Standard,
        EncodingMode::StandardNoPad,
        EncodingMode::UrlSafe,
        EncodingMode::UrlSafeNoPad,
    ];

    #[test]
    fn test_default_is_url_safe() {
        assert_eq!(EncodingMode::default(), EncodingMode::UrlSafe);
    }

    #[test]
    fn test_url_safe_avoids_reserved_characters() {
        // 0xfb 0xff encodes to "+/" in the standard alphabet
        let bytes = [0xfb, 0xff, 0xfe];
        let standard = EncodingMode::Standard.encode(&bytes);
        let url_safe = EncodingMode::UrlSafe.encode(&bytes);
        assert!(standard.contains('+') || standard.contains('/'));
        assert!(!url_safe.contains('+') && !url_safe.contains('/'));
    }

    #[test]
    fn test_no_pad_variants_strip_padding() {
        let bytes = [1u8, 2, 3, 4];
        assert!(EncodingMode::Standard.encode(&bytes).ends_with('='));
        assert!(!EncodingMode::StandardNoPad.encode(&bytes).ends_with('='));
        assert!(!EncodingMode::UrlSafeNoPad.encode(&bytes).ends_with('='));
    }

    #[test]
    fn test_decode_ignores_line_wrapping() {
        let bytes: Vec<u8> = (0u8..=90).collect();
        for mode in ALL_MODES {
            let encoded = mode.encode(&bytes);
            let (head, tail) = encoded.split_at(encoded.len() / 2);
            let wrapped = format!("{head}\n{tail}\r\n");
            assert_eq!(mode.decode(&wrapped).unwrap(), bytes, "mode {mode}");
        }
    }

    #[test]
    fn test_decode_rejects_wrong_alphabet() {
        let encoded = EncodingMode::Standard.encode(&[0xfb, 0xff, 0xfe]);
        let result = EncodingMode::UrlSafe.decode(&encoded);
        assert!(matches!(result, Err(CryptoError::CorruptCiphertext(_))));
    }

    #[test]
    fn test_parse_names() {
        for mode in ALL_MODES {
            assert_eq!(EncodingMode::parse(mode.as_str()), Some(mode));
        }
        assert_eq!(EncodingMode::parse("URL-SAFE"), Some(EncodingMode::UrlSafe));
        assert_eq!(EncodingMode::parse("hex"), None);
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&EncodingMode::UrlSafeNoPad).unwrap();
        assert_eq!(json, "\"url_safe_no_pad\"");
        let mode: EncodingMode = serde_json::from_str("\"standard\"").unwrap();
        assert_eq!(mode, EncodingMode::Standard);
    }
}
