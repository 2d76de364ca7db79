//! Leaf MIME entities produced while decoding.

use crate::content_type::{ContentType, DEFAULT_CONTENT_TYPE};
use crate::encoding::{decode_base64, decode_quoted_printable};
use crate::error::Result;
use crate::header::Headers;
use std::fmt;

/// Transfer encoding types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    /// 7-bit ASCII.
    SevenBit,
    /// 8-bit binary.
    EightBit,
    /// Base64 encoding.
    Base64,
    /// Quoted-Printable encoding.
    QuotedPrintable,
    /// Binary (no encoding).
    Binary,
}

impl TransferEncoding {
    /// Parses transfer encoding from string.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "8bit" => Self::EightBit,
            "base64" => Self::Base64,
            "quoted-printable" => Self::QuotedPrintable,
            "binary" => Self::Binary,
            _ => Self::SevenBit, // Default (includes "7bit")
        }
    }
}

impl fmt::Display for TransferEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SevenBit => write!(f, "7bit"),
            Self::EightBit => write!(f, "8bit"),
            Self::Base64 => write!(f, "base64"),
            Self::QuotedPrintable => write!(f, "quoted-printable"),
            Self::Binary => write!(f, "binary"),
        }
    }
}

/// A flattened, non-multipart entity: its headers and decoded body.
#[derive(Debug, Clone)]
pub(crate) struct Part {
    pub(crate) headers: Headers,
    pub(crate) body: Vec<u8>,
}

impl Part {
    /// Builds a leaf from raw entity bytes, undoing the transfer encoding.
    pub(crate) fn decode(headers: Headers, raw: &[u8]) -> Result<Self> {
        let encoding = headers
            .get("Content-Transfer-Encoding")
            .map_or(TransferEncoding::SevenBit, TransferEncoding::parse);

        let body = match encoding {
            TransferEncoding::Base64 => decode_base64(raw)?,
            TransferEncoding::QuotedPrintable => decode_quoted_printable(raw),
            _ => raw.to_vec(),
        };

        Ok(Self { headers, body })
    }

    /// Gets the content type, defaulting when the header is absent.
    pub(crate) fn content_type(&self) -> Result<ContentType> {
        ContentType::parse(
            self.headers
                .get("Content-Type")
                .unwrap_or(DEFAULT_CONTENT_TYPE),
        )
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_encoding_parse() {
        assert_eq!(TransferEncoding::parse("7bit"), TransferEncoding::SevenBit);
        assert_eq!(TransferEncoding::parse(" BASE64 "), TransferEncoding::Base64);
        assert_eq!(
            TransferEncoding::parse("quoted-printable"),
            TransferEncoding::QuotedPrintable
        );
        assert_eq!(TransferEncoding::parse("x-unknown"), TransferEncoding::SevenBit);
    }

    #[test]
    fn test_part_decode_base64() {
        let headers: Headers = [("Content-Transfer-Encoding", "base64")].into_iter().collect();
        let part = Part::decode(headers, b"SGVsbG8s\r\nIFdvcmxkIQ==\r\n").unwrap();
        assert_eq!(part.body, b"Hello, World!");
    }

    #[test]
    fn test_part_decode_quoted_printable() {
        let headers: Headers = [("Content-Transfer-Encoding", "quoted-printable")]
            .into_iter()
            .collect();
        let part = Part::decode(headers, b"caf=C3=A9 au=\r\n lait").unwrap();
        assert_eq!(part.body, "café au lait".as_bytes());
    }

    #[test]
    fn test_part_decode_identity() {
        let part = Part::decode(Headers::new(), b"plain body").unwrap();
        assert_eq!(part.body, b"plain body");
        assert_eq!(part.content_type().unwrap().mime_type(), "text/plain");
    }

    #[test]
    fn test_part_decode_bad_base64() {
        let headers: Headers = [("Content-Transfer-Encoding", "base64")].into_iter().collect();
        assert!(Part::decode(headers, b"not base64!").is_err());
    }
}
