//! Multipart body writing and splitting.

use crate::error::{Error, Result};
use crate::header::Headers;
use rand::RngCore;
use rand::rngs::OsRng;
use std::fmt::Write as _;

/// Generates a random boundary token.
///
/// The token is 60 lowercase hex characters, which never occur as a line of
/// quoted-printable or base64 output.
#[must_use]
pub fn generate_boundary() -> String {
    let mut bytes = [0u8; 30];
    OsRng.fill_bytes(&mut bytes);
    bytes.iter().fold(String::with_capacity(60), |mut acc, b| {
        let _ = write!(acc, "{b:02x}");
        acc
    })
}

/// Writes the parts of one multipart container into a shared buffer.
#[derive(Debug)]
pub(crate) struct MultipartWriter {
    boundary: String,
    parts: usize,
}

impl MultipartWriter {
    pub(crate) fn new() -> Self {
        Self {
            boundary: generate_boundary(),
            parts: 0,
        }
    }

    pub(crate) fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Writes a part delimiter and the part's headers; the caller appends the
    /// part body afterwards.
    pub(crate) fn create_part(&mut self, out: &mut Vec<u8>, headers: &Headers) {
        if self.parts > 0 {
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"--");
        out.extend_from_slice(self.boundary.as_bytes());
        out.extend_from_slice(b"\r\n");
        headers.write_to(out);
        out.extend_from_slice(b"\r\n");
        self.parts += 1;
    }

    /// Writes the closing delimiter.
    pub(crate) fn close(self, out: &mut Vec<u8>) {
        out.extend_from_slice(b"\r\n--");
        out.extend_from_slice(self.boundary.as_bytes());
        out.extend_from_slice(b"--\r\n");
    }
}

/// Splits a multipart body into the raw bytes of its parts.
///
/// The preamble before the first delimiter and the epilogue after the closing
/// delimiter are discarded. The line break preceding each delimiter belongs to
/// the delimiter, not to the part.
///
/// # Errors
///
/// Returns an error if the closing delimiter is missing.
pub(crate) fn split_parts<'a>(body: &'a [u8], boundary: &str) -> Result<Vec<&'a [u8]>> {
    let delimiter = format!("--{boundary}");
    let mut parts = Vec::new();
    let mut current: Option<usize> = None;
    let mut offset = 0;

    while offset < body.len() {
        let line_end = body[offset..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(body.len(), |pos| offset + pos + 1);
        let line = trim_line_end(&body[offset..line_end]);

        if let Some(suffix) = line.strip_prefix(delimiter.as_bytes()) {
            let closing = suffix == b"--";
            if closing || suffix.is_empty() {
                if let Some(start) = current.take() {
                    parts.push(strip_line_break(&body[start..offset]));
                }
                if closing {
                    return Ok(parts);
                }
                current = Some(line_end);
            }
        }

        offset = line_end;
    }

    Err(Error::InvalidMultipart(format!(
        "Missing closing delimiter for boundary {boundary:?}"
    )))
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let end = line
        .iter()
        .rposition(|b| !matches!(b, b' ' | b'\t' | b'\r' | b'\n'))
        .map_or(0, |pos| pos + 1);
    &line[..end]
}

fn strip_line_break(part: &[u8]) -> &[u8] {
    part.strip_suffix(b"\r\n")
        .or_else(|| part.strip_suffix(b"\n"))
        .unwrap_or(part)
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
    fn test_generate_boundary_unique() {
        let a = generate_boundary();
        let b = generate_boundary();
        assert_eq!(a.len(), 60);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_writer_then_split() {
        let mut out = Vec::new();
        let mut writer = MultipartWriter::new();
        let boundary = writer.boundary().to_string();

        let headers: Headers = [("Content-Type", "text/plain")].into_iter().collect();
        writer.create_part(&mut out, &headers);
        out.extend_from_slice(b"first");
        writer.create_part(&mut out, &Headers::new());
        out.extend_from_slice(b"second\r\n");
        writer.close(&mut out);

        let parts = split_parts(&out, &boundary).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0], b"Content-Type: text/plain\r\n\r\nfirst");
        assert_eq!(parts[1], b"\r\nsecond\r\n");
    }

    #[test]
    fn test_split_skips_preamble_and_epilogue() {
        let body = b"This is a preamble.\n--xyz\n\npart one\n--xyz  \n\npart two\n--xyz--\nepilogue";
        let parts = split_parts(body, "xyz").unwrap();
        assert_eq!(parts, vec![&b"\npart one"[..], &b"\npart two"[..]]);
    }

    #[test]
    fn test_split_ignores_lines_extending_boundary() {
        let body = b"--b\r\n\r\n--bogus line\r\n--b--\r\n";
        let parts = split_parts(body, "b").unwrap();
        assert_eq!(parts, vec![&b"\r\n--bogus line"[..]]);
    }

    #[test]
    fn test_split_requires_closing_delimiter() {
        let body = b"--b\r\n\r\nunterminated\r\n";
        assert!(matches!(
            split_parts(body, "b"),
            Err(Error::InvalidMultipart(_))
        ));
    }
}
