//! MIME encoding and decoding utilities.
//!
//! Supports Base64 (with RFC 2045 line wrapping), Quoted-Printable, and
//! RFC 2047 encoded-word header encoding.

use crate::error::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::fmt::Write as _;

/// Maximum encoded line length per RFC 2045.
pub const MAX_LINE_LENGTH: usize = 76;

/// Raw bytes that fill one 76-character base64 line.
const RAW_BYTES_PER_LINE: usize = 57;

/// Maximum length of a single RFC 2047 encoded word.
const MAX_ENCODED_WORD_LENGTH: usize = 75;

const UPPER_HEX: &[u8; 16] = b"0123456789ABCDEF";

/// Encodes data as Base64.
#[must_use]
pub fn encode_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decodes Base64 data, ignoring embedded whitespace and line breaks.
///
/// # Errors
///
/// Returns an error if the input is not valid Base64.
pub fn decode_base64(data: &[u8]) -> Result<Vec<u8>> {
    let cleaned: Vec<u8> = data
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    STANDARD.decode(cleaned).map_err(Into::into)
}

/// Appends `data` to `out` as Base64, wrapped every 76 characters.
///
/// Every line, including the last partial one, is terminated by CRLF.
pub fn base64_wrap(out: &mut Vec<u8>, data: &[u8]) {
    let mut line = String::with_capacity(MAX_LINE_LENGTH);
    for chunk in data.chunks(RAW_BYTES_PER_LINE) {
        line.clear();
        STANDARD.encode_string(chunk, &mut line);
        out.extend_from_slice(line.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
}

/// Encodes data using Quoted-Printable encoding (RFC 2045).
///
/// Line breaks (`\n`, `\r` or `\r\n`) in the input become CRLF hard breaks,
/// whitespace before a hard break is escaped, and lines longer than 76
/// characters are split with `=` soft breaks.
#[must_use]
pub fn encode_quoted_printable(data: &[u8]) -> Vec<u8> {
    let mut writer = QpWriter::new(data.len());
    for &byte in data {
        writer.push(byte);
    }
    writer.finish()
}

/// Line-buffered Quoted-Printable writer.
struct QpWriter {
    out: Vec<u8>,
    line: Vec<u8>,
    after_cr: bool,
}

impl QpWriter {
    fn new(capacity: usize) -> Self {
        Self {
            out: Vec::with_capacity(capacity + capacity / 3),
            line: Vec::with_capacity(MAX_LINE_LENGTH + 2),
            after_cr: false,
        }
    }

    fn push(&mut self, byte: u8) {
        match byte {
            b'\r' | b'\n' => {
                // CRLF pairs produce a single hard break.
                if self.after_cr && byte == b'\n' {
                    self.after_cr = false;
                    return;
                }
                self.after_cr = byte == b'\r';
                self.escape_trailing_whitespace();
                self.line.extend_from_slice(b"\r\n");
                self.flush();
            }
            b' ' | b'\t' | b'!'..=b'<' | b'>'..=b'~' => {
                if self.line.len() == MAX_LINE_LENGTH - 1 {
                    self.soft_break();
                }
                self.line.push(byte);
                self.after_cr = false;
            }
            _ => {
                self.escape(byte);
                self.after_cr = false;
            }
        }
    }

    fn escape(&mut self, byte: u8) {
        if MAX_LINE_LENGTH - 1 - self.line.len() < 3 {
            self.soft_break();
        }
        self.line.push(b'=');
        self.line.push(UPPER_HEX[usize::from(byte >> 4)]);
        self.line.push(UPPER_HEX[usize::from(byte & 0x0f)]);
    }

    fn escape_trailing_whitespace(&mut self) {
        if let Some(&last) = self.line.last()
            && (last == b' ' || last == b'\t')
        {
            self.line.pop();
            self.escape(last);
        }
    }

    fn soft_break(&mut self) {
        self.line.extend_from_slice(b"=\r\n");
        self.flush();
    }

    fn flush(&mut self) {
        self.out.append(&mut self.line);
    }

    fn finish(mut self) -> Vec<u8> {
        self.escape_trailing_whitespace();
        self.flush();
        self.out
    }
}

/// Decodes Quoted-Printable data (RFC 2045).
///
/// Soft line breaks are removed, trailing whitespace on each line is
/// discarded and hard line breaks are kept as they appear. Malformed escape
/// sequences are passed through literally.
#[must_use]
pub fn decode_quoted_printable(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());

    for raw_line in data.split_inclusive(|&b| b == b'\n') {
        let has_lf = raw_line.ends_with(b"\n");
        let has_crlf = raw_line.ends_with(b"\r\n");

        let end = raw_line
            .iter()
            .rposition(|b| !matches!(b, b' ' | b'\t' | b'\r' | b'\n'))
            .map_or(0, |pos| pos + 1);
        let line = &raw_line[..end];

        if let Some(content) = line.strip_suffix(b"=") {
            decode_qp_line(content, &mut out);
            continue;
        }

        decode_qp_line(line, &mut out);
        if has_crlf {
            out.extend_from_slice(b"\r\n");
        } else if has_lf {
            out.push(b'\n');
        }
    }

    out
}

fn decode_qp_line(line: &[u8], out: &mut Vec<u8>) {
    let mut i = 0;
    while i < line.len() {
        let byte = line[i];
        if byte == b'='
            && let Some(decoded) = line.get(i + 1..i + 3).and_then(hex_pair)
        {
            out.push(decoded);
            i += 3;
            continue;
        }
        out.push(byte);
        i += 1;
    }
}

fn hex_pair(pair: &[u8]) -> Option<u8> {
    let high = char::from(pair[0]).to_digit(16)?;
    let low = char::from(pair[1]).to_digit(16)?;
    u8::try_from(high << 4 | low).ok()
}

/// Returns true if a header value must be RFC 2047 encoded.
fn needs_encoding(text: &str) -> bool {
    text.bytes().any(|b| (b < b' ' || b > b'~') && b != b'\t')
}

/// Returns true if a byte may appear unescaped in a Q-encoded word.
const fn is_q_safe(byte: u8) -> bool {
    matches!(byte, b'!'..=b'~') && byte != b'=' && byte != b'?' && byte != b'_'
}

/// Encodes a header value using RFC 2047 Q-encoding if needed.
///
/// Values made only of printable ASCII are returned unchanged. Otherwise the
/// value is split into encoded words of at most 75 characters, never
/// splitting a character across words.
#[must_use]
pub fn encode_rfc2047(text: &str, charset: &str) -> String {
    if !needs_encoding(text) {
        return text.to_string();
    }

    let prefix = format!("=?{charset}?q?");
    let max_content = MAX_ENCODED_WORD_LENGTH.saturating_sub(prefix.len() + 2);

    let mut result = String::with_capacity(text.len() * 3);
    result.push_str(&prefix);
    let mut word_length = 0;
    let mut buf = [0u8; 4];

    for ch in text.chars() {
        let bytes = ch.encode_utf8(&mut buf).as_bytes();
        let encoded_length = match bytes {
            [b' '] => 1,
            [b] if is_q_safe(*b) => 1,
            _ => bytes.len() * 3,
        };

        if word_length > 0 && word_length + encoded_length > max_content {
            result.push_str("?= ");
            result.push_str(&prefix);
            word_length = 0;
        }

        for &byte in bytes {
            if byte == b' ' {
                result.push('_');
            } else if is_q_safe(byte) {
                result.push(char::from(byte));
            } else {
                let _ = write!(result, "={byte:02X}");
            }
        }
        word_length += encoded_length;
    }

    result.push_str("?=");
    result
}

/// Decodes every RFC 2047 encoded word in a header value.
///
/// Text outside encoded words is kept; whitespace separating two adjacent
/// encoded words is dropped. Supported charsets are UTF-8, ISO-8859-1 and
/// US-ASCII. Encoded words that fail to decode are kept verbatim.
///
/// # Errors
///
/// Returns an error if an encoded word names an unsupported charset.
pub fn decode_rfc2047(header: &str) -> Result<String> {
    if !header.contains("=?") {
        return Ok(header.to_string());
    }

    let mut result = String::with_capacity(header.len());
    let mut rest = header;
    let mut between_words = false;

    while let Some(start) = rest.find("=?") {
        let Some(word) = EncodedWord::locate(rest, start) else {
            break;
        };

        let Ok(content) = word.decode() else {
            between_words = false;
            result.push_str(&rest[..start + 2]);
            rest = &rest[start + 2..];
            continue;
        };

        let before = &rest[..start];
        if !before.is_empty() && (!between_words || before.chars().any(|c| !c.is_whitespace())) {
            result.push_str(before);
        }

        convert_charset(word.charset, &content, &mut result)?;
        rest = &rest[word.end..];
        between_words = true;
    }

    result.push_str(rest);
    Ok(result)
}

/// Location of one `=?charset?encoding?text?=` word within a header value.
struct EncodedWord<'a> {
    charset: &'a str,
    encoding: u8,
    text: &'a str,
    end: usize,
}

impl<'a> EncodedWord<'a> {
    fn locate(header: &'a str, start: usize) -> Option<Self> {
        let bytes = header.as_bytes();
        let mut cur = start + 2;

        let charset_len = header[cur..].find('?')?;
        let charset = &header[cur..cur + charset_len];
        cur += charset_len + 1;

        if bytes.len() < cur + 4 {
            return None;
        }
        let encoding = bytes[cur];
        cur += 1;
        if bytes[cur] != b'?' {
            return None;
        }
        cur += 1;

        let text_len = header[cur..].find("?=")?;
        let text = &header[cur..cur + text_len];

        Some(Self {
            charset,
            encoding,
            text,
            end: cur + text_len + 2,
        })
    }

    fn decode(&self) -> Result<Vec<u8>> {
        match self.encoding {
            b'B' | b'b' => Ok(STANDARD.decode(self.text)?),
            b'Q' | b'q' => decode_q(self.text.as_bytes()),
            other => Err(Error::InvalidEncoding(format!(
                "Unknown encoded-word encoding: {}",
                char::from(other)
            ))),
        }
    }
}

fn decode_q(text: &[u8]) -> Result<Vec<u8>> {
    let mut decoded = Vec::with_capacity(text.len());
    let mut i = 0;
    while i < text.len() {
        match text[i] {
            b'_' => decoded.push(b' '),
            b'=' => {
                let byte = text
                    .get(i + 1..i + 3)
                    .and_then(hex_pair)
                    .ok_or_else(|| Error::InvalidEncoding("Invalid Q escape".to_string()))?;
                decoded.push(byte);
                i += 2;
            }
            c @ (b' '..=b'~' | b'\n' | b'\r' | b'\t') => decoded.push(c),
            c => {
                return Err(Error::InvalidEncoding(format!(
                    "Invalid byte in encoded word: 0x{c:02x}"
                )));
            }
        }
        i += 1;
    }
    Ok(decoded)
}

fn convert_charset(charset: &str, content: &[u8], out: &mut String) -> Result<()> {
    match charset.to_ascii_lowercase().as_str() {
        "utf-8" | "utf8" => out.push_str(&String::from_utf8_lossy(content)),
        "iso-8859-1" | "latin1" => out.extend(content.iter().map(|&b| char::from(b))),
        "us-ascii" => out.extend(content.iter().map(|&b| {
            if b.is_ascii() {
                char::from(b)
            } else {
                char::REPLACEMENT_CHARACTER
            }
        })),
        other => {
            return Err(Error::InvalidEncoding(format!(
                "Unsupported charset: {other}"
            )));
        }
    }
    Ok(())
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
    use proptest::prelude::*;

    #[test]
    fn test_base64_encode_decode() {
        let data = b"Hello, World!";
        let encoded = encode_base64(data);
        assert_eq!(encoded, "SGVsbG8sIFdvcmxkIQ==");

        let decoded = decode_base64(b"SGVsbG8s\r\nIFdvcmxkIQ==\r\n").unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_base64_wrap_partial_last_line() {
        let file = "I'm a file long enough to force the function to wrap a\n\
                    couple of lines, but I stop short of the end of one line and\n\
                    have some padding dangling at the end.";
        let expected = concat!(
            "SSdtIGEgZmlsZSBsb25nIGVub3VnaCB0byBmb3JjZSB0aGUgZnVuY3Rpb24gdG8gd3JhcCBhCmNv\r\n",
            "dXBsZSBvZiBsaW5lcywgYnV0IEkgc3RvcCBzaG9ydCBvZiB0aGUgZW5kIG9mIG9uZSBsaW5lIGFu\r\n",
            "ZApoYXZlIHNvbWUgcGFkZGluZyBkYW5nbGluZyBhdCB0aGUgZW5kLg==\r\n"
        );

        let mut out = Vec::new();
        base64_wrap(&mut out, file.as_bytes());
        assert_eq!(String::from_utf8(out).unwrap(), expected);
    }

    #[test]
    fn test_base64_wrap_empty() {
        let mut out = Vec::new();
        base64_wrap(&mut out, b"");
        assert!(out.is_empty());
    }

    #[test]
    fn test_quoted_printable_encode() {
        let text = "Dear reader!\n\n\
            This is a test email to try and capture some of the corner cases that exist within\n\
            the quoted-printable encoding.\n\
            There are some wacky parts like =, and this input assumes UNIX line breaks so\r\n\
            it can come out a little weird.  Also, we need to support unicode so here's a fish: 🐟\n";
        let expected = "Dear reader!\r\n\r\n\
            This is a test email to try and capture some of the corner cases that exist=\r\n \
            within\r\n\
            the quoted-printable encoding.\r\n\
            There are some wacky parts like =3D, and this input assumes UNIX line break=\r\n\
            s so\r\n\
            it can come out a little weird.  Also, we need to support unicode so here's=\r\n \
            a fish: =F0=9F=90=9F\r\n";

        let encoded = encode_quoted_printable(text.as_bytes());
        assert_eq!(String::from_utf8(encoded).unwrap(), expected);
    }

    #[test]
    fn test_quoted_printable_trailing_space_escaped() {
        assert_eq!(encode_quoted_printable(b"end "), b"end=20");
        assert_eq!(encode_quoted_printable(b"tab\t\nnext"), b"tab=09\r\nnext");
    }

    #[test]
    fn test_quoted_printable_decode() {
        let encoded = "Dear reader!\r\n\r\n\
            This is a test email to try and capture some of the corner cases that exist=\r\n \
            within\r\n\
            There are some wacky parts like =3D, and a fish: =F0=9F=90=9F\r\n";
        let expected = "Dear reader!\r\n\r\n\
            This is a test email to try and capture some of the corner cases that exist within\r\n\
            There are some wacky parts like =, and a fish: 🐟\r\n";

        let decoded = decode_quoted_printable(encoded.as_bytes());
        assert_eq!(String::from_utf8(decoded).unwrap(), expected);
    }

    #[test]
    fn test_quoted_printable_soft_line_break() {
        assert_eq!(decode_quoted_printable(b"Hello=\r\nWorld"), b"HelloWorld");
        assert_eq!(decode_quoted_printable(b"Hello=\nWorld"), b"HelloWorld");
    }

    #[test]
    fn test_quoted_printable_lenient_escape() {
        assert_eq!(decode_quoted_printable(b"a=zzb"), b"a=zzb");
        assert_eq!(decode_quoted_printable(b"H=c3=a9"), "Hé".as_bytes());
    }

    #[test]
    fn test_rfc2047_encode_ascii_passthrough() {
        assert_eq!(encode_rfc2047("Hello", "UTF-8"), "Hello");
        assert_eq!(encode_rfc2047("a=b?c", "UTF-8"), "a=b?c");
    }

    #[test]
    fn test_rfc2047_encode() {
        assert_eq!(encode_rfc2047("Héllo", "UTF-8"), "=?UTF-8?q?H=C3=A9llo?=");
        assert_eq!(
            encode_rfc2047("¡Hola, señor!", "UTF-8"),
            "=?UTF-8?q?=C2=A1Hola,_se=C3=B1or!?="
        );
    }

    #[test]
    fn test_rfc2047_encode_splits_long_words() {
        let text = "é".repeat(40);
        let encoded = encode_rfc2047(&text, "UTF-8");
        for word in encoded.split(' ') {
            assert!(word.len() <= MAX_ENCODED_WORD_LENGTH, "{word}");
            assert!(word.starts_with("=?UTF-8?q?"));
            assert!(word.ends_with("?="));
        }
        assert_eq!(decode_rfc2047(&encoded).unwrap(), text);
    }

    #[test]
    fn test_rfc2047_decode() {
        assert_eq!(decode_rfc2047("Hello").unwrap(), "Hello");
        assert_eq!(decode_rfc2047("=?utf-8?B?SMOpbGxv?=").unwrap(), "Héllo");
        assert_eq!(decode_rfc2047("=?utf-8?Q?H=C3=A9llo?=").unwrap(), "Héllo");
        assert_eq!(decode_rfc2047("=?UTF-8?Q?Test Subject?=").unwrap(), "Test Subject");
    }

    #[test]
    fn test_rfc2047_decode_embedded_words() {
        assert_eq!(
            decode_rfc2047("=?utf-8?q?Ana=C3=AFs?= <anais@example.org>").unwrap(),
            "Anaïs <anais@example.org>"
        );
        assert_eq!(
            decode_rfc2047("=?ISO-8859-1?Q?Patrik_F=E4ltstr=F6m?= <paf@example.com>").unwrap(),
            "Patrik Fältström <paf@example.com>"
        );
        assert_eq!(
            decode_rfc2047("=?utf-8?q?a?= =?utf-8?q?b?=").unwrap(),
            "ab"
        );
    }

    #[test]
    fn test_rfc2047_decode_unknown_charset() {
        assert!(decode_rfc2047("=?koi8-r?q?abc?=").is_err());
    }

    #[test]
    fn test_rfc2047_decode_malformed_word_kept() {
        assert_eq!(decode_rfc2047("=?utf-8?B?***?=").unwrap(), "=?utf-8?B?***?=");
        assert_eq!(decode_rfc2047("broken =?utf-8").unwrap(), "broken =?utf-8");
    }

    proptest! {
        #[test]
        fn quoted_printable_lines_fit(data in proptest::collection::vec(any::<u8>(), 0..600)) {
            let encoded = encode_quoted_printable(&data);
            for line in encoded.split(|&b| b == b'\n') {
                let line = line.strip_suffix(b"\r").unwrap_or(line);
                prop_assert!(line.len() <= MAX_LINE_LENGTH);
            }
        }

        #[test]
        fn quoted_printable_decode_inverts_encode(
            data in proptest::collection::vec(any::<u8>().prop_filter("no line breaks", |b| *b != b'\r' && *b != b'\n'), 0..600)
        ) {
            let encoded = encode_quoted_printable(&data);
            prop_assert_eq!(decode_quoted_printable(&encoded), data);
        }

        #[test]
        fn base64_wrap_lines_are_full_except_last(data in proptest::collection::vec(any::<u8>(), 1..1000)) {
            let mut out = Vec::new();
            base64_wrap(&mut out, &data);
            let text = String::from_utf8(out).unwrap();
            let lines: Vec<&str> = text.split_terminator("\r\n").collect();
            let (last, full) = lines.split_last().unwrap();
            prop_assert!(full.iter().all(|line| line.len() == MAX_LINE_LENGTH));
            prop_assert!(!last.is_empty() && last.len() <= MAX_LINE_LENGTH);
            prop_assert_eq!(decode_base64(text.as_bytes()).unwrap(), data);
        }
    }
}
