//! MIME header handling.

use crate::encoding::encode_rfc2047;
use crate::error::{Error, Result};
use std::fmt;

/// Header fields whose values carry structured parameters and are never
/// word-encoded.
const VERBATIM_FIELDS: [&str; 2] = ["Content-Type", "Content-Disposition"];

/// Collection of email headers.
///
/// Names compare case-insensitively. Fields keep the order in which they
/// were first added, and each field may hold several values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    fields: Vec<(String, Vec<String>)>,
}

impl Headers {
    /// Creates a new empty header collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|(field, _)| field.eq_ignore_ascii_case(name))
    }

    /// Adds a header value.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(index) => self.fields[index].1.push(value),
            None => self.fields.push((name, vec![value])),
        }
    }

    /// Sets a header value, replacing any existing values.
    ///
    /// An existing field keeps its position.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.set_all(name, vec![value.into()]);
    }

    /// Sets every value of a header, replacing any existing values.
    pub fn set_all(&mut self, name: impl Into<String>, values: Vec<String>) {
        let name = name.into();
        match self.position(&name) {
            Some(index) => self.fields[index].1 = values,
            None => self.fields.push((name, values)),
        }
    }

    /// Gets the first value for a header.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name)
            .and_then(|index| self.fields[index].1.first())
            .map(String::as_str)
    }

    /// Gets all values for a header.
    #[must_use]
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.position(name)
            .map(|index| self.fields[index].1.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Returns true if the header is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Removes all values for a header, returning them.
    pub fn remove(&mut self, name: &str) -> Vec<String> {
        self.position(name)
            .map(|index| self.fields.remove(index).1)
            .unwrap_or_default()
    }

    /// Returns the number of distinct header names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if there are no headers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns an iterator over all header names with all of their values.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.fields
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    /// Returns an iterator over all headers, one item per value.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .flat_map(|(name, values)| values.iter().map(move |v| (name.as_str(), v.as_str())))
    }

    /// Parses headers from raw text.
    ///
    /// Headers are in the format:
    /// ```text
    /// Header-Name: value
    /// Continuation: line
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error if header format is invalid.
    pub fn parse(text: &str) -> Result<Self> {
        Self::parse_entity(text.as_bytes()).map(|(headers, _)| headers)
    }

    /// Parses the header block at the start of a MIME entity.
    ///
    /// Returns the headers and the remaining body, which starts after the
    /// blank line that ends the header block. Folded lines are joined with
    /// a single space.
    ///
    /// # Errors
    ///
    /// Returns an error if a line is neither a `Name: value` field nor a
    /// continuation of one.
    pub fn parse_entity(data: &[u8]) -> Result<(Self, &[u8])> {
        let mut headers = Self::new();
        let mut current: Option<(String, String)> = None;
        let mut rest = data;

        while !rest.is_empty() {
            let (line, next) = match rest.iter().position(|&b| b == b'\n') {
                Some(pos) => (&rest[..pos], &rest[pos + 1..]),
                None => (rest, &rest[rest.len()..]),
            };
            rest = next;
            let line = line.strip_suffix(b"\r").unwrap_or(line);

            if line.is_empty() {
                break;
            }

            let text = String::from_utf8_lossy(line);

            if line.starts_with(b" ") || line.starts_with(b"\t") {
                let Some((_, value)) = current.as_mut() else {
                    return Err(Error::InvalidHeader(format!(
                        "Continuation line without a field: {text:?}"
                    )));
                };
                value.push(' ');
                value.push_str(text.trim());
                continue;
            }

            if let Some((name, value)) = current.take() {
                headers.add(name, value.trim().to_string());
            }

            let (name, value) = text
                .split_once(':')
                .ok_or_else(|| Error::InvalidHeader(format!("Malformed header line: {text:?}")))?;
            let name = name.trim_end();
            if name.is_empty() || name.contains(|c: char| c.is_ascii_whitespace()) {
                return Err(Error::InvalidHeader(format!("Invalid field name: {name:?}")));
            }
            current = Some((name.to_string(), value.trim().to_string()));
        }

        if let Some((name, value)) = current {
            headers.add(name, value.trim().to_string());
        }

        Ok((headers, rest))
    }

    /// Appends the headers in wire form, one `Name: value` line per value.
    ///
    /// `Content-Type` and `Content-Disposition` are written verbatim; every
    /// other value is RFC 2047 encoded when it is not plain ASCII.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        for (name, value) in self.iter() {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            if VERBATIM_FIELDS.iter().any(|f| f.eq_ignore_ascii_case(name)) {
                out.extend_from_slice(value.as_bytes());
            } else {
                out.extend_from_slice(encode_rfc2047(value, "UTF-8").as_bytes());
            }
            out.extend_from_slice(b"\r\n");
        }
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = Vec::new();
        self.write_to(&mut out);
        f.write_str(&String::from_utf8_lossy(&out))
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.add(name, value);
        }
        headers
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
    fn test_headers_new() {
        let headers = Headers::new();
        assert!(headers.is_empty());
    }

    #[test]
    fn test_headers_add_get() {
        let mut headers = Headers::new();
        headers.add("Content-Type", "text/plain");
        assert_eq!(headers.get("Content-Type"), Some("text/plain"));
        assert_eq!(headers.get("content-type"), Some("text/plain")); // Case insensitive
        assert!(headers.contains("CONTENT-TYPE"));
    }

    #[test]
    fn test_headers_set() {
        let mut headers = Headers::new();
        headers.add("To", "alice@example.com");
        headers.add("X-Mailer", "mailsend");
        headers.add("to", "bob@example.com");
        assert_eq!(headers.get_all("To").len(), 2);

        headers.set("TO", "charlie@example.com");
        assert_eq!(headers.get_all("To"), vec!["charlie@example.com"]);

        let names: Vec<_> = headers.fields().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["To", "X-Mailer"]);
    }

    #[test]
    fn test_headers_remove() {
        let mut headers = Headers::new();
        headers.add("Subject", "Test");
        assert!(headers.get("Subject").is_some());

        assert_eq!(headers.remove("subject"), vec!["Test".to_string()]);
        assert!(headers.get("Subject").is_none());
        assert!(headers.remove("Subject").is_empty());
    }

    #[test]
    fn test_headers_parse() {
        let text = concat!(
            "From: sender@example.com\r\n",
            "To: recipient@example.com\r\n",
            "Subject: Test Message\r\n",
            "Content-Type: text/plain;\r\n",
            " charset=utf-8\r\n",
            "\r\n"
        );

        let headers = Headers::parse(text).unwrap();
        assert_eq!(headers.get("From"), Some("sender@example.com"));
        assert_eq!(headers.get("To"), Some("recipient@example.com"));
        assert_eq!(headers.get("Subject"), Some("Test Message"));
        assert_eq!(
            headers.get("Content-Type"),
            Some("text/plain; charset=utf-8")
        );
    }

    #[test]
    fn test_headers_parse_entity_returns_body() {
        let raw = b"Subject: Hi\nX-Tag: one\nX-Tag: two\n\nbody line\n";
        let (headers, body) = Headers::parse_entity(raw).unwrap();
        assert_eq!(headers.get_all("x-tag"), vec!["one", "two"]);
        assert_eq!(body, b"body line\n");
    }

    #[test]
    fn test_headers_parse_rejects_malformed_line() {
        assert!(matches!(
            Headers::parse("Subject: ok\r\nno colon here\r\n\r\n"),
            Err(Error::InvalidHeader(_))
        ));
        assert!(Headers::parse(" leading: continuation\r\n").is_err());
    }

    #[test]
    fn test_headers_write_encodes_values() {
        let mut headers = Headers::new();
        headers.add("Subject", "Héllo");
        headers.add("Content-Type", "multipart/mixed;\r\n boundary=abc");
        headers.add("Content-Disposition", "attachment;\r\n filename=\"ä.txt\"");

        let s = headers.to_string();
        assert_eq!(
            s,
            "Subject: =?UTF-8?q?H=C3=A9llo?=\r\n\
             Content-Type: multipart/mixed;\r\n boundary=abc\r\n\
             Content-Disposition: attachment;\r\n filename=\"ä.txt\"\r\n"
        );
    }

    #[test]
    fn test_headers_iter() {
        let headers: Headers = [
            ("From", "sender@example.com"),
            ("To", "recipient@example.com"),
            ("To", "other@example.com"),
        ]
        .into_iter()
        .collect();

        let mut count = 0;
        for (name, value) in headers.iter() {
            assert!(!name.is_empty());
            assert!(!value.is_empty());
            count += 1;
        }
        assert_eq!(count, 3);
        assert_eq!(headers.len(), 2);
    }
}
