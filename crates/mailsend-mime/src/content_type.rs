//! MIME content type handling.

use crate::error::{Error, Result};
use std::fmt;

/// Content type assumed for an entity without a `Content-Type` header.
pub const DEFAULT_CONTENT_TYPE: &str = "text/plain; charset=us-ascii";

/// MIME content type with parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    /// Main type (e.g., "text", "image", "multipart").
    pub main_type: String,
    /// Subtype (e.g., "plain", "html", "jpeg").
    pub sub_type: String,
    /// Parameters in declaration order, names lowercased.
    pub parameters: Vec<(String, String)>,
}

impl ContentType {
    /// Creates a new content type.
    #[must_use]
    pub fn new(main_type: impl Into<String>, sub_type: impl Into<String>) -> Self {
        Self {
            main_type: main_type.into(),
            sub_type: sub_type.into(),
            parameters: Vec::new(),
        }
    }

    /// Creates a text/plain content type in UTF-8.
    #[must_use]
    pub fn text_plain() -> Self {
        Self::new("text", "plain").with_parameter("charset", "UTF-8")
    }

    /// Creates a text/html content type in UTF-8.
    #[must_use]
    pub fn text_html() -> Self {
        Self::new("text", "html").with_parameter("charset", "UTF-8")
    }

    /// Creates a multipart content type with boundary.
    #[must_use]
    pub fn multipart(sub_type: impl Into<String>, boundary: impl Into<String>) -> Self {
        Self::new("multipart", sub_type).with_parameter("boundary", boundary)
    }

    /// Adds a parameter, replacing any existing value.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into().to_ascii_lowercase();
        let value = value.into();
        match self.parameters.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.parameters.push((key, value)),
        }
        self
    }

    /// Returns a parameter value by case-insensitive name.
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Returns the charset parameter if present.
    #[must_use]
    pub fn charset(&self) -> Option<&str> {
        self.parameter("charset")
    }

    /// Returns the boundary parameter if present.
    #[must_use]
    pub fn boundary(&self) -> Option<&str> {
        self.parameter("boundary")
    }

    /// Returns the media type without parameters, e.g. `text/plain`.
    #[must_use]
    pub fn mime_type(&self) -> String {
        format!("{}/{}", self.main_type, self.sub_type)
    }

    /// Checks if this is a multipart content type.
    #[must_use]
    pub fn is_multipart(&self) -> bool {
        self.main_type.eq_ignore_ascii_case("multipart")
    }

    /// Checks if this is a text content type.
    #[must_use]
    pub fn is_text(&self) -> bool {
        self.main_type.eq_ignore_ascii_case("text")
    }

    /// Parses a content type string.
    ///
    /// Format: `type/subtype; param1=value1; param2="quoted value"`
    ///
    /// The media type and parameter names are lowercased. A trailing `;` is
    /// tolerated.
    ///
    /// # Errors
    ///
    /// Returns an error if the media type or a parameter is malformed, or a
    /// parameter is repeated.
    pub fn parse(s: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidContentType(format!("{reason}: {s:?}"));

        let (media, mut rest) = s.split_once(';').map_or((s, ""), |(m, r)| (m, r));
        let (main_type, sub_type) = media
            .trim()
            .split_once('/')
            .ok_or_else(|| invalid("Missing subtype"))?;
        let (main_type, sub_type) = (main_type.trim(), sub_type.trim());
        if !is_token(main_type) || !is_token(sub_type) {
            return Err(invalid("Invalid media type"));
        }

        let mut content_type = Self::new(
            main_type.to_ascii_lowercase(),
            sub_type.to_ascii_lowercase(),
        );

        loop {
            rest = rest.trim_start();
            if rest.is_empty() {
                break;
            }

            let key_end = rest.find(|c| !is_token_char(c)).unwrap_or(rest.len());
            let key = &rest[..key_end];
            if key.is_empty() {
                return Err(invalid("Expected parameter name"));
            }
            rest = rest[key_end..].trim_start();
            rest = rest
                .strip_prefix('=')
                .ok_or_else(|| invalid("Expected '=' after parameter name"))?
                .trim_start();

            let value = if let Some(quoted) = rest.strip_prefix('"') {
                let (value, consumed) =
                    unquote(quoted).ok_or_else(|| invalid("Unterminated quoted string"))?;
                rest = &quoted[consumed..];
                value
            } else {
                let value_end = rest.find(|c| !is_token_char(c)).unwrap_or(rest.len());
                if value_end == 0 {
                    return Err(invalid("Expected parameter value"));
                }
                let value = rest[..value_end].to_string();
                rest = &rest[value_end..];
                value
            };

            let key = key.to_ascii_lowercase();
            if content_type.parameter(&key).is_some() {
                return Err(invalid("Duplicate parameter"));
            }
            content_type.parameters.push((key, value));

            rest = rest.trim_start();
            if rest.is_empty() {
                break;
            }
            rest = rest
                .strip_prefix(';')
                .ok_or_else(|| invalid("Expected ';' between parameters"))?;
        }

        Ok(content_type)
    }
}

const fn is_token_char(c: char) -> bool {
    c.is_ascii_graphic()
        && !matches!(
            c,
            '(' | ')' | '<' | '>' | '@' | ',' | ';' | ':' | '\\' | '"' | '/' | '[' | ']' | '?' | '='
        )
}

fn is_token(s: &str) -> bool {
    !s.is_empty() && s.chars().all(is_token_char)
}

/// Reads a quoted-string body (after the opening quote), returning the
/// unescaped value and the number of bytes consumed including the closing
/// quote.
fn unquote(s: &str) -> Option<(String, usize)> {
    let mut value = String::new();
    let mut chars = s.char_indices();
    while let Some((index, c)) = chars.next() {
        match c {
            '"' => return Some((value, index + 1)),
            '\\' => value.push(chars.next()?.1),
            _ => value.push(c),
        }
    }
    None
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let main = &self.main_type;
        let sub = &self.sub_type;
        write!(f, "{main}/{sub}")?;

        for (key, value) in &self.parameters {
            if is_token(value) {
                write!(f, "; {key}={value}")?;
            } else {
                let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
                write!(f, "; {key}=\"{escaped}\"")?;
            }
        }

        Ok(())
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
    fn test_content_type_new() {
        let ct = ContentType::new("text", "plain");
        assert_eq!(ct.main_type, "text");
        assert_eq!(ct.sub_type, "plain");
        assert!(ct.parameters.is_empty());
    }

    #[test]
    fn test_text_plain() {
        let ct = ContentType::text_plain();
        assert_eq!(ct.mime_type(), "text/plain");
        assert_eq!(ct.charset(), Some("UTF-8"));
        assert_eq!(ct.to_string(), "text/plain; charset=UTF-8");
    }

    #[test]
    fn test_multipart() {
        let ct = ContentType::multipart("mixed", "boundary123");
        assert_eq!(ct.main_type, "multipart");
        assert_eq!(ct.sub_type, "mixed");
        assert_eq!(ct.boundary(), Some("boundary123"));
        assert!(ct.is_multipart());
        assert!(!ct.is_text());
    }

    #[test]
    fn test_content_type_parse() {
        let ct = ContentType::parse("Text/Plain; Charset=utf-8").unwrap();
        assert_eq!(ct.mime_type(), "text/plain");
        assert_eq!(ct.charset(), Some("utf-8"));
    }

    #[test]
    fn test_content_type_parse_quoted() {
        let ct = ContentType::parse("multipart/mixed; boundary=\"----=_Part_123\"").unwrap();
        assert_eq!(ct.mime_type(), "multipart/mixed");
        assert_eq!(ct.boundary(), Some("----=_Part_123"));
    }

    #[test]
    fn test_content_type_parse_unfolded_parameters() {
        let ct = ContentType::parse(
            "multipart/signed; boundary=\"=-=-=\"; micalg=pgp-sha1; protocol=\"application/pgp-signature\";",
        )
        .unwrap();
        assert_eq!(ct.boundary(), Some("=-=-="));
        assert_eq!(ct.parameter("micalg"), Some("pgp-sha1"));
        assert_eq!(ct.parameter("PROTOCOL"), Some("application/pgp-signature"));
    }

    #[test]
    fn test_content_type_parse_errors() {
        for bad in [
            "",
            "text",
            "text/",
            "te xt/plain",
            "text/plain; charset",
            "text/plain; charset=",
            "text/plain; name=\"open",
            "text/plain; a=1; a=2",
            "text/plain; a=1 b=2",
        ] {
            assert!(
                matches!(ContentType::parse(bad), Err(Error::InvalidContentType(_))),
                "{bad:?} should fail"
            );
        }
    }

    #[test]
    fn test_default_content_type_parses() {
        let ct = ContentType::parse(DEFAULT_CONTENT_TYPE).unwrap();
        assert_eq!(ct.mime_type(), "text/plain");
        assert_eq!(ct.charset(), Some("us-ascii"));
    }

    #[test]
    fn test_content_type_display_quotes_specials() {
        let ct = ContentType::new("application", "octet-stream")
            .with_parameter("name", "my file \"v2\".bin");
        assert_eq!(
            ct.to_string(),
            "application/octet-stream; name=\"my file \\\"v2\\\".bin\""
        );
        let parsed = ContentType::parse(&ct.to_string()).unwrap();
        assert_eq!(parsed.parameter("name"), Some("my file \"v2\".bin"));
    }

    #[test]
    fn test_content_type_with_parameter() {
        let ct = ContentType::new("text", "plain")
            .with_parameter("charset", "iso-8859-1")
            .with_parameter("format", "flowed")
            .with_parameter("Charset", "utf-8");

        assert_eq!(ct.charset(), Some("utf-8"));
        assert_eq!(ct.parameter("format"), Some("flowed"));
        assert_eq!(ct.parameters.len(), 2);
    }
}
