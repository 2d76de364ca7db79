//! Email address types.

use crate::encoding::{decode_rfc2047, encode_rfc2047};
use crate::error::{Error, Result};
use std::fmt;

/// Bare email address (`local@domain`) as used in the SMTP envelope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address(String);

impl Address {
    /// Creates a new address from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid.
    pub fn new(addr: impl Into<String>) -> Result<Self> {
        let addr = addr.into();
        Self::validate(&addr)?;
        Ok(Self(addr))
    }

    /// Returns the address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Validates an email address (basic validation).
    fn validate(addr: &str) -> Result<()> {
        if addr.is_empty() {
            return Err(Error::InvalidAddress("Address cannot be empty".into()));
        }

        let Some((local, domain)) = addr.split_once('@') else {
            return Err(Error::InvalidAddress(format!("Missing @ in {addr:?}")));
        };

        if domain.contains('@') {
            return Err(Error::InvalidAddress(format!(
                "More than one @ in {addr:?}"
            )));
        }

        if local.is_empty() || domain.is_empty() {
            return Err(Error::InvalidAddress(
                "Local and domain parts cannot be empty".into(),
            ));
        }

        if addr
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || matches!(c, '<' | '>' | ','))
        {
            return Err(Error::InvalidAddress(format!(
                "Invalid character in {addr:?}"
            )));
        }

        Ok(())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Mailbox (optional display name + address).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    /// Display name (optional).
    pub name: Option<String>,
    /// Email address.
    pub address: Address,
}

impl Mailbox {
    /// Creates a new mailbox with just an address.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid.
    pub fn new(address: impl Into<String>) -> Result<Self> {
        Ok(Self {
            name: None,
            address: Address::new(address)?,
        })
    }

    /// Creates a new mailbox with a display name and address.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid.
    pub fn with_name(name: impl Into<String>, address: impl Into<String>) -> Result<Self> {
        Ok(Self {
            name: Some(name.into()),
            address: Address::new(address)?,
        })
    }

    /// Parses a single mailbox.
    ///
    /// Accepts `local@domain`, `<local@domain>`, `Name <local@domain>` and
    /// `"Quoted Name" <local@domain>`. Encoded-word display names are
    /// decoded.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a single valid mailbox.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();

        let Some(angle_addr) = s.strip_suffix('>') else {
            return Self::new(s);
        };
        let open = angle_addr
            .rfind('<')
            .ok_or_else(|| Error::InvalidAddress(format!("Unbalanced angle brackets in {s:?}")))?;

        let address = Address::new(&angle_addr[open + 1..])?;
        let display = angle_addr[..open].trim();

        let name = if display.is_empty() {
            None
        } else {
            let unquoted = unquote_display_name(display)?;
            Some(decode_rfc2047(&unquoted).unwrap_or(unquoted))
        };

        Ok(Self { name, address })
    }
}

fn unquote_display_name(display: &str) -> Result<String> {
    let Some(inner) = display.strip_prefix('"') else {
        if display.contains('"') {
            return Err(Error::InvalidAddress(format!(
                "Stray quote in display name {display:?}"
            )));
        }
        return Ok(display.to_string());
    };

    let mut name = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => name.push(chars.next().ok_or_else(|| {
                Error::InvalidAddress(format!("Dangling escape in {display:?}"))
            })?),
            '"' if chars.as_str().is_empty() => return Ok(name),
            '"' => break,
            _ => name.push(c),
        }
    }
    Err(Error::InvalidAddress(format!(
        "Unterminated quoted display name {display:?}"
    )))
}

impl fmt::Display for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name.as_deref() {
            None | Some("") => write!(f, "<{}>", self.address),
            Some(name) if !name.is_ascii() => {
                write!(f, "{} <{}>", encode_rfc2047(name, "UTF-8"), self.address)
            }
            Some(name) if name.chars().all(|c| c.is_ascii_alphanumeric() || c == ' ') => {
                write!(f, "{name} <{}>", self.address)
            }
            Some(name) => {
                let escaped = name.replace('\\', "\\\\").replace('"', "\\\"");
                write!(f, "\"{escaped}\" <{}>", self.address)
            }
        }
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
    fn test_valid_address() {
        let addr = Address::new("user@example.com").unwrap();
        assert_eq!(addr.as_str(), "user@example.com");
    }

    #[test]
    fn test_invalid_address_no_at() {
        assert!(Address::new("userexample.com").is_err());
    }

    #[test]
    fn test_invalid_address_empty() {
        assert!(Address::new("").is_err());
    }

    #[test]
    fn test_invalid_address_empty_local() {
        assert!(Address::new("@example.com").is_err());
    }

    #[test]
    fn test_invalid_address_empty_domain() {
        assert!(Address::new("user@").is_err());
    }

    #[test]
    fn test_invalid_address_characters() {
        assert!(Address::new("a@b@c").is_err());
        assert!(Address::new("user name@example.com").is_err());
        assert!(Address::new("a@example.com,b@example.com").is_err());
        assert!(Address::new("a@example.com\r\nRCPT TO:<x@y>").is_err());
    }

    #[test]
    fn test_mailbox_new() {
        let mailbox = Mailbox::new("user@example.com").unwrap();
        assert_eq!(mailbox.address.as_str(), "user@example.com");
        assert!(mailbox.name.is_none());
    }

    #[test]
    fn test_mailbox_with_name() {
        let mailbox = Mailbox::with_name("John Doe", "john@example.com").unwrap();
        assert_eq!(mailbox.name.as_deref(), Some("John Doe"));
        assert_eq!(mailbox.address.as_str(), "john@example.com");
    }

    #[test]
    fn test_mailbox_parse_forms() {
        let bare = Mailbox::parse(" user@example.com ").unwrap();
        assert_eq!(bare, Mailbox::new("user@example.com").unwrap());

        let angle = Mailbox::parse("<user@example.com>").unwrap();
        assert!(angle.name.is_none());

        let named = Mailbox::parse("Jordan Wright <jmwright798@gmail.com>").unwrap();
        assert_eq!(named.name.as_deref(), Some("Jordan Wright"));
        assert_eq!(named.address.as_str(), "jmwright798@gmail.com");

        let quoted = Mailbox::parse(r#""Wright, \"Jordan\"" <jw@example.com>"#).unwrap();
        assert_eq!(quoted.name.as_deref(), Some("Wright, \"Jordan\""));

        let encoded = Mailbox::parse("=?utf-8?q?Ana=C3=AFs?= <anais@example.org>").unwrap();
        assert_eq!(encoded.name.as_deref(), Some("Anaïs"));
    }

    #[test]
    fn test_mailbox_parse_rejects_malformed() {
        assert!(Mailbox::parse("bad_address_sender").is_err());
        assert!(Mailbox::parse("Name user@example.com>").is_err());
        assert!(Mailbox::parse("\"Open <user@example.com>").is_err());
        assert!(Mailbox::parse("Name <>").is_err());
    }

    #[test]
    fn test_mailbox_display() {
        assert_eq!(
            Mailbox::new("a@example.com").unwrap().to_string(),
            "<a@example.com>"
        );
        assert_eq!(
            Mailbox::with_name("Jane Doe", "jane@example.com").unwrap().to_string(),
            "Jane Doe <jane@example.com>"
        );
        assert_eq!(
            Mailbox::with_name("Doe, Jane", "jane@example.com").unwrap().to_string(),
            "\"Doe, Jane\" <jane@example.com>"
        );
        assert_eq!(
            Mailbox::with_name("Anaïs", "anais@example.org").unwrap().to_string(),
            "=?UTF-8?q?Ana=C3=AFs?= <anais@example.org>"
        );
    }
}
