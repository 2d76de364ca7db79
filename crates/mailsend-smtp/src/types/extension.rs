//! SMTP extensions advertised in the EHLO reply.

use std::collections::HashMap;

/// Extensions discovered from an EHLO reply, keyed by upper-cased keyword.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extensions {
    entries: HashMap<String, String>,
}

impl Extensions {
    /// Builds the extension map from EHLO reply lines.
    ///
    /// The first line is the server greeting and is skipped. Every other
    /// line is `KEYWORD [params]`.
    #[must_use]
    pub fn from_ehlo(lines: &[String]) -> Self {
        let entries = lines
            .iter()
            .skip(1)
            .filter(|line| !line.is_empty())
            .map(|line| match line.split_once(' ') {
                Some((keyword, params)) => (keyword.to_uppercase(), params.to_string()),
                None => (line.to_uppercase(), String::new()),
            })
            .collect();
        Self { entries }
    }

    /// Returns the parameters of an extension, if advertised.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(&name.to_uppercase()).map(String::as_str)
    }

    /// Checks if the server advertises an extension.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_uppercase())
    }

    /// Returns the mechanisms listed by the `AUTH` extension.
    #[must_use]
    pub fn auth_mechanisms(&self) -> Option<Vec<String>> {
        self.get("AUTH")
            .map(|mechs| mechs.split(' ').map(String::from).collect())
    }

    /// Returns the number of advertised extensions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing was advertised.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
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

    fn ehlo(lines: &[&str]) -> Extensions {
        let lines: Vec<String> = lines.iter().map(ToString::to_string).collect();
        Extensions::from_ehlo(&lines)
    }

    #[test]
    fn skips_greeting_line() {
        let ext = ehlo(&["mx.example.com Hello", "PIPELINING"]);
        assert_eq!(ext.len(), 1);
        assert!(!ext.contains("mx.example.com"));
        assert!(ext.contains("PIPELINING"));
    }

    #[test]
    fn keyword_and_params() {
        let ext = ehlo(&["hi", "SIZE 35882577", "8BITMIME", "STARTTLS"]);
        assert_eq!(ext.get("SIZE"), Some("35882577"));
        assert_eq!(ext.get("8BITMIME"), Some(""));
        assert_eq!(ext.get("starttls"), Some(""));
        assert_eq!(ext.get("DSN"), None);
    }

    #[test]
    fn auth_mechanisms() {
        let ext = ehlo(&["hi", "AUTH LOGIN PLAIN XOAUTH2"]);
        assert_eq!(
            ext.auth_mechanisms().unwrap(),
            vec!["LOGIN", "PLAIN", "XOAUTH2"]
        );
        assert!(ehlo(&["hi"]).auth_mechanisms().is_none());
    }

    #[test]
    fn lowercase_keyword() {
        let ext = ehlo(&["hi", "auth login"]);
        assert_eq!(ext.get("AUTH"), Some("login"));
    }

    #[test]
    fn greeting_only() {
        assert!(ehlo(&["mx.example.com"]).is_empty());
        assert!(ehlo(&[]).is_empty());
    }
}
