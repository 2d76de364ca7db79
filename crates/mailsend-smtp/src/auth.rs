//! SASL authentication strategies.
//!
//! The session drives a strategy through two steps: [`Auth::start`] picks the
//! mechanism and initial response, then [`Auth::next`] answers each decoded
//! server challenge until it returns `None`.

use crate::error::{Error, Result};
use std::fmt;

/// What the session knows about the server when authentication starts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerInfo {
    /// Server name the session was created for.
    pub name: String,
    /// Whether the connection is encrypted.
    pub tls: bool,
    /// Mechanisms advertised in the `AUTH` extension.
    pub auth: Vec<String>,
}

/// Pluggable challenge-response authentication.
pub trait Auth: Send + Sync {
    /// Returns the mechanism name and the initial response.
    ///
    /// # Errors
    ///
    /// An error aborts the whole session.
    fn start(&self, server: &ServerInfo) -> Result<(String, Vec<u8>)>;

    /// Answers a decoded server challenge.
    ///
    /// `more` is false once the server has accepted the credentials; the
    /// final message is then passed through undecoded. `None` ends the
    /// exchange.
    ///
    /// # Errors
    ///
    /// Returns an error if the challenge is not understood.
    fn next(&self, from_server: &[u8], more: bool) -> Result<Option<Vec<u8>>>;
}

/// `LOGIN` mechanism: answers `Username:` and `Password:` prompts.
#[derive(Clone, PartialEq, Eq)]
pub struct LoginAuth {
    username: String,
    password: String,
}

impl LoginAuth {
    /// Creates a LOGIN strategy.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for LoginAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginAuth")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl Auth for LoginAuth {
    fn start(&self, _server: &ServerInfo) -> Result<(String, Vec<u8>)> {
        Ok(("LOGIN".to_string(), self.username.as_bytes().to_vec()))
    }

    fn next(&self, from_server: &[u8], more: bool) -> Result<Option<Vec<u8>>> {
        if !more {
            return Ok(None);
        }

        let prompt = String::from_utf8_lossy(from_server);
        let prompt = prompt.trim();
        let prompt = prompt.strip_suffix(':').unwrap_or(prompt).to_lowercase();

        match prompt.as_str() {
            "username" => Ok(Some(self.username.as_bytes().to_vec())),
            "password" => Ok(Some(self.password.as_bytes().to_vec())),
            _ => Err(Error::UnexpectedChallenge(prompt)),
        }
    }
}

/// `PLAIN` mechanism (RFC 4616).
///
/// Refuses to send credentials over an unencrypted connection unless the
/// server is the local host, and only to the host it was created for.
#[derive(Clone, PartialEq, Eq)]
pub struct PlainAuth {
    identity: String,
    username: String,
    password: String,
    host: String,
}

impl PlainAuth {
    /// Creates a PLAIN strategy bound to `host`.
    pub fn new(
        identity: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        host: impl Into<String>,
    ) -> Self {
        Self {
            identity: identity.into(),
            username: username.into(),
            password: password.into(),
            host: host.into(),
        }
    }
}

impl fmt::Debug for PlainAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlainAuth")
            .field("identity", &self.identity)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("host", &self.host)
            .finish()
    }
}

fn is_localhost(name: &str) -> bool {
    matches!(name, "localhost" | "127.0.0.1" | "::1")
}

impl Auth for PlainAuth {
    fn start(&self, server: &ServerInfo) -> Result<(String, Vec<u8>)> {
        if !server.tls && !is_localhost(&server.name) {
            return Err(Error::UnencryptedConnection);
        }
        if server.name != self.host {
            return Err(Error::WrongHostname);
        }

        let response = format!("{}\0{}\0{}", self.identity, self.username, self.password);
        Ok(("PLAIN".to_string(), response.into_bytes()))
    }

    fn next(&self, from_server: &[u8], more: bool) -> Result<Option<Vec<u8>>> {
        if more {
            return Err(Error::UnexpectedChallenge(
                String::from_utf8_lossy(from_server).into_owned(),
            ));
        }
        Ok(None)
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

    fn server(name: &str, tls: bool) -> ServerInfo {
        ServerInfo {
            name: name.to_string(),
            tls,
            auth: vec!["LOGIN".to_string(), "PLAIN".to_string()],
        }
    }

    mod login_tests {
        use super::*;

        #[test]
        fn start_sends_username() {
            let auth = LoginAuth::new("user@example.com", "hunter2");
            let (mech, initial) = auth.start(&server("mx.example.com", false)).unwrap();
            assert_eq!(mech, "LOGIN");
            assert_eq!(initial, b"user@example.com");
        }

        #[test]
        fn answers_prompts() {
            let auth = LoginAuth::new("user", "pass");
            for prompt in ["Username:", "username", "  USERNAME: \r\n"] {
                assert_eq!(
                    auth.next(prompt.as_bytes(), true).unwrap(),
                    Some(b"user".to_vec())
                );
            }
            for prompt in ["Password:", "PASSWORD", "password: "] {
                assert_eq!(
                    auth.next(prompt.as_bytes(), true).unwrap(),
                    Some(b"pass".to_vec())
                );
            }
        }

        #[test]
        fn rejects_unknown_prompt() {
            let auth = LoginAuth::new("user", "pass");
            let err = auth.next(b"Token:", true).unwrap_err();
            assert!(matches!(err, Error::UnexpectedChallenge(ref c) if c == "token"));
        }

        #[test]
        fn done_when_no_more() {
            let auth = LoginAuth::new("user", "pass");
            assert_eq!(auth.next(b"2.7.0 Authentication successful", false).unwrap(), None);
            assert_eq!(auth.next(b"Token:", false).unwrap(), None);
        }

        #[test]
        fn debug_redacts_password() {
            let debug = format!("{:?}", LoginAuth::new("user", "hunter2"));
            assert!(debug.contains("user"));
            assert!(!debug.contains("hunter2"));
        }
    }

    mod plain_tests {
        use super::*;

        #[test]
        fn start_over_tls() {
            let auth = PlainAuth::new("", "user", "pass", "mx.example.com");
            let (mech, initial) = auth.start(&server("mx.example.com", true)).unwrap();
            assert_eq!(mech, "PLAIN");
            assert_eq!(initial, b"\0user\0pass");
        }

        #[test]
        fn allows_plaintext_localhost() {
            let auth = PlainAuth::new("admin", "user", "pass", "localhost");
            let (_, initial) = auth.start(&server("localhost", false)).unwrap();
            assert_eq!(initial, b"admin\0user\0pass");
        }

        #[test]
        fn refuses_unencrypted() {
            let auth = PlainAuth::new("", "user", "pass", "mx.example.com");
            assert!(matches!(
                auth.start(&server("mx.example.com", false)),
                Err(Error::UnencryptedConnection)
            ));
        }

        #[test]
        fn refuses_wrong_host() {
            let auth = PlainAuth::new("", "user", "pass", "mx.example.com");
            assert!(matches!(
                auth.start(&server("evil.example.net", true)),
                Err(Error::WrongHostname)
            ));
        }

        #[test]
        fn rejects_challenge() {
            let auth = PlainAuth::new("", "user", "pass", "mx.example.com");
            assert!(matches!(
                auth.next(b"more please", true),
                Err(Error::UnexpectedChallenge(_))
            ));
            assert_eq!(auth.next(b"", false).unwrap(), None);
        }
    }
}
