//! Error types for SMTP operations.

use std::io;
use std::sync::Arc;

/// Result type alias for SMTP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// SMTP error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// TLS error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Server returned a reply code other than the one expected.
    #[error("SMTP error {code}: {message}")]
    SmtpError {
        /// Reply code (e.g., 550).
        code: u16,
        /// Error message from server.
        message: String,
    },

    /// Protocol error (malformed reply line).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Message could not be prepared for sending.
    #[error("MIME error: {0}")]
    Mime(#[from] mailsend_mime::Error),

    /// Server does not advertise STARTTLS but TLS was requested.
    #[error("STARTTLS not offered by server")]
    StartTlsNotOffered,

    /// Configured encryption mode is not recognized.
    #[error("Valid SMTP client modes are: UNENCRYPTED, STARTTLS, or FORCETLS (got {0:?})")]
    InvalidMode(String),

    /// Credentials would be sent over an unencrypted connection.
    #[error("Unencrypted connection")]
    UnencryptedConnection,

    /// Server name differs from the host the credentials are bound to.
    #[error("Wrong host name")]
    WrongHostname,

    /// Authentication strategy received a challenge it does not understand.
    #[error("Unexpected server challenge: {0}")]
    UnexpectedChallenge(String),

    /// `hello` was called after the greeting already ran.
    #[error("HELO called after other methods")]
    LateHello,

    /// Command argument contains a line break.
    #[error("Line must not contain CR or LF")]
    LineHasCrLf,

    /// Cached failure of the EHLO/HELO greeting.
    #[error("Greeting failed: {0}")]
    Greeting(#[source] Arc<Error>),

    /// Transport has been closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Invalid client configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Creates an SMTP error from a reply code and message.
    #[must_use]
    pub fn smtp_error(code: u16, message: impl Into<String>) -> Self {
        Self::SmtpError {
            code,
            message: message.into(),
        }
    }

    /// Returns the reply code carried by this error, if any.
    #[must_use]
    pub fn code(&self) -> Option<u16> {
        match self {
            Self::SmtpError { code, .. } => Some(*code),
            Self::Greeting(inner) => inner.code(),
            _ => None,
        }
    }

    /// Returns true if this is a permanent error (5xx).
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        self.code().is_some_and(|code| (500..600).contains(&code))
    }

    /// Returns true if this is a transient error (4xx).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.code().is_some_and(|code| (400..500).contains(&code))
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
    fn test_permanent_and_transient() {
        assert!(Error::smtp_error(550, "No such user").is_permanent());
        assert!(!Error::smtp_error(550, "No such user").is_transient());
        assert!(Error::smtp_error(451, "Try later").is_transient());
        assert!(!Error::LateHello.is_permanent());
    }

    #[test]
    fn test_greeting_exposes_inner_code() {
        let err = Error::Greeting(Arc::new(Error::smtp_error(554, "Go away")));
        assert_eq!(err.code(), Some(554));
        assert!(err.is_permanent());
        assert_eq!(err.to_string(), "Greeting failed: SMTP error 554: Go away");
    }
}
