//! SMTP command lines.
//!
//! Commands render without the trailing CRLF; the transport appends it.

use std::fmt;

/// SMTP command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// HELO - Simple greeting
    Helo {
        /// Client hostname
        hostname: String,
    },
    /// EHLO - Extended greeting
    Ehlo {
        /// Client hostname
        hostname: String,
    },
    /// STARTTLS - Upgrade to TLS
    StartTls,
    /// AUTH - Begin authentication
    Auth {
        /// Authentication mechanism name
        mechanism: String,
        /// Base64 initial response, omitted when empty
        initial_response: Option<String>,
    },
    /// Base64 answer to an AUTH challenge
    AuthResponse(String),
    /// `*` - Cancel an AUTH exchange
    AuthAbort,
    /// MAIL FROM - Start mail transaction
    MailFrom {
        /// Sender address
        from: String,
        /// BODY parameter (8BITMIME)
        body: Option<String>,
    },
    /// RCPT TO - Add recipient
    RcptTo {
        /// Recipient address
        to: String,
    },
    /// DATA - Begin message data
    Data,
    /// RSET - Reset transaction
    Rset,
    /// NOOP - No operation
    Noop,
    /// QUIT - Close connection
    Quit,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Helo { hostname } => write!(f, "HELO {hostname}"),
            Self::Ehlo { hostname } => write!(f, "EHLO {hostname}"),
            Self::StartTls => f.write_str("STARTTLS"),
            Self::Auth {
                mechanism,
                initial_response,
            } => {
                write!(f, "AUTH {mechanism}")?;
                if let Some(resp) = initial_response {
                    write!(f, " {resp}")?;
                }
                Ok(())
            }
            Self::AuthResponse(resp) => f.write_str(resp),
            Self::AuthAbort => f.write_str("*"),
            Self::MailFrom { from, body } => {
                write!(f, "MAIL FROM:<{from}>")?;
                if let Some(body_type) = body {
                    write!(f, " BODY={body_type}")?;
                }
                Ok(())
            }
            Self::RcptTo { to } => write!(f, "RCPT TO:<{to}>"),
            Self::Data => f.write_str("DATA"),
            Self::Rset => f.write_str("RSET"),
            Self::Noop => f.write_str("NOOP"),
            Self::Quit => f.write_str("QUIT"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greeting_commands() {
        let helo = Command::Helo {
            hostname: "client.example.com".to_string(),
        };
        let ehlo = Command::Ehlo {
            hostname: "localhost".to_string(),
        };
        assert_eq!(helo.to_string(), "HELO client.example.com");
        assert_eq!(ehlo.to_string(), "EHLO localhost");
    }

    #[test]
    fn test_auth_with_initial_response() {
        let cmd = Command::Auth {
            mechanism: "LOGIN".to_string(),
            initial_response: Some("dXNlcg==".to_string()),
        };
        assert_eq!(cmd.to_string(), "AUTH LOGIN dXNlcg==");
    }

    #[test]
    fn test_auth_without_initial_response() {
        let cmd = Command::Auth {
            mechanism: "XOAUTH2".to_string(),
            initial_response: None,
        };
        assert_eq!(cmd.to_string(), "AUTH XOAUTH2");
        assert_eq!(Command::AuthAbort.to_string(), "*");
        assert_eq!(Command::AuthResponse("cGFzcw==".into()).to_string(), "cGFzcw==");
    }

    #[test]
    fn test_mail_from() {
        let plain = Command::MailFrom {
            from: "sender@example.com".to_string(),
            body: None,
        };
        let eight_bit = Command::MailFrom {
            from: "sender@example.com".to_string(),
            body: Some("8BITMIME".to_string()),
        };
        assert_eq!(plain.to_string(), "MAIL FROM:<sender@example.com>");
        assert_eq!(
            eight_bit.to_string(),
            "MAIL FROM:<sender@example.com> BODY=8BITMIME"
        );
    }

    #[test]
    fn test_transaction_commands() {
        let rcpt = Command::RcptTo {
            to: "recipient@example.com".to_string(),
        };
        assert_eq!(rcpt.to_string(), "RCPT TO:<recipient@example.com>");
        assert_eq!(Command::Data.to_string(), "DATA");
        assert_eq!(Command::Rset.to_string(), "RSET");
        assert_eq!(Command::Noop.to_string(), "NOOP");
        assert_eq!(Command::Quit.to_string(), "QUIT");
        assert_eq!(Command::StartTls.to_string(), "STARTTLS");
    }
}
